//! Gesture synthesis: high-level intents to low-level pointer sequences.
//!
//! Every gesture is composed from four primitives only: press, move-to, wait
//! and release. Distances and start points are normalized (0.0 to 1.0) and
//! converted to pixels against the live screen size, so one intent works at
//! any device resolution.
//!
//! ```
//! use mobitest_core::element::ScreenSize;
//! use mobitest_core::gesture::{synthesize, Direction, GestureIntent, PointerStep};
//!
//! let intent = GestureIntent::swipe(Direction::Left, 0.5);
//! let sequences = synthesize(&intent, ScreenSize::new(1000, 2000)).unwrap();
//! assert_eq!(sequences.len(), 1);
//! assert_eq!(sequences[0].steps()[0], PointerStep::Press { x: 750, y: 1000 });
//! ```

use serde::{Deserialize, Serialize};

use crate::element::{Rect, ScreenSize};
use crate::error::AutomationError;

const DEFAULT_LONG_PRESS_MS: u64 = 2000;
const DEFAULT_MOVE_MS: u64 = 500;
const DEFAULT_PINCH_DISTANCE: f64 = 0.3;
const DEFAULT_EDGE_INSET: f64 = 0.08;
const DEFAULT_PULL_DISTANCE: f64 = 0.4;
const PULL_HOLD_MS: u64 = 1000;
const PULL_START: NormalizedPoint = NormalizedPoint { x: 0.5, y: 0.2 };

/// Press position from an edge, as a fraction of the axis. Stays within 1%.
const EDGE_MARGIN: f64 = 0.005;
/// Fraction of the axis covered by a content scroll.
pub const SCROLL_DISTANCE: f64 = 0.6;
/// Distance from the centre at which converging pinch fingers stop.
const PINCH_INNER_OFFSET: f64 = 0.05;

// ---------------------------------------------------------------------------
// Intent types
// ---------------------------------------------------------------------------

/// A point in normalized screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub const CENTER: NormalizedPoint = NormalizedPoint { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn validate(self, what: &str) -> Result<Self, AutomationError> {
        if in_unit_range(self.x) && in_unit_range(self.y) {
            Ok(self)
        } else {
            Err(AutomationError::InvalidGesture(format!(
                "{what} ({}, {}) is outside the 0.0-1.0 range",
                self.x, self.y
            )))
        }
    }

    fn to_pixels(self, screen: ScreenSize) -> (i32, i32) {
        (
            (self.x * f64::from(screen.width)).round() as i32,
            (self.y * f64::from(screen.height)).round() as i32,
        )
    }
}

/// Direction the finger travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Unit vector in normalized screen space (y grows downwards).
    fn vector(self) -> (f64, f64) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinchDirection {
    /// Fingers converge on the centre (zoom out).
    In,
    /// Fingers diverge from the centre (zoom in).
    Out,
}

/// Where a tap or long press lands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureTarget {
    /// Centre of a resolved element's bounds.
    Element(Rect),
    Point(NormalizedPoint),
}

impl GestureTarget {
    fn to_pixels(self, screen: ScreenSize) -> Result<(i32, i32), AutomationError> {
        match self {
            GestureTarget::Element(rect) => {
                let (x, y) = rect.center();
                Ok((x.round() as i32, y.round() as i32))
            }
            GestureTarget::Point(point) => Ok(point.validate("target")?.to_pixels(screen)),
        }
    }
}

/// A high-level user interaction. Pure value, carries no session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GestureIntent {
    Tap {
        target: GestureTarget,
    },
    LongPress {
        target: GestureTarget,
        #[serde(default = "default_long_press_ms")]
        duration_ms: u64,
    },
    Swipe {
        direction: Direction,
        /// Travel along the axis, as a fraction of that axis.
        distance: f64,
        /// Press position; `None` centres the swipe on the screen.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<NormalizedPoint>,
        #[serde(default = "default_move_ms")]
        duration_ms: u64,
    },
    Pinch {
        direction: PinchDirection,
        #[serde(default = "default_pinch_distance")]
        distance: f64,
        #[serde(default = "default_move_ms")]
        duration_ms: u64,
    },
    EdgeSwipe {
        edge: Edge,
        /// How far inward the finger travels (0.05 to 0.10).
        #[serde(default = "default_edge_inset")]
        inset: f64,
        #[serde(default = "default_move_ms")]
        duration_ms: u64,
    },
    PullToRefresh {
        #[serde(default = "default_pull_distance")]
        distance: f64,
    },
}

fn default_long_press_ms() -> u64 {
    DEFAULT_LONG_PRESS_MS
}

fn default_move_ms() -> u64 {
    DEFAULT_MOVE_MS
}

fn default_pinch_distance() -> f64 {
    DEFAULT_PINCH_DISTANCE
}

fn default_edge_inset() -> f64 {
    DEFAULT_EDGE_INSET
}

fn default_pull_distance() -> f64 {
    DEFAULT_PULL_DISTANCE
}

impl GestureIntent {
    pub fn tap(target: GestureTarget) -> Self {
        GestureIntent::Tap { target }
    }

    pub fn long_press(target: GestureTarget) -> Self {
        GestureIntent::LongPress {
            target,
            duration_ms: DEFAULT_LONG_PRESS_MS,
        }
    }

    /// A centred swipe with the default move duration.
    pub fn swipe(direction: Direction, distance: f64) -> Self {
        GestureIntent::Swipe {
            direction,
            distance,
            start: None,
            duration_ms: DEFAULT_MOVE_MS,
        }
    }

    /// Scrolls content towards `direction`: the finger swipes the opposite way.
    pub fn scroll(direction: Direction) -> Self {
        Self::swipe(direction.opposite(), SCROLL_DISTANCE)
    }

    pub fn pinch(direction: PinchDirection) -> Self {
        GestureIntent::Pinch {
            direction,
            distance: DEFAULT_PINCH_DISTANCE,
            duration_ms: DEFAULT_MOVE_MS,
        }
    }

    pub fn edge_swipe(edge: Edge) -> Self {
        GestureIntent::EdgeSwipe {
            edge,
            inset: DEFAULT_EDGE_INSET,
            duration_ms: DEFAULT_MOVE_MS,
        }
    }

    pub fn pull_to_refresh() -> Self {
        GestureIntent::PullToRefresh {
            distance: DEFAULT_PULL_DISTANCE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GestureIntent::Tap { .. } => "tap",
            GestureIntent::LongPress { .. } => "long_press",
            GestureIntent::Swipe { .. } => "swipe",
            GestureIntent::Pinch { .. } => "pinch",
            GestureIntent::EdgeSwipe { .. } => "edge_swipe",
            GestureIntent::PullToRefresh { .. } => "pull_to_refresh",
        }
    }
}

// ---------------------------------------------------------------------------
// Pointer sequences
// ---------------------------------------------------------------------------

/// One primitive pointer step in absolute pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointerStep {
    Press { x: i32, y: i32 },
    MoveTo { x: i32, y: i32, duration_ms: u64 },
    Wait { duration_ms: u64 },
    Release,
}

/// Ordered primitive steps for a single finger.
///
/// Only produced by [`synthesize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointerSequence {
    pointer_id: String,
    steps: Vec<PointerStep>,
}

impl PointerSequence {
    fn new(pointer_id: &str, steps: Vec<PointerStep>) -> Self {
        Self {
            pointer_id: pointer_id.to_string(),
            steps,
        }
    }

    pub fn pointer_id(&self) -> &str {
        &self.pointer_id
    }

    pub fn steps(&self) -> &[PointerStep] {
        &self.steps
    }

    /// Coordinates of the initial press.
    pub fn press_point(&self) -> Option<(i32, i32)> {
        self.steps.iter().find_map(|step| match step {
            PointerStep::Press { x, y } => Some((*x, *y)),
            _ => None,
        })
    }

    /// Coordinates of the final move, if the sequence moves at all.
    pub fn end_point(&self) -> Option<(i32, i32)> {
        self.steps.iter().rev().find_map(|step| match step {
            PointerStep::MoveTo { x, y, .. } => Some((*x, *y)),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

fn in_unit_range(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn press_move_release(
    pointer_id: &str,
    from: (i32, i32),
    to: (i32, i32),
    duration_ms: u64,
) -> PointerSequence {
    PointerSequence::new(
        pointer_id,
        vec![
            PointerStep::Press {
                x: from.0,
                y: from.1,
            },
            PointerStep::MoveTo {
                x: to.0,
                y: to.1,
                duration_ms,
            },
            PointerStep::Release,
        ],
    )
}

fn validate_distance(distance: f64, what: &str) -> Result<(), AutomationError> {
    if distance > 0.0 && distance <= 1.0 {
        Ok(())
    } else {
        Err(AutomationError::InvalidGesture(format!(
            "{what} distance {distance} must be in (0.0, 1.0]"
        )))
    }
}

/// Translates an intent into the pointer sequences to dispatch, in order.
///
/// Pinch yields two sequences (one per finger) that are dispatched one after
/// the other; every other gesture yields exactly one.
pub fn synthesize(
    intent: &GestureIntent,
    screen: ScreenSize,
) -> Result<Vec<PointerSequence>, AutomationError> {
    if screen.width == 0 || screen.height == 0 {
        return Err(AutomationError::InvalidGesture(format!(
            "screen size {}x{} has no area",
            screen.width, screen.height
        )));
    }

    let sequences = match *intent {
        GestureIntent::Tap { target } => {
            let (x, y) = target.to_pixels(screen)?;
            vec![PointerSequence::new(
                "finger1",
                vec![PointerStep::Press { x, y }, PointerStep::Release],
            )]
        }
        GestureIntent::LongPress {
            target,
            duration_ms,
        } => {
            let (x, y) = target.to_pixels(screen)?;
            vec![PointerSequence::new(
                "finger1",
                vec![
                    PointerStep::Press { x, y },
                    PointerStep::Wait { duration_ms },
                    PointerStep::Release,
                ],
            )]
        }
        GestureIntent::Swipe {
            direction,
            distance,
            start,
            duration_ms,
        } => {
            validate_distance(distance, "swipe")?;
            let (dx, dy) = direction.vector();
            let start = start.unwrap_or(NormalizedPoint {
                x: 0.5 - dx * distance / 2.0,
                y: 0.5 - dy * distance / 2.0,
            });
            let start = start.validate("swipe start")?;
            let end = NormalizedPoint::new(start.x + dx * distance, start.y + dy * distance)
                .validate("swipe end")?;
            vec![press_move_release(
                "finger1",
                start.to_pixels(screen),
                end.to_pixels(screen),
                duration_ms,
            )]
        }
        GestureIntent::Pinch {
            direction,
            distance,
            duration_ms,
        } => {
            let outer = PINCH_INNER_OFFSET + distance / 2.0;
            if !(distance > 0.0 && outer <= 0.5) {
                return Err(AutomationError::InvalidGesture(format!(
                    "pinch distance {distance} must be in (0.0, {}]",
                    2.0 * (0.5 - PINCH_INNER_OFFSET)
                )));
            }
            let (from, to) = match direction {
                PinchDirection::In => (outer, PINCH_INNER_OFFSET),
                PinchDirection::Out => (PINCH_INNER_OFFSET, outer),
            };
            let c = NormalizedPoint::CENTER;
            let finger = |id: &str, sign: f64| {
                press_move_release(
                    id,
                    NormalizedPoint::new(c.x + sign * from, c.y).to_pixels(screen),
                    NormalizedPoint::new(c.x + sign * to, c.y).to_pixels(screen),
                    duration_ms,
                )
            };
            vec![finger("finger1", -1.0), finger("finger2", 1.0)]
        }
        GestureIntent::EdgeSwipe {
            edge,
            inset,
            duration_ms,
        } => {
            if !(0.05..=0.10).contains(&inset) {
                return Err(AutomationError::InvalidGesture(format!(
                    "edge swipe inset {inset} must be between 0.05 and 0.10"
                )));
            }
            let (from, to) = match edge {
                Edge::Left => (
                    NormalizedPoint::new(EDGE_MARGIN, 0.5),
                    NormalizedPoint::new(inset, 0.5),
                ),
                Edge::Right => (
                    NormalizedPoint::new(1.0 - EDGE_MARGIN, 0.5),
                    NormalizedPoint::new(1.0 - inset, 0.5),
                ),
                Edge::Top => (
                    NormalizedPoint::new(0.5, EDGE_MARGIN),
                    NormalizedPoint::new(0.5, inset),
                ),
                Edge::Bottom => (
                    NormalizedPoint::new(0.5, 1.0 - EDGE_MARGIN),
                    NormalizedPoint::new(0.5, 1.0 - inset),
                ),
            };
            vec![press_move_release(
                "finger1",
                from.to_pixels(screen),
                to.to_pixels(screen),
                duration_ms,
            )]
        }
        GestureIntent::PullToRefresh { distance } => {
            validate_distance(distance, "pull")?;
            let end = NormalizedPoint::new(PULL_START.x, PULL_START.y + distance)
                .validate("pull end")?;
            let (px, py) = PULL_START.to_pixels(screen);
            let (ex, ey) = end.to_pixels(screen);
            vec![PointerSequence::new(
                "finger1",
                vec![
                    PointerStep::Press { x: px, y: py },
                    PointerStep::Wait {
                        duration_ms: PULL_HOLD_MS,
                    },
                    PointerStep::MoveTo {
                        x: ex,
                        y: ey,
                        duration_ms: DEFAULT_MOVE_MS,
                    },
                    PointerStep::Release,
                ],
            )]
        }
    };

    Ok(sequences)
}
