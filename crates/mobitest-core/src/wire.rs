//! JSON wire format for the W3C WebDriver protocol with Appium extensions.
//!
//! Requests and responses are JSON bodies over HTTP. Every successful response
//! wraps its payload in a `value` field; error responses carry
//! `value.error` (a W3C error code) and `value.message`.
//!
//! # Pointer sequences
//!
//! A [`PointerSequence`] is sent as one `pointer` input source of type
//! `touch`:
//!
//! ```text
//! Press{x,y}          -> pointerMove(duration 0, x, y) + pointerDown
//! MoveTo{x,y,d}       -> pointerMove(duration d, x, y)
//! Wait{d}             -> pause(duration d)
//! Release             -> pointerUp
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::{BackendError, SessionId};
use crate::config::CapabilitySet;
use crate::element::{ElementId, Locator};
use crate::gesture::{PointerSequence, PointerStep};

/// W3C element reference key.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
/// JSON Wire Protocol element reference key, still returned by older drivers.
pub const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// One action of a W3C pointer input source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PointerAction {
    PointerMove {
        duration: u64,
        x: i32,
        y: i32,
        origin: String,
    },
    PointerDown {
        button: u8,
    },
    PointerUp {
        button: u8,
    },
    Pause {
        duration: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointerParameters {
    pointer_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InputSource {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    parameters: PointerParameters,
    actions: Vec<PointerAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionsBody {
    actions: Vec<InputSource>,
}

/// Expands a pointer sequence into W3C pointer actions.
pub fn pointer_actions(sequence: &PointerSequence) -> Vec<PointerAction> {
    let mut actions = Vec::with_capacity(sequence.steps().len() + 1);
    for step in sequence.steps() {
        match *step {
            PointerStep::Press { x, y } => {
                actions.push(PointerAction::PointerMove {
                    duration: 0,
                    x,
                    y,
                    origin: "viewport".to_string(),
                });
                actions.push(PointerAction::PointerDown { button: 0 });
            }
            PointerStep::MoveTo { x, y, duration_ms } => {
                actions.push(PointerAction::PointerMove {
                    duration: duration_ms,
                    x,
                    y,
                    origin: "viewport".to_string(),
                });
            }
            PointerStep::Wait { duration_ms } => {
                actions.push(PointerAction::Pause {
                    duration: duration_ms,
                });
            }
            PointerStep::Release => actions.push(PointerAction::PointerUp { button: 0 }),
        }
    }
    actions
}

/// Body for `POST /session/{id}/actions`.
pub fn encode_pointer_sequence(sequence: &PointerSequence) -> Value {
    let body = ActionsBody {
        actions: vec![InputSource {
            kind: "pointer".to_string(),
            id: sequence.pointer_id().to_string(),
            parameters: PointerParameters {
                pointer_type: "touch".to_string(),
            },
            actions: pointer_actions(sequence),
        }],
    };
    serde_json::to_value(body).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body for `POST /session`.
pub fn encode_capabilities(caps: &CapabilitySet) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": caps.to_w3c(),
            "firstMatch": [{}],
        }
    })
}

/// Body for `POST /session/{id}/element`.
pub fn encode_locator(locator: &Locator) -> Value {
    json!({
        "using": locator.strategy.as_str(),
        "value": locator.value,
    })
}

/// Body for `POST /session/{id}/execute/sync` running `mobile: <command>`.
pub fn encode_mobile_command(command: &str, args: Value) -> Value {
    let args = match args {
        Value::Null => vec![],
        other => vec![other],
    };
    json!({
        "script": format!("mobile: {command}"),
        "args": args,
    })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ErrorValue {
    error: String,
    #[serde(default)]
    message: String,
}

/// Maps an error response to a typed [`BackendError`].
pub fn classify_error(status: u16, body: &Value) -> BackendError {
    let parsed = body
        .get("value")
        .cloned()
        .and_then(|v| serde_json::from_value::<ErrorValue>(v).ok());

    let Some(ErrorValue { error, message }) = parsed else {
        return BackendError::Command {
            status,
            error: "unknown error".to_string(),
            message: body.to_string(),
        };
    };

    match error.as_str() {
        "no such element" => BackendError::NoSuchElement(message),
        "stale element reference" => BackendError::StaleElement(message),
        "invalid session id" => BackendError::InvalidSession(message),
        _ => BackendError::Command {
            status,
            error,
            message,
        },
    }
}

/// Extracts the `value` payload of a successful response.
pub fn take_value(mut body: Value) -> Result<Value, BackendError> {
    body.get_mut("value")
        .map(Value::take)
        .ok_or_else(|| BackendError::Decode(format!("response has no value field: {body}")))
}

/// Reads the session id from a new-session response value.
///
/// Accepts the W3C shape (`value.sessionId`) and the legacy top-level one.
pub fn decode_session_id(body: &Value) -> Result<SessionId, BackendError> {
    body.pointer("/value/sessionId")
        .or_else(|| body.get("sessionId"))
        .and_then(Value::as_str)
        .map(|id| SessionId(id.to_string()))
        .ok_or_else(|| BackendError::Decode(format!("no session id in response: {body}")))
}

/// Reads an element reference from a find-element response value.
pub fn decode_element_id(value: &Value) -> Result<ElementId, BackendError> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(|id| ElementId(id.to_string()))
        .ok_or_else(|| BackendError::Decode(format!("no element reference in {value}")))
}

pub fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}
