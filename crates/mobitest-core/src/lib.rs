//! # mobitest-core
//!
//! Core library for cross-platform mobile UI automation over the WebDriver
//! protocol (Appium-style servers driving UiAutomator2 on Android and
//! XCUITest on iOS).
//!
//! ## Modules
//!
//! Leaf-first:
//!
//! - [`config`] - Capability sets, capability matrices and runner configuration
//! - [`backend`] - The [`AutomationBackend`](backend::AutomationBackend) trait every session talks to
//! - [`wire`] / [`client`] - W3C WebDriver encoding and the HTTP client implementing the backend
//! - [`wait`] - Polling waits with typed timeouts, the only place that retries
//! - [`gesture`] - Gesture intents and their pointer sequences
//! - [`strategy`] / [`platform`] - Per-platform selector resolution and the unified action API
//! - [`device`] - App lifecycle, contexts, network, battery, memory, recording
//! - [`session`] / [`lifecycle`] - One session from creation to guaranteed teardown
//! - [`coordinator`] - Bounded parallel runs over a capability matrix
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use mobitest_core::artifacts::ArtifactStore;
//! use mobitest_core::client::WebDriverClient;
//! use mobitest_core::config::{CapabilityMatrix, RunnerConfig};
//! use mobitest_core::coordinator::Coordinator;
//! use mobitest_core::result::RunSummary;
//! use mobitest_core::step::{Scenario, TestPlan};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunnerConfig::load();
//! let matrix = CapabilityMatrix::load("devices.json".as_ref())?;
//! let plan = TestPlan::load("plan.json".as_ref())?;
//!
//! let client = WebDriverClient::new(&config.endpoint, config.command_timeout())?;
//! let coordinator = Coordinator::new(
//!     Arc::new(client),
//!     Scenario::from(plan),
//!     ArtifactStore::new(config.artifacts_dir()),
//! );
//!
//! let started = Instant::now();
//! let results = coordinator.run(&matrix, config.max_instances).await;
//! let summary = RunSummary::from_results(&results, started.elapsed());
//! println!("{}/{} sessions passed", summary.passed, summary.total);
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod backend;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod element;
pub mod error;
pub mod gesture;
pub mod lifecycle;
pub mod platform;
pub mod result;
pub mod session;
pub mod step;
pub mod strategy;
pub mod wait;
pub mod wire;
