//! Task environments.
//!
//! Every environment implements the [`Environment`] trait so that the batch
//! layer can drive instances uniformly.
//!
//! Included environments:
//! - **Browser** ([`browser`]) -- WebVoyager-style web tasks over a
//!   [`browser::BrowserDriver`], with a scripted in-memory driver for tests.
//! - **Text** ([`text`]) -- ALFWorld / WebShop servers reached over HTTP.

pub mod browser;
pub mod task;
pub mod text;
pub mod traits;

pub use browser::{BrowserEnv, BrowserEnvConfig};
pub use task::{Task, TaskSet};
pub use text::TextEnv;
pub use traits::{Environment, Observation, ResetOutcome, StepOutcome};
