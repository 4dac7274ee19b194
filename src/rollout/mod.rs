//! Rollout management for browser agents.
//!
//! [`WebAgentRollout`] turns raw model responses into environment actions,
//! steps the batch and keeps the conversation log the next prompts are
//! built from.

pub mod manager;

pub use manager::{StepBatch, WebAgentRollout};
