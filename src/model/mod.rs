//! Model-side plumbing: chat messages, the inference client, prompt templates
//! and JSONL prompt loaders.
//!
//! - [`message`] -- [`Message`] / [`ContentBlock`], shared with the history store.
//! - [`api::InferenceClient`] -- OpenAI-compatible chat completions, single and batched.
//! - [`prompt`] -- system prompts and per-step user texts.
//! - [`data_loader`] -- role-tagged prompt parsing and trajectory JSONL readers.

pub mod api;
pub mod data_loader;
pub mod message;
pub mod prompt;

pub use api::{Completion, InferenceClient, SamplingParams};
pub use message::{Content, ContentBlock, ImageSource, Message, Role};
