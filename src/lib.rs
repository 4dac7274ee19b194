//! webgym: action projection, conversation memory and batched environments
//! for reinforcement-learning rollouts of web and text agents.
//!
//! Raw model responses are projected onto structured actions
//! ([`projection`]), dispatched to a batch of environment instances
//! ([`dispatch`], [`env`]), and recorded in a per-instance history
//! ([`memory`]) from which the next prompts are rebuilt. [`rollout`] ties
//! the loop together for browser agents.

pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod memory;
pub mod model;
pub mod projection;
pub mod rollout;
pub mod util;
