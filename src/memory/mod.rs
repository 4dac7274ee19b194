//! Conversation history for batched rollouts.
//!
//! [`HistoryStore`] keeps one append-only log of [`HistoryRecord`]s per
//! environment instance. Two read paths are derived from it:
//! [`HistoryStore::fetch`] for compact text summaries, and
//! [`HistoryStore::build_message_history`] for multi-modal chat histories
//! with older observations compressed and screenshots capped.

pub mod history;
pub mod record;
pub mod store;

pub use history::{HistoryWindow, ANSWER_REMINDER, INTRO_MARKER, INTRO_PREFIX, PLACEHOLDER};
pub use record::{HistoryRecord, RecordBatch};
pub use store::HistoryStore;
