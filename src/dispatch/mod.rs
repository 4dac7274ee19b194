//! Batch dispatch: many environment instances behind one call.
//!
//! [`BatchEnv`] fans `reset` and `step` out to every instance concurrently,
//! waits for all of them and returns results in instance order.

pub mod batch;

pub use batch::BatchEnv;
