use tracing::debug;

use crate::error::{HarnessError, Result};

use super::history::HistoryWindow;
use super::record::{HistoryRecord, RecordBatch};

/// Append-only per-instance step logs for a rollout batch.
///
/// The field set of the first [`store`](Self::store) after a
/// [`reset`](Self::reset) becomes the schema; later calls must use the same
/// field names in the same order.
#[derive(Debug, Default)]
pub struct HistoryStore {
    logs: Vec<Vec<HistoryRecord>>,
    fields: Option<Vec<String>>,
    steps: usize,
    pub(super) window: HistoryWindow,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window: HistoryWindow) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    pub fn window(&self) -> HistoryWindow {
        self.window
    }

    /// Drop all logs, allocate `batch_size` empty ones, and clear the schema.
    pub fn reset(&mut self, batch_size: usize) {
        self.logs = vec![Vec::new(); batch_size];
        self.fields = None;
        self.steps = 0;
        debug!(batch_size, "history store reset");
    }

    /// Append one record per instance. Nothing is appended if validation fails.
    pub fn store(&mut self, batch: RecordBatch) -> Result<()> {
        let found = batch.fields();
        if let Some(expected) = &self.fields {
            if *expected != found {
                return Err(HarnessError::SchemaMismatch {
                    expected: expected.clone(),
                    found,
                });
            }
        }
        let expected = self.logs.len();
        if let Some((field, values)) = batch.columns().iter().find(|(_, v)| v.len() != expected) {
            return Err(HarnessError::ColumnLength {
                field: field.clone(),
                expected,
                found: values.len(),
            });
        }

        if self.fields.is_none() {
            self.fields = Some(found);
        }
        for (log, record) in self.logs.iter_mut().zip(batch.into_records(expected)) {
            log.push(record);
        }
        self.steps += 1;
        Ok(())
    }

    /// Compact per-instance summaries of the last `history_length` records.
    ///
    /// Each record renders as `[Observation k: '<obs>', Action k: '<act>']`
    /// with `k` the absolute 1-based step number. Also returns how many
    /// records each summary covers.
    pub fn fetch(
        &self,
        history_length: usize,
        obs_key: &str,
        action_key: &str,
    ) -> Result<(Vec<String>, Vec<usize>)> {
        if let Some(fields) = &self.fields {
            for key in [obs_key, action_key] {
                if !fields.iter().any(|f| f == key) {
                    return Err(HarnessError::UnknownField { field: key.into() });
                }
            }
        }

        let (contexts, lengths) = self
            .logs
            .iter()
            .map(|log| {
                let start = log.len().saturating_sub(history_length);
                let lines: Vec<String> = log[start..]
                    .iter()
                    .enumerate()
                    .map(|(j, rec)| {
                        let k = start + j + 1;
                        format!(
                            "[Observation {k}: '{}', Action {k}: '{}']",
                            rec.render(obs_key),
                            rec.render(action_key),
                        )
                    })
                    .collect();
                (lines.join("\n"), log.len() - start)
            })
            .unzip();
        Ok((contexts, lengths))
    }

    /// Number of instances.
    pub fn batch_size(&self) -> usize {
        self.logs.len()
    }

    /// Number of steps stored since the last reset.
    pub fn len(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }

    /// The locked field set, once something has been stored.
    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    /// All records of one instance, oldest first.
    pub fn instance(&self, idx: usize) -> Result<&[HistoryRecord]> {
        self.logs
            .get(idx)
            .map(Vec::as_slice)
            .ok_or(HarnessError::InstanceOutOfRange {
                index: idx,
                len: self.logs.len(),
            })
    }

    pub(super) fn logs(&self) -> &[Vec<HistoryRecord>] {
        &self.logs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn step(obs: [&str; 2], act: [&str; 2]) -> RecordBatch {
        RecordBatch::new()
            .column("user_text", obs)
            .column("action", act)
    }

    #[test]
    fn schema_is_locked_by_first_store() {
        let mut store = HistoryStore::new();
        store.reset(2);
        store.store(step(["o1", "o1"], ["a1", "a1"])).unwrap();

        let swapped = RecordBatch::new()
            .column("action", ["a", "a"])
            .column("user_text", ["o", "o"]);
        let err = store.store(swapped).unwrap_err();
        assert!(matches!(err, HarnessError::SchemaMismatch { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.instance(0).unwrap().len(), 1);
    }

    #[test]
    fn reset_clears_schema_lock() {
        let mut store = HistoryStore::new();
        store.reset(1);
        store.store(RecordBatch::new().column("x", [1])).unwrap();
        store.reset(1);
        store.store(RecordBatch::new().column("y", [2])).unwrap();
        assert_eq!(store.fields().unwrap(), ["y".to_string()]);
    }

    #[test]
    fn wrong_column_length_appends_nothing() {
        let mut store = HistoryStore::new();
        store.reset(3);
        let err = store
            .store(RecordBatch::new().column("user_text", ["a", "b"]))
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ColumnLength {
                expected: 3,
                found: 2,
                ..
            }
        ));
        assert!(store.is_empty());
        assert!(store.fields().is_none());
        assert!(store.instance(2).unwrap().is_empty());
    }

    #[test]
    fn fetch_uses_absolute_step_numbers() {
        let mut store = HistoryStore::new();
        store.reset(2);
        for k in 1..=4 {
            let o = format!("o{k}");
            let a = format!("a{k}");
            store
                .store(step([o.as_str(), "x"], [a.as_str(), "y"]))
                .unwrap();
        }
        let (ctx, lens) = store.fetch(2, "user_text", "action").unwrap();
        assert_eq!(
            ctx[0],
            "[Observation 3: 'o3', Action 3: 'a3']\n[Observation 4: 'o4', Action 4: 'a4']"
        );
        assert_eq!(lens, vec![2, 2]);

        let (_, lens) = store.fetch(10, "user_text", "action").unwrap();
        assert_eq!(lens, vec![4, 4]);
    }

    #[test]
    fn fetch_renders_non_string_values() {
        let mut store = HistoryStore::new();
        store.reset(1);
        store
            .store(
                RecordBatch::new()
                    .column("user_text", [Value::Null])
                    .column("action", [json!({"action_key": "wait"})]),
            )
            .unwrap();
        let (ctx, _) = store.fetch(1, "user_text", "action").unwrap();
        assert_eq!(ctx[0], r#"[Observation 1: '', Action 1: '{"action_key":"wait"}']"#);
    }

    #[test]
    fn fetch_rejects_unknown_fields() {
        let mut store = HistoryStore::new();
        store.reset(1);
        store.store(step_one()).unwrap();
        let err = store.fetch(1, "text_obs", "action").unwrap_err();
        assert!(matches!(err, HarnessError::UnknownField { field } if field == "text_obs"));
    }

    fn step_one() -> RecordBatch {
        RecordBatch::new()
            .column("user_text", ["o"])
            .column("action", ["a"])
    }

    #[test]
    fn instance_out_of_range() {
        let mut store = HistoryStore::new();
        store.reset(2);
        assert!(matches!(
            store.instance(2),
            Err(HarnessError::InstanceOutOfRange { index: 2, len: 2 })
        ));
    }
}
