//! Step records and the columnar batches they are stored from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step snapshot for one instance: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryRecord(Map<String, Value>);

impl HistoryRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The field as a string slice, if it holds a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// The field as a non-empty string.
    pub fn non_empty_str(&self, field: &str) -> Option<&str> {
        self.get_str(field).filter(|s| !s.is_empty())
    }

    /// Display form: strings raw, `null` (or absent) empty, anything else as JSON.
    pub fn render(&self, field: &str) -> String {
        match self.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// One store call's worth of data: ordered `(field, per-instance values)` columns.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    columns: Vec<(String, Vec<Value>)>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. Values are converted with `Into<Value>`.
    pub fn column<V, I>(mut self, field: impl Into<String>, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        self.columns
            .push((field.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// Field names in column order.
    pub fn fields(&self) -> Vec<String> {
        self.columns.iter().map(|(f, _)| f.clone()).collect()
    }

    pub(crate) fn columns(&self) -> &[(String, Vec<Value>)] {
        &self.columns
    }

    /// Split the columns into one record per instance. Callers must have
    /// checked that every column has `batch_size` values.
    pub(crate) fn into_records(self, batch_size: usize) -> Vec<HistoryRecord> {
        let mut records = vec![HistoryRecord::default(); batch_size];
        for (field, values) in self.columns {
            for (record, value) in records.iter_mut().zip(values) {
                record.0.insert(field.clone(), value);
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn columns_become_rows() {
        let batch = RecordBatch::new()
            .column("user_text", ["a", "b"])
            .column("reward", [json!(1.5), Value::Null]);
        assert_eq!(batch.fields(), vec!["user_text", "reward"]);

        let rows = batch.into_records(2);
        assert_eq!(rows[1].get_str("user_text"), Some("b"));
        assert_eq!(rows[0].render("reward"), "1.5");
        assert_eq!(rows[1].render("reward"), "");
        assert_eq!(rows[1].render("missing"), "");
    }

    #[test]
    fn empty_string_is_not_non_empty() {
        let rows = RecordBatch::new().column("image_path", [""]).into_records(1);
        assert!(rows[0].non_empty_str("image_path").is_none());
        assert_eq!(rows[0].get_str("image_path"), Some(""));
    }
}
