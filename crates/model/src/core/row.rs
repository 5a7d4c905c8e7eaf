use crate::core::value::Value;
use serde::{Deserialize, Serialize};

/// One source row, positionally aligned with the run's mapped source columns.
///
/// `None` is SQL NULL and stays distinct from `Some(Value::Text(""))` all the
/// way to the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Option<Value>>,
}

impl Row {
    pub fn new(values: Vec<Option<Value>>) -> Self {
        Row { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).and_then(|v| v.as_ref())
    }

    pub fn size_bytes(&self) -> usize {
        self.values
            .iter()
            .map(|v| v.as_ref().map_or(0, Value::size_bytes))
            .sum()
    }
}
