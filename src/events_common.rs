// Reexport the time struct from model.rs
pub use crate::model::Time;

use std::collections::HashMap;

use derive_more::derive::From;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("event `{event}` has no field `{field}`")]
pub struct MissingField {
    event: String,
    field: String,
}

/// One value of an event payload field.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum FieldValue {
    I64(i64),
    U64(u64),
    Str(String),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

/// A single timestamped trace event.
///
/// Events arrive strictly ordered by trace rank and are consumed exactly
/// once. Field access is by name; absence of a field is an expected
/// condition at this level, so the accessors return `Option` and callers
/// decide whether to skip or propagate.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    host: String,
    cpu: u32,
    name: String,
    timestamp: Time,
    fields: HashMap<String, FieldValue>,
}

impl Event {
    pub fn new(
        host: impl Into<String>,
        cpu: u32,
        name: impl Into<String>,
        timestamp: Time,
    ) -> Self {
        Self {
            host: host.into(),
            cpu,
            name: name.into(),
            timestamp,
            fields: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn cpu(&self) -> u32 {
        self.cpu
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn timestamp(&self) -> Time {
        self.timestamp
    }

    pub fn field_i64(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            FieldValue::I64(value) => Some(*value),
            FieldValue::U64(value) => (*value).try_into().ok(),
            FieldValue::Str(_) => None,
        }
    }

    pub fn field_u64(&self, name: &str) -> Option<u64> {
        match self.fields.get(name)? {
            FieldValue::U64(value) => Some(*value),
            FieldValue::I64(value) => (*value).try_into().ok(),
            FieldValue::Str(_) => None,
        }
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn require_i64(&self, name: &str) -> Result<i64, MissingField> {
        self.field_i64(name).ok_or_else(|| MissingField {
            event: self.name.clone(),
            field: name.to_owned(),
        })
    }
}
