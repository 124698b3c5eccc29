//! The analyzer seam: whatever reads the image and produces result records

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AnalyzerError;
use crate::image_input::OpenedImage;

/// Value of a caller-supplied variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Variable name to value, used as evaluation context
pub type VariableMap = BTreeMap<String, VariableValue>;

/// One result produced by an analyzer. The shape is owned by the analyzer;
/// the endpoint passes records through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisRecord(Map<String, Value>);

impl AnalysisRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn expr(&self) -> Option<&str> {
        self.0.get("expr").and_then(Value::as_str)
    }

    pub fn result(&self) -> Option<&Value> {
        self.0.get("result")
    }

    pub fn is_assignment(&self) -> bool {
        self.0.get("assign").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Insert `value` under `key` unless the key is already present
    pub fn set_default(&mut self, key: &str, value: Value) {
        self.0.entry(key.to_string()).or_insert(value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for AnalysisRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Interprets an image in the context of a variable mapping
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    /// Analyze `image`, returning records in the order they were produced.
    async fn analyze(
        &self,
        image: OpenedImage,
        vars: &VariableMap,
    ) -> Result<Vec<AnalysisRecord>, AnalyzerError>;

    /// Whether the analyzer has what it needs to serve requests
    fn is_configured(&self) -> bool {
        true
    }
}
