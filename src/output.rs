//! Result types returned by [`crate::Pipeline::process_document`].
//!
//! The serialised form is the external contract:
//!
//! ```text
//! { "message": { "<required key>": "OK" | "Missing", ... },
//!   "xlsx": null,
//!   "tables_data": { ... } }
//! ```
//!
//! or `{ "error": "<description>" }` on any failure.

use crate::error::PipelineError;
use crate::schema::TablesData;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reconciliation status of one required sub-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    #[serde(rename = "OK")]
    Ok,
    Missing,
}

/// Successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Exactly the five required keys, in fixed order.
    pub message: IndexMap<String, TableStatus>,
    /// Reserved for a spreadsheet export; always `null`.
    pub xlsx: Option<Value>,
    pub tables_data: TablesData,
}

impl ExtractionReport {
    pub fn new(message: IndexMap<String, TableStatus>, tables_data: TablesData) -> Self {
        Self {
            message,
            xlsx: None,
            tables_data,
        }
    }

    /// Required sub-tables the model did not return.
    pub fn missing_tables(&self) -> Vec<&str> {
        self.message
            .iter()
            .filter(|(_, s)| **s == TableStatus::Missing)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Outcome of one document run. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineResult {
    Success(ExtractionReport),
    Failure { error: String },
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success(_))
    }

    pub fn report(&self) -> Option<&ExtractionReport> {
        match self {
            PipelineResult::Success(r) => Some(r),
            PipelineResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PipelineResult::Success(_) => None,
            PipelineResult::Failure { error } => Some(error),
        }
    }

    /// Serialise to the external JSON shape.
    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

impl From<Result<ExtractionReport, PipelineError>> for PipelineResult {
    fn from(result: Result<ExtractionReport, PipelineError>) -> Self {
        match result {
            Ok(report) => PipelineResult::Success(report),
            Err(e) => PipelineResult::Failure {
                error: e.to_string(),
            },
        }
    }
}
