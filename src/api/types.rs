//! Serde request/response types for the KitchenCoach API.
//!
//! Field names follow the server's camelCase JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Training modules
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
  Text,
  Video,
  Quiz,
  Checklist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSection {
  pub title: String,
  pub content: String,
  #[serde(rename = "type")]
  pub kind: SectionKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleContent {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sections: Option<Vec<ModuleSection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModuleRequest {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub content: ModuleContent,
  /// Minutes
  #[serde(skip_serializing_if = "Option::is_none")]
  pub estimated_duration: Option<u32>,
}

impl CreateModuleRequest {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      description: None,
      content: ModuleContent::default(),
      estimated_duration: None,
    }
  }
}

/// Partial update; absent fields are left alone by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModuleRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content: Option<ModuleContent>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub estimated_duration: Option<u32>,
}

impl UpdateModuleRequest {
  pub fn is_empty(&self) -> bool {
    self == &Self::default()
  }
}

// ============================================================================
// Assignments
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignModuleRequest {
  pub module_id: String,
  pub assigned_to: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteAssignmentRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub score: Option<u32>,
}

// ============================================================================
// Checklists
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteRunRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// `{ "error": "..." }` body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
  pub error: String,
}

/// Unwrap the server's `{ "data": ... }` envelope when present.
pub(crate) fn unwrap_data(body: &[u8]) -> serde_json::Result<Value> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }

  let mut value: Value = serde_json::from_slice(body)?;
  if let Some(data) = value.get_mut("data") {
    return Ok(data.take());
  }
  Ok(value)
}
