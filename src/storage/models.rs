use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BoardError, BoardResult};

/// Message record as it arrives from callers or older persisted data.
///
/// Every synonym gets its own slot; the normalizer picks the first non-empty one.
/// Values stay as raw JSON so numbers and booleans survive until coercion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, rename = "studentName", skip_serializing_if = "Option::is_none")]
    pub student_name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, rename = "student-name", skip_serializing_if = "Option::is_none")]
    pub student_name_dashed: Option<Value>,

    #[serde(default, rename = "studentId", skip_serializing_if = "Option::is_none")]
    pub student_id: Option<Value>,
    #[serde(default, rename = "student-id", skip_serializing_if = "Option::is_none")]
    pub student_id_dashed: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_number: Option<Value>,

    #[serde(default, rename = "className", skip_serializing_if = "Option::is_none")]
    pub class_name: Option<Value>,
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class: Option<Value>,
    #[serde(default, rename = "class-name", skip_serializing_if = "Option::is_none")]
    pub class_name_dashed: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, rename = "message-body", skip_serializing_if = "Option::is_none")]
    pub message_body: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    /// Ignored on input: status is derived from replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<Value>,
}

impl RawMessage {
    /// Interprets an arbitrary JSON value as a raw record.
    pub fn from_value(value: Value) -> BoardResult<Self> {
        if !value.is_object() {
            return Err(BoardError::Validation(
                "message data must be a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn with_content(student_name: &str, content: &str) -> Self {
        Self {
            student_name: Some(Value::from(student_name)),
            content: Some(Value::from(content)),
            ..Self::default()
        }
    }
}

/// Reply record as it arrives from callers or persisted data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl RawReply {
    pub fn from_value(value: Value) -> BoardResult<Self> {
        if !value.is_object() {
            return Err(BoardError::Validation(
                "reply data must be a JSON object".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn new(author: Option<&str>, content: &str) -> Self {
        Self {
            author: author.map(Value::from),
            content: Some(Value::from(content)),
            ..Self::default()
        }
    }
}

/// Field edits accepted by `update`. Unknown keys are rejected at parse time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MessageUpdate {
    #[serde(default)]
    pub title: Option<Value>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub student_name: Option<Value>,
    #[serde(default)]
    pub student_id: Option<Value>,
    #[serde(default)]
    pub class_name: Option<Value>,
}

impl MessageUpdate {
    pub fn from_value(value: Value) -> BoardResult<Self> {
        if !value.is_object() {
            return Err(BoardError::Validation(
                "update fields must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|err| BoardError::Validation(err.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.timestamp.is_none()
            && self.status.is_none()
            && self.student_name.is_none()
            && self.student_id.is_none()
            && self.class_name.is_none()
    }
}
