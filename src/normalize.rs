//! Record normalizer.
//!
//! Turns loosely shaped message and reply records into the canonical types. Optional
//! metadata falls back to placeholders; only an empty body rejects a record.

use std::collections::HashSet;

use serde_json::Value;

use crate::clock::Stamper;
use crate::common::{Message, MessageStatus, Reply};
use crate::error::{BoardError, BoardResult};
use crate::storage::models::{RawMessage, RawReply};

pub const UNKNOWN_STUDENT: &str = "unknown student";
pub const UNKNOWN_STUDENT_ID: &str = "unknown id";
pub const UNASSIGNED_CLASS: &str = "unassigned class";
pub const UNTITLED: &str = "untitled";
pub const DEFAULT_AUTHOR: &str = "administrator";

/// Coerces a scalar JSON value to trimmed text. Empty text counts as absent.
pub fn text(value: Option<&Value>) -> Option<String> {
    let raw = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

fn first_text(candidates: &[&Option<Value>]) -> Option<String> {
    candidates.iter().find_map(|&slot| text(slot.as_ref()))
}

/// Normalizes one message record.
pub fn normalize_message(raw: &RawMessage, stamper: &dyn Stamper) -> BoardResult<Message> {
    let content = first_text(&[&raw.content, &raw.message, &raw.message_body])
        .ok_or_else(|| BoardError::Validation("message content is empty".to_string()))?;

    let replies = normalize_replies(raw.replies.as_ref(), stamper);
    let mut message = Message {
        id: text(raw.id.as_ref()).unwrap_or_else(|| stamper.next_id()),
        student_name: first_text(&[&raw.student_name, &raw.name, &raw.student_name_dashed])
            .unwrap_or_else(|| UNKNOWN_STUDENT.to_string()),
        student_id: first_text(&[&raw.student_id, &raw.student_id_dashed, &raw.id_number])
            .unwrap_or_else(|| UNKNOWN_STUDENT_ID.to_string()),
        class_name: first_text(&[&raw.class_name, &raw.class, &raw.class_name_dashed])
            .unwrap_or_else(|| UNASSIGNED_CLASS.to_string()),
        title: first_text(&[&raw.title, &raw.subject]).unwrap_or_else(|| UNTITLED.to_string()),
        content,
        timestamp: text(raw.timestamp.as_ref()).unwrap_or_else(|| stamper.now()),
        status: MessageStatus::Pending,
        replies,
    };
    message.sync_status();
    Ok(message)
}

pub fn normalize_reply(raw: &RawReply, stamper: &dyn Stamper) -> BoardResult<Reply> {
    let content = first_text(&[&raw.content, &raw.message])
        .ok_or_else(|| BoardError::Validation("reply content is empty".to_string()))?;
    Ok(Reply {
        id: text(raw.id.as_ref()).unwrap_or_else(|| stamper.next_id()),
        author: first_text(&[&raw.author, &raw.teacher])
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
        content,
        timestamp: text(raw.timestamp.as_ref()).unwrap_or_else(|| stamper.now()),
    })
}

/// Keeps valid replies in their stored order; anything else is dropped.
pub fn normalize_replies(value: Option<&Value>, stamper: &dyn Stamper) -> Vec<Reply> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let raw = RawReply::from_value(entry.clone()).ok()?;
            match normalize_reply(&raw, stamper) {
                Ok(reply) => Some(reply),
                Err(err) => {
                    log::debug!("Dropping reply: {err}");
                    None
                }
            }
        })
        .collect()
}

/// Bulk normalization applied to every loaded collection.
///
/// Invalid entries are skipped. A repeated id keeps the first record and re-ids the
/// later ones so the collection stays uniquely keyed.
pub fn normalize_all(entries: &[Value], stamper: &dyn Stamper) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut messages = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let raw = match RawMessage::from_value(entry.clone()) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("Skipping record #{index}: {err}");
                continue;
            }
        };
        let mut message = match normalize_message(&raw, stamper) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("Skipping record #{index}: {err}");
                continue;
            }
        };
        while !seen.insert(message.id.clone()) {
            let fresh = stamper.next_id();
            log::warn!("Duplicate message id {}; reassigned to {fresh}", message.id);
            message.id = fresh;
        }
        messages.push(message);
    }

    if messages.len() < entries.len() {
        log::warn!(
            "Normalized {} of {} stored records",
            messages.len(),
            entries.len()
        );
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedStamper;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn raw(value: Value) -> RawMessage {
        RawMessage::from_value(value).unwrap()
    }

    #[test]
    fn synonyms_and_placeholders() {
        let stamper = FixedStamper::default();
        let message = normalize_message(
            &raw(json!({"name": "  Zhang  ", "class": "A1", "message": " hi "})),
            &stamper,
        )
        .unwrap();

        assert_eq!(message.id, "t-1");
        assert_eq!(message.student_name, "Zhang");
        assert_eq!(message.student_id, UNKNOWN_STUDENT_ID);
        assert_eq!(message.class_name, "A1");
        assert_eq!(message.title, UNTITLED);
        assert_eq!(message.content, "hi");
        assert_eq!(message.timestamp, "2024-03-01 09:30:00");
        assert_eq!(message.status(), MessageStatus::Pending);
    }

    #[test]
    fn first_non_empty_synonym_wins() {
        let stamper = FixedStamper::default();
        let message = normalize_message(
            &raw(json!({"studentName": "  ", "name": "Backup Name", "content": "q"})),
            &stamper,
        )
        .unwrap();
        assert_eq!(message.student_name, "Backup Name");
    }

    #[test]
    fn numeric_fields_are_coerced() {
        let stamper = FixedStamper::default();
        let message =
            normalize_message(&raw(json!({"studentId": 2023001, "content": 42})), &stamper)
                .unwrap();
        assert_eq!(message.student_id, "2023001");
        assert_eq!(message.content, "42");
    }

    #[test]
    fn blank_content_is_rejected() {
        let stamper = FixedStamper::default();
        let err = normalize_message(&raw(json!({"studentName": "A", "content": "   "})), &stamper)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn stored_status_is_ignored_in_favor_of_replies() {
        let stamper = FixedStamper::default();
        let answered = normalize_message(
            &raw(json!({
                "content": "q",
                "status": "pending",
                "replies": [{"teacher": "Ms Wu", "content": "a"}, {"content": " "}, "junk"]
            })),
            &stamper,
        )
        .unwrap();
        assert_eq!(answered.replies().len(), 1);
        assert_eq!(answered.replies()[0].author, "Ms Wu");
        assert_eq!(answered.status(), MessageStatus::Answered);

        let pending =
            normalize_message(&raw(json!({"content": "q", "status": "answered"})), &stamper)
                .unwrap();
        assert_eq!(pending.status(), MessageStatus::Pending);
    }

    #[test]
    fn serialized_messages_normalize_to_themselves() {
        let stamper = FixedStamper::default();
        let original = normalize_message(
            &raw(json!({
                "id": "m-1",
                "studentName": "A",
                "studentId": "01",
                "className": "C",
                "title": "T",
                "content": "Q",
                "timestamp": "2024-01-01 08:00:00",
                "replies": [{"id": "r-1", "author": "B", "content": "A", "timestamp": "2024-01-02 08:00:00"}]
            })),
            &stamper,
        )
        .unwrap();

        let serialized = serde_json::to_value(&original).unwrap();
        let again = normalize_message(&raw(serialized), &stamper).unwrap();
        assert_eq!(again, original);
    }

    #[test]
    fn bulk_load_skips_invalid_and_reids_duplicates() {
        let stamper = FixedStamper::default();
        let entries = vec![
            json!({"id": "x", "content": "first"}),
            json!(null),
            json!({"id": "y", "content": ""}),
            json!({"id": "x", "content": "second"}),
        ];
        let messages = normalize_all(&entries, &stamper);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "x");
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].id, "t-1");
        assert_eq!(messages[1].content, "second");
    }
}
