//! Message normalizer: raw gateway JSON to canonical `InboundMessage`.
//!
//! Pure mapping with no I/O. Accepts a flat event or one wrapped in a
//! `{"data": {...}}` envelope. Unknown content kinds are not errors; they
//! normalize to a `document` message whose text is the caption, if any.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::pipeline::types::{InboundMessage, MessageKind, NormalizedEvent};

/// Timestamps above this are treated as milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Normalize a raw gateway payload for `instance_id`.
pub fn normalize(instance_id: &str, raw: &[u8]) -> Result<NormalizedEvent, PipelineError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| PipelineError::MalformedEvent(format!("invalid JSON: {e}")))?;
    normalize_value(instance_id, &value)
}

/// Normalize an already-parsed payload.
pub fn normalize_value(instance_id: &str, value: &Value) -> Result<NormalizedEvent, PipelineError> {
    let event = unwrap_envelope(value)?;

    let id = first_str(event, &["id", "messageId"])
        .ok_or_else(|| PipelineError::MalformedEvent("missing id".into()))?;
    let conversation_id = first_str(event, &["conversationId", "chatId", "from", "remoteJid"])
        .ok_or_else(|| PipelineError::MalformedEvent(format!("message {id}: missing conversationId")))?;

    let sender_id = first_str(event, &["senderId", "author", "participant"])
        .unwrap_or(conversation_id)
        .to_string();
    let sender_name = first_str(event, &["senderName", "pushName", "notifyName"]).map(String::from);
    let from_self = event.get("fromMe").and_then(Value::as_bool).unwrap_or(false);
    let occurred_at = event
        .get("timestamp")
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    let raw_kind = first_str(event, &["type", "kind"]).unwrap_or("text").to_lowercase();
    let caption = first_str(event, &["caption"]).unwrap_or_default();

    let mapped = map_kind(&raw_kind);
    let text = match mapped {
        Some(MessageKind::Text) => first_str(event, &["body", "text"]).unwrap_or_default(),
        // Media and unknown kinds carry text only through their caption
        _ => caption,
    }
    .to_string();

    let message = InboundMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id,
        sender_name,
        instance_id: instance_id.to_string(),
        text,
        kind: mapped.unwrap_or(MessageKind::Document),
        occurred_at,
        from_self,
    };

    Ok(match mapped {
        Some(_) => NormalizedEvent::Message(message),
        None => NormalizedEvent::UnsupportedKind { message, raw_kind },
    })
}

fn unwrap_envelope(value: &Value) -> Result<&Map<String, Value>, PipelineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::MalformedEvent("payload is not a JSON object".into()))?;
    match obj.get("data") {
        Some(Value::Object(inner)) if !obj.contains_key("id") => Ok(inner),
        _ => Ok(obj),
    }
}

/// First non-empty string among `keys`.
fn first_str<'a>(event: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| event.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn map_kind(raw: &str) -> Option<MessageKind> {
    match raw {
        "chat" | "text" | "conversation" => Some(MessageKind::Text),
        "image" | "sticker" => Some(MessageKind::Image),
        "audio" | "ptt" | "voice" => Some(MessageKind::Audio),
        "video" => Some(MessageKind::Video),
        "document" => Some(MessageKind::Document),
        _ => None,
    }
}

/// Seconds, milliseconds or RFC 3339.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let n = n.as_i64()?;
            if n > MILLIS_THRESHOLD {
                Utc.timestamp_millis_opt(n).single()
            } else {
                Utc.timestamp_opt(n, 0).single()
            }
        }
        Value::String(s) => {
            if let Ok(n) = s.parse::<i64>() {
                return parse_timestamp(&Value::from(n));
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm(value: Value) -> Result<NormalizedEvent, PipelineError> {
        normalize("shop-1", value.to_string().as_bytes())
    }

    #[test]
    fn flat_text_event() {
        let event = norm(json!({
            "id": "wamid-1",
            "conversationId": "5511999999999@c.us",
            "type": "chat",
            "body": "qual o preço do plano premium?",
            "timestamp": 1_760_000_000,
            "pushName": "Maria"
        }))
        .unwrap();

        let NormalizedEvent::Message(msg) = event else {
            panic!("expected a supported message");
        };
        assert_eq!(msg.id, "wamid-1");
        assert_eq!(msg.instance_id, "shop-1");
        assert_eq!(msg.sender_id, "5511999999999@c.us");
        assert_eq!(msg.sender_name.as_deref(), Some("Maria"));
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.text, "qual o preço do plano premium?");
        assert_eq!(msg.occurred_at.timestamp(), 1_760_000_000);
        assert!(!msg.from_self);
    }

    #[test]
    fn data_envelope_is_unwrapped() {
        let event = norm(json!({
            "event": "messages.upsert",
            "data": {"id": "m2", "from": "c2", "text": "oi", "fromMe": true}
        }))
        .unwrap();
        let msg = event.message();
        assert_eq!(msg.conversation_id, "c2");
        assert_eq!(msg.text, "oi");
        assert!(msg.from_self);
    }

    #[test]
    fn image_caption_becomes_text() {
        let event = norm(json!({
            "id": "m3", "conversationId": "c3", "type": "image",
            "body": "<base64>", "caption": "comprovante"
        }))
        .unwrap();
        let msg = event.message();
        assert_eq!(msg.kind, MessageKind::Image);
        assert_eq!(msg.text, "comprovante");
    }

    #[test]
    fn unknown_kind_is_document_with_empty_text() {
        let event = norm(json!({
            "id": "m4", "conversationId": "c4", "type": "location", "body": "-23.5,-46.6"
        }))
        .unwrap();
        match event {
            NormalizedEvent::UnsupportedKind { message, raw_kind } => {
                assert_eq!(raw_kind, "location");
                assert_eq!(message.kind, MessageKind::Document);
                assert!(message.text.is_empty());
            }
            other => panic!("expected unsupported kind, got {other:?}"),
        }
    }

    #[test]
    fn millisecond_and_rfc3339_timestamps() {
        let millis = norm(json!({"id": "a", "conversationId": "c", "timestamp": 1_760_000_000_123i64}))
            .unwrap();
        assert_eq!(millis.message().occurred_at.timestamp_millis(), 1_760_000_000_123);

        let rfc = norm(json!({"id": "b", "conversationId": "c", "timestamp": "2026-03-01T12:00:00-03:00"}))
            .unwrap();
        assert_eq!(rfc.message().occurred_at.to_rfc3339(), "2026-03-01T15:00:00+00:00");
    }

    #[test]
    fn missing_id_is_malformed() {
        let err = norm(json!({"conversationId": "c"})).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedEvent(_)));
    }

    #[test]
    fn missing_conversation_is_malformed() {
        let err = norm(json!({"id": "m", "body": "hi"})).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedEvent(_)));
    }

    #[test]
    fn non_object_and_garbage_are_malformed() {
        assert!(matches!(
            norm(json!([1, 2])),
            Err(PipelineError::MalformedEvent(_))
        ));
        assert!(matches!(
            normalize("shop-1", b"not json"),
            Err(PipelineError::MalformedEvent(_))
        ));
    }
}
