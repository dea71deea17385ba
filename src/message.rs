use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// One chat message as it travels over the wire.
///
/// Field names follow the server's JSON (`username`/`message`/`timestamp`);
/// in memory we use the clearer author/body/sent_at naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "username")]
    pub author: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(rename = "timestamp", with = "wire_time")]
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            sent_at: Utc::now(),
        }
    }

    /// Decode a single push frame.
    ///
    /// Empty or whitespace-only frames are keep-alive pings and yield `None`.
    /// Undecodable frames also yield `None`; the subscription itself must
    /// outlive any single bad event, so the error is logged and swallowed.
    pub fn decode(frame: &str) -> Option<Self> {
        let frame = frame.trim();
        if frame.is_empty() {
            return None;
        }
        match serde_json::from_str(frame) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("Dropping undecodable chat frame: {}", e);
                None
            }
        }
    }
}

/// Which of the two chat logs is being viewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    Peer,
    Ai,
}

/// Timestamps on the wire are ISO-8601 strings. The server stamps messages
/// with a naive local `isoformat()` while browser clients send RFC 3339 with
/// an offset, so deserialization accepts both; naive strings are taken as UTC.
mod wire_time {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_field_names() {
        let msg = ChatMessage::decode(
            r#"{"username":"bob","message":"hi","timestamp":"2026-08-07T12:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(msg.author, "bob");
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.sent_at.to_rfc3339_opts(SecondsFormat::Secs, true), "2026-08-07T12:00:00Z");
    }

    #[test]
    fn accepts_naive_server_timestamps() {
        let msg = ChatMessage::decode(
            r#"{"username":"bob","message":"hi","timestamp":"2026-08-07T12:00:00.123456"}"#,
        )
        .unwrap();
        assert_eq!(msg.sent_at.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn keepalive_and_garbage_frames_yield_none() {
        assert!(ChatMessage::decode("").is_none());
        assert!(ChatMessage::decode("   \n").is_none());
        assert!(ChatMessage::decode("{not json").is_none());
        assert!(ChatMessage::decode(r#"{"username":"bob"}"#).is_none());
    }

    #[test]
    fn serializes_back_to_wire_names() {
        let msg = ChatMessage::new("alice", "hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("username").is_some());
        assert!(json.get("message").is_some());
        assert!(json.get("timestamp").is_some());
        assert!(json.get("author").is_none());
    }
}
