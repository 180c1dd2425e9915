//! Phoenix v2 JSON frames: `[join_ref, ref, topic, event, payload]`.

use serde_json::{Value, json};

pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";

    /// Topic heartbeats are sent on.
    pub const PHOENIX_TOPIC: &str = "phoenix";
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

type Frame = (Option<String>, Option<String>, String, String, Value);

impl Message {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            join_ref: None,
            msg_ref: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    pub fn with_refs(mut self, join_ref: Option<String>, msg_ref: Option<String>) -> Self {
        self.join_ref = join_ref;
        self.msg_ref = msg_ref;
        self
    }

    /// A reply frame as the server would send it.
    pub fn reply(topic: impl Into<String>, status: &str, response: Value) -> Self {
        Self::new(topic, events::REPLY, json!({"status": status, "response": response}))
    }

    pub fn encode(&self) -> String {
        json!([self.join_ref, self.msg_ref, self.topic, self.event, self.payload]).to_string()
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let (join_ref, msg_ref, topic, event, payload): Frame = serde_json::from_str(text)?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }

    pub fn is_reply(&self) -> bool {
        self.event == events::REPLY
    }

    /// Reply status, for `phx_reply` frames.
    pub fn status(&self) -> Option<&str> {
        if !self.is_reply() {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }

    /// The reply's response for replies, the payload otherwise.
    pub fn body(&self) -> &Value {
        if self.is_reply() {
            self.payload.get("response").unwrap_or(&Value::Null)
        } else {
            &self.payload
        }
    }

    /// [`Message::body`] as JSON text, unless it is empty.
    pub fn json_body(&self) -> Option<String> {
        match self.body() {
            Value::Null => None,
            body => Some(body.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reply() {
        let frame = r#"["1","1","alerts","phx_reply",{"status":"ok","response":{"alerts":{}}}]"#;
        let message = Message::decode(frame).unwrap();

        assert_eq!(message.join_ref.as_deref(), Some("1"));
        assert_eq!(message.topic, "alerts");
        assert!(message.is_reply());
        assert_eq!(message.status(), Some("ok"));
        assert_eq!(message.json_body().as_deref(), Some(r#"{"alerts":{}}"#));
    }

    #[test]
    fn test_decode_push_without_refs() {
        let frame = r#"[null,null,"alerts","stream_data",{"alerts":{}}]"#;
        let message = Message::decode(frame).unwrap();

        assert_eq!(message.join_ref, None);
        assert_eq!(message.msg_ref, None);
        assert_eq!(message.status(), None);
        assert_eq!(message.body(), &json!({"alerts": {}}));
    }

    #[test]
    fn test_encode_layout() {
        let message = Message::new("phoenix", events::HEARTBEAT, json!({}))
            .with_refs(None, Some("7".to_string()));
        assert_eq!(message.encode(), r#"[null,"7","phoenix","heartbeat",{}]"#);
    }

    #[test]
    fn test_empty_reply_has_no_body() {
        let message = Message::new("alerts", events::REPLY, json!({"status": "ok"}));
        assert_eq!(message.json_body(), None);
    }

    #[test]
    fn test_malformed_frame() {
        assert!(Message::decode(r#"{"topic":"alerts"}"#).is_err());
        assert!(Message::decode(r#"[null,null,"alerts"]"#).is_err());
    }
}
