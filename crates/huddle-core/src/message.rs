//! Chat messages as the hub sees them.
//!
//! A [`Message`] is built once by the inbound pump and then only shared
//! (`Arc<Message>`) between the hub and every outbound queue.

use chrono::{DateTime, Utc};
use huddle_protocol::WireMessage;

use crate::member::DisplayIdentity;

/// One chat line plus its display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender display name.
    pub name: String,
    /// The chat line.
    pub body: String,
    /// Server receipt time.
    pub when: DateTime<Utc>,
    /// Sender avatar URL, empty when there is none.
    pub avatar_url: String,
}

impl Message {
    /// Create a message from its parts.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        body: impl Into<String>,
        avatar_url: impl Into<String>,
        when: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            when,
            avatar_url: avatar_url.into(),
        }
    }

    /// Stamp a freshly received body with the sender's identity and the
    /// current time.
    #[must_use]
    pub fn received(body: impl Into<String>, sender: &DisplayIdentity) -> Self {
        Self::new(
            sender.name.clone(),
            body,
            sender.avatar_url.clone(),
            Utc::now(),
        )
    }

    /// Build a message from an inbound frame. Only the frame's text is used.
    #[must_use]
    pub fn from_wire(frame: WireMessage, sender: &DisplayIdentity) -> Self {
        Self::received(frame.message, sender)
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        WireMessage::new(message.body.clone())
            .with_sender(message.name.clone(), message.avatar_url.clone())
            .at(message.when)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::codec;

    fn alice() -> DisplayIdentity {
        DisplayIdentity::new("Alice", "//www.gravatar.com/avatar/a11ce", "a11ce")
    }

    #[test]
    fn test_received_uses_server_identity() {
        let before = Utc::now();
        let msg = Message::received("hi", &alice());
        assert_eq!(msg.name, "Alice");
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.avatar_url, "//www.gravatar.com/avatar/a11ce");
        assert!(msg.when >= before);
    }

    #[test]
    fn test_client_supplied_fields_are_ignored() {
        let forged = WireMessage::new("hi")
            .with_sender("Mallory", "http://evil/pic.png")
            .at(DateTime::<Utc>::MIN_UTC);

        let msg = Message::from_wire(forged, &alice());
        assert_eq!(msg.name, "Alice");
        assert_eq!(msg.avatar_url, "//www.gravatar.com/avatar/a11ce");
        assert_ne!(msg.when, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_wire_roundtrip_keeps_server_fields() {
        let original = Message::received("hello there", &alice());

        let text = codec::encode_json(&WireMessage::from(&original)).unwrap();
        let decoded = codec::decode_json(&text).unwrap();
        assert_eq!(decoded.message, original.body);
        assert_eq!(decoded.when, Some(original.when));
        assert_eq!(decoded.name, "Alice");
        assert_eq!(decoded.avatar_url, original.avatar_url);

        let bytes = codec::encode(&WireMessage::from(&original)).unwrap();
        let decoded = codec::decode(&bytes).unwrap();
        assert_eq!(decoded.message, original.body);
        assert_eq!(decoded.when, Some(original.when));
    }
}
