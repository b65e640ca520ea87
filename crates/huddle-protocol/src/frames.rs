//! Frame types for the Huddle protocol.
//!
//! A chat line travels as a single [`WireMessage`] in both directions.
//! Clients normally send only `message`; the server always fills every field.

use chrono::{DateTime, Utc};
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One chat line as it appears on the wire.
///
/// Field names follow the browser client (`name`, `message`, `when`,
/// `avatarURL`). The capitalized spellings are accepted on input as well.
///
/// Decoding only insists on `message` being a string. The sender fields
/// are overwritten by the server anyway, so a value of the wrong type there
/// is read as absent rather than rejecting the frame. Unknown fields are
/// skipped and a repeated field keeps its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    /// Sender display name. Ignored on input.
    pub name: String,

    /// The chat line itself.
    pub message: String,

    /// Server receipt time. Ignored on input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<DateTime<Utc>>,

    /// Sender avatar URL, empty when the sender has none. Ignored on input.
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
}

impl<'de> Deserialize<'de> for WireMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(WireMessageVisitor)
    }
}

struct WireMessageVisitor;

impl<'de> Visitor<'de> for WireMessageVisitor {
    type Value = WireMessage;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a chat message object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<WireMessage, A::Error> {
        let mut frame = WireMessage::default();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "message" | "Message" => {
                    frame.message = map.next_value::<Option<String>>()?.unwrap_or_default();
                }
                "name" | "Name" => {
                    frame.name = map.next_value::<Lenient>()?.0.unwrap_or_default();
                }
                "avatarURL" | "AvatarURL" | "avatar_url" => {
                    frame.avatar_url = map.next_value::<Lenient>()?.0.unwrap_or_default();
                }
                "when" | "When" => {
                    frame.when = map
                        .next_value::<Lenient>()?
                        .0
                        .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
                        .map(|when| when.with_timezone(&Utc));
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(frame)
    }
}

/// A string if the value is one, `None` for any other value.
struct Lenient(Option<String>);

impl<'de> Deserialize<'de> for Lenient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LenientVisitor)
    }
}

struct LenientVisitor;

impl<'de> Visitor<'de> for LenientVisitor {
    type Value = Lenient;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any value")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Lenient, E> {
        Ok(Lenient(Some(v.to_string())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Lenient, E> {
        Ok(Lenient(Some(v)))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Lenient, E> {
        Ok(Lenient(None))
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Lenient, E> {
        Ok(Lenient(None))
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Lenient, E> {
        Ok(Lenient(None))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Lenient, E> {
        Ok(Lenient(None))
    }

    fn visit_bytes<E: de::Error>(self, _: &[u8]) -> Result<Lenient, E> {
        Ok(Lenient(None))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Lenient, E> {
        Ok(Lenient(None))
    }

    fn visit_none<E: de::Error>(self) -> Result<Lenient, E> {
        Ok(Lenient(None))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Lenient, D::Error> {
        Lenient::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Lenient, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Lenient(None))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Lenient, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(Lenient(None))
    }
}

impl WireMessage {
    /// Create a frame carrying only message text, as a client would send it.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Set the sender fields.
    #[must_use]
    pub fn with_sender(mut self, name: impl Into<String>, avatar_url: impl Into<String>) -> Self {
        self.name = name.into();
        self.avatar_url = avatar_url.into();
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn at(mut self, when: DateTime<Utc>) -> Self {
        self.when = Some(when);
        self
    }
}
