use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// Which side of the consultation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Doctor,
    Patient,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Doctor => "doctor",
            SenderRole::Patient => "patient",
        }
    }
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a role name that is neither `doctor` nor `patient`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sender role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for SenderRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "doctor" => Ok(SenderRole::Doctor),
            "patient" => Ok(SenderRole::Patient),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// A chat message as carried on the wire.
///
/// The `payload` field uses `serde_json::value::RawValue` so the transport
/// never interprets application content. `id` and `timestamp` are fixed at
/// construction and only exposed through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    payload: Box<RawValue>,
    sender_role: SenderRole,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a message with a fresh UUID and the current time.
    pub fn new<T: Serialize + ?Sized>(
        sender_role: SenderRole,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Self::from_parts(uuid::Uuid::new_v4().to_string(), sender_role, payload, Utc::now())
    }

    /// Creates a message with an explicit id and timestamp.
    pub fn from_parts<T: Serialize + ?Sized>(
        id: impl Into<String>,
        sender_role: SenderRole,
        payload: &T,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            payload: serde_json::value::to_raw_value(payload)?,
            sender_role,
            timestamp,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_role(&self) -> SenderRole {
        self.sender_role
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Raw JSON of the payload, exactly as received or serialized.
    pub fn payload(&self) -> &RawValue {
        &self.payload
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.payload.get())
    }

    /// Serializes the message into the text of a single frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Accepts `"42"` and `42` alike; the web portal used `Date.now()` ids.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Uint(n) => n.to_string(),
    })
}
