//! Invoke payload variants.
//!
//! Wire replies carry either a decoded object (`payload`), a
//! pre-serialized JSON string (`payloadJSON`), or nothing. The serialized
//! form is kept as-is through chunked assembly so the broker never parses
//! a payload it only forwards.

use serde_json::Value;

/// An invoke reply payload in one of its three wire shapes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InvokePayload {
    /// A decoded JSON object.
    Decoded(Value),
    /// A pre-serialized JSON string, kept verbatim.
    Serialized(String),
    /// No payload.
    #[default]
    Empty,
}

impl InvokePayload {
    /// Builds a payload from the wire pair, preferring the serialized
    /// form when both are present (it is the authoritative bytes).
    #[must_use]
    pub fn from_wire(payload: Option<Value>, payload_json: Option<String>) -> Self {
        match (payload, payload_json) {
            (_, Some(serialized)) => Self::Serialized(serialized),
            (Some(decoded), None) => Self::Decoded(decoded),
            (None, None) => Self::Empty,
        }
    }

    /// Splits this payload back into the wire pair.
    #[must_use]
    pub fn into_wire(self) -> (Option<Value>, Option<String>) {
        match self {
            Self::Decoded(value) => (Some(value), None),
            Self::Serialized(serialized) => (None, Some(serialized)),
            Self::Empty => (None, None),
        }
    }

    /// Returns the serialized form, if that is what this payload holds.
    #[must_use]
    pub fn as_serialized(&self) -> Option<&str> {
        match self {
            Self::Serialized(serialized) => Some(serialized),
            Self::Decoded(_) | Self::Empty => None,
        }
    }

    /// Returns `true` when no payload is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Parses the payload into a JSON value, whichever shape it holds.
    ///
    /// # Errors
    ///
    /// Returns the underlying parse error for a malformed serialized
    /// payload.
    pub fn to_value(&self) -> Result<Option<Value>, serde_json::Error> {
        match self {
            Self::Decoded(value) => Ok(Some(value.clone())),
            Self::Serialized(serialized) => serde_json::from_str(serialized).map(Some),
            Self::Empty => Ok(None),
        }
    }
}
