//! Remote party identity
//!
//! Calls are placed to and received from a *party*, the far end of the
//! conversation. The manager never interprets the identity beyond storing it
//! and reporting it back to the view layer, so any contact/user id scheme can
//! be plugged in by implementing [`PartyIdentity`].

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};

/// Identity of the remote party of a call
///
/// The identity must be serializable (it travels inside [`crate::types::CallEvent`]s),
/// cheap to clone and displayable for logs.
pub trait PartyIdentity:
    Clone + Debug + Display + PartialEq + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static
{
    /// Stable string form used in logs and events
    fn to_string_repr(&self) -> String;

    /// Parse an identity from its string form
    fn from_string_repr(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}

/// Plain user id, as used by the contact list (`"u1"`, `"u2"`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub String);

impl PartyId {
    /// Create a party id
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartyIdentity for PartyId {
    fn to_string_repr(&self) -> String {
        self.0.clone()
    }

    fn from_string_repr(s: &str) -> anyhow::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            anyhow::bail!("party id cannot be empty");
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PartyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_party_id_display() {
        let id = PartyId::new("u1");
        assert_eq!(id.to_string(), "u1");
        assert_eq!(id.to_string_repr(), "u1");
    }

    #[test]
    fn test_party_id_parse_trims_and_rejects_empty() {
        assert_eq!(PartyId::from_string_repr("  u2 ").unwrap().as_str(), "u2");
        assert!(PartyId::from_string_repr("   ").is_err());
    }

    #[test]
    fn test_party_id_serializes_as_plain_string() {
        let id = PartyId::new("u3");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"u3\"");
        let back: PartyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
