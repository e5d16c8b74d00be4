//! Identifiers exchanged on the charger link
//!
//! - [`Tag`]: normalized RFID tag bytes, the registry key of an open session
//! - [`StationId`]: the charger that reported an event
//! - [`SessionId`]: opaque id assigned when a session opens

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RFID tag identifier in normalized form (hex digits only, no separators)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Normalize raw tag text as captured from the wire.
    ///
    /// Strips spaces between byte groups and any carriage-return or
    /// line-feed artifacts, so `"04 A1 B2\r"` becomes `"04A1B2"`.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.chars().filter(|c| !c.is_whitespace()).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a charging station as it announces itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Session identifier, assigned once at open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_normalize() {
        assert_eq!(Tag::normalize("04 A1 B2").as_str(), "04A1B2");
        assert_eq!(Tag::normalize("04A1B2\r").as_str(), "04A1B2");
        assert_eq!(Tag::normalize(" 04 A1\tB2 \r\n").as_str(), "04A1B2");

        let once = Tag::normalize("DE AD BE EF\r");
        assert_eq!(Tag::normalize(once.as_str()), once);
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new_v4();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
