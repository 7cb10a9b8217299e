use serde::{Deserialize, Serialize};
use std::fmt;

/// How much of a donor's identity may be shown publicly.
///
/// This is intrinsic data carried by the instance itself, not a request-time
/// parameter; the privacy filter keys off it after serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Full first and last name.
    #[serde(rename = "FULL")]
    Full,
    /// First name plus last initial.
    #[serde(rename = "FIRST")]
    FirstName,
    /// Alias only.
    #[serde(rename = "ALIAS")]
    Alias,
    /// Nothing identifying at all.
    #[serde(rename = "ANON")]
    Anonymous,
}

impl Visibility {
    /// The stored wire value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::FirstName => "FIRST",
            Self::Alias => "ALIAS",
            Self::Anonymous => "ANON",
        }
    }

    /// Parses a stored value, or `None` if it is not a visibility tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "FULL" => Self::Full,
            "FIRST" => Self::FirstName,
            "ALIAS" => Self::Alias,
            "ANON" => Self::Anonymous,
            _ => return None,
        })
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
