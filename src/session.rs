//! Session identity.
//!
//! A session code doubles as the URL path a client connects to and as the
//! file name of the snapshot inside the data root, so it is validated once
//! at the boundary and passed around as a typed value from then on.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_-]+$").expect("session code pattern"));

/// Validated identifier of a session.
///
/// Restricted to `[A-Za-z0-9_-]+` so a code can never escape the data root
/// or collide with git metadata when used as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionCode(String);

impl SessionCode {
    pub fn new(code: impl Into<String>) -> Result<Self, InvalidSessionCode> {
        let code = code.into();
        if CODE_PATTERN.is_match(&code) {
            Ok(Self(code))
        } else {
            Err(InvalidSessionCode(code))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionCode {
    type Err = InvalidSessionCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid session code {0:?}, expected one or more of [A-Za-z0-9_-]")]
pub struct InvalidSessionCode(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_simple_codes() {
        for code in ["counter", "room-7", "a", "MY_doc", "0011"] {
            assert!(SessionCode::new(code).is_ok(), "{code} should be valid");
        }
    }

    #[test]
    fn test_rejects_path_escapes() {
        for code in ["", "..", "../secrets", "a/b", "a\\b", ".git", "caf\u{e9}", "a b"] {
            assert!(SessionCode::new(code).is_err(), "{code:?} should be invalid");
        }
    }

    #[test]
    fn test_round_trips_through_display() {
        let code: SessionCode = "room-7".parse().unwrap();
        assert_eq!(code.to_string(), "room-7");
        assert_eq!(code.as_str(), "room-7");
    }
}
