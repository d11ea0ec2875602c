//! Opaque session identifiers.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

use crate::error::ScratchError;
use crate::utils::path::digest_tag;

/// Random bytes behind a generated identifier.
pub const SESSION_ENTROPY_BYTES: usize = 32;

/// Longest identifier accepted from a caller.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// A URL-safe, high-entropy session identifier.
///
/// The raw value never appears in `Debug` output; use [`SessionId::tag`] when
/// a session has to be identified in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Accept a caller-held identifier.
    ///
    /// Only the URL-safe base64 alphabet is allowed, so the value can be
    /// embedded in a directory name without further escaping.
    pub fn parse(raw: &str) -> Result<Self, ScratchError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(ScratchError::InvalidSessionId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log-safe identifier for this session.
    pub fn tag(&self) -> String {
        digest_tag(self.0.as_bytes())
    }
}

impl FromStr for SessionId {
    type Err = ScratchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionId").field(&self.tag()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_url_safe_and_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();

        assert_ne!(a, b);
        // 32 bytes of base64 without padding.
        assert_eq!(a.as_str().len(), 43);
        assert!(SessionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_parse_rejects_unsafe_values() {
        for raw in ["", "../x", "a/b", "has space", "dot.dot", &"a".repeat(129)] {
            assert!(SessionId::parse(raw).is_err(), "{raw:?}");
        }
        assert!(SessionId::parse("abc123").is_ok());
        assert!("abc-123_XYZ".parse::<SessionId>().is_ok());
    }

    #[test]
    fn test_debug_hides_raw_value() {
        let id = SessionId::parse("supersecretvalue").unwrap();
        let rendered = format!("{:?}", id);
        assert!(!rendered.contains("supersecretvalue"));
        assert!(rendered.contains(&id.tag()));
    }
}
