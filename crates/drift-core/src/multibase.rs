//! Multibase codec for the store's pub/sub wire format.
//!
//! Topic names and message payloads travel as lowercase url-safe base64
//! without padding, prefixed with `u`. Anything else is rejected.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// The only multibase prefix the store's pub/sub contract uses.
pub const PREFIX: char = 'u';

#[derive(Debug, thiserror::Error)]
pub enum MultibaseError {
    #[error("missing multibase prefix '{PREFIX}' (got {0:?})")]
    UnexpectedPrefix(Option<char>),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub fn encode(text: &str) -> String {
    encode_bytes(text.as_bytes())
}

pub fn encode_bytes(data: &[u8]) -> String {
    format!("{}{}", PREFIX, URL_SAFE_NO_PAD.encode(data))
}

pub fn decode(encoded: &str) -> Result<Vec<u8>, MultibaseError> {
    match encoded.strip_prefix(PREFIX) {
        Some(rest) => Ok(URL_SAFE_NO_PAD.decode(rest)?),
        None => Err(MultibaseError::UnexpectedPrefix(encoded.chars().next())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_utf8() {
        for topic in ["driftcast-stream", "", "héllo wörld", "a/b?c=d&e"] {
            let encoded = encode(topic);
            assert!(encoded.starts_with(PREFIX));
            assert_eq!(decode(&encoded).unwrap(), topic.as_bytes());
        }
    }

    #[test]
    fn known_vector() {
        assert_eq!(encode("hello"), "uaGVsbG8");
        assert_eq!(decode("uaGVsbG8").unwrap(), b"hello");
    }

    #[test]
    fn rejects_other_prefixes() {
        assert!(matches!(
            decode("baGVsbG8"),
            Err(MultibaseError::UnexpectedPrefix(Some('b')))
        ));
        assert!(matches!(
            decode(""),
            Err(MultibaseError::UnexpectedPrefix(None))
        ));
    }

    #[test]
    fn no_padding_is_emitted() {
        // "ab" base64-encodes with padding in the standard alphabet; the
        // wire format must not carry '='.
        assert!(!encode("ab").contains('='));
    }
}
