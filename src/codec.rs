//! Text codec for bus payloads.
//!
//! The Skiff bus carries opaque byte payloads; this client publishes and
//! delivers UTF-8 text. Encoding is infallible, decoding validates.

use crate::error::DecodeError;
use bytes::Bytes;

/// Encode a message for the wire.
pub fn encode(message: &str) -> Bytes {
    Bytes::copy_from_slice(message.as_bytes())
}

/// Decode a payload received from the bus.
///
/// Returns [`DecodeError::InvalidUtf8`] when the payload is not valid UTF-8,
/// reporting how many leading bytes were valid.
pub fn decode(payload: &[u8]) -> Result<String, DecodeError> {
    match std::str::from_utf8(payload) {
        Ok(text) => Ok(text.to_owned()),
        Err(e) => Err(DecodeError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_text() {
        let payload = encode("hello bus");
        assert_eq!(decode(&payload).unwrap(), "hello bus");
    }

    #[test]
    fn test_decode_empty_payload() {
        assert_eq!(decode(b"").unwrap(), "");
    }

    #[test]
    fn test_decode_multibyte_text() {
        let payload = encode("crème brûlée ✓");
        assert_eq!(decode(&payload).unwrap(), "crème brûlée ✓");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        // 0xFF can never start a UTF-8 sequence.
        let err = decode(&[b'o', b'k', 0xFF, b'x']).unwrap_err();
        assert_eq!(err, DecodeError::InvalidUtf8 { valid_up_to: 2 });
    }
}
