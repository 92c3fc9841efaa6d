//! HMAC-SHA256 payload tags, transported as lowercase hex in the
//! `Hashsha256` header (or the equivalent gRPC metadata key).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::CodecError;

type HmacSha256 = Hmac<Sha256>;

/// Header / metadata key carrying the tag.
pub const TAG_HEADER: &str = "Hashsha256";

/// Tag `data` with `key`, returning the 32-byte digest as lowercase hex.
pub fn sign(data: &[u8], key: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("hmac accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a transported hex tag against `data`. The comparison is
/// constant-time.
pub fn verify(data: &[u8], tag: &str, key: &str) -> Result<(), CodecError> {
    let expected = hex::decode(tag)?;
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("hmac accepts any key length");
    mac.update(data);
    mac.verify_slice(&expected)
        .map_err(|_| CodecError::TagMismatch)
}

#[cfg(test)]
mod test {
    use super::*;

    const KEY: &str = "defaultKey";

    #[test]
    fn tag_round_trips() {
        let body = br#"[{"id":"PollCount","type":"counter","delta":3}]"#;
        let tag = sign(body, KEY);
        assert_eq!(tag.len(), 64);
        verify(body, &tag, KEY).unwrap();
    }

    #[test]
    fn flipped_byte_is_rejected() {
        let body = b"payload";
        let mut tag = sign(body, KEY).into_bytes();
        tag[0] = if tag[0] == b'0' { b'1' } else { b'0' };
        let tag = String::from_utf8(tag).unwrap();
        assert!(matches!(
            verify(body, &tag, KEY),
            Err(CodecError::TagMismatch)
        ));
    }

    #[test]
    fn altered_body_is_rejected() {
        let tag = sign(b"payload", KEY);
        assert!(verify(b"paylOad", &tag, KEY).is_err());
    }

    #[test]
    fn non_hex_tag_is_malformed() {
        assert!(matches!(
            verify(b"payload", "zz", KEY),
            Err(CodecError::MalformedTag(_))
        ));
    }
}
