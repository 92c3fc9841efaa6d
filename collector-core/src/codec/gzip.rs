//! Deflate (gzip) compression at the default level.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::CodecError;

/// Compress `data` into a gzip stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

/// Inflate a gzip stream back into the original bytes.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let payload = br#"[{"id":"Alloc","type":"gauge","value":1.5}]"#;
        let packed = compress(payload).unwrap();
        assert_ne!(packed.as_slice(), payload.as_slice());
        assert_eq!(decompress(&packed).unwrap(), payload);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decompress(b"not gzip"),
            Err(CodecError::Decompress(_))
        ));
    }
}
