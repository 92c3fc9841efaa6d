use std::io;

/// Errors raised while packing or unpacking a metric payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Compressing the payload failed.
    #[error("compression failed: {0}")]
    Compress(#[source] io::Error),
    /// The body is not a valid gzip stream.
    #[error("decompression failed: {0}")]
    Decompress(#[source] io::Error),
    /// The transported tag is not valid hex.
    #[error("malformed signature tag: {0}")]
    MalformedTag(#[from] hex::FromHexError),
    /// The recomputed tag does not match the transported one.
    #[error("payload signature does not match")]
    TagMismatch,
    /// RSA encryption or decryption failed.
    #[error("envelope operation failed: {0}")]
    Envelope(#[from] rsa::Error),
    /// PEM key material could not be read or parsed.
    #[error("unusable key material in {path}: {reason}")]
    KeyMaterial {
        /// Path the key was loaded from.
        path: String,
        /// Parser or I/O failure description.
        reason: String,
    },
}
