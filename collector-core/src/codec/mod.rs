//! Payload codec primitives. All three are pure transforms over byte
//! buffers; the wire order is: plain JSON → [`gzip::compress`] → tag over
//! the *uncompressed* JSON ([`signing::sign`]) → optional
//! [`envelope::EncryptKey::encrypt`]. The server reverses: decrypt →
//! decompress → verify → parse.

pub mod envelope;
pub mod gzip;
pub mod signing;
