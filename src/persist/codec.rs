//! Payload codecs for the durable mirror.
//!
//! The codec is chosen when the service is built; there is no runtime
//! capability probing.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Compresses payloads before they reach the persistent backend.
pub trait PayloadCodec: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

// == Gzip ==
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    level: Compression,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl PayloadCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_shrinks_repetitive_payloads() {
        let codec = GzipCodec::default();
        let payload = br#"{"status":"active","location":"Building A"}"#.repeat(50);

        let packed = codec.compress(&payload).unwrap();
        assert!(packed.len() < payload.len());
        assert_eq!(codec.decompress(&packed).unwrap(), payload);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        let codec = GzipCodec::new(6);
        assert!(codec.decompress(b"not gzip at all").is_err());
    }
}
