//! Payload encoding for large remote entries.
//!
//! Encoded payloads are stored as base64 text inside the JSON envelope and
//! tagged with the scheme that produced them, so readers can decode entries
//! written under an older scheme for as long as they live in the store.

use std::fmt;
use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::{CacheError, CacheResult};

/// Encoding scheme of a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw DEFLATE of the JSON text, base64-wrapped.
    Deflate,
    /// base64 of the JSON text. Read-only: older entries may carry it.
    Base64,
}

impl Encoding {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deflate => "deflate",
            Self::Base64 => "base64",
        }
    }

    /// Resolve the tag stored on an entry. A missing tag means the legacy
    /// base64 scheme.
    pub fn from_tag(tag: Option<&str>) -> CacheResult<Self> {
        match tag {
            None | Some("base64") => Ok(Self::Base64),
            Some("deflate") => Ok(Self::Deflate),
            Some(other) => Err(CacheError::encoding(format!(
                "unknown payload encoding '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode serialized JSON text with `encoding`.
pub fn encode(json: &str, encoding: Encoding) -> CacheResult<String> {
    match encoding {
        Encoding::Base64 => Ok(STANDARD.encode(json.as_bytes())),
        Encoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(json.as_bytes())
                .map_err(|e| CacheError::encoding(e.to_string()))?;
            let compressed = encoder
                .finish()
                .map_err(|e| CacheError::encoding(e.to_string()))?;
            Ok(STANDARD.encode(compressed))
        }
    }
}

/// Reverse [`encode`], returning the original JSON text.
pub fn decode(data: &str, encoding: Encoding) -> CacheResult<String> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| CacheError::encoding(format!("invalid base64 payload: {e}")))?;

    match encoding {
        Encoding::Base64 => String::from_utf8(bytes)
            .map_err(|e| CacheError::encoding(format!("payload is not UTF-8: {e}"))),
        Encoding::Deflate => {
            let mut json = String::new();
            DeflateDecoder::new(bytes.as_slice())
                .read_to_string(&mut json)
                .map_err(|e| CacheError::encoding(format!("inflate failed: {e}")))?;
            Ok(json)
        }
    }
}
