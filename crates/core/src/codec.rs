//! Key and value codecs
//!
//! A key codec transforms each non-wildcard token of a key independently;
//! wildcard tokens (`*`, `>`) pass through untouched so that search keys keep
//! their meaning on the wire. A value codec transforms the record payload.
//!
//! ## Contract
//!
//! `decode(encode(x)) == x` for every input the key validator accepts.
//!
//! ## Provided codecs
//!
//! - [`NoopCodec`]: identity for keys and values
//! - [`Base64KeyCodec`]: URL-safe base64 per token, so arbitrary UTF-8 key
//!   tokens become subject-safe (`[-_=a-zA-Z0-9]`)

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::key::{KEY_SEPARATOR, MATCH_ONE, MATCH_REST};

/// Reversible transformation of a single key token
pub trait KeyCodec: Send + Sync {
    /// Encode one token
    fn encode(&self, token: &str) -> String;

    /// Decode one token previously produced by [`KeyCodec::encode`]
    fn decode(&self, token: &str) -> Result<String>;
}

/// Reversible transformation of a record payload
pub trait ValueCodec: Send + Sync {
    /// Encode a value before it is appended
    fn encode(&self, value: Bytes) -> Bytes;

    /// Decode a value read back from the log
    fn decode(&self, value: Bytes) -> Result<Bytes>;
}

/// Identity codec
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl KeyCodec for NoopCodec {
    fn encode(&self, token: &str) -> String {
        token.to_string()
    }

    fn decode(&self, token: &str) -> Result<String> {
        Ok(token.to_string())
    }
}

impl ValueCodec for NoopCodec {
    fn encode(&self, value: Bytes) -> Bytes {
        value
    }

    fn decode(&self, value: Bytes) -> Result<Bytes> {
        Ok(value)
    }
}

/// URL-safe base64 key codec
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64KeyCodec;

impl KeyCodec for Base64KeyCodec {
    fn encode(&self, token: &str) -> String {
        URL_SAFE.encode(token.as_bytes())
    }

    fn decode(&self, token: &str) -> Result<String> {
        let raw = URL_SAFE
            .decode(token)
            .map_err(|e| Error::Codec(format!("cannot decode key token {token:?}: {e}")))?;
        String::from_utf8(raw)
            .map_err(|e| Error::Codec(format!("key token {token:?} is not UTF-8: {e}")))
    }
}

/// The codec pair attached to a bucket
#[derive(Clone)]
pub struct KvCodecs {
    /// Per-token key codec
    pub key: Arc<dyn KeyCodec>,
    /// Value codec
    pub value: Arc<dyn ValueCodec>,
}

impl KvCodecs {
    /// Identity codecs for keys and values
    pub fn noop() -> Self {
        Self {
            key: Arc::new(NoopCodec),
            value: Arc::new(NoopCodec),
        }
    }

    /// Base64 keys, identity values
    pub fn base64_keys() -> Self {
        Self {
            key: Arc::new(Base64KeyCodec),
            value: Arc::new(NoopCodec),
        }
    }

    /// Build from arbitrary codecs
    pub fn new(key: Arc<dyn KeyCodec>, value: Arc<dyn ValueCodec>) -> Self {
        Self { key, value }
    }

    /// Encode every non-wildcard token of `key`
    pub fn encode_key(&self, key: &str) -> String {
        key.split(KEY_SEPARATOR)
            .map(|token| match token {
                MATCH_ONE | MATCH_REST => token.to_string(),
                _ => self.key.encode(token),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Decode every non-wildcard token of an encoded key
    pub fn decode_key(&self, encoded: &str) -> Result<String> {
        let tokens = encoded
            .split(KEY_SEPARATOR)
            .map(|token| match token {
                MATCH_ONE | MATCH_REST => Ok(token.to_string()),
                _ => self.key.decode(token),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(tokens.join("."))
    }
}

impl Default for KvCodecs {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for KvCodecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvCodecs").finish_non_exhaustive()
    }
}
