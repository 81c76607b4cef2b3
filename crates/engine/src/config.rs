//! Bucket configuration via TOML
//!
//! `BucketOptions` carries everything `Bucket::create` needs. It can be built
//! in code, or loaded from a `bucket.toml` file next to the application.
//! Options only shape the backing stream when it is first created; opening
//! an existing bucket never reconciles its configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strata_kv_core::{Error, KvCodecs, Result};

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "bucket.toml";

/// Largest per-key history the log service retains
pub const MAX_HISTORY: u64 = 64;

/// Key codec names accepted in `key_codec`
pub const KEY_CODEC_NOOP: &str = "noop";
/// Base64 (URL safe) key codec name
pub const KEY_CODEC_BASE64: &str = "base64";

/// Options for creating or opening a bucket.
///
/// # Example
///
/// ```toml
/// # Versions retained per key (1..=64)
/// history = 5
///
/// # Drop values older than one hour
/// ttl_ms = 3600000
///
/// # Keys are base64 encoded per token
/// key_codec = "base64"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketOptions {
    /// Replication factor of the backing stream
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Versions retained per key
    #[serde(default = "default_history")]
    pub history: u64,
    /// Deadline for request/response calls, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total byte limit of the bucket; unlimited if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bucket_size: Option<u64>,
    /// Per-value byte limit; unlimited if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value_size: Option<usize>,
    /// Cluster the backing stream should be placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_cluster: Option<String>,
    /// Bucket this one mirrors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_bucket: Option<String>,
    /// Age after which values are dropped, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Explicit backing stream name, instead of `KV_<bucket>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    /// Named key codec: `"noop"` or `"base64"`
    #[serde(default = "default_key_codec")]
    pub key_codec: String,
    /// Custom codecs; take precedence over `key_codec`
    #[serde(skip)]
    pub codecs: Option<KvCodecs>,
}

fn default_replicas() -> usize {
    1
}

fn default_history() -> u64 {
    1
}

fn default_timeout_ms() -> u64 {
    2000
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_key_codec() -> String {
    KEY_CODEC_NOOP.to_string()
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            history: default_history(),
            timeout_ms: default_timeout_ms(),
            max_bucket_size: None,
            max_value_size: None,
            placement_cluster: None,
            mirror_bucket: None,
            ttl_ms: None,
            stream_name: None,
            key_codec: default_key_codec(),
            codecs: None,
        }
    }
}

impl BucketOptions {
    /// Set the per-key history depth
    pub fn with_history(mut self, history: u64) -> Self {
        self.history = history;
        self
    }

    /// Set the replication factor
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Set the request deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = saturating_millis(timeout);
        self
    }

    /// Set the value time-to-live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(saturating_millis(ttl));
        self
    }

    /// Set the bucket byte limit
    pub fn with_max_bucket_size(mut self, bytes: u64) -> Self {
        self.max_bucket_size = Some(bytes);
        self
    }

    /// Set the per-value byte limit
    pub fn with_max_value_size(mut self, bytes: usize) -> Self {
        self.max_value_size = Some(bytes);
        self
    }

    /// Set the placement cluster
    pub fn with_placement_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.placement_cluster = Some(cluster.into());
        self
    }

    /// Mirror another bucket
    pub fn with_mirror_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.mirror_bucket = Some(bucket.into());
        self
    }

    /// Use an explicit backing stream name
    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = Some(name.into());
        self
    }

    /// Select a named key codec
    pub fn with_key_codec(mut self, name: impl Into<String>) -> Self {
        self.key_codec = name.into();
        self
    }

    /// Use custom codecs
    pub fn with_codecs(mut self, codecs: KvCodecs) -> Self {
        self.codecs = Some(codecs);
        self
    }

    /// Request deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Value time-to-live, if any
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// Codecs the bucket will use
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unknown `key_codec` name.
    pub fn resolve_codecs(&self) -> Result<KvCodecs> {
        if let Some(codecs) = &self.codecs {
            return Ok(codecs.clone());
        }
        match self.key_codec.as_str() {
            KEY_CODEC_NOOP => Ok(KvCodecs::noop()),
            KEY_CODEC_BASE64 => Ok(KvCodecs::base64_keys()),
            other => Err(Error::InvalidConfig(format!(
                "unknown key codec '{}', expected \"{}\" or \"{}\"",
                other, KEY_CODEC_NOOP, KEY_CODEC_BASE64
            ))),
        }
    }

    /// Check the options are usable
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if history is 0 or above [`MAX_HISTORY`],
    /// replicas is 0, the timeout is 0, or the key codec is unknown.
    pub fn validate(&self) -> Result<()> {
        if self.history == 0 || self.history > MAX_HISTORY {
            return Err(Error::InvalidConfig(format!(
                "history must be between 1 and {}, got {}",
                MAX_HISTORY, self.history
            )));
        }
        if self.replicas == 0 {
            return Err(Error::InvalidConfig("replicas must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms must be positive".into()));
        }
        self.resolve_codecs()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# strata-kv bucket configuration
#
# Replication factor of the backing stream (default: 1)
replicas = 1

# Versions retained per key, 1..=64 (default: 1)
history = 1

# Deadline for put/get/delete/status calls in milliseconds (default: 2000)
timeout_ms = 2000

# Key codec: "noop" (default) or "base64"
key_codec = "noop"

# Limits; unlimited when unset
# max_bucket_size = 1073741824
# max_value_size = 1048576

# Drop values older than this many milliseconds
# ttl_ms = 3600000

# Placement and mirroring
# placement_cluster = "east"
# mirror_bucket = "origin"

# Backing stream name (default: "KV_<bucket>")
# stream_name = "KV_custom"
"#
    }

    /// Parse options from TOML text and validate them.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: BucketOptions = toml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse bucket options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Read and parse options from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize these options to TOML and write them to the given path.
    ///
    /// Custom codecs are not persisted.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("failed to serialize options: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::InvalidConfig(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
