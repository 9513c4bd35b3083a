//! Options accepted by the extraction entry points.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AfppError, Result};

/// Options for a single extraction call.
///
/// Every field is optional; `ParseOptions::default()` opens unencrypted
/// documents, dispatches every page at once and renders at scale 1.0.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParseOptions {
    /// Password for encrypted documents.
    pub password: Option<String>,

    /// Maximum number of page tasks in flight. Unbounded when unset.
    pub max_concurrency: Option<NonZeroUsize>,

    /// Deadline for the whole call, in milliseconds when serialized.
    #[serde(with = "millis", rename = "timeout_ms")]
    pub timeout: Option<Duration>,

    /// Render scale for pages rasterized to images.
    pub scale: f32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            password: None,
            max_concurrency: None,
            timeout: None,
            scale: 1.0,
        }
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_max_concurrency(mut self, limit: NonZeroUsize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(AfppError::Config(format!(
                "scale must be a positive number, got {}",
                self.scale
            )));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(AfppError::Config("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&content)
            .map_err(|e| AfppError::Config(format!("{}: {}", path.display(), e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Save options to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| AfppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl std::fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseOptions")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout", &self.timeout)
            .field("scale", &self.scale)
            .finish()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            // Rounded up so a non-zero timeout never saves as zero.
            Some(duration) => {
                let millis = u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
                serializer.serialize_some(&millis)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
