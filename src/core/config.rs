use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::AudioCodec;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub delivery: DeliveryConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub extractor: ExtractorConfig,
    pub observability: ObservabilityConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL used to build retrieval links.
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// The single origin allowed by CORS. `*` allows any origin.
    pub frontend_origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Publish store directory. Created at startup if absent.
    pub directory: PathBuf,
}

/// Upper bound for any configured duration: ten years.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Retention policy applied uniformly to every published file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Time between reaper passes.
    pub interval_secs: u64,
    /// Files whose mtime is older than this are deleted.
    pub max_age_secs: u64,
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Out-of-range values saturate to the largest representable age.
    pub fn max_age(&self) -> chrono::Duration {
        i64::try_from(self.max_age_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Path or name of the yt-dlp executable.
    pub binary: String,
    pub audio_codec: AudioCodec,
    /// Quality hint used when a request does not carry one.
    pub default_quality: String,
    /// Upper bound on one fetch + transcode.
    #[serde(default = "default_extractor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_extractor_timeout_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_json_body_bytes: usize,
}

impl AppConfig {
    /// Load configuration with layered overrides:
    /// 1. config/default.toml (built-in defaults when the file is absent)
    /// 2. config/{env}.toml (based on MEDIADROP_ENV)
    /// 3. Environment variables (MEDIADROP_* prefix)
    pub fn load() -> anyhow::Result<Self> {
        let default_path = Path::new("config/default.toml");
        let mut config = if default_path.exists() {
            let default_content = std::fs::read_to_string(default_path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", default_path.display(), e))?;
            toml::from_str(&default_content)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", default_path.display(), e))?
        } else {
            AppConfig::default()
        };

        // Layer 2: environment-specific overrides
        let env_name =
            std::env::var("MEDIADROP_ENV").unwrap_or_else(|_| "development".to_string());
        let env_path = format!("config/{}.toml", env_name);
        if let Ok(env_content) = std::fs::read_to_string(&env_path) {
            let env_config: AppConfig = toml::from_str(&env_content)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", env_path, e))?;
            config = env_config;
        }

        // Layer 3: environment variable overrides (selected keys)
        config.apply_overrides(|key| std::env::var(key).ok());

        config.validate()?;
        Ok(config)
    }

    /// Apply `MEDIADROP_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored and the previous layer wins.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MEDIADROP_SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(port) = lookup("MEDIADROP_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(v) = lookup("MEDIADROP_PUBLIC_BASE_URL") {
            self.server.public_base_url = v;
        }
        if let Some(v) = lookup("MEDIADROP_FRONTEND_ORIGIN") {
            self.delivery.frontend_origin = v;
        }
        if let Some(v) = lookup("MEDIADROP_STORAGE_DIR") {
            self.storage.directory = PathBuf::from(v);
        }
        if let Some(secs) =
            lookup("MEDIADROP_RETENTION_INTERVAL_SECS").and_then(|v| v.parse().ok())
        {
            self.retention.interval_secs = secs;
        }
        if let Some(secs) =
            lookup("MEDIADROP_RETENTION_MAX_AGE_SECS").and_then(|v| v.parse().ok())
        {
            self.retention.max_age_secs = secs;
        }
        if let Some(v) = lookup("MEDIADROP_EXTRACTOR_BINARY") {
            self.extractor.binary = v;
        }
        if let Some(codec) =
            lookup("MEDIADROP_EXTRACTOR_AUDIO_CODEC").and_then(|v| AudioCodec::parse(&v))
        {
            self.extractor.audio_codec = codec;
        }
        if let Some(secs) =
            lookup("MEDIADROP_EXTRACTOR_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.extractor.timeout_secs = secs;
        }
        if let Some(v) = lookup("MEDIADROP_LOG_LEVEL") {
            self.observability.log_level = v;
        }
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retention.interval_secs == 0 {
            anyhow::bail!("retention.interval_secs must be greater than zero");
        }
        if self.retention.max_age_secs == 0 {
            anyhow::bail!("retention.max_age_secs must be greater than zero");
        }
        if self.extractor.timeout_secs == 0 {
            anyhow::bail!("extractor.timeout_secs must be greater than zero");
        }
        for (key, secs) in [
            ("retention.interval_secs", self.retention.interval_secs),
            ("retention.max_age_secs", self.retention.max_age_secs),
            ("extractor.timeout_secs", self.extractor.timeout_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                anyhow::bail!("{key} must be at most {MAX_DURATION_SECS} ({secs} given)");
            }
        }
        if self.storage.directory.as_os_str().is_empty() {
            anyhow::bail!("storage.directory must not be empty");
        }
        let base = url::Url::parse(&self.server.public_base_url).map_err(|e| {
            anyhow::anyhow!(
                "server.public_base_url '{}' is not a valid URL: {}",
                self.server.public_base_url,
                e
            )
        })?;
        if base.cannot_be_a_base() {
            anyhow::bail!(
                "server.public_base_url '{}' cannot be used as a base URL",
                self.server.public_base_url
            );
        }
        crate::core::security::validate_quality(&self.extractor.default_quality)
            .map_err(|e| anyhow::anyhow!("extractor.default_quality: {}", e))?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                public_base_url: "http://localhost:8000".to_string(),
            },
            delivery: DeliveryConfig {
                frontend_origin: "http://localhost:3000".to_string(),
            },
            storage: StorageConfig {
                directory: PathBuf::from("./downloads"),
            },
            retention: RetentionConfig {
                interval_secs: 3 * 60 * 60,
                max_age_secs: 3 * 60 * 60,
            },
            extractor: ExtractorConfig {
                binary: "yt-dlp".to_string(),
                audio_codec: AudioCodec::Mp3,
                default_quality: "192".to_string(),
                timeout_secs: default_extractor_timeout_secs(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "json".to_string(),
                metrics_enabled: true,
            },
            security: SecurityConfig {
                max_json_body_bytes: 16 * 1024,
            },
        }
    }
}
