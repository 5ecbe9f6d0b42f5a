use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{TcseedError, TcseedResult};

/// Top-level configuration (loaded from tcseed.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcseedConfig {
    pub log: LogConfig,
    pub chunking: ChunkingConfig,
    pub seed: SeedConfig,
    pub assemble: AssembleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info), overridden by RUST_LOG
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogConfig {
    /// Parsed log format; unknown values fall back to text
    pub fn log_format(&self) -> LogFormat {
        match self.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// FastCDC chunk size targets used when indexing files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Allow copy-on-write block cloning from seeds when the filesystem supports it
    pub reflink: bool,
    /// Re-hash seed chunks before using them (default: true)
    pub validate: bool,
    /// Clone granularity in bytes (0 = destination filesystem block size)
    pub block_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleConfig {
    /// Worker thread count (0 = cpu_count)
    pub workers: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_size: 2 * 1024,
            avg_size: 4 * 1024,
            max_size: 16 * 1024,
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            reflink: true,
            validate: true,
            block_size: 0,
        }
    }
}

impl ChunkingConfig {
    /// FastCDC requires min <= avg <= max and non-zero sizes
    pub fn check(&self) -> TcseedResult<()> {
        if self.min_size == 0 || self.min_size > self.avg_size || self.avg_size > self.max_size {
            return Err(TcseedError::Config(format!(
                "chunking sizes must satisfy 0 < min <= avg <= max (got {}/{}/{})",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl SeedConfig {
    /// Configured clone block size, if one is pinned
    pub fn block_size_override(&self) -> Option<u64> {
        (self.block_size > 0).then_some(self.block_size)
    }

    pub fn check(&self) -> TcseedResult<()> {
        if self.block_size > 0 && !self.block_size.is_power_of_two() {
            return Err(TcseedError::Config(format!(
                "seed.block_size must be a power of two (got {})",
                self.block_size
            )));
        }
        Ok(())
    }
}

impl TcseedConfig {
    /// Parse a TOML document and check it
    pub fn from_toml(content: &str) -> TcseedResult<Self> {
        let config: TcseedConfig =
            toml::from_str(content).map_err(|e| TcseedError::Config(e.to_string()))?;
        config.chunking.check()?;
        config.seed.check()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> TcseedResult<String> {
        toml::to_string(self).map_err(|e| TcseedError::Config(e.to_string()))
    }
}

/// Load config from `path`, falling back to defaults if the file doesn't exist.
pub fn load_config(path: &Path) -> TcseedResult<TcseedConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        TcseedConfig::from_toml(&content)
            .map_err(|e| TcseedError::Config(format!("{}: {e}", path.display())))
    } else {
        tracing::debug!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(TcseedConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[chunking]
min_size = 16384
avg_size = 65536
max_size = 262144

[seed]
reflink = false
validate = false
block_size = 65536

[assemble]
workers = 4
"#;
        let config = TcseedConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.log_format(), LogFormat::Json);
        assert_eq!(config.chunking.avg_size, 65536);
        assert!(!config.seed.reflink);
        assert!(!config.seed.validate);
        assert_eq!(config.seed.block_size_override(), Some(65536));
        assert_eq!(config.assemble.workers, 4);
    }

    #[test]
    fn test_parse_defaults() {
        let config = TcseedConfig::from_toml("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.log_format(), LogFormat::Text);
        assert_eq!(config.chunking.min_size, 2048);
        assert_eq!(config.chunking.max_size, 16384);
        assert!(config.seed.reflink);
        assert!(config.seed.validate);
        assert_eq!(config.seed.block_size_override(), None);
        assert_eq!(config.assemble.workers, 0);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[seed]
validate = false
"#;
        let config = TcseedConfig::from_toml(toml_str).unwrap();

        // Overridden
        assert!(!config.seed.validate);
        // Defaults
        assert!(config.seed.reflink);
        assert_eq!(config.chunking.avg_size, 4096);
    }

    #[test]
    fn test_rejects_bad_chunk_sizes() {
        let toml_str = r#"
[chunking]
min_size = 8192
avg_size = 4096
"#;
        let err = TcseedConfig::from_toml(toml_str).unwrap_err();
        assert!(matches!(err, TcseedError::Config(_)));
    }

    #[test]
    fn test_rejects_non_power_of_two_block_size() {
        let err = TcseedConfig::from_toml("[seed]\nblock_size = 3000\n").unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = TcseedConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = TcseedConfig::from_toml(&toml_str).unwrap();

        assert_eq!(config.log.level, parsed.log.level);
        assert_eq!(config.chunking.avg_size, parsed.chunking.avg_size);
        assert_eq!(config.seed.reflink, parsed.seed.reflink);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).unwrap();
        assert!(config.seed.validate);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("tcseed.toml");
        std::fs::write(&path, "[assemble]\nworkers = 2\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.assemble.workers, 2);
    }
}
