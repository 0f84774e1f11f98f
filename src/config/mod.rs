use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Limits and locations for the upload defense pipeline
#[derive(Debug, Clone)]
pub struct DefenseConfig {
    /// Maximum upload size in bytes (default: 10 MiB)
    pub max_file_size: u64,

    /// Deepest permitted archive nesting; 1 means an archive may contain archives
    /// but those may not contain further archives (default: 1)
    pub max_archive_nesting_depth: u8,

    /// Maximum number of files across all archive levels (default: 1000)
    pub max_archive_file_count: u32,

    /// Maximum cumulative decompressed size across all archive levels (default: 10 MiB)
    pub max_archive_uncompressed_size: u64,

    /// Maximum uncompressed/compressed ratio of one archive level (default: 100)
    pub max_archive_compression_ratio: u64,

    /// Bytes of decompressed content sampled per archive entry (default: 1 MiB)
    pub archive_entry_sample_size: usize,

    /// Root directory for stored uploads (default: ./uploads)
    pub upload_dir: PathBuf,

    /// Directory for staging files during validation (default: system temp dir)
    pub staging_dir: Option<PathBuf>,

    /// Database holding blocked-extension rules and file records
    pub database_url: Option<String>,

    /// Upper bound on the pre-storage validation of one upload
    pub scan_timeout: Option<Duration>,
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10 MiB
            max_archive_nesting_depth: 1,
            max_archive_file_count: 1000,
            max_archive_uncompressed_size: 10 * 1024 * 1024, // 10 MiB
            max_archive_compression_ratio: 100,
            archive_entry_sample_size: 1024 * 1024, // 1 MiB
            upload_dir: PathBuf::from("./uploads"),
            staging_dir: None,
            database_url: None,
            scan_timeout: None,
        }
    }
}

impl DefenseConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            max_archive_nesting_depth: env::var("MAX_ARCHIVE_NESTING_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_archive_nesting_depth),

            max_archive_file_count: env::var("MAX_ARCHIVE_FILE_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_archive_file_count),

            max_archive_uncompressed_size: env::var("MAX_ARCHIVE_UNCOMPRESSED_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_archive_uncompressed_size),

            max_archive_compression_ratio: env::var("MAX_ARCHIVE_COMPRESSION_RATIO")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_archive_compression_ratio),

            archive_entry_sample_size: env::var("ARCHIVE_ENTRY_SAMPLE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.archive_entry_sample_size),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            staging_dir: env::var("STAGING_DIR").ok().map(PathBuf::from),

            database_url: env::var("DATABASE_URL").ok(),

            scan_timeout: env::var("SCAN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
        }
    }

    /// Create config for local development (scratch upload dir, in-memory database)
    pub fn development() -> Self {
        Self {
            upload_dir: env::temp_dir().join("file-blocker-uploads"),
            database_url: Some("sqlite::memory:".to_string()),
            scan_timeout: Some(Duration::from_secs(30)),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DefenseConfig::default();
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.max_archive_nesting_depth, 1);
        assert_eq!(config.max_archive_file_count, 1000);
        assert_eq!(config.max_archive_uncompressed_size, 10 * 1024 * 1024);
        assert_eq!(config.max_archive_compression_ratio, 100);
        assert_eq!(config.archive_entry_sample_size, 1024 * 1024);
        assert!(config.scan_timeout.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = DefenseConfig::development();
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.max_archive_file_count, 1000);
        assert!(config.scan_timeout.is_some());
    }

    #[test]
    fn test_from_env_overrides() {
        unsafe { env::set_var("MAX_ARCHIVE_FILE_COUNT", "25") };
        unsafe { env::set_var("MAX_ARCHIVE_COMPRESSION_RATIO", "not-a-number") };
        let config = DefenseConfig::from_env();
        unsafe { env::remove_var("MAX_ARCHIVE_FILE_COUNT") };
        unsafe { env::remove_var("MAX_ARCHIVE_COMPRESSION_RATIO") };

        assert_eq!(config.max_archive_file_count, 25);
        // Unparseable values fall back to the default
        assert_eq!(config.max_archive_compression_ratio, 100);
    }
}
