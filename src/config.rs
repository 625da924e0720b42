use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Upper bound applied to `MARKETING_MAX_UPLOAD_BYTES`.
pub const MAX_UPLOAD_CEILING: u64 = 50 * MIB;

/// Service configuration loaded from environment variables.
///
/// Server, pool, and request limits live in Rocket's figment; this struct only
/// covers settings owned by the import/export pipelines and background tasks.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_path: PathBuf,
    pub max_upload_bytes: u64,
    pub export_ttl_days: i64,
    pub job_poll_interval_secs: u64,
    pub ab_test_check_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./storage"),
            max_upload_bytes: 10 * MIB,
            export_ttl_days: 7,
            job_poll_interval_secs: 5,
            ab_test_check_interval_secs: 60 * 60,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage_path = std::env::var("MARKETING_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);
        let max_upload_bytes = env_parse("MARKETING_MAX_UPLOAD_BYTES")
            .unwrap_or(defaults.max_upload_bytes)
            .clamp(1, MAX_UPLOAD_CEILING);
        let export_ttl_days = env_parse("MARKETING_EXPORT_TTL_DAYS")
            .filter(|days: &i64| *days > 0)
            .unwrap_or(defaults.export_ttl_days);
        let job_poll_interval_secs = env_parse("MARKETING_JOB_POLL_INTERVAL_SECS")
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(defaults.job_poll_interval_secs);
        let ab_test_check_interval_secs = env_parse("MARKETING_AB_TEST_CHECK_INTERVAL_SECS")
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(defaults.ab_test_check_interval_secs);

        Self {
            storage_path,
            max_upload_bytes,
            export_ttl_days,
            job_poll_interval_secs,
            ab_test_check_interval_secs,
        }
    }

    /// Directory holding uploaded import files.
    pub fn import_dir(&self) -> PathBuf {
        self.storage_path.join("imports")
    }

    /// Directory holding generated export files.
    pub fn export_dir(&self) -> PathBuf {
        self.storage_path.join("exports")
    }

    /// Create the storage directories if they do not exist yet.
    pub fn ensure_storage_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.import_dir())?;
        std::fs::create_dir_all(self.export_dir())?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_dirs_hang_off_the_storage_root() {
        let config = AppConfig {
            storage_path: PathBuf::from("/var/lib/marketing"),
            ..AppConfig::default()
        };
        assert_eq!(config.import_dir(), PathBuf::from("/var/lib/marketing/imports"));
        assert_eq!(config.export_dir(), PathBuf::from("/var/lib/marketing/exports"));
    }

    #[test]
    fn ensure_storage_dirs_creates_both_directories() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            storage_path: root.path().join("storage"),
            ..AppConfig::default()
        };
        config.ensure_storage_dirs().expect("create dirs");
        assert!(config.import_dir().is_dir());
        assert!(config.export_dir().is_dir());
    }
}
