use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the vault key file for embedding-at-rest encryption.
    pub key_path: PathBuf,
    /// Whether embedding blobs are sealed with AES-256-GCM.
    pub encrypt_embeddings: bool,
    /// Result limit applied when a caller passes top_k = 0.
    pub default_top_k: usize,
    /// Similarity threshold applied when a caller passes a non-finite
    /// min_score.
    pub default_min_score: f32,
    /// Serve on the system bus instead of the session bus.
    pub use_system_bus: bool,
}

impl Config {
    /// Load configuration from `LINEAGE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("lineage");

        let db_path = std::env::var("LINEAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("lineage.db"));

        let key_path = std::env::var("LINEAGE_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("vault.key"));

        Self {
            db_path,
            key_path,
            encrypt_embeddings: std::env::var("LINEAGE_ENCRYPT_EMBEDDINGS")
                .map(|v| v != "0")
                .unwrap_or(true),
            default_top_k: env_usize("LINEAGE_DEFAULT_TOP_K", 100),
            default_min_score: env_f32("LINEAGE_MIN_SCORE", 0.35),
            use_system_bus: std::env::var("LINEAGE_BUS")
                .map(|v| v == "system")
                .unwrap_or(false),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_helpers_fall_back_to_defaults() {
        assert_eq!(env_f32("LINEAGE_TEST_UNSET_F32", 0.35), 0.35);
        assert_eq!(env_usize("LINEAGE_TEST_UNSET_USIZE", 100), 100);
    }
}
