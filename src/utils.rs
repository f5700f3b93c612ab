use std::path::PathBuf;

/// Get the cache database path from environment variable or use default
pub fn get_database_path() -> PathBuf {
    std::env::var("FINCHART_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("finchart_cache.db"))
}
