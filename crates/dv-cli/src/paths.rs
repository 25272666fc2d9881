use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "datavault";
pub const APP_NAME: &str = "datavault";

pub const DATA_DIR_ENV: &str = "DATAVAULT_DIR";
const DB_FILE: &str = "vault.db";
const EXPORT_DIR: &str = "extracted_data";

/// `--data-dir` wins, then `DATAVAULT_DIR`, then the platform data directory.
pub fn data_dir(cli_override: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = cli_override {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE)
}

pub fn default_export_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(EXPORT_DIR)
}
