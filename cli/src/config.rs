use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "stride").context("Could not determine home directory")?;
        Self::at(proj_dirs.data_dir())
    }

    /// Use `data_dir` for the database and the user id file, creating it if needed.
    pub fn at(data_dir: &Path) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("stride.db");

        Ok(Config { db_path, data_dir })
    }

    /// Load the local user id from disk, or generate a new one.
    ///
    /// Returns `(uid, newly_created)` where `newly_created` is true on the
    /// first run on this machine.
    pub fn load_or_create_user_id(&self) -> Result<(String, bool)> {
        let path = self.data_dir.join("user_id");

        if path.exists() {
            let uid = std::fs::read_to_string(&path).context("Failed to read user id file")?;
            let uid = uid.trim().to_string();
            if !uid.is_empty() {
                return Ok((uid, false));
            }
        }

        let uid = uuid::Uuid::new_v4().simple().to_string();
        std::fs::write(&path, &uid).context("Failed to write user id file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set user id file permissions")?;
        }
        tracing::info!(uid = %uid, "created local user id");
        Ok((uid, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_at_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("stride");
        let config = Config::at(&data_dir).unwrap();
        assert!(data_dir.is_dir());
        assert_eq!(config.db_path, data_dir.join("stride.db"));
    }

    #[test]
    fn test_user_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path()).unwrap();
        let (first, created) = config.load_or_create_user_id().unwrap();
        assert!(created);
        assert_eq!(first.len(), 32);
        let (second, created) = config.load_or_create_user_id().unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn test_blank_user_id_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path()).unwrap();
        std::fs::write(dir.path().join("user_id"), "  \n").unwrap();
        let (uid, created) = config.load_or_create_user_id().unwrap();
        assert!(created);
        assert!(!uid.trim().is_empty());
    }

    #[test]
    fn test_user_id_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path()).unwrap();
        std::fs::write(dir.path().join("user_id"), "alice\n").unwrap();
        assert_eq!(config.load_or_create_user_id().unwrap().0, "alice");
    }
}
