use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use directories::UserDirs;

pub(crate) const APP_DIR_NAME: &str = "agrupar";

trait ConfigPath {
    fn get_root_path() -> Result<PathBuf>;

    /// Get a subdir under the root, creating as necessary.
    fn get_or_create_subdir<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        let root_path = Self::get_root_path()?;
        let full_path = subpath.map(|p| root_path.join(p)).unwrap_or(root_path);
        std::fs::create_dir_all(&full_path)?;
        Ok(full_path)
    }
}

pub(crate) struct UserConfig();
impl ConfigPath for UserConfig {
    /// Always `~/.config/agrupar`, XDG style, on every platform.
    fn get_root_path() -> Result<PathBuf> {
        let home_dir = UserDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or_else(|| anyhow!("Failed to get home directory"))?;
        Ok(home_dir.join(".config").join(APP_DIR_NAME))
    }
}
impl UserConfig {
    pub(crate) fn get_config_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        Self::get_or_create_subdir(subpath)
    }
}
