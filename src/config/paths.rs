//! Where promptdj keeps its files.
//!
//! Everything lives in one directory: `settings.toml` and `prompts.json`.
//! It is `$PROMPTDJ_CONFIG_DIR` when set, otherwise `promptdj/` under the
//! platform config dir (`~/.config` on Linux, `~/Library/Application
//! Support` on macOS, `%APPDATA%` on Windows).

use std::path::{Path, PathBuf};

/// Environment variable that relocates the whole config directory.
pub const CONFIG_DIR_VAR: &str = "PROMPTDJ_CONFIG_DIR";

const APP_NAME: &str = "promptdj";

#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    pub prompts_file: PathBuf,
}

impl AppPaths {
    /// Resolve the config directory from the environment or the platform.
    ///
    /// Falls back to `./promptdj` when the platform has no config dir.
    pub fn new() -> Self {
        Self::resolve(std::env::var_os(CONFIG_DIR_VAR).map(PathBuf::from))
    }

    /// All files under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let config_dir = dir.as_ref().to_path_buf();
        Self {
            settings_file: config_dir.join("settings.toml"),
            prompts_file: config_dir.join("prompts.json"),
            config_dir,
        }
    }

    fn resolve(overridden: Option<PathBuf>) -> Self {
        match overridden.filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => Self::in_dir(dir),
            None => Self::in_dir(
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(APP_NAME),
            ),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_dir_ends_with_app_name() {
        let paths = AppPaths::resolve(None);
        assert!(paths.config_dir.ends_with(APP_NAME));
        assert_eq!(paths.settings_file.file_name().unwrap(), "settings.toml");
        assert_eq!(paths.prompts_file.file_name().unwrap(), "prompts.json");
    }

    #[test]
    fn override_relocates_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::resolve(Some(dir.path().to_path_buf()));
        assert_eq!(paths, AppPaths::in_dir(dir.path()));
        assert!(paths.prompts_file.starts_with(dir.path()));
    }

    #[test]
    fn empty_override_is_ignored() {
        assert_eq!(
            AppPaths::resolve(Some(PathBuf::new())),
            AppPaths::resolve(None)
        );
    }
}
