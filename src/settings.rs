use std::path::{Path, PathBuf};

use log::LevelFilter;

use crate::error::Result;
use crate::ops::fill::DEFAULT_TOLERANCE;
use crate::selection::LassoParams;

/// Runtime configuration, persisted as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Directory holding one sub-directory per project.
    pub storage_root: PathBuf,
    pub default_width: u32,
    pub default_height: u32,
    pub lasso: LassoParams,
    pub bucket_tolerance: u8,
    /// Largest image file `import` accepts, in bytes.
    pub max_import_bytes: u64,
    pub log_level: LevelFilter,
    /// When set, logging goes to this file (truncated per session) instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            default_width: 500,
            default_height: 500,
            lasso: LassoParams::default(),
            bucket_tolerance: DEFAULT_TOLERANCE,
            max_import_bytes: 50 * 1024 * 1024,
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }
}

impl Settings {
    /// Default location of the settings file.
    /// `$XDG_CONFIG_HOME/layerlab/layerlab.cfg`, falling back to `~/.config`.
    pub fn settings_path() -> Option<PathBuf> {
        let config_dir = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
        Some(config_dir.join("layerlab").join("layerlab.cfg"))
    }

    /// Defaults, then the settings file (`path`, or the default location when
    /// `None`), then environment overrides. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Self {
        let mut s = Self::default();
        let path = path.map(Path::to_path_buf).or_else(Self::settings_path);
        if let Some(path) = path {
            if let Ok(content) = std::fs::read_to_string(&path) {
                s.apply_str(&content);
            }
        }
        s.apply_env(|key| std::env::var(key).ok());
        s
    }

    /// Apply `key=value` lines. Blank lines and `#` comments are skipped,
    /// unknown keys are ignored, unparsable values keep the current setting.
    pub fn apply_str(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            let ok = match key {
                "storage_root" => {
                    self.storage_root = PathBuf::from(val);
                    true
                }
                "default_width" => set_parsed(&mut self.default_width, val),
                "default_height" => set_parsed(&mut self.default_height, val),
                "lasso_step" => set_parsed(&mut self.lasso.step, val),
                "lasso_max_radius" => set_parsed(&mut self.lasso.max_radius, val),
                "lasso_low_threshold" => set_parsed(&mut self.lasso.low_threshold, val),
                "lasso_high_threshold" => set_parsed(&mut self.lasso.high_threshold, val),
                "bucket_tolerance" => set_parsed(&mut self.bucket_tolerance, val),
                "max_import_bytes" => set_parsed(&mut self.max_import_bytes, val),
                "log_level" => set_parsed(&mut self.log_level, val),
                "log_file" => {
                    self.log_file = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
                    true
                }
                _ => true,
            };
            if !ok {
                log::warn!("settings: ignoring bad value '{}' for '{}'", val, key);
            }
        }
        if self.default_width == 0 || self.default_height == 0 {
            log::warn!("settings: default canvas size must be non-zero, using 500x500");
            self.default_width = 500;
            self.default_height = 500;
        }
    }

    /// `LAYERLAB_STORAGE_ROOT` and `LAYERLAB_LOG_LEVEL`, looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(root) = var("LAYERLAB_STORAGE_ROOT") {
            if !root.is_empty() {
                self.storage_root = PathBuf::from(root);
            }
        }
        if let Some(level) = var("LAYERLAB_LOG_LEVEL") {
            if !set_parsed(&mut self.log_level, &level) {
                log::warn!("settings: ignoring bad LAYERLAB_LOG_LEVEL '{}'", level);
            }
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "storage_root={}\n\
             default_width={}\n\
             default_height={}\n\
             lasso_step={}\n\
             lasso_max_radius={}\n\
             lasso_low_threshold={}\n\
             lasso_high_threshold={}\n\
             bucket_tolerance={}\n\
             max_import_bytes={}\n\
             log_level={}\n\
             log_file={}\n",
            self.storage_root.display(),
            self.default_width,
            self.default_height,
            self.lasso.step,
            self.lasso.max_radius,
            self.lasso.low_threshold,
            self.lasso.high_threshold,
            self.bucket_tolerance,
            self.max_import_bytes,
            self.log_level.as_str().to_lowercase(),
            self.log_file.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, val: &str) -> bool {
    match val.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}
