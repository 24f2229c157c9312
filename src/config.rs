// src/config.rs
//! Service configuration: TOML file with env overrides.
//!
//! Lookup order for the file:
//! 1) $PREVIEW_CONFIG_PATH
//! 2) config/preview.toml
//! 3) built-in defaults (a missing file is not an error)
//!
//! Env vars applied on top: PREVIEW_ROOT_DIR, PREVIEW_BIND_ADDR,
//! PREVIEW_EXTENSIONS (comma list), PREVIEW_REFRESH_MS.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/preview.toml";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8188";

pub const DEFAULT_REFRESH_MS: u32 = 750;
pub const MIN_REFRESH_MS: u32 = 100;
pub const MAX_REFRESH_MS: u32 = 10_000;

pub const ENV_CONFIG_PATH: &str = "PREVIEW_CONFIG_PATH";
pub const ENV_ROOT_DIR: &str = "PREVIEW_ROOT_DIR";
pub const ENV_BIND_ADDR: &str = "PREVIEW_BIND_ADDR";
pub const ENV_EXTENSIONS: &str = "PREVIEW_EXTENSIONS";
pub const ENV_REFRESH_MS: &str = "PREVIEW_REFRESH_MS";

/// Raster formats the generation pipeline is known to write.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "gif", "bmp", "tif", "tiff",
];

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}
fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}
fn default_refresh_ms() -> u32 {
    DEFAULT_REFRESH_MS
}
fn default_include_subdirs() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreviewConfig {
    /// Directory holding one subdirectory per project. `None` means the
    /// resolver reports every project as missing.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Extension patterns: `png`, `.png` and `*.png` are equivalent.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_refresh_ms")]
    pub default_refresh_ms: u32,
    #[serde(default = "default_include_subdirs")]
    pub include_subdirs: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            bind_addr: default_bind_addr(),
            extensions: clean_extensions(default_extensions()),
            default_refresh_ms: DEFAULT_REFRESH_MS,
            include_subdirs: true,
        }
    }
}

impl PreviewConfig {
    /// Parse a TOML document. Values are sanitized the same way as env input.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PreviewConfig = toml::from_str(s).context("parsing preview config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading preview config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(root) = non_empty_env(ENV_ROOT_DIR) {
            self.root_dir = Some(PathBuf::from(root));
        }
        if let Some(addr) = non_empty_env(ENV_BIND_ADDR) {
            self.bind_addr = addr;
        }
        if let Some(list) = non_empty_env(ENV_EXTENSIONS) {
            self.extensions = list.split(',').map(|s| s.to_string()).collect();
        }
        if let Some(ms) = parse_refresh_env(non_empty_env(ENV_REFRESH_MS)) {
            self.default_refresh_ms = ms;
        }
        self.sanitize();
    }

    fn sanitize(&mut self) {
        self.default_refresh_ms = clamp_refresh_ms(i64::from(self.default_refresh_ms));
        self.extensions = clean_extensions(std::mem::take(&mut self.extensions));
        if self.root_dir.as_deref().is_some_and(|p| p.as_os_str().is_empty()) {
            self.root_dir = None;
        }
    }
}

/// Clamp a UI refresh interval into `[MIN_REFRESH_MS, MAX_REFRESH_MS]`.
/// Out-of-range input is a hint, never an error.
pub fn clamp_refresh_ms(ms: i64) -> u32 {
    ms.clamp(i64::from(MIN_REFRESH_MS), i64::from(MAX_REFRESH_MS)) as u32
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_refresh_env(raw: Option<String>) -> Option<u32> {
    raw.and_then(|s| s.parse::<i64>().ok()).map(clamp_refresh_ms)
}

/// Normalize extension patterns to bare lowercase extensions, deduplicated.
pub fn clean_extensions(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim().trim_start_matches('*').trim_start_matches('.');
        if !t.is_empty() {
            set.insert(t.to_ascii_lowercase());
        }
    }
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn clear_env() {
        for k in [
            ENV_CONFIG_PATH,
            ENV_ROOT_DIR,
            ENV_BIND_ADDR,
            ENV_EXTENSIONS,
            ENV_REFRESH_MS,
        ] {
            env::remove_var(k);
        }
    }

    #[test]
    fn refresh_clamps_to_bounds() {
        let got: Vec<u32> = [0, 50, 100, 5000, 10_000, 50_000]
            .into_iter()
            .map(clamp_refresh_ms)
            .collect();
        assert_eq!(got, vec![100, 100, 100, 5000, 10_000, 10_000]);
        assert_eq!(clamp_refresh_ms(-5), 100);
    }

    #[test]
    fn extension_patterns_normalize() {
        let out = clean_extensions(vec![
            "*.PNG".into(),
            ".jpg".into(),
            " webp ".into(),
            "png".into(),
            "".into(),
            "*.".into(),
        ]);
        assert_eq!(out, vec!["jpg", "png", "webp"]);
    }

    #[test]
    fn toml_fills_defaults_and_sanitizes() {
        let cfg = PreviewConfig::from_toml_str(
            r#"
root_dir = "/srv/projects"
extensions = ["*.PNG", "exr"]
default_refresh_ms = 20
"#,
        )
        .unwrap();
        assert_eq!(cfg.root_dir, Some(PathBuf::from("/srv/projects")));
        assert_eq!(cfg.extensions, vec!["exr", "png"]);
        assert_eq!(cfg.default_refresh_ms, MIN_REFRESH_MS);
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert!(cfg.include_subdirs);
    }

    #[test]
    fn empty_root_dir_means_unset() {
        let cfg = PreviewConfig::from_toml_str(r#"root_dir = """#).unwrap();
        assert_eq!(cfg.root_dir, None);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        // Isolate CWD so a real config/ in the repo is not picked up
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        // Nothing on disk → defaults
        let cfg = PreviewConfig::load_default().unwrap();
        assert_eq!(cfg, PreviewConfig::default());

        // Fallback file in ./config/
        fs::create_dir_all(tmp.path().join("config")).unwrap();
        fs::write(
            tmp.path().join(DEFAULT_CONFIG_PATH),
            r#"bind_addr = "0.0.0.0:9000""#,
        )
        .unwrap();
        assert_eq!(PreviewConfig::load_default().unwrap().bind_addr, "0.0.0.0:9000");

        // Explicit path wins, env overrides win over file values
        let p = tmp.path().join("other.toml");
        fs::write(&p, r#"root_dir = "/from/file""#).unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_ROOT_DIR, "/from/env");
        env::set_var(ENV_EXTENSIONS, "png, .webp");
        env::set_var(ENV_REFRESH_MS, "99999");
        let cfg = PreviewConfig::load_default().unwrap();
        assert_eq!(cfg.root_dir, Some(PathBuf::from("/from/env")));
        assert_eq!(cfg.extensions, vec!["png", "webp"]);
        assert_eq!(cfg.default_refresh_ms, MAX_REFRESH_MS);
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);

        // Dangling explicit path is an error
        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(PreviewConfig::load_default().is_err());

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
