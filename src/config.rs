//! Pipeline configuration.
//!
//! Built-in defaults describe the current upstream installer. An optional
//! TOML file can override any of them:
//!
//! ```toml
//! [installer]
//! url = "https://example.invalid/Claude-Setup-x64.exe"
//! version = "0.9.3"
//! sha256 = "…64 hex chars…"
//!
//! [runtime]
//! node_major = 20
//! nvm_dir = "/home/alice/.nvm"
//!
//! [paths]
//! work_dir = "build"
//! cache_dir = "/home/alice/.cache/claude-desktop-pkg"
//! output_dir = "."
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Upstream download location of the Windows installer.
pub const DEFAULT_INSTALLER_URL: &str = "https://storage.googleapis.com/osprey-downloads-c02f6a0d-347c-492b-a752-3e0651722e97/nest-win-x64/Claude-Setup-x64.exe";

/// Installer version the default URL currently serves.
pub const DEFAULT_VERSION: &str = "0.7.7";

/// Node major version selected through nvm for the asar tool.
pub const DEFAULT_NODE_MAJOR: u32 = 20;

/// Workspace directory, relative to the invocation directory.
pub const DEFAULT_WORK_DIR: &str = "build";

/// Cache directory name below the real user's `~/.cache`.
pub const CACHE_DIR_NAME: &str = "claude-desktop-pkg";

/// Name of the produced distribution package.
pub const PACKAGE_NAME: &str = "claude-desktop-bin";

/// Package release number.
pub const PACKAGE_RELEASE: u32 = 1;

/// Application name used for the launcher, icons and library directory.
pub const APP_NAME: &str = "claude-desktop";

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub installer_url: String,
    pub version: String,
    /// Pinned sha256 of the installer, when known.
    pub installer_sha256: Option<String>,
    pub node_major: u32,
    pub nvm_dir: Option<PathBuf>,
    pub work_dir: PathBuf,
    /// `None` means `<real home>/.cache/claude-desktop-pkg`.
    pub cache_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            installer_url: DEFAULT_INSTALLER_URL.to_string(),
            version: DEFAULT_VERSION.to_string(),
            installer_sha256: None,
            node_major: DEFAULT_NODE_MAJOR,
            nvm_dir: None,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            cache_dir: None,
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    installer: Option<InstallerToml>,
    runtime: Option<RuntimeToml>,
    paths: Option<PathsToml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallerToml {
    url: Option<String>,
    version: Option<String>,
    sha256: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeToml {
    node_major: Option<u32>,
    nvm_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsToml {
    work_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load defaults, then apply overrides from `path` when given.
    ///
    /// Relative paths in the file resolve against `base_dir`.
    pub fn load(path: Option<&Path>, base_dir: &Path) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config '{}'", path.display()))?;
            config.apply_toml(&text, base_dir).with_context(|| {
                format!("invalid config '{}'", path.display())
            })?;
        }
        config.work_dir = resolve(base_dir, &config.work_dir);
        config.output_dir = resolve(base_dir, &config.output_dir);
        config.validate()?;
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str, base_dir: &Path) -> Result<()> {
        let parsed: ConfigToml = toml::from_str(text).context("parsing TOML")?;

        if let Some(installer) = parsed.installer {
            if let Some(url) = installer.url {
                self.installer_url = url.trim().to_string();
            }
            if let Some(version) = installer.version {
                self.version = version.trim().to_string();
            }
            if let Some(sha256) = installer.sha256 {
                self.installer_sha256 = Some(sha256.trim().to_ascii_lowercase());
            }
        }
        if let Some(runtime) = parsed.runtime {
            if let Some(major) = runtime.node_major {
                self.node_major = major;
            }
            if let Some(nvm_dir) = runtime.nvm_dir {
                self.nvm_dir = Some(resolve(base_dir, &nvm_dir));
            }
        }
        if let Some(paths) = parsed.paths {
            if let Some(work_dir) = paths.work_dir {
                self.work_dir = work_dir;
            }
            if let Some(cache_dir) = paths.cache_dir {
                self.cache_dir = Some(resolve(base_dir, &cache_dir));
            }
            if let Some(output_dir) = paths.output_dir {
                self.output_dir = output_dir;
            }
        }
        Ok(())
    }

    /// Reject values that would break file naming or the package manifest.
    pub fn validate(&self) -> Result<()> {
        validate_version(&self.version)?;
        if !(self.installer_url.starts_with("https://") || self.installer_url.starts_with("http://"))
        {
            bail!(PipelineError::Usage(format!(
                "installer url must be http(s): {}",
                self.installer_url
            )));
        }
        if let Some(sha) = &self.installer_sha256 {
            if sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
                bail!(PipelineError::Usage(format!("invalid installer sha256: {sha}")));
            }
        }
        if self.node_major == 0 {
            bail!(PipelineError::Usage("node_major must be >= 1".into()));
        }
        Ok(())
    }

    /// Cache directory for the given real-user home.
    pub fn cache_dir_for(&self, home: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| home.join(".cache").join(CACHE_DIR_NAME))
    }
}

/// A version must be a safe filename segment and a valid package version.
pub fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() {
        bail!(PipelineError::Usage("version must not be empty".into()));
    }
    if !version.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        bail!(PipelineError::Usage(format!(
            "version must start with a digit: {version}"
        )));
    }
    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+'))
    {
        bail!(PipelineError::Usage(format!(
            "version may only contain letters, digits, '.', '_' and '+': {version}"
        )));
    }
    Ok(())
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
