//! Workspace layout for one pipeline run.
//!
//! Every path a stage reads or writes is derived from the workspace root, so
//! a run can be pointed anywhere (tests use a temp dir).

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::APP_NAME;
use crate::filesystem::remove_dir_if_present;
use crate::privilege::PrivilegeContext;

/// Paths used during a build.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Delete and recreate the workspace. The root, and any parent created
    /// for it, belong to the real user.
    pub fn create_fresh(root: impl Into<PathBuf>, privileges: &PrivilegeContext) -> Result<Self> {
        let ws = Self::new(root);
        remove_dir_if_present(&ws.root)?;
        privileges.create_dir_all(&ws.root)?;
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy of the cached installer.
    pub fn installer(&self) -> PathBuf {
        self.root.join("Claude-Setup-x64.exe")
    }

    /// Extraction target of the installer container.
    pub fn installer_dir(&self) -> PathBuf {
        self.root.join("installer")
    }

    /// Nested package recovered from the installer, named after the version.
    pub fn nupkg(&self, version: &str) -> PathBuf {
        self.installer_dir()
            .join(format!("AnthropicClaude-{version}-full.nupkg"))
    }

    /// Extraction target of the nested package.
    pub fn nupkg_dir(&self) -> PathBuf {
        self.root.join("nupkg")
    }

    /// Application directory inside the extracted package.
    pub fn app_lib_dir(&self) -> PathBuf {
        self.nupkg_dir().join("lib/net45")
    }

    /// Executable carrying the icon resources.
    pub fn app_exe(&self) -> PathBuf {
        self.app_lib_dir().join("claude.exe")
    }

    /// Electron resources directory inside the extracted package.
    pub fn resources_dir(&self) -> PathBuf {
        self.app_lib_dir().join("resources")
    }

    pub fn icons_dir(&self) -> PathBuf {
        self.root.join("icons")
    }

    pub fn icon_container(&self) -> PathBuf {
        self.icons_dir().join("claude.ico")
    }

    pub fn electron_dir(&self) -> PathBuf {
        self.root.join("electron-app")
    }

    pub fn app_archive(&self) -> PathBuf {
        self.electron_dir().join("app.asar")
    }

    pub fn app_unpacked(&self) -> PathBuf {
        self.electron_dir().join("app.asar.unpacked")
    }

    pub fn app_contents(&self) -> PathBuf {
        self.electron_dir().join("app.asar.contents")
    }

    /// Package root mirroring the target filesystem.
    pub fn package_root(&self) -> PathBuf {
        self.root.join("package")
    }

    /// `usr/` inside the package root.
    pub fn install_prefix(&self) -> PathBuf {
        self.package_root().join("usr")
    }

    pub fn package_bin_dir(&self) -> PathBuf {
        self.install_prefix().join("bin")
    }

    pub fn package_lib_dir(&self) -> PathBuf {
        self.install_prefix().join("lib").join(APP_NAME)
    }

    pub fn package_applications_dir(&self) -> PathBuf {
        self.install_prefix().join("share/applications")
    }

    pub fn package_icons_dir(&self) -> PathBuf {
        self.install_prefix().join("share/icons")
    }

    /// Directory holding the package-builder manifest.
    pub fn builder_dir(&self) -> PathBuf {
        self.root.join("pkgbuild")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dropping_context, owner, shared_temp_dir, NOBODY};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn nested_package_name_derives_from_version() {
        let ws = Workspace::new("/w");
        assert_eq!(
            ws.nupkg("9.9.9"),
            PathBuf::from("/w/installer/AnthropicClaude-9.9.9-full.nupkg")
        );
    }

    #[test]
    fn package_layout_lives_under_usr() {
        let ws = Workspace::new("/w");
        assert_eq!(ws.package_bin_dir(), PathBuf::from("/w/package/usr/bin"));
        assert_eq!(
            ws.package_lib_dir(),
            PathBuf::from("/w/package/usr/lib/claude-desktop")
        );
        assert_eq!(
            ws.package_icons_dir(),
            PathBuf::from("/w/package/usr/share/icons")
        );
    }

    #[test]
    fn create_fresh_discards_previous_run() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("build");
        fs::create_dir_all(root.join("package/usr/bin")).unwrap();
        fs::write(root.join("package/usr/bin/old"), "stale").unwrap();

        let ws = Workspace::create_fresh(&root, &PrivilegeContext::current()).unwrap();

        assert!(ws.root().is_dir());
        assert!(!ws.package_root().exists());
    }

    #[test]
    fn nested_workspace_belongs_to_real_user() {
        let temp = shared_temp_dir();
        let Some(privileges) = dropping_context(temp.path()) else {
            return;
        };

        let ws = Workspace::create_fresh(temp.path().join("a/b/build"), &privileges).unwrap();

        for path in [temp.path().join("a"), temp.path().join("a/b"), ws.root().to_path_buf()] {
            assert_eq!(owner(&path), NOBODY, "{}", path.display());
        }
        assert_eq!(owner(temp.path()), 0);
    }
}
