//! Package assembly.
//!
//! Lays out the package root (`usr/bin`, `usr/lib/claude-desktop`,
//! `usr/share/...`), writes the desktop entry and launcher, then hands the
//! root to the distribution's package builder. Icons are installed into the
//! same root by the icon stage beforehand, so the layout is created in place
//! rather than recreated.

mod manifests;

pub use manifests::{debian_control, desktop_entry, launcher_script, pkgbuild};

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{APP_NAME, PACKAGE_NAME, PACKAGE_RELEASE};
use crate::distro::Distro;
use crate::error::PipelineError;
use crate::filesystem::{copy_dir_recursive, write_file_mode};
use crate::privilege::PrivilegeContext;
use crate::process::{run_step, Invocation, Runner, Step};
use crate::workspace::Workspace;

/// Compression makepkg is told to use; fixes the artifact extension.
const PKGEXT: &str = ".pkg.tar.zst";

/// What to build and where to put it.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub distro: Distro,
    pub version: &'a str,
    pub output_dir: &'a Path,
}

impl BuildRequest<'_> {
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(
            self.distro
                .artifact_name(PACKAGE_NAME, self.version, PACKAGE_RELEASE),
        )
    }
}

/// Populate the package root and build the native package.
///
/// Returns the path of the produced artifact.
pub fn assemble_package(
    runner: &dyn Runner,
    ws: &Workspace,
    request: &BuildRequest<'_>,
    privileges: &PrivilegeContext,
) -> Result<PathBuf> {
    populate_root(ws)?;
    privileges.hand_over(&ws.package_root())?;

    privileges
        .create_dir_all(request.output_dir)
        .context("preparing output directory")?;

    let artifact = request.artifact_path();
    let invocation = match request.distro {
        Distro::Arch => {
            let builder_dir = ws.builder_dir();
            let manifest = builder_dir.join("PKGBUILD");
            write_file_mode(
                &manifest,
                &pkgbuild(request.version, PACKAGE_RELEASE, &ws.package_root()),
                0o644,
            )?;
            privileges.hand_over(&builder_dir)?;
            println!("  wrote {}", manifest.display());

            Invocation::new(Step::BuildPackage, "makepkg")
                .arg("-f")
                .current_dir(builder_dir)
                .env("PKGDEST", request.output_dir)
                .env("PKGEXT", PKGEXT)
        }
        Distro::Debian => {
            let control = ws.package_root().join("DEBIAN/control");
            write_file_mode(
                &control,
                &debian_control(request.version, PACKAGE_RELEASE),
                0o644,
            )?;
            privileges.hand_over(&ws.package_root())?;
            println!("  wrote {}", control.display());

            Invocation::new(Step::BuildPackage, "dpkg-deb")
                .args(["--build", "--root-owner-group"])
                .arg(ws.package_root())
                .arg(&artifact)
        }
    };

    println!("  building {}", artifact.display());
    run_step(runner, &invocation)?;

    if !artifact.is_file() {
        bail!(PipelineError::Build(format!(
            "builder reported success but {} was not produced",
            artifact.display()
        )));
    }
    Ok(artifact)
}

/// Create the install layout and copy in the patched application.
fn populate_root(ws: &Workspace) -> Result<()> {
    for dir in [
        ws.package_bin_dir(),
        ws.package_lib_dir(),
        ws.package_applications_dir(),
        ws.package_icons_dir(),
    ] {
        fs::create_dir_all(&dir).with_context(|| format!("creating '{}'", dir.display()))?;
    }

    let lib_dir = ws.package_lib_dir();
    fs::copy(ws.app_archive(), lib_dir.join("app.asar")).with_context(|| {
        format!("copying '{}' into the package", ws.app_archive().display())
    })?;
    copy_dir_recursive(&ws.app_unpacked(), &lib_dir.join("app.asar.unpacked"))?;

    write_file_mode(
        &ws.package_applications_dir()
            .join(format!("{APP_NAME}.desktop")),
        &desktop_entry(),
        0o644,
    )?;
    write_file_mode(&ws.package_bin_dir().join(APP_NAME), &launcher_script(), 0o755)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::testing::{dropping_context, owner, shared_temp_dir, ScriptedRunner, NOBODY};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Workspace holding a patched application, as the patch stage leaves it.
    fn patched(temp: &TempDir) -> Workspace {
        let ws = Workspace::create_fresh(temp.path().join("build"), &PrivilegeContext::current())
            .unwrap();
        fs::create_dir_all(ws.app_unpacked().join("node_modules/claude-native")).unwrap();
        fs::write(
            ws.app_unpacked().join("node_modules/claude-native/index.js"),
            "stub",
        )
        .unwrap();
        fs::write(ws.app_archive(), "patched asar").unwrap();
        ws
    }

    #[test]
    fn arch_build_produces_named_artifact() {
        let temp = TempDir::new().unwrap();
        let ws = patched(&temp);
        let out = temp.path().join("out");
        let runner = ScriptedRunner::new("9.9.9");
        let request = BuildRequest {
            distro: Distro::Arch,
            version: "9.9.9",
            output_dir: &out,
        };

        let artifact =
            assemble_package(&runner, &ws, &request, &PrivilegeContext::current()).unwrap();

        assert_eq!(
            artifact,
            out.join("claude-desktop-bin-9.9.9-1-x86_64.pkg.tar.zst")
        );
        assert!(artifact.is_file());

        let build = &runner.invocations_of(Step::BuildPackage)[0];
        assert_eq!(build.display(), "makepkg -f");
        assert_eq!(build.cwd.as_deref(), Some(ws.builder_dir().as_path()));
        assert_eq!(build.env_value("PKGEXT").unwrap(), ".pkg.tar.zst");
        assert!(ws.builder_dir().join("PKGBUILD").is_file());
    }

    #[test]
    fn package_root_carries_application_and_launcher() {
        let temp = TempDir::new().unwrap();
        let ws = patched(&temp);
        let out = temp.path().join("out");
        let request = BuildRequest {
            distro: Distro::Arch,
            version: "9.9.9",
            output_dir: &out,
        };

        assemble_package(
            &ScriptedRunner::new("9.9.9"),
            &ws,
            &request,
            &PrivilegeContext::current(),
        )
        .unwrap();

        let lib = ws.package_lib_dir();
        assert_eq!(fs::read_to_string(lib.join("app.asar")).unwrap(), "patched asar");
        assert!(lib
            .join("app.asar.unpacked/node_modules/claude-native/index.js")
            .is_file());

        let launcher = ws.package_bin_dir().join("claude-desktop");
        let mode = fs::metadata(&launcher).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(ws
            .package_applications_dir()
            .join("claude-desktop.desktop")
            .is_file());
    }

    #[test]
    fn nested_output_dir_belongs_to_real_user() {
        let temp = shared_temp_dir();
        let Some(privileges) = dropping_context(temp.path()) else {
            return;
        };
        let ws = patched(&temp);
        let out = temp.path().join("dist/arch");
        let request = BuildRequest {
            distro: Distro::Arch,
            version: "9.9.9",
            output_dir: &out,
        };

        assemble_package(&ScriptedRunner::new("9.9.9"), &ws, &request, &privileges).unwrap();

        assert_eq!(owner(&temp.path().join("dist")), NOBODY);
        assert_eq!(owner(&out), NOBODY);
        assert_eq!(owner(&ws.package_root()), NOBODY);
        assert_eq!(owner(&ws.builder_dir().join("PKGBUILD")), NOBODY);
    }

    #[test]
    fn debian_build_writes_control_file() {
        let temp = TempDir::new().unwrap();
        let ws = patched(&temp);
        let out = temp.path().join("out");
        let runner = ScriptedRunner::new("9.9.9");
        let request = BuildRequest {
            distro: Distro::Debian,
            version: "9.9.9",
            output_dir: &out,
        };

        let artifact =
            assemble_package(&runner, &ws, &request, &PrivilegeContext::current()).unwrap();

        assert_eq!(artifact, out.join("claude-desktop-bin_9.9.9-1_amd64.deb"));
        assert!(ws.package_root().join("DEBIAN/control").is_file());
        let build = &runner.invocations_of(Step::BuildPackage)[0];
        assert!(build
            .display()
            .starts_with("dpkg-deb --build --root-owner-group "));
    }

    #[test]
    fn builder_failure_is_a_build_error() {
        let temp = TempDir::new().unwrap();
        let ws = patched(&temp);
        let out = temp.path().join("out");
        let runner = ScriptedRunner::new("9.9.9").failing(Step::BuildPackage);
        let request = BuildRequest {
            distro: Distro::Arch,
            version: "9.9.9",
            output_dir: &out,
        };

        let err =
            assemble_package(&runner, &ws, &request, &PrivilegeContext::current()).unwrap_err();

        assert_eq!(classify(&err).unwrap().category(), "build");
    }

    #[test]
    fn missing_artifact_is_a_build_error() {
        let temp = TempDir::new().unwrap();
        let ws = patched(&temp);
        let out = temp.path().join("out");
        // The scripted builder writes an artifact for 1.0.0, not 9.9.9.
        let runner = ScriptedRunner::new("1.0.0");
        let request = BuildRequest {
            distro: Distro::Arch,
            version: "9.9.9",
            output_dir: &out,
        };

        let err =
            assemble_package(&runner, &ws, &request, &PrivilegeContext::current()).unwrap_err();

        assert_eq!(classify(&err).unwrap().category(), "build");
        assert!(err.to_string().contains("was not produced"));
    }
}
