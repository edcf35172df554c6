//! Two-stage extraction of the vendor installer.
//!
//! The Windows installer is a 7-Zip readable container holding a NuGet
//! package named after the version; the NuGet package in turn holds the
//! application tree under `lib/net45/`. Both extractions overwrite without
//! prompting and run as the real user.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::process::{run_step, Invocation, Runner, Step};
use crate::workspace::Workspace;

/// Archive extraction binary. Resolved at call time: `7z`, else `7za`.
fn archive_tool(runner: &dyn Runner) -> &'static str {
    if runner.command_exists("7z") {
        "7z"
    } else {
        "7za"
    }
}

fn extract(runner: &dyn Runner, step: Step, archive: &Path, dest: &Path) -> Result<()> {
    let mut out_arg = std::ffi::OsString::from("-o");
    out_arg.push(dest);
    let invocation = Invocation::new(step, archive_tool(runner))
        .arg("x")
        .arg("-y")
        .arg(archive)
        .arg(out_arg);
    run_step(runner, &invocation)?;
    Ok(())
}

/// Unpack the installer container, then the nested package.
///
/// Returns the application directory (`lib/net45`) inside the workspace.
pub fn unpack_installer(runner: &dyn Runner, ws: &Workspace, version: &str) -> Result<PathBuf> {
    println!("  extracting installer container");
    extract(
        runner,
        Step::ExtractInstaller,
        &ws.installer(),
        &ws.installer_dir(),
    )?;

    let nupkg = ws.nupkg(version);
    if !nupkg.is_file() {
        bail!(PipelineError::Extraction {
            step: Step::ExtractInstaller.label(),
            detail: format!(
                "expected nested package {} was not produced (version mismatch?)",
                nupkg.display()
            ),
        });
    }

    println!("  extracting {}", nupkg.display());
    extract(runner, Step::ExtractNupkg, &nupkg, &ws.nupkg_dir())?;

    let app_dir = ws.app_lib_dir();
    if !app_dir.is_dir() {
        bail!(PipelineError::Extraction {
            step: Step::ExtractNupkg.label(),
            detail: format!("application tree {} missing", app_dir.display()),
        });
    }
    Ok(app_dir)
}
