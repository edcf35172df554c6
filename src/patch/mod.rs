//! Rewrites the Electron application archive for Linux.
//!
//! The archive is unpacked with `@electron/asar` under the real user's nvm
//! Node, the Windows-only native module is swapped for a stub, optional
//! tray and locale resources are copied in, and the archive is repacked.

mod stub;

pub use stub::{render_stub, JsType, StubReturn, KEYBOARD_KEYS, STUB_EXPORTS};

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::filesystem::{copy_dir_recursive, write_file_mode};
use crate::privilege::PrivilegeContext;
use crate::process::{ensure_exists, run_step, settle, Invocation, Runner, Step};
use crate::workspace::Workspace;

/// Module path of the native addon inside the application tree.
const NATIVE_MODULE: &str = "node_modules/claude-native/index.js";

/// Loads nvm, selects the pinned Node major and forwards to the asar CLI.
const ASAR_WRAPPER: &str = r#"set -e
. "$NVM_DIR/nvm.sh"
nvm install "$NODE_MAJOR" >/dev/null
nvm use "$NODE_MAJOR" >/dev/null
exec npx --yes @electron/asar "$@""#;

/// Node runtime used for the asar tool.
#[derive(Debug, Clone)]
pub struct NodeRuntime {
    pub nvm_dir: PathBuf,
    pub node_major: u32,
}

impl NodeRuntime {
    fn asar(&self, step: Step, args: &[&str], cwd: &Path) -> Invocation {
        Invocation::new(step, "bash")
            .arg("-c")
            .arg(ASAR_WRAPPER)
            .arg("asar")
            .args(args)
            .current_dir(cwd)
            .env("NVM_DIR", &self.nvm_dir)
            .env("NODE_MAJOR", self.node_major.to_string())
    }
}

/// Outcome of the patch stage.
#[derive(Debug, Clone, Default)]
pub struct PatchReport {
    pub tray_icons: usize,
    pub locales: usize,
    pub warnings: Vec<String>,
}

/// Patch the application archive found in the extracted resources.
pub fn patch_app(
    runner: &dyn Runner,
    ws: &Workspace,
    node: &NodeRuntime,
    privileges: &PrivilegeContext,
) -> Result<PatchReport> {
    let resources = ws.resources_dir();
    let electron_dir = ws.electron_dir();
    fs::create_dir_all(&electron_dir)
        .with_context(|| format!("creating '{}'", electron_dir.display()))?;

    ensure_exists(&resources.join("app.asar"), "application archive")?;
    fs::copy(resources.join("app.asar"), ws.app_archive())
        .with_context(|| format!("copying app.asar from '{}'", resources.display()))?;
    copy_dir_recursive(&resources.join("app.asar.unpacked"), &ws.app_unpacked())?;
    privileges.hand_over(&electron_dir)?;

    println!("  unpacking app.asar");
    run_step(
        runner,
        &node.asar(
            Step::UnpackAppArchive,
            &["extract", "app.asar", "app.asar.contents"],
            &electron_dir,
        ),
    )?;

    let stub = render_stub();
    for root in [ws.app_contents(), ws.app_unpacked()] {
        let target = root.join(NATIVE_MODULE);
        write_file_mode(&target, &stub, 0o644)?;
        println!("  stubbed {}", target.display());
    }

    let mut report = PatchReport::default();
    let contents_resources = ws.app_contents().join("resources");
    report.tray_icons = copy_matching(
        &resources,
        &contents_resources,
        Step::CopyTrayIcons,
        is_tray_icon,
        &mut report.warnings,
    )?;
    report.locales = copy_matching(
        &resources,
        &contents_resources.join("i18n"),
        Step::CopyLocales,
        is_locale,
        &mut report.warnings,
    )?;
    privileges.hand_over(&electron_dir)?;

    println!("  repacking app.asar");
    run_step(
        runner,
        &node.asar(
            Step::PackAppArchive,
            &["pack", "app.asar.contents", "app.asar"],
            &electron_dir,
        ),
    )?;

    Ok(report)
}

fn is_tray_icon(name: &str) -> bool {
    name.starts_with("Tray")
}

/// Locale bundles are named like `en-US.json`.
fn is_locale(name: &str) -> bool {
    name.strip_suffix(".json")
        .is_some_and(|stem| stem.contains('-'))
}

/// Copy the files in `src` whose names satisfy `select` into `dst`.
///
/// A best-effort step: nothing found or a failed copy is recorded as a
/// warning rather than failing the run.
fn copy_matching(
    src: &Path,
    dst: &Path,
    step: Step,
    select: fn(&str) -> bool,
    warnings: &mut Vec<String>,
) -> Result<usize> {
    let mut sources: Vec<PathBuf> = match fs::read_dir(src) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(select)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    sources.sort();

    if sources.is_empty() {
        let detail = format!("no matching files in {}", src.display());
        if !settle(step, detail.clone())? {
            warnings.push(format!("{}: {detail}", step.label()));
        }
        return Ok(0);
    }

    let mut copied = 0;
    for source in &sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let result = fs::create_dir_all(dst)
            .and_then(|()| fs::copy(source, dst.join(name)))
            .map_err(|e| format!("copying {}: {e}", source.display()));
        match result {
            Ok(_) => copied += 1,
            Err(detail) => {
                if !settle(step, detail.clone())? {
                    warnings.push(format!("{}: {detail}", step.label()));
                }
            }
        }
    }
    Ok(copied)
}
