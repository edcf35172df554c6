//! Icon extraction into the hicolor theme layout.
//!
//! `wrestool` pulls the icon group resource out of `claude.exe`, `icotool`
//! splits it into one PNG per embedded frame. Frame file names carry an
//! extraction-order index that is specific to a vendor build, so when the
//! expected name is missing the frame is located by its real dimensions
//! instead (read from the PNG header).

use anyhow::Result;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::APP_NAME;
use crate::filesystem::install_file;
use crate::privilege::PrivilegeContext;
use crate::process::{run_step, settle, Invocation, Runner, Step};
use crate::workspace::Workspace;

/// Win32 resource type of icon groups (RT_GROUP_ICON).
const RT_GROUP_ICON: &str = "14";

/// Installed icon file mode.
const ICON_MODE: u32 = 0o644;

/// Target sizes and the frame file `icotool` produces for each.
pub const ICON_FILES: &[(u32, &str)] = &[
    (16, "claude_13_16x16x32.png"),
    (24, "claude_11_24x24x32.png"),
    (32, "claude_10_32x32x32.png"),
    (48, "claude_8_48x48x32.png"),
    (64, "claude_7_64x64x32.png"),
    (256, "claude_6_256x256x32.png"),
];

/// Outcome of the icon stage.
#[derive(Debug, Clone, Default)]
pub struct IconReport {
    /// `(size, installed path)` for each installed icon.
    pub installed: Vec<(u32, PathBuf)>,
    pub warnings: Vec<String>,
}

/// Theme path of the icon for `size` below `icons_root` (`usr/share/icons`).
pub fn icon_install_path(icons_root: &Path, size: u32) -> PathBuf {
    icons_root
        .join("hicolor")
        .join(format!("{size}x{size}"))
        .join("apps")
        .join(format!("{APP_NAME}.png"))
}

/// Extract, split and install the application icons.
///
/// Both tools run as the real user, so the frames directory is created for
/// that user.
pub fn install_icons(
    runner: &dyn Runner,
    ws: &Workspace,
    privileges: &PrivilegeContext,
) -> Result<IconReport> {
    let icons_dir = ws.icons_dir();
    privileges.create_dir_all(&icons_dir)?;

    let container = ws.icon_container();
    run_step(
        runner,
        &Invocation::new(Step::ExtractIconGroup, "wrestool")
            .args(["-x", "-t", RT_GROUP_ICON])
            .arg(ws.app_exe())
            .arg("-o")
            .arg(&container),
    )?;
    run_step(
        runner,
        &Invocation::new(Step::SplitIcons, "icotool")
            .arg("-x")
            .arg("-o")
            .arg(&icons_dir)
            .arg(&container),
    )?;

    Ok(install_frames(&icons_dir, &ws.package_icons_dir()))
}

/// Install one frame per target size from `frames_dir`.
///
/// Never fails: a size with no usable frame, or a failed copy, becomes a
/// warning in the report.
pub fn install_frames(frames_dir: &Path, icons_root: &Path) -> IconReport {
    let mut report = IconReport::default();
    for (size, file_name) in ICON_FILES {
        let Some(source) = resolve_frame(frames_dir, *size, file_name) else {
            let warning = format!("missing {size}x{size} icon ({file_name})");
            record_warning(&mut report, Step::InstallIcon, warning);
            continue;
        };

        let dest = icon_install_path(icons_root, *size);
        match install_file(&source, &dest, ICON_MODE) {
            Ok(()) => {
                println!("  installed {size}x{size} icon");
                report.installed.push((*size, dest));
            }
            Err(err) => {
                let warning = format!("installing {size}x{size} icon: {err:#}");
                record_warning(&mut report, Step::InstallIcon, warning);
            }
        }
    }
    report
}

fn record_warning(report: &mut IconReport, step: Step, warning: String) {
    // InstallIcon is warn-level, so settle only logs.
    if matches!(settle(step, warning.clone()), Ok(false)) {
        report.warnings.push(warning);
    }
}

/// Locate the frame for `size`: by expected name first, then by dimensions.
fn resolve_frame(frames_dir: &Path, size: u32, file_name: &str) -> Option<PathBuf> {
    let expected = frames_dir.join(file_name);
    if expected.is_file() {
        return Some(expected);
    }

    let mut candidates: Vec<(u64, PathBuf)> = fs::read_dir(frames_dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("png"))
        .filter(|path| png_dimensions(path) == Some((size, size)))
        .map(|path| {
            let len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            (len, path)
        })
        .collect();

    // Prefer the richest frame (highest colour depth is the largest file).
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let found = candidates.into_iter().next().map(|(_, path)| path);
    if let Some(path) = &found {
        tracing::info!(
            "{size}x{size} icon found by dimensions: {}",
            path.display()
        );
    }
    found
}

/// Width and height from a PNG's IHDR chunk.
pub fn png_dimensions(path: &Path) -> Option<(u32, u32)> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    let mut header = [0u8; 24];
    File::open(path).ok()?.read_exact(&mut header).ok()?;
    if header[..8] != SIGNATURE || &header[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(header[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(header[20..24].try_into().ok()?);
    Some((width, height))
}
