//! Preflight checks run before anything is touched.
//!
//! Validates that the host is a supported distribution, that the process is
//! elevated, who the real (pre-sudo) user is, and that the real user has nvm
//! available. This prevents cryptic failures halfway through a build.
//!
//! All lookups take a filesystem root so they can be exercised against a
//! fake `/etc` in tests.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::distro::Distro;
use crate::error::PipelineError;
use crate::privilege::{effective_uid, PrivilegeContext, UserIdentity};

/// Everything later stages need to know about the host.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    pub distro: Distro,
    pub privileges: PrivilegeContext,
    /// Directory containing `nvm.sh` for the real user.
    pub nvm_dir: PathBuf,
}

/// Run every check against the live host.
pub fn probe_host(config: &PipelineConfig) -> Result<HostEnvironment> {
    let root = Path::new("/");
    let distro = detect_distro(root)?;
    println!("  host distribution: {distro}");

    check_elevated(effective_uid())?;

    let sudo_user = std::env::var("SUDO_USER").ok();
    let real = resolve_real_user(root, sudo_user.as_deref())?;
    println!("  real user: {} (uid {}, home {})", real.name, real.uid, real.home.display());

    let elevated = lookup_user(root, "root")?.unwrap_or_else(|| UserIdentity {
        name: "root".into(),
        uid: 0,
        gid: 0,
        home: PathBuf::from("/root"),
    });

    let nvm_dir = locate_nvm(&real, config.nvm_dir.as_deref())?;
    println!("  nvm: {}", nvm_dir.display());

    Ok(HostEnvironment {
        distro,
        privileges: PrivilegeContext::new(elevated, real),
        nvm_dir,
    })
}

/// Identify the distribution family from release files under `root`.
pub fn detect_distro(root: &Path) -> Result<Distro> {
    if root.join("etc/arch-release").exists() {
        return Ok(Distro::Arch);
    }
    if root.join("etc/debian_version").exists() {
        return Ok(Distro::Debian);
    }

    let os_release = root.join("etc/os-release");
    if os_release.is_file() {
        let content = fs::read_to_string(&os_release)
            .with_context(|| format!("reading '{}'", os_release.display()))?;
        if let Some(distro) = distro_from_os_release(&content) {
            return Ok(distro);
        }
    }

    bail!(PipelineError::Environment(
        "unsupported host: expected an Arch or Debian based distribution".into()
    ))
}

fn distro_from_os_release(content: &str) -> Option<Distro> {
    let mut candidates = Vec::new();
    for line in content.lines() {
        if let Some(id) = line.strip_prefix("ID=") {
            candidates.insert(0, id.to_string());
        } else if let Some(like) = line.strip_prefix("ID_LIKE=") {
            candidates.extend(
                like.trim_matches('"')
                    .split_whitespace()
                    .map(str::to_string),
            );
        }
    }
    candidates.iter().find_map(|id| Distro::from_os_id(id))
}

/// Package installation needs root.
pub fn check_elevated(euid: u32) -> Result<()> {
    if euid != 0 {
        bail!(PipelineError::Environment(
            "this tool installs build dependencies; run it with sudo".into()
        ));
    }
    Ok(())
}

/// Resolve the user who invoked sudo.
pub fn resolve_real_user(root: &Path, sudo_user: Option<&str>) -> Result<UserIdentity> {
    let name = match sudo_user.map(str::trim) {
        Some(name) if !name.is_empty() && name != "root" => name,
        _ => bail!(PipelineError::Environment(
            "cannot determine the real user: run via sudo from a regular account (SUDO_USER unset)"
                .into()
        )),
    };

    lookup_user(root, name)?.ok_or_else(|| {
        PipelineError::Environment(format!(
            "user '{}' not found in {}",
            name,
            root.join("etc/passwd").display()
        ))
        .into()
    })
}

/// Read a user entry from the passwd file under `root`.
///
/// Returns:
/// - Ok(Some(user)) if user found
/// - Ok(None) if user not found or file doesn't exist
/// - Err if file exists but is corrupted/unreadable
pub fn lookup_user(root: &Path, username: &str) -> Result<Option<UserIdentity>> {
    let passwd_path = root.join("etc/passwd");
    if !passwd_path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&passwd_path)
        .with_context(|| format!("Failed to read passwd file at {}", passwd_path.display()))?;

    for line in content.lines() {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() >= 6 && parts[0] == username {
            let uid: u32 = parts[2].parse().with_context(|| {
                format!(
                    "Corrupted passwd file: invalid UID '{}' for user '{}' at {}",
                    parts[2],
                    username,
                    passwd_path.display()
                )
            })?;
            let gid: u32 = parts[3].parse().with_context(|| {
                format!(
                    "Corrupted passwd file: invalid GID '{}' for user '{}' at {}",
                    parts[3],
                    username,
                    passwd_path.display()
                )
            })?;
            return Ok(Some(UserIdentity {
                name: username.to_string(),
                uid,
                gid,
                home: PathBuf::from(parts[5]),
            }));
        }
    }
    Ok(None)
}

/// Find the real user's nvm installation.
pub fn locate_nvm(real: &UserIdentity, override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| real.home.join(".nvm"));
    if !dir.join("nvm.sh").is_file() {
        bail!(PipelineError::Environment(format!(
            "nvm not found for user '{}' (expected {}); install nvm as that user first",
            real.name,
            dir.join("nvm.sh").display()
        )));
    }
    Ok(dir)
}
