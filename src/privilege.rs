//! Privilege context: which identity performs each operation.
//!
//! The pipeline runs elevated (via sudo) so it can install packages, but
//! everything it writes into the workspace, the download cache and the
//! builder directory must belong to the user who invoked sudo. Operations
//! declare an [`Identity`]; the context turns that into a uid/gid switch on
//! child processes and a recursive `chown` after in-process writes.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::lchown;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Which identity an operation runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// The process identity (root when launched through sudo).
    Elevated,
    /// The user who invoked sudo.
    RealUser,
}

/// A resolved account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

/// Pair of (elevated identity, real identity).
#[derive(Debug, Clone)]
pub struct PrivilegeContext {
    pub elevated: UserIdentity,
    pub real: UserIdentity,
}

impl PrivilegeContext {
    pub fn new(elevated: UserIdentity, real: UserIdentity) -> Self {
        Self { elevated, real }
    }

    /// Context where both identities are the current process user.
    ///
    /// Used when nothing needs to be dropped (tests, unprivileged dry runs).
    pub fn current() -> Self {
        let user = current_user();
        Self {
            elevated: user.clone(),
            real: user,
        }
    }

    /// True when real-user operations need a uid/gid switch.
    pub fn drops_privileges(&self) -> bool {
        self.elevated.uid != self.real.uid || self.elevated.gid != self.real.gid
    }

    pub fn identity(&self, who: Identity) -> &UserIdentity {
        match who {
            Identity::Elevated => &self.elevated,
            Identity::RealUser => &self.real,
        }
    }

    /// Create `path` and any missing parents.
    ///
    /// Every directory created here ends up owned by the real user, not just
    /// the leaf: a missing `~/.cache` made on the way to the download cache
    /// must not stay root-owned.
    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        let topmost_missing = path
            .ancestors()
            .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
            .last()
            .map(Path::to_path_buf);
        fs::create_dir_all(path)
            .with_context(|| format!("creating directory '{}'", path.display()))?;
        match topmost_missing {
            Some(top) => self.hand_over(&top),
            None => Ok(()),
        }
    }

    /// Give `path` (recursively) to the identity an operation runs as.
    pub fn assign(&self, path: &Path, who: Identity) -> Result<()> {
        match who {
            Identity::Elevated => Ok(()),
            Identity::RealUser => self.hand_over(path),
        }
    }

    /// Reassign ownership of `path` (recursively) to the real user.
    ///
    /// No-op when the process already runs as the real user.
    pub fn hand_over(&self, path: &Path) -> Result<()> {
        if !self.drops_privileges() || !path.exists() {
            return Ok(());
        }
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.with_context(|| format!("walking '{}'", path.display()))?;
            lchown(entry.path(), Some(self.real.uid), Some(self.real.gid)).with_context(|| {
                format!(
                    "changing owner of '{}' to {}",
                    entry.path().display(),
                    self.real.name
                )
            })?;
        }
        Ok(())
    }
}

/// Effective uid of the running process.
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

fn current_user() -> UserIdentity {
    // SAFETY: getuid/getgid have no preconditions and cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    let name = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| uid.to_string());
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    UserIdentity {
        name,
        uid,
        gid,
        home,
    }
}
