//! Installer download cache.
//!
//! The installer is cached per version in a directory that survives across
//! runs. Each cached file has a JSON index entry next to it recording the
//! sha256 observed at download time, so a reused file is verified rather
//! than trusted by name:
//!
//! ```text
//! ~/.cache/claude-desktop-pkg/
//!     .lock
//!     Claude-Setup-x64-0.9.3.exe
//!     Claude-Setup-x64-0.9.3.exe.json
//! ```
//!
//! Downloads stream into a temp file in the cache directory and are renamed
//! into place only after the transfer (and any pinned hash) checks out, so a
//! failed transfer never leaves a corrupt cache entry behind.
//!
//! The transfer runs in-process as [`Step::FetchInstaller`]. Every file and
//! directory it creates is assigned to that step's identity as soon as it
//! exists, before any rename.

mod http;

pub use http::HttpTransport;

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use crate::error::{classify, PipelineError};
use crate::privilege::PrivilegeContext;
use crate::process::Step;
use crate::workspace::Workspace;

/// Network seam: writes the body at `url` into `sink`.
pub trait Transport {
    /// Returns the number of bytes written. Non-success responses must fail
    /// with [`PipelineError::Transfer`].
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// What to fetch.
#[derive(Debug, Clone)]
pub struct InstallerSource {
    pub url: String,
    pub version: String,
    /// Expected sha256 (lowercase hex), when pinned.
    pub sha256: Option<String>,
}

/// Index entry stored next to each cached installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub version: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub fetched_at_unix: i64,
}

/// Whether the installer came from the network on this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Reused,
    Downloaded,
}

/// A verified installer in the cache.
#[derive(Debug, Clone)]
pub struct CachedInstaller {
    pub path: PathBuf,
    pub sha256: String,
    pub outcome: CacheOutcome,
}

/// Persistent download cache.
#[derive(Debug, Clone)]
pub struct FetchCache {
    dir: PathBuf,
}

impl FetchCache {
    /// Open (and create if needed) the cache at `dir`, owned by the real user.
    pub fn open(dir: &Path, privileges: &PrivilegeContext) -> Result<Self> {
        privileges
            .create_dir_all(dir)
            .context("opening download cache")?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location of the installer for `version`.
    pub fn installer_path(&self, version: &str) -> PathBuf {
        self.dir.join(format!("Claude-Setup-x64-{version}.exe"))
    }

    fn entry_path(&self, version: &str) -> PathBuf {
        self.dir
            .join(format!("Claude-Setup-x64-{version}.exe.json"))
    }

    /// Read the index entry for `version`, if a readable one exists.
    pub fn read_entry(&self, version: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(version);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to read cache entry {}", path.display()))?;
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                tracing::warn!("ignoring unreadable cache entry {}: {err}", path.display());
                Ok(None)
            }
        }
    }

    /// Make sure a verified installer for `source.version` is cached.
    ///
    /// Downloads when `force` is set, when nothing is cached, or when the
    /// cached bytes no longer match their recorded or pinned hash.
    pub fn ensure(
        &self,
        source: &InstallerSource,
        force: bool,
        transport: &dyn Transport,
        privileges: &PrivilegeContext,
    ) -> Result<CachedInstaller> {
        let _lock = self.acquire_lock(privileges)?;
        let path = self.installer_path(&source.version);

        if force {
            println!("  forced download requested");
        } else if path.is_file() {
            if let Some(sha256) = self.verify_cached(source, privileges)? {
                println!("  using cached installer {}", path.display());
                return Ok(CachedInstaller {
                    path,
                    sha256,
                    outcome: CacheOutcome::Reused,
                });
            }
        }

        println!("  downloading {}", source.url);
        let (sha256, size_bytes) = self.download(source, transport, &path, privileges)?;
        self.write_entry(
            &source.version,
            &CacheEntry {
                url: source.url.clone(),
                version: source.version.clone(),
                sha256: sha256.clone(),
                size_bytes,
                fetched_at_unix: OffsetDateTime::now_utc().unix_timestamp(),
            },
            privileges,
        )?;
        println!("  downloaded {size_bytes} bytes (sha256 {sha256})");

        Ok(CachedInstaller {
            path,
            sha256,
            outcome: CacheOutcome::Downloaded,
        })
    }

    /// Copy the cached installer into the workspace.
    pub fn install_into(
        &self,
        cached: &CachedInstaller,
        ws: &Workspace,
        privileges: &PrivilegeContext,
    ) -> Result<PathBuf> {
        let dest = ws.installer();
        fs::copy(&cached.path, &dest).with_context(|| {
            format!(
                "copying cached installer '{}' to '{}'",
                cached.path.display(),
                dest.display()
            )
        })?;
        privileges.hand_over(&dest)?;
        Ok(dest)
    }

    /// Returns the cached file's hash when it can be reused.
    fn verify_cached(
        &self,
        source: &InstallerSource,
        privileges: &PrivilegeContext,
    ) -> Result<Option<String>> {
        let path = self.installer_path(&source.version);
        let (actual, size_bytes) = sha256_file(&path)?;

        if let Some(expected) = &source.sha256 {
            if *expected != actual {
                tracing::warn!(
                    "cached installer {} does not match pinned sha256 (expected {}, got {}); re-downloading",
                    path.display(),
                    expected,
                    actual
                );
                return Ok(None);
            }
        }

        match self.read_entry(&source.version)? {
            Some(entry) if entry.sha256 != actual => {
                tracing::warn!(
                    "cached installer {} changed since download (recorded {}, got {}); re-downloading",
                    path.display(),
                    entry.sha256,
                    actual
                );
                Ok(None)
            }
            Some(_) => Ok(Some(actual)),
            None => {
                // Cached before index entries existed: adopt it as-is.
                self.write_entry(
                    &source.version,
                    &CacheEntry {
                        url: source.url.clone(),
                        version: source.version.clone(),
                        sha256: actual.clone(),
                        size_bytes,
                        fetched_at_unix: OffsetDateTime::now_utc().unix_timestamp(),
                    },
                    privileges,
                )?;
                Ok(Some(actual))
            }
        }
    }

    fn download(
        &self,
        source: &InstallerSource,
        transport: &dyn Transport,
        dest: &Path,
        privileges: &PrivilegeContext,
    ) -> Result<(String, u64)> {
        let tmp = self.dir.join(tmp_name(".download"));
        let result = self.download_to(source, transport, &tmp, privileges);
        match result {
            Ok((sha256, size)) => {
                atomic_rename(&tmp, dest)?;
                Ok((sha256, size))
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                if classify(&err).is_some() {
                    Err(err)
                } else {
                    Err(Step::FetchInstaller.failure(format!("{err:#}")).into())
                }
            }
        }
    }

    fn download_to(
        &self,
        source: &InstallerSource,
        transport: &dyn Transport,
        tmp: &Path,
        privileges: &PrivilegeContext,
    ) -> Result<(String, u64)> {
        let file =
            File::create(tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        privileges.assign(tmp, Step::FetchInstaller.identity())?;
        let mut sink = HashingWriter::new(file);
        let written = transport.fetch(&source.url, &mut sink)?;
        let (file, sha256, size) = sink.finish();
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;

        if written != size {
            bail!(PipelineError::Transfer(format!(
                "transport reported {written} bytes but {size} were written"
            )));
        }
        if size == 0 {
            bail!(PipelineError::Transfer(format!(
                "empty response from {}",
                source.url
            )));
        }
        if let Some(expected) = &source.sha256 {
            if *expected != sha256 {
                bail!(PipelineError::Transfer(format!(
                    "sha256 mismatch for {}\n  expected: {}\n  actual:   {}",
                    source.url, expected, sha256
                )));
            }
        }
        Ok((sha256, size))
    }

    fn write_entry(
        &self,
        version: &str,
        entry: &CacheEntry,
        privileges: &PrivilegeContext,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        let tmp = self.dir.join(tmp_name(".entry"));
        fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        privileges.assign(&tmp, Step::FetchInstaller.identity())?;
        atomic_rename(&tmp, &self.entry_path(version))
    }

    fn acquire_lock(&self, privileges: &PrivilegeContext) -> Result<CacheLock> {
        let lock_path = self.dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        privileges.assign(&lock_path, Step::FetchInstaller.identity())?;

        if file.try_lock_exclusive().is_err() {
            bail!(PipelineError::Transfer(format!(
                "download cache is locked by another run: {}",
                lock_path.display()
            )));
        }
        Ok(CacheLock { _file: file })
    }
}

/// Holds the exclusive cache lock until dropped.
struct CacheLock {
    _file: File,
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        (self.inner, format!("{:x}", self.hasher.finalize()), self.size)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// sha256 and size of a file.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn tmp_name(prefix: &str) -> String {
    let n = OffsetDateTime::now_utc().unix_timestamp_nanos();
    format!("{prefix}-{}-{n}", std::process::id())
}

fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    fs::rename(src, dst)
        .with_context(|| format!("Failed to move {} to {}", src.display(), dst.display()))
}
