//! Test doubles for the external tools and the network.

use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::fetch::Transport;
use crate::icons::ICON_FILES;
use crate::privilege::{effective_uid, PrivilegeContext, UserIdentity};
use crate::process::{Invocation, Outcome, Runner, Step, SystemRunner};

/// uid and gid of `nobody`, the real user in privilege-dropping tests.
pub const NOBODY: u32 = 65534;

/// Context dropping from root to `nobody`, the way a sudo run does.
///
/// `None` unless the tests run as root; callers return early then.
pub fn dropping_context(home: &Path) -> Option<PrivilegeContext> {
    if effective_uid() != 0 {
        return None;
    }
    Some(PrivilegeContext::new(
        UserIdentity {
            name: "root".into(),
            uid: 0,
            gid: 0,
            home: PathBuf::from("/root"),
        },
        UserIdentity {
            name: "nobody".into(),
            uid: NOBODY,
            gid: NOBODY,
            home: home.to_path_buf(),
        },
    ))
}

/// Temp dir that other users may traverse (`TempDir` defaults to 0700).
pub fn shared_temp_dir() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o755)).unwrap();
    temp
}

/// Owning uid of `path` (not following symlinks).
pub fn owner(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().uid()
}

/// Minimal PNG: signature plus an IHDR chunk carrying the dimensions.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes
}

/// Runner that simulates each tool's effect on the filesystem and records
/// every invocation.
pub struct ScriptedRunner {
    version: String,
    missing_tools: HashSet<String>,
    failing: HashSet<Step>,
    omitted_icon_sizes: HashSet<u32>,
    without_tray_icons: bool,
    log: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            missing_tools: HashSet::new(),
            failing: HashSet::new(),
            omitted_icon_sizes: HashSet::new(),
            without_tray_icons: false,
            log: RefCell::new(Vec::new()),
        }
    }

    pub fn without_tools(mut self, tools: &[&str]) -> Self {
        self.missing_tools
            .extend(tools.iter().map(|t| t.to_string()));
        self
    }

    pub fn failing(mut self, step: Step) -> Self {
        self.failing.insert(step);
        self
    }

    pub fn without_icon_sizes(mut self, sizes: &[u32]) -> Self {
        self.omitted_icon_sizes.extend(sizes);
        self
    }

    pub fn without_tray_icons(mut self) -> Self {
        self.without_tray_icons = true;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.borrow().clone()
    }

    pub fn invocations_of(&self, step: Step) -> Vec<Invocation> {
        self.log
            .borrow()
            .iter()
            .filter(|inv| inv.step == step)
            .cloned()
            .collect()
    }

    fn simulate(&self, inv: &Invocation) -> Result<()> {
        let cwd = inv.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
        match inv.step {
            Step::ExtractInstaller => {
                let out = output_arg(inv).expect("7z output dir");
                write(
                    &out.join(format!("AnthropicClaude-{}-full.nupkg", self.version)),
                    b"nupkg",
                )?;
            }
            Step::ExtractNupkg => {
                let out = output_arg(inv).expect("7z output dir");
                let lib = out.join("lib/net45");
                write(&lib.join("claude.exe"), b"MZ")?;
                write(&lib.join("resources/app.asar"), b"original asar")?;
                write(
                    &lib.join("resources/app.asar.unpacked/node_modules/claude-native/claude-native-binding.node"),
                    b"\x7fELF",
                )?;
                write(&lib.join("resources/en-US.json"), b"{}")?;
                if !self.without_tray_icons {
                    write(&lib.join("resources/TrayIconTemplate.png"), &png_bytes(16, 16))?;
                    write(&lib.join("resources/TrayIconTemplate@2x.png"), &png_bytes(32, 32))?;
                }
            }
            Step::ExtractIconGroup => {
                let out = output_arg(inv).expect("wrestool output");
                write(&out, b"\0\0\x01\0")?;
            }
            Step::SplitIcons => {
                let out = output_arg(inv).expect("icotool output dir");
                for (size, name) in ICON_FILES {
                    if self.omitted_icon_sizes.contains(size) {
                        continue;
                    }
                    write(&out.join(name), &png_bytes(*size, *size))?;
                }
            }
            Step::UnpackAppArchive => {
                let contents = cwd.join("app.asar.contents");
                write(
                    &contents.join("node_modules/claude-native/index.js"),
                    b"module.exports = require('./claude-native-binding.node');",
                )?;
                write(&contents.join("package.json"), b"{\"main\":\".vite/build/index.js\"}")?;
            }
            Step::PackAppArchive => {
                write(&cwd.join("app.asar"), b"patched asar")?;
            }
            Step::BuildPackage => {
                if let Some(dest) = inv.env_value("PKGDEST") {
                    let name = format!("claude-desktop-bin-{}-1-x86_64.pkg.tar.zst", self.version);
                    write(&Path::new(dest).join(name), b"pkg")?;
                } else if let Some(out) = inv.args.last() {
                    write(Path::new(out), b"deb")?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<Outcome> {
        self.log.borrow_mut().push(invocation.clone());
        if self.failing.contains(&invocation.step) {
            return Ok(Outcome { code: Some(1) });
        }
        self.simulate(invocation)?;
        Ok(Outcome { code: Some(0) })
    }

    fn command_exists(&self, name: &str) -> bool {
        !self.missing_tools.contains(name)
    }
}

/// Runs each step through a real [`SystemRunner`], with the tool replaced
/// by a shell write to its output (`-o` target). The step, and so the
/// identity it runs as, is kept.
pub struct StandInRunner {
    inner: SystemRunner,
}

impl StandInRunner {
    pub fn new(privileges: PrivilegeContext) -> Self {
        Self {
            inner: SystemRunner::new(privileges),
        }
    }
}

impl Runner for StandInRunner {
    fn run(&self, invocation: &Invocation) -> Result<Outcome> {
        let target = output_arg(invocation)
            .ok_or_else(|| anyhow!("no output argument in '{}'", invocation.display()))?;
        let stand_in = Invocation {
            step: invocation.step,
            program: "sh".into(),
            args: vec![
                "-c".into(),
                r#"if [ -d "$1" ]; then : > "$1/frame.png"; else : > "$1"; fi"#.into(),
                "stand-in".into(),
                target.into_os_string(),
            ],
            cwd: invocation.cwd.clone(),
            env: invocation.env.clone(),
        };
        self.inner.run(&stand_in)
    }

    fn command_exists(&self, _name: &str) -> bool {
        true
    }
}

fn output_arg(inv: &Invocation) -> Option<PathBuf> {
    let mut args = inv.args.iter().map(|a| a.to_string_lossy().to_string());
    while let Some(arg) = args.next() {
        if arg == "-o" {
            return args.next().map(PathBuf::from);
        }
        if let Some(rest) = arg.strip_prefix("-o") {
            return Some(PathBuf::from(rest));
        }
    }
    None
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(path.parent().expect("parent"))?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Transport that serves fixed bytes and counts transfers.
pub struct CountingTransport {
    body: Vec<u8>,
    fail: bool,
    calls: Cell<usize>,
}

impl CountingTransport {
    pub fn serving(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            fail: false,
            calls: Cell::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            body: Vec::new(),
            fail: true,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Transport for CountingTransport {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            // Partial body before the failure.
            sink.write_all(b"partial")?;
            anyhow::bail!(crate::error::PipelineError::Transfer(format!(
                "HTTP 404 Not Found from {url}"
            )));
        }
        sink.write_all(&self.body)?;
        Ok(self.body.len() as u64)
    }
}
