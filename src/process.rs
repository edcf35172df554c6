//! External tool execution.
//!
//! Every external operation the pipeline performs is declared as a [`Step`].
//! A step fixes three things in one place: which identity runs it, how bad
//! a failure is, and which error category a failure maps to. Stages build
//! an [`Invocation`] for a step and hand it to a [`Runner`]; the production
//! runner spawns the process, tests substitute a scripted one.

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::PipelineError;
use crate::privilege::{Identity, PrivilegeContext};

/// How a failed operation affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the whole run.
    Fatal,
    /// Log a warning and continue.
    Warn,
}

/// Every declared external or best-effort operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    QueryPackage,
    InstallPackages,
    /// In-process transfer into the cache; its files belong to the real user.
    FetchInstaller,
    ExtractInstaller,
    ExtractNupkg,
    ExtractIconGroup,
    SplitIcons,
    InstallIcon,
    UnpackAppArchive,
    CopyTrayIcons,
    CopyLocales,
    PackAppArchive,
    BuildPackage,
}

impl Step {
    pub fn label(self) -> &'static str {
        match self {
            Self::QueryPackage => "query package",
            Self::InstallPackages => "install packages",
            Self::FetchInstaller => "fetch installer",
            Self::ExtractInstaller => "extract installer",
            Self::ExtractNupkg => "extract nupkg",
            Self::ExtractIconGroup => "extract icon group",
            Self::SplitIcons => "split icons",
            Self::InstallIcon => "install icon",
            Self::UnpackAppArchive => "unpack app.asar",
            Self::CopyTrayIcons => "copy tray icons",
            Self::CopyLocales => "copy locale files",
            Self::PackAppArchive => "pack app.asar",
            Self::BuildPackage => "build package",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::QueryPackage | Self::InstallIcon | Self::CopyTrayIcons | Self::CopyLocales => {
                Severity::Warn
            }
            _ => Severity::Fatal,
        }
    }

    pub fn identity(self) -> Identity {
        match self {
            Self::QueryPackage | Self::InstallPackages => Identity::Elevated,
            _ => Identity::RealUser,
        }
    }

    /// Map a failure of this step onto the error taxonomy.
    pub fn failure(self, detail: String) -> PipelineError {
        match self {
            Self::QueryPackage | Self::InstallPackages => PipelineError::Dependency(detail),
            Self::FetchInstaller => PipelineError::Transfer(detail),
            Self::BuildPackage => PipelineError::Build(detail),
            _ => PipelineError::Extraction {
                step: self.label(),
                detail,
            },
        }
    }
}

/// A fully described external command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub step: Step,
    pub program: String,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, OsString)>,
}

impl Invocation {
    pub fn new(step: Step, program: impl Into<String>) -> Self {
        Self {
            step,
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl AsRef<OsStr>) -> Self {
        self.env.push((key.into(), value.as_ref().to_os_string()));
        self
    }

    pub fn identity(&self) -> Identity {
        self.step.identity()
    }

    /// Value of an environment override, if set.
    pub fn env_value(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// Human readable command line for diagnostics.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Result of running an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub code: Option<i32>,
}

impl Outcome {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }

    fn describe(self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Executes invocations and answers tool presence probes.
pub trait Runner {
    /// Run an invocation to completion. `Err` only when the process could
    /// not be started at all.
    fn run(&self, invocation: &Invocation) -> Result<Outcome>;

    /// Whether `name` resolves to an executable in PATH.
    fn command_exists(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Spawns real processes, switching to the real user where declared.
pub struct SystemRunner {
    privileges: PrivilegeContext,
}

impl SystemRunner {
    pub fn new(privileges: PrivilegeContext) -> Self {
        Self { privileges }
    }
}

impl Runner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<Outcome> {
        tracing::debug!(
            step = invocation.step.label(),
            identity = ?invocation.identity(),
            "running {}",
            invocation.display()
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        if invocation.identity() == Identity::RealUser && self.privileges.drops_privileges() {
            let user = &self.privileges.real;
            cmd.uid(user.uid)
                .gid(user.gid)
                .env("HOME", &user.home)
                .env("USER", &user.name)
                .env("LOGNAME", &user.name);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let status = cmd
            .status()
            .with_context(|| format!("starting '{}'", invocation.program))?;
        Ok(Outcome {
            code: status.code(),
        })
    }
}

/// Run a step and apply its declared severity.
///
/// Returns `Ok(true)` on success, `Ok(false)` when a warn-level step failed,
/// and `Err` for a fatal failure.
pub fn run_step(runner: &dyn Runner, invocation: &Invocation) -> Result<bool> {
    let step = invocation.step;
    let detail = match runner.run(invocation) {
        Ok(outcome) if outcome.success() => return Ok(true),
        Ok(outcome) => format!("'{}' exited with {}", invocation.program, outcome.describe()),
        Err(err) => format!("{err:#}"),
    };
    settle(step, detail)
}

/// Apply a step's severity to a failure detail.
pub fn settle(step: Step, detail: String) -> Result<bool> {
    match step.severity() {
        Severity::Warn => {
            tracing::warn!("{}: {}", step.label(), detail);
            Ok(false)
        }
        Severity::Fatal => bail!(step.failure(detail)),
    }
}

/// Fail with a clear message when a required path is missing.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} not found at: {}", what, path.display());
    }
    Ok(())
}
