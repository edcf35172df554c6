//! End-to-end run: dependencies, download, unpack, icons, patch, package.
//!
//! Stages run strictly in order and the first fatal error stops the run.
//! Each stage is bracketed by `[stage] start` / `[stage] ok` or
//! `[stage] FAILED` status lines.

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;

use crate::assemble::{assemble_package, BuildRequest};
use crate::config::PipelineConfig;
use crate::deps::{ensure_dependencies, DependencyReport};
use crate::error::classify;
use crate::fetch::{CachedInstaller, FetchCache, InstallerSource, Transport};
use crate::icons::{install_icons, IconReport};
use crate::patch::{patch_app, NodeRuntime, PatchReport};
use crate::preflight::HostEnvironment;
use crate::process::Runner;
use crate::unpack::unpack_installer;
use crate::workspace::Workspace;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Deps,
    Fetch,
    Unpack,
    Icons,
    Patch,
    Assemble,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Deps => "deps",
            Self::Fetch => "fetch",
            Self::Unpack => "unpack",
            Self::Icons => "icons",
            Self::Patch => "patch",
            Self::Assemble => "assemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Run `body` as `stage`, printing its status lines.
pub fn run_stage<T>(stage: Stage, body: impl FnOnce() -> Result<T>) -> Result<T> {
    println!("[{stage}] start");
    match body() {
        Ok(value) => {
            println!("[{stage}] ok");
            Ok(value)
        }
        Err(err) => {
            match classify(&err) {
                Some(kind) => println!("[{stage}] FAILED ({})", kind.category()),
                None => println!("[{stage}] FAILED"),
            }
            Err(err)
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub artifact: PathBuf,
    pub dependencies: DependencyReport,
    pub installer: CachedInstaller,
    pub icons: IconReport,
    pub patch: PatchReport,
}

impl RunSummary {
    /// Warnings collected from best-effort steps.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.icons
            .warnings
            .iter()
            .chain(&self.patch.warnings)
            .map(String::as_str)
    }
}

/// One packaging run against a probed host.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    host: &'a HostEnvironment,
    runner: &'a dyn Runner,
    transport: &'a dyn Transport,
    force_download: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        host: &'a HostEnvironment,
        runner: &'a dyn Runner,
        transport: &'a dyn Transport,
    ) -> Self {
        Self {
            config,
            host,
            runner,
            transport,
            force_download: false,
        }
    }

    /// Ignore any cached installer and download again.
    pub fn force_download(mut self, force: bool) -> Self {
        self.force_download = force;
        self
    }

    pub fn run(&self) -> Result<RunSummary> {
        let config = self.config;
        let privileges = &self.host.privileges;
        let ws = Workspace::create_fresh(&config.work_dir, privileges)?;
        tracing::info!("workspace: {}", ws.root().display());

        let dependencies = run_stage(Stage::Deps, || {
            ensure_dependencies(self.host.distro, self.runner)
        })?;

        let installer = run_stage(Stage::Fetch, || {
            let cache = FetchCache::open(&config.cache_dir_for(&privileges.real.home), privileges)?;
            let source = InstallerSource {
                url: config.installer_url.clone(),
                version: config.version.clone(),
                sha256: config.installer_sha256.clone(),
            };
            let cached = cache.ensure(&source, self.force_download, self.transport, privileges)?;
            cache.install_into(&cached, &ws, privileges)?;
            Ok(cached)
        })?;

        run_stage(Stage::Unpack, || {
            unpack_installer(self.runner, &ws, &config.version)
        })?;

        let icons = run_stage(Stage::Icons, || {
            install_icons(self.runner, &ws, privileges)
        })?;

        let node = NodeRuntime {
            nvm_dir: self.host.nvm_dir.clone(),
            node_major: config.node_major,
        };
        let patch = run_stage(Stage::Patch, || {
            patch_app(self.runner, &ws, &node, privileges)
        })?;

        let request = BuildRequest {
            distro: self.host.distro,
            version: &config.version,
            output_dir: &config.output_dir,
        };
        let artifact = run_stage(Stage::Assemble, || {
            assemble_package(self.runner, &ws, &request, privileges)
        })?;

        Ok(RunSummary {
            artifact,
            dependencies,
            installer,
            icons,
            patch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::Distro;
    use crate::fetch::CacheOutcome;
    use crate::privilege::PrivilegeContext;
    use crate::process::Step;
    use crate::testing::{CountingTransport, ScriptedRunner};
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> PipelineConfig {
        PipelineConfig {
            version: "9.9.9".into(),
            work_dir: temp.path().join("build"),
            cache_dir: Some(temp.path().join("cache")),
            output_dir: temp.path().join("out"),
            ..PipelineConfig::default()
        }
    }

    fn host(temp: &TempDir, distro: Distro) -> HostEnvironment {
        HostEnvironment {
            distro,
            privileges: PrivilegeContext::current(),
            nvm_dir: temp.path().join(".nvm"),
        }
    }

    #[test]
    fn end_to_end_produces_arch_package() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let host = host(&temp, Distro::Arch);
        let runner = ScriptedRunner::new("9.9.9");
        let transport = CountingTransport::serving(b"MZ installer");

        let summary = Pipeline::new(&config, &host, &runner, &transport)
            .run()
            .unwrap();

        assert_eq!(
            summary.artifact,
            temp.path()
                .join("out/claude-desktop-bin-9.9.9-1-x86_64.pkg.tar.zst")
        );
        assert!(summary.artifact.is_file());
        assert_eq!(summary.installer.outcome, CacheOutcome::Downloaded);
        assert_eq!(summary.icons.installed.len(), 6);
        assert_eq!(summary.warnings().count(), 0);
        assert!(summary.dependencies.installed_packages.is_empty());
    }

    #[test]
    fn second_run_reuses_cached_installer() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let host = host(&temp, Distro::Arch);
        let transport = CountingTransport::serving(b"MZ installer");

        for _ in 0..2 {
            let runner = ScriptedRunner::new("9.9.9");
            Pipeline::new(&config, &host, &runner, &transport)
                .run()
                .unwrap();
        }

        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn forced_download_fetches_again() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let host = host(&temp, Distro::Arch);
        let transport = CountingTransport::serving(b"MZ installer");

        let runner = ScriptedRunner::new("9.9.9");
        Pipeline::new(&config, &host, &runner, &transport)
            .run()
            .unwrap();
        let summary = Pipeline::new(&config, &host, &runner, &transport)
            .force_download(true)
            .run()
            .unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(summary.installer.outcome, CacheOutcome::Downloaded);
    }

    #[test]
    fn archive_failures_stop_before_assembly() {
        for step in [
            Step::ExtractInstaller,
            Step::ExtractNupkg,
            Step::UnpackAppArchive,
            Step::PackAppArchive,
        ] {
            let temp = TempDir::new().unwrap();
            let config = config(&temp);
            let host = host(&temp, Distro::Arch);
            let runner = ScriptedRunner::new("9.9.9").failing(step);
            let transport = CountingTransport::serving(b"MZ installer");

            let err = Pipeline::new(&config, &host, &runner, &transport)
                .run()
                .unwrap_err();

            assert_eq!(classify(&err).unwrap().category(), "extraction", "{step:?}");
            assert!(
                runner.invocations_of(Step::BuildPackage).is_empty(),
                "{step:?} reached the package builder"
            );
            assert!(!config.output_dir.exists());
        }
    }

    #[test]
    fn transfer_failure_stops_before_unpack() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let host = host(&temp, Distro::Arch);
        let runner = ScriptedRunner::new("9.9.9");

        let err = Pipeline::new(&config, &host, &runner, &CountingTransport::failing())
            .run()
            .unwrap_err();

        assert_eq!(classify(&err).unwrap().category(), "transfer");
        assert!(runner.invocations_of(Step::ExtractInstaller).is_empty());
    }

    #[test]
    fn missing_icon_still_packages() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let host = host(&temp, Distro::Arch);
        let runner = ScriptedRunner::new("9.9.9").without_icon_sizes(&[48]);
        let transport = CountingTransport::serving(b"MZ installer");

        let summary = Pipeline::new(&config, &host, &runner, &transport)
            .run()
            .unwrap();

        assert!(summary.artifact.is_file());
        assert_eq!(summary.icons.installed.len(), 5);
        assert_eq!(summary.warnings().count(), 1);
    }

    #[test]
    fn debian_host_builds_deb() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let host = host(&temp, Distro::Debian);
        let runner = ScriptedRunner::new("9.9.9");
        let transport = CountingTransport::serving(b"MZ installer");

        let summary = Pipeline::new(&config, &host, &runner, &transport)
            .run()
            .unwrap();

        assert_eq!(
            summary.artifact,
            temp.path().join("out/claude-desktop-bin_9.9.9-1_amd64.deb")
        );
        assert!(summary.artifact.is_file());
    }

    #[test]
    fn missing_tools_are_installed_once() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let host = host(&temp, Distro::Arch);
        let runner = ScriptedRunner::new("9.9.9").without_tools(&["wrestool", "icotool"]);
        let transport = CountingTransport::serving(b"MZ installer");

        let summary = Pipeline::new(&config, &host, &runner, &transport)
            .run()
            .unwrap();

        assert_eq!(summary.dependencies.installed_packages, vec!["icoutils"]);
        assert_eq!(runner.invocations_of(Step::InstallPackages).len(), 1);
    }
}
