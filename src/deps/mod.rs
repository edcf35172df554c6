//! Host dependency resolution.
//!
//! Probes every required tool, maps the missing ones to distribution
//! packages and installs them with a single package manager call. With all
//! tools present nothing is installed, so re-running is free.

use anyhow::Result;

use crate::distro::{Distro, ARCHIVE_TOOL_BINARIES};
use crate::process::{run_step, Invocation, Runner, Step};

/// What the resolver found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    /// Tools that were not found in PATH.
    pub missing_tools: Vec<String>,
    /// Packages passed to the package manager (empty when nothing was missing).
    pub installed_packages: Vec<String>,
}

/// Determine the packages needed to provide every missing tool.
///
/// Returns `(missing tools, packages)` with packages deduplicated in first-seen order.
pub fn plan_packages(distro: Distro, runner: &dyn Runner) -> Result<(Vec<String>, Vec<String>)> {
    let mut missing = Vec::new();
    let mut packages: Vec<String> = Vec::new();

    if !ARCHIVE_TOOL_BINARIES
        .iter()
        .any(|bin| check_command(runner, bin))
    {
        missing.push(ARCHIVE_TOOL_BINARIES[0].to_string());
        push_unique(&mut packages, archive_package(distro, runner)?);
    }

    for (tool, provides) in distro.tool_packages() {
        if check_command(runner, tool) {
            continue;
        }
        missing.push((*tool).to_string());
        for package in *provides {
            push_unique(&mut packages, package);
        }
    }

    Ok((missing, packages))
}

/// Probe, then install whatever is missing.
pub fn ensure_dependencies(distro: Distro, runner: &dyn Runner) -> Result<DependencyReport> {
    let (missing_tools, packages) = plan_packages(distro, runner)?;
    if packages.is_empty() {
        println!("  all build dependencies present");
        return Ok(DependencyReport::default());
    }

    println!("  installing: {}", packages.join(" "));
    let manager = distro.package_manager();
    let invocation = Invocation::new(Step::InstallPackages, manager.program)
        .args(manager.install_args)
        .args(&packages);
    run_step(runner, &invocation)?;

    Ok(DependencyReport {
        missing_tools,
        installed_packages: packages,
    })
}

fn push_unique(packages: &mut Vec<String>, package: &str) {
    if !packages.iter().any(|p| p == package) {
        packages.push(package.to_string());
    }
}

fn check_command(runner: &dyn Runner, name: &str) -> bool {
    let found = runner.command_exists(name);
    if found {
        println!("  ✓ {name}");
    } else {
        println!("  ✗ {name} not found");
    }
    found
}

/// Pick the archive tool package: the current name if the repositories carry
/// it, otherwise the legacy one.
fn archive_package(distro: Distro, runner: &dyn Runner) -> Result<&'static str> {
    let (current, legacy) = distro.archive_packages();
    let (program, args) = distro.package_manager().query;
    let query = Invocation::new(Step::QueryPackage, program)
        .args(args)
        .arg(current);
    if run_step(runner, &query)? {
        return Ok(current);
    }
    tracing::debug!("{current} not available, falling back to {legacy}");
    Ok(legacy)
}
