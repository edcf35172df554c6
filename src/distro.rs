//! Supported host distributions and their static packaging tables.
//!
//! Everything that differs between Arch and Debian hosts lives here as data:
//! the package manager invocation, the tool→package map, the package
//! builder and the naming of the produced artifact.

use std::fmt;

/// Distribution family of the build host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distro {
    /// Arch Linux and derivatives; packages with `makepkg`.
    Arch,
    /// Debian, Ubuntu and derivatives; packages with `dpkg-deb`.
    Debian,
}

/// How a distribution installs and queries packages.
#[derive(Debug, Clone, Copy)]
pub struct PackageManager {
    pub program: &'static str,
    /// Arguments placed before the package names for an install.
    pub install_args: &'static [&'static str],
    /// Program and arguments placed before a single package name to ask
    /// whether the package exists in the configured repositories.
    pub query: (&'static str, &'static [&'static str]),
}

/// Archive tool special case: either binary satisfies the requirement.
pub const ARCHIVE_TOOL_BINARIES: &[&str] = &["7z", "7za"];

const ARCH_TOOLS: &[(&str, &[&str])] = &[
    ("wrestool", &["icoutils"]),
    ("icotool", &["icoutils"]),
    ("convert", &["imagemagick"]),
    ("npx", &["nodejs", "npm"]),
    ("makepkg", &["pacman"]),
];

const DEBIAN_TOOLS: &[(&str, &[&str])] = &[
    ("wrestool", &["icoutils"]),
    ("icotool", &["icoutils"]),
    ("convert", &["imagemagick"]),
    ("npx", &["nodejs", "npm"]),
    ("dpkg-deb", &["dpkg-dev"]),
];

impl Distro {
    /// Normalize a distribution id (as found in `/etc/os-release`).
    pub fn from_os_id(id: &str) -> Option<Self> {
        match id.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "arch" | "archlinux" | "manjaro" | "endeavouros" | "garuda" | "artix" => {
                Some(Self::Arch)
            }
            "debian" | "ubuntu" | "linuxmint" | "pop" | "elementary" | "raspbian" => {
                Some(Self::Debian)
            }
            _ => None,
        }
    }

    pub fn package_manager(self) -> PackageManager {
        match self {
            Self::Arch => PackageManager {
                program: "pacman",
                install_args: &["-S", "--needed", "--noconfirm"],
                query: ("pacman", &["-Si"]),
            },
            Self::Debian => PackageManager {
                program: "apt-get",
                install_args: &["install", "-y"],
                query: ("apt-cache", &["show"]),
            },
        }
    }

    /// Required tools (excluding the archive tool) and the packages that
    /// provide each of them.
    pub fn tool_packages(self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            Self::Arch => ARCH_TOOLS,
            Self::Debian => DEBIAN_TOOLS,
        }
    }

    /// Archive tool packages: the current name first, the legacy fallback second.
    pub fn archive_packages(self) -> (&'static str, &'static str) {
        match self {
            Self::Arch => ("7zip", "p7zip"),
            Self::Debian => ("7zip", "p7zip-full"),
        }
    }

    /// Packaging architecture name for x86_64 hosts.
    pub fn arch_label(self) -> &'static str {
        match self {
            Self::Arch => "x86_64",
            Self::Debian => "amd64",
        }
    }

    /// File name of the package the builder produces.
    pub fn artifact_name(self, package: &str, version: &str, release: u32) -> String {
        match self {
            Self::Arch => format!(
                "{package}-{version}-{release}-{}.pkg.tar.zst",
                self.arch_label()
            ),
            Self::Debian => format!("{package}_{version}-{release}_{}.deb", self.arch_label()),
        }
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arch => write!(f, "arch"),
            Self::Debian => write!(f, "debian"),
        }
    }
}
