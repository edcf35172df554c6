//! Text manifests written into the package.

use std::path::Path;

use crate::config::{APP_NAME, PACKAGE_NAME};
use crate::distro::Distro;

pub const PACKAGE_DESCRIPTION: &str = "Claude Desktop for Linux";
pub const PACKAGE_URL: &str = "https://claude.ai";

/// Runtime dependency of the launcher.
const RUNTIME_DEPENDS: &[&str] = &["electron"];

/// Freedesktop entry, also registering the `claude:` URL scheme.
pub fn desktop_entry() -> String {
    format!(
        "[Desktop Entry]\n\
         Name=Claude\n\
         Exec={APP_NAME} %u\n\
         Icon={APP_NAME}\n\
         Type=Application\n\
         Terminal=false\n\
         Categories=Office;Utility;\n\
         MimeType=x-scheme-handler/claude;\n\
         StartupWMClass=Claude\n"
    )
}

/// Launcher running the packaged archive with the system Electron.
pub fn launcher_script() -> String {
    format!("#!/bin/bash\nelectron /usr/lib/{APP_NAME}/app.asar \"$@\"\n")
}

/// Arch `PKGBUILD` whose `package()` copies the prepared root into `$pkgdir`.
pub fn pkgbuild(version: &str, release: u32, package_root: &Path) -> String {
    let depends = RUNTIME_DEPENDS
        .iter()
        .map(|dep| format!("'{dep}'"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "pkgname={PACKAGE_NAME}\n\
         pkgver={version}\n\
         pkgrel={release}\n\
         pkgdesc=\"{PACKAGE_DESCRIPTION}\"\n\
         arch=('{arch}')\n\
         url=\"{PACKAGE_URL}\"\n\
         license=('custom')\n\
         depends=({depends})\n\
         options=('!strip' '!debug')\n\
         \n\
         package() {{\n\
         \x20   cp -a {root}/. \"$pkgdir\"/\n\
         }}\n",
        arch = Distro::Arch.arch_label(),
        root = shell_quote(&package_root.to_string_lossy()),
    )
}

/// Debian `DEBIAN/control`.
pub fn debian_control(version: &str, release: u32) -> String {
    format!(
        "Package: {PACKAGE_NAME}\n\
         Version: {version}-{release}\n\
         Section: utils\n\
         Priority: optional\n\
         Architecture: {arch}\n\
         Depends: {depends}\n\
         Maintainer: {PACKAGE_NAME} packagers <root@localhost>\n\
         Homepage: {PACKAGE_URL}\n\
         Description: {PACKAGE_DESCRIPTION}\n\
         \x20Repackaged Windows release of Claude Desktop with a Linux stub\n\
         \x20for its native module.\n",
        arch = Distro::Debian.arch_label(),
        depends = RUNTIME_DEPENDS.join(", "),
    )
}

/// Single-quote `value` for bash.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
