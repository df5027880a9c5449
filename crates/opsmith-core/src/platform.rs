//! Platform detection and mapping to distribution-specific names.
//!
//! Handles mapping between:
//! - the host platform (`linux`/`darwin`/`windows`, `x86_64`/`aarch64`/`i686`)
//! - python-build-standalone triples (e.g. `x86_64-unknown-linux-gnu`)
//! - Node.js asset names (e.g. `darwin-x64`, `linux-arm64`)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        };
        write!(f, "{s}")
    }
}

/// CPU architecture, normalized to python-build-standalone naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "aarch64")]
    Aarch64,
    #[serde(rename = "i686")]
    I686,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::I686 => "i686",
        };
        write!(f, "{s}")
    }
}

/// A detected (os, arch) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    #[must_use]
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect the current platform.
    ///
    /// Returns `None` on a host opsmith has no distribution mapping for.
    #[must_use]
    pub fn detect() -> Option<Self> {
        let os = match std::env::consts::OS {
            "linux" => Os::Linux,
            "macos" => Os::Darwin,
            "windows" => Os::Windows,
            _ => return None,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            "x86" => Arch::I686,
            _ => return None,
        };
        Some(Self { os, arch })
    }

    /// Whether python-build-standalone publishes archives for this platform.
    ///
    /// Linux and macOS on x86_64/aarch64; Windows on x86_64 only.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        match self.os {
            Os::Linux | Os::Darwin => matches!(self.arch, Arch::X86_64 | Arch::Aarch64),
            Os::Windows => self.arch == Arch::X86_64,
        }
    }

    /// The python-build-standalone target triple.
    ///
    /// Examples: `x86_64-unknown-linux-gnu`, `aarch64-apple-darwin`,
    /// `x86_64-pc-windows-msvc`.
    #[must_use]
    pub fn python_triple(&self) -> String {
        match self.os {
            Os::Linux => format!("{}-unknown-linux-gnu", self.arch),
            Os::Darwin => format!("{}-apple-darwin", self.arch),
            Os::Windows => format!("{}-pc-windows-msvc", self.arch),
        }
    }

    /// OS component of a Node.js distribution asset name.
    #[must_use]
    pub fn node_os(&self) -> &'static str {
        match self.os {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "win",
        }
    }

    /// Architecture component of a Node.js distribution asset name.
    #[must_use]
    pub fn node_arch(&self) -> &'static str {
        match self.arch {
            Arch::X86_64 => "x64",
            Arch::Aarch64 => "arm64",
            Arch::I686 => "x86",
        }
    }

    /// Archive extension used by the Node.js distribution for this OS.
    #[must_use]
    pub fn archive_ext(&self) -> &'static str {
        if self.os == Os::Windows { "zip" } else { "tar.gz" }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}
