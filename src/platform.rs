//! Host platform detection
//!
//! The architecture selects which conformance image variant is built and
//! tagged. It is resolved once per run.

use std::fmt;
use std::future::Future;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Supported node/image architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformArch {
    Amd64,
    Arm64,
    Arm,
}

impl PlatformArch {
    /// Map a machine identifier (as printed by `uname -m`) to an architecture.
    ///
    /// Also accepts the Go-style names so an override can be given either way.
    pub fn from_machine(machine: &str) -> Result<Self> {
        let machine = machine.trim();
        match machine {
            "x86_64" | "amd64" => Ok(PlatformArch::Amd64),
            "aarch64" | "arm64" => Ok(PlatformArch::Arm64),
            "arm" | "armv8l" => Ok(PlatformArch::Arm),
            m if m.starts_with("armv6") || m.starts_with("armv7") => Ok(PlatformArch::Arm),
            _ => Err(Error::UnsupportedPlatform {
                machine: machine.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformArch::Amd64 => "amd64",
            PlatformArch::Arm64 => "arm64",
            PlatformArch::Arm => "arm",
        }
    }
}

impl fmt::Display for PlatformArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine identifier of the host, from `uname -m`.
///
/// Falls back to the architecture this binary was compiled for when `uname`
/// cannot be run.
pub async fn host_machine() -> String {
    match Command::new("uname").arg("-m").output().await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => {
            debug!("uname -m unavailable, using compile-time architecture");
            std::env::consts::ARCH.to_string()
        }
    }
}

/// Resolve the platform, letting a non-empty override skip detection entirely.
///
/// `detect` is only invoked when no usable override is present.
pub async fn detect_platform<F, Fut>(override_arch: Option<&str>, detect: F) -> Result<PlatformArch>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = String>,
{
    match override_arch.map(str::trim) {
        Some(arch) if !arch.is_empty() => PlatformArch::from_machine(arch),
        _ => PlatformArch::from_machine(&detect().await),
    }
}
