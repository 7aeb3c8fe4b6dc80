//! Run configuration
//!
//! Every setting is bound to an environment variable and has a default, so the
//! binary runs with no arguments in CI. Flags override the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::{Error, Result};

/// Run the Kubernetes conformance image against an ephemeral kind cluster
#[derive(Parser, Debug, Clone)]
#[command(name = "kind-conformance", version, about, long_about = None)]
pub struct RunConfig {
    /// Directory receiving cluster logs and test results (created if missing)
    #[arg(long, env = "ARTIFACTS", default_value = "_artifacts")]
    pub artifacts: PathBuf,

    /// Platform architecture override (amd64, arm64, arm); skips detection
    #[arg(long = "arch", env = "ARCH")]
    pub arch_override: Option<String>,

    /// Configure the build system's remote cache before building
    #[arg(long, env = "BAZEL_REMOTE_CACHE_ENABLED")]
    pub remote_cache: bool,

    /// Root of the Kubernetes source tree
    #[arg(long, env = "KUBE_ROOT", default_value = ".")]
    pub kube_root: PathBuf,

    /// Name of the kind cluster
    #[arg(long, env = "KIND_CLUSTER_NAME", default_value = "kind")]
    pub cluster_name: String,

    /// Node image built from the source tree and used for every node
    #[arg(long, env = "KIND_NODE_IMAGE", default_value = "kindest/node:latest")]
    pub node_image: String,

    /// How long kind waits for the control plane to become ready
    #[arg(long = "wait", env = "KIND_WAIT", default_value = "60s", value_parser = parse_duration)]
    pub ready_wait: Duration,

    /// kind log verbosity
    #[arg(long, env = "KIND_VERBOSITY", default_value_t = 3)]
    pub kind_verbosity: u8,

    /// Kubeconfig written by kind (defaults to one inside the run temp dir)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Registry prefix of the conformance image tag
    #[arg(long, env = "CONFORMANCE_REGISTRY", default_value = "k8s.gcr.io")]
    pub registry: String,

    /// Upper bound on how long the conformance pod may run
    #[arg(long = "test-timeout", env = "CONFORMANCE_TIMEOUT", default_value = "1h30m", value_parser = parse_duration)]
    pub test_timeout: Duration,

    /// Remove the run temp directory during cleanup (kept by default)
    #[arg(long = "cleanup-tmp-dir", env = "CLEANUP_TMP_DIR")]
    pub cleanup_tmp_dir: bool,
}

impl RunConfig {
    /// `<artifacts>/logs`, target of `kind export logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.artifacts.join("logs")
    }

    /// Directory of the conformance image sources inside the tree
    pub fn conformance_image_dir(&self) -> PathBuf {
        self.kube_root.join("cluster/images/conformance")
    }

    /// Manifest template that launches the conformance pod
    pub fn manifest_template(&self) -> PathBuf {
        self.conformance_image_dir().join("conformance-e2e.yaml")
    }

    /// Where the e2e test binary is linked for the image build
    pub fn e2e_link_path(&self) -> PathBuf {
        self.kube_root.join("_output/bin/e2e.test")
    }

    /// Create the artifacts directory if absent.
    pub fn ensure_artifacts_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.artifacts).map_err(|e| {
            Error::config(format!(
                "failed to create artifacts directory {}: {}",
                self.artifacts.display(),
                e
            ))
        })
    }
}

/// Parse a human-friendly duration.
///
/// Accepts `Nh`, `Nm`, `Ns` and combinations such as `1h30m`; a bare number
/// is seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => {
                return Err(format!(
                    "invalid duration '{}', expected e.g. 1h, 30m, 60s",
                    s
                ))
            }
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {}", s))?;
        total += n * unit;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("invalid duration '{}': missing unit", s));
    }
    Ok(Duration::from_secs(total))
}

/// Render a duration the way kind's `--wait` flag expects (`60s`).
pub fn kind_duration(d: Duration) -> String {
    format!("{}s", d.as_secs())
}
