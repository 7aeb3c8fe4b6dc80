//! bazel-backed [`BuildSystem`]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use super::BuildSystem;
use crate::error::{ToolError, ToolResult};
use crate::exec;

/// Helper shipped on CI images that writes the remote cache bazelrc
const REMOTE_CACHE_SCRIPT: &str = "create_bazel_cache_rcs.sh";

/// Prints `KEY value` build metadata for the tree
const WORKSPACE_STATUS_SCRIPT: &str = "hack/print-workspace-status.sh";

/// Builds Kubernetes targets with `bazel`, run from the source root
#[derive(Debug, Clone)]
pub struct BazelCli {
    kube_root: PathBuf,
}

impl BazelCli {
    pub fn new(kube_root: PathBuf) -> Self {
        Self { kube_root }
    }

    fn bazel(&self) -> Command {
        let mut cmd = Command::new("bazel");
        cmd.current_dir(&self.kube_root);
        cmd
    }
}

/// Package directory (relative to bazel-bin) that produces `binary`
fn package_dir(binary: &str) -> Option<&'static str> {
    match binary {
        "kubectl" => Some("cmd/kubectl"),
        "e2e.test" => Some("test/e2e"),
        "ginkgo" => Some("vendor/github.com/onsi/ginkgo/ginkgo"),
        "go-runner" => Some("cluster/images/conformance/go-runner"),
        _ => None,
    }
}

/// Find a regular file named `name` under `root`.
///
/// Entries are visited in file-name order and symlinked directories are not
/// followed, since bazel output trees link back into the execroot. A match
/// inside the binary's package directory wins over one found elsewhere.
pub(crate) fn find_file(root: &Path, name: &str) -> std::io::Result<Option<PathBuf>> {
    let package = package_dir(name);
    let mut fallback = None;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(_) => continue,
        };
        if !entry.file_type().is_file() || entry.file_name() != name {
            continue;
        }

        let in_package = match package {
            Some(dir) => entry
                .path()
                .strip_prefix(root)
                .is_ok_and(|rel| rel.starts_with(dir)),
            None => true,
        };
        if in_package {
            return Ok(Some(entry.into_path()));
        }
        if fallback.is_none() {
            fallback = Some(entry.into_path());
        }
    }
    Ok(fallback)
}

#[async_trait]
impl BuildSystem for BazelCli {
    async fn configure_remote_cache(&self) -> ToolResult<()> {
        let mut cmd = Command::new(REMOTE_CACHE_SCRIPT);
        cmd.current_dir(&self.kube_root);
        exec::output(cmd).await.map(|_| ())
    }

    async fn build(&self, targets: &[String]) -> ToolResult<()> {
        let mut cmd = self.bazel();
        cmd.arg("build").args(targets);
        exec::output(cmd).await.map(|_| ())
    }

    async fn locate(&self, binary: &str) -> ToolResult<PathBuf> {
        let mut cmd = self.bazel();
        cmd.args(["info", "bazel-bin"]);
        let bazel_bin = PathBuf::from(exec::stdout(cmd).await?);
        debug!(bazel_bin = %bazel_bin.display(), binary, "locating built binary");

        let (root, name) = (bazel_bin.clone(), binary.to_string());
        let found = tokio::task::spawn_blocking(move || find_file(&root, &name))
            .await
            .map_err(std::io::Error::other)??;
        found.ok_or_else(|| {
            ToolError::unexpected_output(
                "bazel",
                format!("{} not found under {}", binary, bazel_bin.display()),
            )
        })
    }

    async fn workspace_status(&self) -> ToolResult<String> {
        let mut cmd = Command::new(self.kube_root.join(WORKSPACE_STATUS_SCRIPT));
        cmd.current_dir(&self.kube_root);
        exec::stdout(cmd).await
    }
}
