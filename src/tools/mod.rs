//! External collaborators
//!
//! Every program the run drives sits behind a trait so the lifecycle can be
//! exercised without real binaries. The CLI-backed implementations live in
//! the submodules:
//!
//! - [`KindCli`] - cluster bootstrap tool
//! - [`BazelCli`] - build system
//! - [`DockerCli`] - container runtime
//! - [`KubectlCli`] - cluster query/control tool

mod bazel;
mod docker;
mod kind;
mod kubectl;

pub use bazel::BazelCli;
pub use docker::DockerCli;
pub use kind::KindCli;
pub use kubectl::KubectlCli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::config::RunConfig;
use crate::error::ToolResult;

/// The running cluster and everything needed to address it.
///
/// Recorded in the run state as soon as creation is attempted; its presence
/// is what tells cleanup that the cluster must be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    /// kind cluster name
    pub name: String,
    /// Kubeconfig kind writes credentials to
    pub kubeconfig: PathBuf,
    /// Client binary used against this cluster
    pub kubectl: PathBuf,
}

/// Arguments for a single `kind create cluster` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateClusterRequest {
    pub name: String,
    pub node_image: String,
    pub kubeconfig: PathBuf,
    pub topology: PathBuf,
    /// Keep node containers when creation fails
    pub retain: bool,
    /// Bounded readiness wait, enforced by kind
    pub wait: Duration,
    pub verbosity: u8,
}

/// Cluster bootstrap tool (kind)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterTool: Send + Sync {
    /// Version query; succeeds only when the tool is installed and runnable.
    async fn version(&self) -> ToolResult<String>;

    /// Build a node image for `arch` containing the Kubernetes build from `kube_root`.
    async fn build_node_image(&self, kube_root: &Path, image: &str, arch: &str)
        -> ToolResult<()>;

    async fn create_cluster(&self, request: &CreateClusterRequest) -> ToolResult<()>;

    /// Side-load a locally built image into every node of `cluster`.
    async fn load_image(&self, cluster: &str, image: &str) -> ToolResult<()>;

    async fn export_logs(&self, cluster: &str, dir: &Path) -> ToolResult<()>;

    async fn delete_cluster(&self, cluster: &ClusterHandle) -> ToolResult<()>;
}

/// Build system (bazel)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuildSystem: Send + Sync {
    /// Point the build at the shared remote cache.
    async fn configure_remote_cache(&self) -> ToolResult<()>;

    async fn build(&self, targets: &[String]) -> ToolResult<()>;

    /// Path of a built binary, by file name.
    async fn locate(&self, binary: &str) -> ToolResult<PathBuf>;

    /// Workspace status lines (`KEY value`), including `gitVersion`.
    async fn workspace_status(&self) -> ToolResult<String>;
}

/// Container runtime (docker)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        build_args: &[(String, String)],
    ) -> ToolResult<()>;

    /// Copy directory `src` out of `container` into `dest`, dropping
    /// `strip_components` leading path components.
    async fn copy_from(
        &self,
        container: &str,
        src: &str,
        dest: &Path,
        strip_components: u32,
    ) -> ToolResult<()>;
}

/// Cluster query/control tool (kubectl)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterQueryTool: Send + Sync {
    async fn apply(&self, cluster: &ClusterHandle, manifest: &Path) -> ToolResult<()>;

    /// Node the pod is scheduled on.
    async fn pod_node(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        pod: &str,
    ) -> ToolResult<String>;

    /// Pod phase, or `None` while the pod does not exist yet.
    async fn pod_phase(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        pod: &str,
    ) -> ToolResult<Option<String>>;

    async fn pod_logs(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        pod: &str,
    ) -> ToolResult<String>;
}

/// The four collaborators a run drives
#[derive(Clone)]
pub struct Toolchain {
    pub cluster: Arc<dyn ClusterTool>,
    pub build: Arc<dyn BuildSystem>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub query: Arc<dyn ClusterQueryTool>,
}

impl Toolchain {
    /// CLI-backed collaborators found on `PATH`
    pub fn cli(config: &RunConfig) -> Self {
        Self {
            cluster: Arc::new(KindCli::new()),
            build: Arc::new(BazelCli::new(config.kube_root.clone())),
            runtime: Arc::new(DockerCli::new()),
            query: Arc::new(KubectlCli),
        }
    }
}
