//! kind-backed [`ClusterTool`]

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ClusterHandle, ClusterTool, CreateClusterRequest};
use crate::config::kind_duration;
use crate::error::ToolResult;
use crate::exec;

/// Drives the `kind` binary
#[derive(Debug, Clone)]
pub struct KindCli {
    program: String,
}

impl KindCli {
    pub fn new() -> Self {
        Self {
            program: "kind".to_string(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }

    fn create_args(request: &CreateClusterRequest) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "cluster".to_string(),
            "--name".to_string(),
            request.name.clone(),
            format!("--image={}", request.node_image),
        ];
        if request.retain {
            args.push("--retain".to_string());
        }
        args.push(format!("--wait={}", kind_duration(request.wait)));
        args.push(format!("-v={}", request.verbosity));
        args.push(format!("--kubeconfig={}", request.kubeconfig.display()));
        args.push(format!("--config={}", request.topology.display()));
        args
    }
}

impl Default for KindCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterTool for KindCli {
    async fn version(&self) -> ToolResult<String> {
        let mut cmd = self.command();
        cmd.arg("version");
        exec::stdout(cmd).await
    }

    async fn build_node_image(&self, kube_root: &Path, image: &str, arch: &str) -> ToolResult<()> {
        let mut cmd = self.command();
        cmd.args(["build", "node-image", "--type=bazel"])
            .arg(format!("--image={image}"))
            .arg(format!("--arch={arch}"))
            .arg(format!("--kube-root={}", kube_root.display()));
        exec::output(cmd).await.map(|_| ())
    }

    async fn create_cluster(&self, request: &CreateClusterRequest) -> ToolResult<()> {
        let mut cmd = self.command();
        cmd.args(Self::create_args(request));
        exec::output(cmd).await.map(|_| ())
    }

    async fn load_image(&self, cluster: &str, image: &str) -> ToolResult<()> {
        let mut cmd = self.command();
        cmd.args(["load", "docker-image", image, "--name", cluster]);
        exec::output(cmd).await.map(|_| ())
    }

    async fn export_logs(&self, cluster: &str, dir: &Path) -> ToolResult<()> {
        let mut cmd = self.command();
        cmd.args(["export", "logs"])
            .arg(dir)
            .args(["--name", cluster]);
        exec::output(cmd).await.map(|_| ())
    }

    async fn delete_cluster(&self, cluster: &ClusterHandle) -> ToolResult<()> {
        let mut cmd = self.command();
        cmd.args(["delete", "cluster", "--name", &cluster.name])
            .arg(format!("--kubeconfig={}", cluster.kubeconfig.display()));
        exec::output(cmd).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    #[test]
    fn create_args_match_conformance_invocation() {
        let request = CreateClusterRequest {
            name: "kind".to_string(),
            node_image: "kindest/node:latest".to_string(),
            kubeconfig: PathBuf::from("/tmp/run/kubeconfig"),
            topology: PathBuf::from("/artifacts/kind-config.yaml"),
            retain: true,
            wait: Duration::from_secs(60),
            verbosity: 3,
        };
        assert_eq!(
            KindCli::create_args(&request),
            vec![
                "create",
                "cluster",
                "--name",
                "kind",
                "--image=kindest/node:latest",
                "--retain",
                "--wait=60s",
                "-v=3",
                "--kubeconfig=/tmp/run/kubeconfig",
                "--config=/artifacts/kind-config.yaml",
            ]
        );
    }

    #[test]
    fn retain_is_optional() {
        let request = CreateClusterRequest {
            name: "c".to_string(),
            node_image: "img".to_string(),
            kubeconfig: PathBuf::from("k"),
            topology: PathBuf::from("t"),
            retain: false,
            wait: Duration::from_secs(5),
            verbosity: 0,
        };
        assert!(!KindCli::create_args(&request)
            .iter()
            .any(|a| a == "--retain"));
    }
}
