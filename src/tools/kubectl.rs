//! kubectl-backed [`ClusterQueryTool`]
//!
//! The binary comes from the [`ClusterHandle`], so the freshly built client
//! is used without touching the process `PATH`.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ClusterHandle, ClusterQueryTool};
use crate::error::{ToolError, ToolResult};
use crate::exec;

/// Drives the client binary named by the cluster handle
#[derive(Debug, Clone, Copy, Default)]
pub struct KubectlCli;

impl KubectlCli {
    fn command(cluster: &ClusterHandle) -> Command {
        let mut cmd = Command::new(&cluster.kubectl);
        cmd.arg(format!("--kubeconfig={}", cluster.kubeconfig.display()));
        cmd
    }

    fn get_pod(cluster: &ClusterHandle, namespace: &str, pod: &str, jsonpath: &str) -> Command {
        let mut cmd = Self::command(cluster);
        cmd.args(["get", "pod", pod, "-n", namespace])
            .arg(format!("-o=jsonpath={jsonpath}"));
        cmd
    }
}

fn is_not_found(err: &ToolError) -> bool {
    matches!(err, ToolError::Failed { stderr, .. } if stderr.contains("NotFound"))
}

#[async_trait]
impl ClusterQueryTool for KubectlCli {
    async fn apply(&self, cluster: &ClusterHandle, manifest: &Path) -> ToolResult<()> {
        let mut cmd = Self::command(cluster);
        cmd.args(["apply", "-f"]).arg(manifest);
        exec::output(cmd).await.map(|_| ())
    }

    async fn pod_node(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        pod: &str,
    ) -> ToolResult<String> {
        let node = exec::stdout(Self::get_pod(cluster, namespace, pod, "{.spec.nodeName}")).await?;
        if node.is_empty() {
            return Err(ToolError::unexpected_output(
                "kubectl",
                format!("pod {namespace}/{pod} is not scheduled on a node"),
            ));
        }
        Ok(node)
    }

    async fn pod_phase(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        pod: &str,
    ) -> ToolResult<Option<String>> {
        match exec::stdout(Self::get_pod(cluster, namespace, pod, "{.status.phase}")).await {
            Ok(phase) if phase.is_empty() => Ok(None),
            Ok(phase) => Ok(Some(phase)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn pod_logs(
        &self,
        cluster: &ClusterHandle,
        namespace: &str,
        pod: &str,
    ) -> ToolResult<String> {
        let mut cmd = Self::command(cluster);
        cmd.args(["logs", pod, "-n", namespace]);
        let output = exec::output(cmd).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn handle() -> ClusterHandle {
        ClusterHandle {
            name: "kind".to_string(),
            kubeconfig: PathBuf::from("/tmp/run/kubeconfig"),
            kubectl: PathBuf::from("/bazel-bin/cmd/kubectl/kubectl"),
        }
    }

    #[test]
    fn commands_use_handle_binary_and_kubeconfig() {
        let cmd = KubectlCli::get_pod(&handle(), "conformance", "e2e", "{.spec.nodeName}");
        assert_eq!(
            exec::describe(&cmd),
            "/bazel-bin/cmd/kubectl/kubectl --kubeconfig=/tmp/run/kubeconfig get pod e2e -n conformance -o=jsonpath={.spec.nodeName}"
        );
    }

    #[test]
    fn not_found_is_detected_from_stderr() {
        let err = ToolError::Failed {
            command: "kubectl get pod".to_string(),
            code: Some(1),
            stderr: "Error from server (NotFound): pods \"e2e\" not found".to_string(),
        };
        assert!(is_not_found(&err));

        let err = ToolError::Failed {
            command: "kubectl get pod".to_string(),
            code: Some(1),
            stderr: "Unable to connect to the server".to_string(),
        };
        assert!(!is_not_found(&err));
    }
}
