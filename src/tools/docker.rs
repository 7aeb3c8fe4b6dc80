//! docker-backed [`ContainerRuntime`]

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::ContainerRuntime;
use crate::error::ToolResult;
use crate::exec;

/// Drives the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    fn build_args(context: &Path, tag: &str, build_args: &[(String, String)]) -> Vec<String> {
        let mut args = vec!["build".to_string(), "-t".to_string(), tag.to_string()];
        for (key, value) in build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(context.display().to_string());
        args
    }

    /// `tar` member path for an absolute directory inside the container
    fn archive_member(src: &str) -> &str {
        src.trim_start_matches('/')
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        build_args: &[(String, String)],
    ) -> ToolResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::build_args(context, tag, build_args));
        exec::output(cmd).await.map(|_| ())
    }

    async fn copy_from(
        &self,
        container: &str,
        src: &str,
        dest: &Path,
        strip_components: u32,
    ) -> ToolResult<()> {
        let mut pack = Command::new(&self.program);
        pack.args(["exec", container, "tar", "-C", "/", "-cf", "-"])
            .arg(Self::archive_member(src));

        tokio::fs::create_dir_all(dest).await?;
        let mut unpack = Command::new("tar");
        unpack
            .args(["-xf", "-", "-C"])
            .arg(dest)
            .arg(format!("--strip-components={strip_components}"));
        exec::pipe(pack, unpack).await.map(|_| ())
    }
}
