//! Lifecycle controller
//!
//! Runs the primary phases in a fixed order:
//!
//! 1. Detect the platform architecture
//! 2. Verify the cluster tool is usable
//! 3. Build the node image and client binary
//! 4. Provision the kind cluster
//! 5. Build, load and launch the conformance suite
//! 6. Collect results from the node running the suite
//!
//! The first failure stops the remaining primary phases. Cleanup then runs
//! exactly once on every path, including interruption by SIGINT/SIGTERM: the
//! primary phases are raced against the shutdown signal and cleanup is awaited
//! after the race, reading only the explicit [`RunState`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::{Error, Phase, PhaseErrorExt};
use crate::manifest::{
    rewrite_image, ArtifactReference, CONFORMANCE_NAMESPACE, CONFORMANCE_POD, RESULTS_DIR,
    RESULTS_STRIP_COMPONENTS,
};
use crate::platform::{detect_platform, host_machine, PlatformArch};
use crate::poll::wait_with_timeout;
use crate::tools::{ClusterHandle, CreateClusterRequest, Toolchain};
use crate::topology::write_topology;
use crate::version::image_version;
use crate::Result;

const KUBECTL_TARGET: &str = "//cmd/kubectl";
const E2E_TEST_TARGET: &str = "//test/e2e:e2e.test";
const GINKGO_TARGET: &str = "//vendor/github.com/onsi/ginkgo/ginkgo";
const GO_RUNNER_TARGET: &str = "//cluster/images/conformance/go-runner";

/// Rendered manifest written next to the other artifacts
const RENDERED_MANIFEST: &str = "conformance-e2e.yaml";

/// Captured output of the conformance pod
const POD_LOG_FILE: &str = "e2e.log";

const INSTALL_HINT: &str =
    "install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation";

/// How the conformance image runs the suite, probed from the source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Shell entrypoint driving ginkgo directly
    LegacyRunner,
    /// Tree ships `cluster/images/conformance/go-runner`
    GoRunner,
}

impl RunnerKind {
    pub fn probe(conformance_image_dir: &Path) -> Self {
        if conformance_image_dir.join("go-runner").is_dir() {
            RunnerKind::GoRunner
        } else {
            RunnerKind::LegacyRunner
        }
    }

    pub fn build_targets(&self) -> Vec<String> {
        let mut targets = vec![
            E2E_TEST_TARGET.to_string(),
            GINKGO_TARGET.to_string(),
            KUBECTL_TARGET.to_string(),
        ];
        if *self == RunnerKind::GoRunner {
            targets.push(GO_RUNNER_TARGET.to_string());
        }
        targets
    }

    /// Binaries staged into the image build context
    pub fn binaries(&self) -> Vec<&'static str> {
        let mut binaries = vec!["e2e.test", "ginkgo", "kubectl"];
        if *self == RunnerKind::GoRunner {
            binaries.push("go-runner");
        }
        binaries
    }
}

/// Everything cleanup needs to know, filled in eagerly as phases progress.
#[derive(Debug, Default, Clone)]
pub struct RunState {
    /// Set immediately before the create call, not after it succeeds
    pub cluster: Option<ClusterHandle>,
    /// Transient symlink exposing the e2e test binary
    pub e2e_link: Option<PathBuf>,
    /// Per-run scratch directory
    pub tmp_dir: Option<PathBuf>,
}

/// Outputs of the build phase consumed by later phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutputs {
    /// Freshly built client binary
    pub kubectl: PathBuf,
}

/// Terminal state of the conformance pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodOutcome {
    Succeeded,
    Failed,
}

/// Outcome of a single best-effort cleanup step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Skipped,
    Failed(String),
}

/// What cleanup did, step by step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub logs_exported: StepOutcome,
    pub cluster_deleted: StepOutcome,
    pub link_removed: StepOutcome,
    pub tmp_dir_removed: StepOutcome,
}

impl CleanupReport {
    pub fn has_failures(&self) -> bool {
        [
            &self.logs_exported,
            &self.cluster_deleted,
            &self.link_removed,
            &self.tmp_dir_removed,
        ]
        .iter()
        .any(|s| matches!(s, StepOutcome::Failed(_)))
    }
}

/// Result of a whole run
#[derive(Debug)]
pub struct RunOutcome {
    /// Earliest primary-phase failure, if any
    pub result: Result<()>,
    pub cleanup: CleanupReport,
}

impl RunOutcome {
    /// Process exit status; cleanup never influences it.
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(()) => 0,
            Err(e) => e.exit_code(),
        }
    }
}

/// Drives one conformance run
pub struct Controller {
    config: RunConfig,
    tools: Toolchain,
    poll_interval: Duration,
}

impl Controller {
    pub fn new(config: RunConfig, tools: Toolchain) -> Self {
        Self {
            config,
            tools,
            poll_interval: Duration::from_secs(10),
        }
    }

    /// Interval between conformance pod status checks
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run every phase, stopping early on SIGINT/SIGTERM; cleanup always runs.
    pub async fn run(&self) -> RunOutcome {
        self.run_until(shutdown_signal()).await
    }

    /// Like [`run`](Self::run) with a caller-supplied shutdown future that
    /// resolves to the name of the signal received.
    pub async fn run_until<S>(&self, shutdown: S) -> RunOutcome
    where
        S: Future<Output = String>,
    {
        let start = Instant::now();
        let mut state = RunState::default();

        let result = tokio::select! {
            biased;
            signal = shutdown => {
                warn!(%signal, "Interrupted, abandoning remaining phases");
                Err(Error::Interrupted { signal })
            }
            result = self.run_phases(&mut state) => result,
        };

        if let Err(e) = &result {
            warn!(error = %e, "Run failed, cleaning up");
        }
        let cleanup = self.cleanup(&state).await;

        match &result {
            Ok(()) => info!("Conformance run complete in {:?}", start.elapsed()),
            Err(e) => warn!(
                exit_code = e.exit_code(),
                phase = e.phase().map_or("none", |p| p.as_str()),
                "Conformance run failed: {}",
                e
            ),
        }
        RunOutcome { result, cleanup }
    }

    async fn run_phases(&self, state: &mut RunState) -> Result<()> {
        self.config.ensure_artifacts_dir()?;
        let tmp_dir = create_tmp_dir()?;
        info!(tmp_dir = %tmp_dir.display(), "Created run temp directory");
        state.tmp_dir = Some(tmp_dir);

        info!("[Phase 1] Detecting platform...");
        let platform = self.detect_platform().await?;

        info!("[Phase 2] Verifying cluster tool...");
        self.ensure_tool().await?;

        info!("[Phase 3] Building node image and binaries...");
        let outputs = self.build(platform).await?;

        info!("[Phase 4] Creating cluster...");
        let cluster = self.provision(platform, &outputs, state).await?;

        info!("[Phase 5] Running conformance tests...");
        let outcome = self.run_tests(platform, &cluster, state).await?;

        info!("[Phase 6] Collecting results...");
        self.collect_results(&cluster).await?;

        if outcome == PodOutcome::Failed {
            return Err(Error::in_phase(
                Phase::RunTests,
                format!(
                    "conformance pod {}/{} failed, see {}",
                    CONFORMANCE_NAMESPACE,
                    CONFORMANCE_POD,
                    self.config.artifacts.display()
                ),
                None,
            ));
        }
        Ok(())
    }

    /// Resolve the architecture, honouring a non-empty override.
    pub async fn detect_platform(&self) -> Result<PlatformArch> {
        let platform =
            detect_platform(self.config.arch_override.as_deref(), host_machine).await?;
        info!(%platform, "Detected platform");
        Ok(platform)
    }

    /// Verify the cluster tool answers a version query.
    pub async fn ensure_tool(&self) -> Result<()> {
        match self.tools.cluster.version().await {
            Ok(version) => {
                info!(%version, "Found kind");
                Ok(())
            }
            Err(e) => Err(Error::ToolUnavailable {
                tool: "kind".to_string(),
                exit_code: e.exit_code(),
                message: format!("{}. {}", e, INSTALL_HINT),
            }),
        }
    }

    /// Build the node image and the client binary.
    pub async fn build(&self, platform: PlatformArch) -> Result<BuildOutputs> {
        let build = &self.tools.build;

        if self.config.remote_cache {
            info!("Configuring remote build cache");
            build.configure_remote_cache().await.in_phase(Phase::Build)?;
        }

        self.tools
            .cluster
            .build_node_image(
                &self.config.kube_root,
                &self.config.node_image,
                platform.as_str(),
            )
            .await
            .in_phase(Phase::Build)?;

        build
            .build(&[KUBECTL_TARGET.to_string()])
            .await
            .in_phase(Phase::Build)?;
        let kubectl = build.locate("kubectl").await.in_phase(Phase::Build)?;
        info!(kubectl = %kubectl.display(), "Using freshly built kubectl");

        Ok(BuildOutputs { kubectl })
    }

    /// Write the topology and create the cluster.
    ///
    /// The handle is recorded in `state` before kind is invoked so a cluster
    /// left half-created by a failing call is still torn down.
    pub async fn provision(
        &self,
        platform: PlatformArch,
        outputs: &BuildOutputs,
        state: &mut RunState,
    ) -> Result<ClusterHandle> {
        let topology = write_topology(&self.config.artifacts).map_err(|e| {
            Error::in_phase(
                Phase::Provision,
                format!("failed to write cluster topology: {e}"),
                None,
            )
        })?;

        let kubeconfig = match (&self.config.kubeconfig, &state.tmp_dir) {
            (Some(path), _) => path.clone(),
            (None, Some(tmp)) => tmp.join("kubeconfig"),
            (None, None) => self.config.artifacts.join("kubeconfig"),
        };

        let handle = ClusterHandle {
            name: self.config.cluster_name.clone(),
            kubeconfig: kubeconfig.clone(),
            kubectl: outputs.kubectl.clone(),
        };
        let request = CreateClusterRequest {
            name: handle.name.clone(),
            node_image: self.config.node_image.clone(),
            kubeconfig,
            topology,
            retain: true,
            wait: self.config.ready_wait,
            verbosity: self.config.kind_verbosity,
        };

        state.cluster = Some(handle.clone());
        info!(cluster = %handle.name, %platform, "Creating kind cluster");
        self.tools
            .cluster
            .create_cluster(&request)
            .await
            .in_phase(Phase::Provision)?;

        Ok(handle)
    }

    /// Build the conformance image, launch it, and wait for the pod to finish.
    pub async fn run_tests(
        &self,
        platform: PlatformArch,
        cluster: &ClusterHandle,
        state: &mut RunState,
    ) -> Result<PodOutcome> {
        let build = &self.tools.build;
        let image_dir = self.config.conformance_image_dir();

        let runner = RunnerKind::probe(&image_dir);
        info!(?runner, "Building test binaries");
        build
            .build(&runner.build_targets())
            .await
            .in_phase(Phase::RunTests)?;

        let mut binaries = Vec::new();
        for name in runner.binaries() {
            let path = build.locate(name).await.in_phase(Phase::RunTests)?;
            binaries.push(path);
        }

        let e2e_test = binaries
            .iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some("e2e.test"))
            .cloned()
            .ok_or_else(|| Error::in_phase(Phase::RunTests, "e2e.test was not built", None))?;
        let link = self.config.e2e_link_path();
        link_binary(&e2e_test, &link).await.map_err(|e| {
            Error::in_phase(
                Phase::RunTests,
                format!("failed to link {}: {e}", link.display()),
                None,
            )
        })?;
        state.e2e_link = Some(link);

        let status = build.workspace_status().await.in_phase(Phase::RunTests)?;
        let version = image_version(&status).ok_or_else(|| {
            Error::in_phase(
                Phase::RunTests,
                "workspace status has no usable gitVersion",
                None,
            )
        })?;
        let image =
            ArtifactReference::conformance(&self.config.registry, platform.as_str(), &version);
        info!(%image, "Building conformance image");

        let scratch = state
            .tmp_dir
            .clone()
            .unwrap_or_else(|| self.config.artifacts.clone());
        let context = scratch.join("conformance-image");
        stage_build_context(&image_dir, &binaries, &context)
            .await
            .map_err(|e| {
                Error::in_phase(
                    Phase::RunTests,
                    format!("failed to stage image build context: {e}"),
                    None,
                )
            })?;

        let build_args = vec![
            ("ARCH".to_string(), platform.as_str().to_string()),
            ("VERSION".to_string(), version.clone()),
        ];
        self.tools
            .runtime
            .build_image(&context, &image.to_string(), &build_args)
            .await
            .in_phase(Phase::RunTests)?;

        self.tools
            .cluster
            .load_image(&cluster.name, &image.to_string())
            .await
            .in_phase(Phase::RunTests)?;

        let manifest = self.render_manifest(&image).await?;
        self.tools
            .query
            .apply(cluster, &manifest)
            .await
            .in_phase(Phase::RunTests)?;

        let outcome = self.wait_for_pod(cluster).await?;
        self.save_pod_logs(cluster).await;
        Ok(outcome)
    }

    async fn render_manifest(&self, image: &ArtifactReference) -> Result<PathBuf> {
        let template_path = self.config.manifest_template();
        let template = tokio::fs::read_to_string(&template_path).await.map_err(|e| {
            Error::in_phase(
                Phase::RunTests,
                format!("failed to read {}: {e}", template_path.display()),
                None,
            )
        })?;

        let (rendered, rewritten) = rewrite_image(&template, image);
        if rewritten == 0 {
            return Err(Error::in_phase(
                Phase::RunTests,
                format!(
                    "{} has no conformance image reference",
                    template_path.display()
                ),
                None,
            ));
        }

        let path = self.config.artifacts.join(RENDERED_MANIFEST);
        tokio::fs::write(&path, rendered).await.map_err(|e| {
            Error::in_phase(
                Phase::RunTests,
                format!("failed to write {}: {e}", path.display()),
                None,
            )
        })?;
        Ok(path)
    }

    async fn wait_for_pod(&self, cluster: &ClusterHandle) -> Result<PodOutcome> {
        let query = &self.tools.query;
        wait_with_timeout(
            Phase::RunTests,
            self.config.test_timeout,
            self.poll_interval,
            "conformance pod to finish",
            || async {
                match query
                    .pod_phase(cluster, CONFORMANCE_NAMESPACE, CONFORMANCE_POD)
                    .await
                {
                    Ok(Some(phase)) if phase == "Succeeded" => Ok(Some(PodOutcome::Succeeded)),
                    Ok(Some(phase)) if phase == "Failed" => Ok(Some(PodOutcome::Failed)),
                    Ok(_) => Ok(None),
                    Err(e) => Err(e.to_string()),
                }
            },
        )
        .await
    }

    async fn save_pod_logs(&self, cluster: &ClusterHandle) {
        let logs = match self
            .tools
            .query
            .pod_logs(cluster, CONFORMANCE_NAMESPACE, CONFORMANCE_POD)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!(error = %e, "Failed to fetch conformance pod logs");
                return;
            }
        };
        let path = self.config.artifacts.join(POD_LOG_FILE);
        if let Err(e) = tokio::fs::write(&path, logs).await {
            warn!(error = %e, path = %path.display(), "Failed to write conformance pod logs");
        }
    }

    /// Copy the results directory out of the node hosting the conformance pod.
    pub async fn collect_results(&self, cluster: &ClusterHandle) -> Result<()> {
        let node = self
            .tools
            .query
            .pod_node(cluster, CONFORMANCE_NAMESPACE, CONFORMANCE_POD)
            .await
            .in_phase(Phase::CollectResults)?;
        info!(%node, "Extracting {} from node", RESULTS_DIR);

        self.tools
            .runtime
            .copy_from(
                &node,
                RESULTS_DIR,
                &self.config.artifacts,
                RESULTS_STRIP_COMPONENTS,
            )
            .await
            .in_phase(Phase::CollectResults)
    }

    /// Best-effort teardown. Never fails; every step is attempted.
    pub async fn cleanup(&self, state: &RunState) -> CleanupReport {
        info!("[Cleanup] Tearing down...");

        let cluster_name = state
            .cluster
            .as_ref()
            .map_or(self.config.cluster_name.as_str(), |c| c.name.as_str());
        let logs_dir = self.config.logs_dir();
        let logs_exported = match self
            .tools
            .cluster
            .export_logs(cluster_name, &logs_dir)
            .await
        {
            Ok(()) => StepOutcome::Done,
            Err(e) => {
                warn!(error = %e, "Failed to export cluster logs");
                StepOutcome::Failed(e.to_string())
            }
        };

        let cluster_deleted = match &state.cluster {
            Some(handle) => match self.tools.cluster.delete_cluster(handle).await {
                Ok(()) => {
                    info!(cluster = %handle.name, "Deleted cluster");
                    StepOutcome::Done
                }
                Err(e) => {
                    warn!(error = %e, cluster = %handle.name, "Failed to delete cluster");
                    StepOutcome::Failed(e.to_string())
                }
            },
            None => StepOutcome::Skipped,
        };

        let link_removed = match &state.e2e_link {
            Some(link) => match tokio::fs::remove_file(link).await {
                Ok(()) => StepOutcome::Done,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::Done,
                Err(e) => {
                    warn!(error = %e, link = %link.display(), "Failed to remove e2e.test link");
                    StepOutcome::Failed(e.to_string())
                }
            },
            None => StepOutcome::Skipped,
        };

        // The temp dir is left behind unless explicitly requested; it holds the
        // kubeconfig and staged image context, useful when debugging a failed run.
        let tmp_dir_removed = match (&state.tmp_dir, self.config.cleanup_tmp_dir) {
            (Some(tmp), true) => match tokio::fs::remove_dir_all(tmp).await {
                Ok(()) => StepOutcome::Done,
                Err(e) => {
                    warn!(error = %e, tmp_dir = %tmp.display(), "Failed to remove temp directory");
                    StepOutcome::Failed(e.to_string())
                }
            },
            (Some(tmp), false) => {
                info!(tmp_dir = %tmp.display(), "Leaving temp directory in place");
                StepOutcome::Skipped
            }
            (None, _) => StepOutcome::Skipped,
        };

        let report = CleanupReport {
            logs_exported,
            cluster_deleted,
            link_removed,
            tmp_dir_removed,
        };
        if report.has_failures() {
            warn!(?report, "Cleanup finished with failures");
        } else {
            info!(?report, "Cleanup finished");
        }
        report
    }
}

fn create_tmp_dir() -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("kind-conformance.")
        .tempdir()?;
    // Removal is owned by cleanup, which keeps it unless configured otherwise
    Ok(dir.keep())
}

/// Symlink `target` at `link`, replacing whatever is there.
async fn link_binary(target: &Path, link: &Path) -> std::io::Result<()> {
    if let Some(parent) = link.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(link).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    symlink(target, link).await
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::copy(target, link).await.map(|_| ())
}

/// Copy the image sources (top-level files only) plus the built binaries
/// into a fresh build context directory.
async fn stage_build_context(
    image_dir: &Path,
    binaries: &[PathBuf],
    context: &Path,
) -> std::io::Result<()> {
    if tokio::fs::try_exists(context).await? {
        tokio::fs::remove_dir_all(context).await?;
    }
    tokio::fs::create_dir_all(context).await?;

    let mut entries = tokio::fs::read_dir(image_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), context.join(entry.file_name())).await?;
        }
    }
    for binary in binaries {
        if let Some(name) = binary.file_name() {
            tokio::fs::copy(binary, context.join(name)).await?;
        }
    }
    Ok(())
}

/// Resolves with the name of the first SIGINT or SIGTERM received.
pub async fn shutdown_signal() -> String {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT".to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM".to_string()
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<String>();

    tokio::select! {
        signal = interrupt => signal,
        signal = terminate => signal,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;

    use super::*;
    use crate::error::ToolError;
    use crate::tools::{
        MockBuildSystem, MockClusterQueryTool, MockClusterTool, MockContainerRuntime,
    };

    fn config(artifacts: &Path) -> RunConfig {
        let mut config =
            RunConfig::try_parse_from(["kind-conformance", "--arch", "amd64"]).unwrap();
        config.artifacts = artifacts.to_path_buf();
        config.kube_root = artifacts.join("kube");
        config.cluster_name = "kind".to_string();
        config.node_image = "kindest/node:latest".to_string();
        config.kubeconfig = None;
        config.remote_cache = false;
        config.cleanup_tmp_dir = false;
        config.ready_wait = Duration::from_secs(60);
        config.kind_verbosity = 3;
        config
    }

    fn failed(command: &str, code: i32) -> ToolError {
        ToolError::Failed {
            command: command.to_string(),
            code: Some(code),
            stderr: "boom".to_string(),
        }
    }

    fn toolchain(
        cluster: MockClusterTool,
        build: MockBuildSystem,
        runtime: MockContainerRuntime,
        query: MockClusterQueryTool,
    ) -> Toolchain {
        Toolchain {
            cluster: Arc::new(cluster),
            build: Arc::new(build),
            runtime: Arc::new(runtime),
            query: Arc::new(query),
        }
    }

    fn handle(dir: &Path) -> ClusterHandle {
        ClusterHandle {
            name: "kind".to_string(),
            kubeconfig: dir.join("kubeconfig"),
            kubectl: dir.join("kubectl"),
        }
    }

    #[test]
    fn runner_probe_detects_go_runner_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(RunnerKind::probe(dir.path()), RunnerKind::LegacyRunner);

        std::fs::create_dir(dir.path().join("go-runner")).unwrap();
        assert_eq!(RunnerKind::probe(dir.path()), RunnerKind::GoRunner);
    }

    #[test]
    fn go_runner_adds_build_target_and_binary() {
        let legacy = RunnerKind::LegacyRunner.build_targets();
        assert_eq!(legacy.len(), 3);
        assert!(!legacy.iter().any(|t| t == GO_RUNNER_TARGET));

        let go = RunnerKind::GoRunner.build_targets();
        assert!(go.iter().any(|t| t == GO_RUNNER_TARGET));
        assert!(RunnerKind::GoRunner.binaries().contains(&"go-runner"));
    }

    #[tokio::test]
    async fn ensure_tool_reports_install_hint() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = MockClusterTool::new();
        cluster.expect_version().returning(|| {
            Err(ToolError::Spawn {
                program: "kind".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })
        });
        let controller = Controller::new(
            config(dir.path()),
            toolchain(
                cluster,
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );

        let err = controller.ensure_tool().await.unwrap_err();
        assert!(matches!(err, Error::ToolUnavailable { .. }));
        assert!(err.to_string().contains("kind.sigs.k8s.io"));
    }

    #[tokio::test]
    async fn build_configures_remote_cache_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.remote_cache = true;

        let mut cluster = MockClusterTool::new();
        cluster
            .expect_build_node_image()
            .withf(|_, image, arch| image == "kindest/node:latest" && arch == "arm64")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut build = MockBuildSystem::new();
        build
            .expect_configure_remote_cache()
            .times(1)
            .returning(|| Ok(()));
        build
            .expect_build()
            .withf(|targets| targets == [KUBECTL_TARGET.to_string()])
            .times(1)
            .returning(|_| Ok(()));
        build
            .expect_locate()
            .withf(|binary| binary == "kubectl")
            .returning(|_| Ok(PathBuf::from("/bazel-bin/cmd/kubectl/kubectl")));

        let controller = Controller::new(
            cfg,
            toolchain(
                cluster,
                build,
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );
        let outputs = controller.build(PlatformArch::Arm64).await.unwrap();
        assert_eq!(outputs.kubectl, PathBuf::from("/bazel-bin/cmd/kubectl/kubectl"));
    }

    #[tokio::test]
    async fn build_failure_carries_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = MockClusterTool::new();
        cluster
            .expect_build_node_image()
            .returning(|_, _, _| Err(failed("kind build node-image", 5)));

        let controller = Controller::new(
            config(dir.path()),
            toolchain(
                cluster,
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );
        let err = controller.build(PlatformArch::Amd64).await.unwrap_err();
        assert!(matches!(err, Error::Build { .. }));
        assert_eq!(err.exit_code(), 5);
    }

    #[tokio::test]
    async fn provision_records_cluster_before_create_returns() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = MockClusterTool::new();
        cluster
            .expect_create_cluster()
            .withf(|req| req.retain && req.wait == Duration::from_secs(60) && req.verbosity == 3)
            .returning(|_| Err(failed("kind create cluster", 1)));

        let controller = Controller::new(
            config(dir.path()),
            toolchain(
                cluster,
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );
        let mut state = RunState::default();
        assert!(state.cluster.is_none());

        let outputs = BuildOutputs {
            kubectl: PathBuf::from("kubectl"),
        };
        let err = controller
            .provision(PlatformArch::Amd64, &outputs, &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provision { .. }));

        let recorded = state.cluster.expect("cluster handle recorded eagerly");
        assert_eq!(recorded.name, "kind");
        assert_eq!(recorded.kubectl, PathBuf::from("kubectl"));
        assert!(dir.path().join("kind-config.yaml").is_file());
    }

    #[tokio::test]
    async fn collect_copies_results_from_pod_node() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().to_path_buf();

        let mut query = MockClusterQueryTool::new();
        query
            .expect_pod_node()
            .withf(|_, ns, pod| ns == CONFORMANCE_NAMESPACE && pod == CONFORMANCE_POD)
            .returning(|_, _, _| Ok("kind-worker2".to_string()));
        let mut runtime = MockContainerRuntime::new();
        let expected_dest = artifacts.clone();
        runtime
            .expect_copy_from()
            .withf(move |node, src, dest, strip| {
                node == "kind-worker2" && src == "/tmp/results" && dest == expected_dest && *strip == 2
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let controller = Controller::new(
            config(&artifacts),
            toolchain(MockClusterTool::new(), MockBuildSystem::new(), runtime, query),
        );
        controller.collect_results(&handle(dir.path())).await.unwrap();
    }

    #[tokio::test]
    async fn collect_failure_is_collection_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut query = MockClusterQueryTool::new();
        query
            .expect_pod_node()
            .returning(|_, _, _| Err(ToolError::unexpected_output("kubectl", "pod is not scheduled")));

        let controller = Controller::new(
            config(dir.path()),
            toolchain(
                MockClusterTool::new(),
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                query,
            ),
        );
        let err = controller.collect_results(&handle(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::Collection { .. }));
    }

    #[tokio::test]
    async fn cleanup_swallows_step_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = MockClusterTool::new();
        cluster
            .expect_export_logs()
            .times(1)
            .returning(|_, _| Err(failed("kind export logs", 1)));
        cluster
            .expect_delete_cluster()
            .times(1)
            .returning(|_| Err(failed("kind delete cluster", 1)));

        let controller = Controller::new(
            config(dir.path()),
            toolchain(
                cluster,
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );
        let state = RunState {
            cluster: Some(handle(dir.path())),
            ..Default::default()
        };
        let report = controller.cleanup(&state).await;
        assert!(matches!(report.logs_exported, StepOutcome::Failed(_)));
        assert!(matches!(report.cluster_deleted, StepOutcome::Failed(_)));
        assert_eq!(report.link_removed, StepOutcome::Skipped);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn cleanup_without_cluster_skips_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = MockClusterTool::new();
        cluster
            .expect_export_logs()
            .withf(|name, _| name == "kind")
            .times(1)
            .returning(|_, _| Ok(()));
        cluster.expect_delete_cluster().times(0);

        let controller = Controller::new(
            config(dir.path()),
            toolchain(
                cluster,
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );
        let report = controller.cleanup(&RunState::default()).await;
        assert_eq!(report.logs_exported, StepOutcome::Done);
        assert_eq!(report.cluster_deleted, StepOutcome::Skipped);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn cleanup_keeps_tmp_dir_unless_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join("run-tmp");
        std::fs::create_dir(&tmp).unwrap();

        let mut cluster = MockClusterTool::new();
        cluster.expect_export_logs().returning(|_, _| Ok(()));
        let state = RunState {
            tmp_dir: Some(tmp.clone()),
            ..Default::default()
        };

        let controller = Controller::new(
            config(dir.path()),
            toolchain(
                cluster,
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );
        let report = controller.cleanup(&state).await;
        assert_eq!(report.tmp_dir_removed, StepOutcome::Skipped);
        assert!(tmp.is_dir());

        let mut cluster = MockClusterTool::new();
        cluster.expect_export_logs().returning(|_, _| Ok(()));
        let mut cfg = config(dir.path());
        cfg.cleanup_tmp_dir = true;
        let controller = Controller::new(
            cfg,
            toolchain(
                cluster,
                MockBuildSystem::new(),
                MockContainerRuntime::new(),
                MockClusterQueryTool::new(),
            ),
        );
        let report = controller.cleanup(&state).await;
        assert_eq!(report.tmp_dir_removed, StepOutcome::Done);
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn link_binary_replaces_existing_link() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::write(&first, b"1").unwrap();
        std::fs::write(&second, b"2").unwrap();
        let link = dir.path().join("_output/bin/e2e.test");

        link_binary(&first, &link).await.unwrap();
        link_binary(&second, &link).await.unwrap();
        assert_eq!(std::fs::read(&link).unwrap(), b"2");
    }

    #[tokio::test]
    async fn staged_context_holds_sources_and_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let image_dir = dir.path().join("conformance");
        std::fs::create_dir_all(image_dir.join("go-runner")).unwrap();
        std::fs::write(image_dir.join("Dockerfile"), b"FROM scratch").unwrap();
        let bin = dir.path().join("e2e.test");
        std::fs::write(&bin, b"bin").unwrap();

        let context = dir.path().join("ctx");
        stage_build_context(&image_dir, &[bin], &context).await.unwrap();
        assert!(context.join("Dockerfile").is_file());
        assert!(context.join("e2e.test").is_file());
        assert!(!context.join("go-runner").exists());
    }

    #[test]
    fn exit_code_ignores_cleanup() {
        let failing_cleanup = CleanupReport {
            logs_exported: StepOutcome::Failed("x".to_string()),
            cluster_deleted: StepOutcome::Failed("y".to_string()),
            link_removed: StepOutcome::Skipped,
            tmp_dir_removed: StepOutcome::Skipped,
        };
        let ok = RunOutcome {
            result: Ok(()),
            cleanup: failing_cleanup.clone(),
        };
        assert_eq!(ok.exit_code(), 0);

        let build_failed = RunOutcome {
            result: Err(Error::in_phase(Phase::Build, "bazel", Some(9))),
            cleanup: failing_cleanup,
        };
        assert_eq!(build_failed.exit_code(), 9);
    }
}
