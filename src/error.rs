//! Error types for the conformance run
//!
//! Every primary phase has exactly one error variant. Phase errors carry the
//! message and, when an external tool caused the failure, the tool's exit code
//! so the process can exit with the same status.

use std::fmt;

use thiserror::Error;

/// Exit code for an unrecognized host platform
pub const EXIT_UNSUPPORTED_PLATFORM: i32 = 2;

/// Exit code when the run was interrupted by a signal
pub const EXIT_INTERRUPTED: i32 = 130;

/// Primary phases of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    DetectPlatform,
    EnsureTool,
    Build,
    Provision,
    RunTests,
    CollectResults,
}

impl Phase {
    /// Human-readable phase name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::DetectPlatform => "detect-platform",
            Phase::EnsureTool => "ensure-tool",
            Phase::Build => "build",
            Phase::Provision => "provision",
            Phase::RunTests => "run-tests",
            Phase::CollectResults => "collect-results",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an external collaborator (kind, bazel, docker, kubectl)
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully
    #[error("`{command}` failed with exit code {}: {stderr}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Failed {
        /// Full command line that was run
        command: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error (trimmed)
        stderr: String,
    },

    /// The program succeeded but its output was not usable
    #[error("unexpected output from {program}: {message}")]
    UnexpectedOutput {
        /// Program whose output was rejected
        program: String,
        /// What was wrong with it
        message: String,
    },

    /// Local filesystem work around a tool invocation failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Exit code of the failing tool, when it exited normally with one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::Failed { code, .. } => *code,
            _ => None,
        }
    }

    pub fn unexpected_output(program: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::UnexpectedOutput {
            program: program.into(),
            message: message.into(),
        }
    }
}

/// Result type for collaborator calls
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Main error type for a conformance run
#[derive(Debug, Error)]
pub enum Error {
    /// The host machine identifier (or override) is not a supported architecture
    #[error("[{}] unsupported platform: {machine}", Phase::DetectPlatform)]
    UnsupportedPlatform {
        /// The machine identifier that could not be mapped
        machine: String,
    },

    /// The cluster tool is missing or not usable
    #[error("[{}] {tool} is not available: {message}", Phase::EnsureTool)]
    ToolUnavailable {
        /// Tool that was probed
        tool: String,
        /// Probe failure plus installation hint
        message: String,
        /// Exit code of the probe, if it ran
        exit_code: Option<i32>,
    },

    /// Building node images or binaries failed
    #[error("[{}] build failed: {message}", Phase::Build)]
    Build {
        message: String,
        exit_code: Option<i32>,
    },

    /// Creating the cluster failed
    #[error("[{}] provision failed: {message}", Phase::Provision)]
    Provision {
        message: String,
        exit_code: Option<i32>,
    },

    /// Building, loading or launching the conformance suite failed
    #[error("[{}] test execution failed: {message}", Phase::RunTests)]
    TestExecution {
        message: String,
        exit_code: Option<i32>,
    },

    /// Extracting results from the cluster failed
    #[error("[{}] result collection failed: {message}", Phase::CollectResults)]
    Collection {
        message: String,
        exit_code: Option<i32>,
    },

    /// The run was stopped by a signal before the primary phases finished
    #[error("interrupted by {signal}")]
    Interrupted {
        /// Name of the received signal
        signal: String,
    },

    /// Startup failure outside any phase (artifacts directory, temp directory)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build the error variant belonging to `phase`.
    ///
    /// Platform detection has no tool output to wrap, so for
    /// [`Phase::DetectPlatform`] `message` must be the rejected machine
    /// identifier; it becomes [`Error::UnsupportedPlatform`]'s `machine`.
    pub fn in_phase(phase: Phase, message: impl Into<String>, exit_code: Option<i32>) -> Self {
        let message = message.into();
        match phase {
            Phase::DetectPlatform => Error::UnsupportedPlatform { machine: message },
            Phase::EnsureTool => Error::ToolUnavailable {
                tool: "kind".to_string(),
                message,
                exit_code,
            },
            Phase::Build => Error::Build { message, exit_code },
            Phase::Provision => Error::Provision { message, exit_code },
            Phase::RunTests => Error::TestExecution { message, exit_code },
            Phase::CollectResults => Error::Collection { message, exit_code },
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Phase this error belongs to, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::UnsupportedPlatform { .. } => Some(Phase::DetectPlatform),
            Error::ToolUnavailable { .. } => Some(Phase::EnsureTool),
            Error::Build { .. } => Some(Phase::Build),
            Error::Provision { .. } => Some(Phase::Provision),
            Error::TestExecution { .. } => Some(Phase::RunTests),
            Error::Collection { .. } => Some(Phase::CollectResults),
            Error::Interrupted { .. } | Error::Io(_) | Error::Config(_) => None,
        }
    }

    /// Process exit status for this error.
    ///
    /// Phase errors reuse the failing tool's exit code when it is known and
    /// non-zero; everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        let tool_code = match self {
            Error::UnsupportedPlatform { .. } => return EXIT_UNSUPPORTED_PLATFORM,
            Error::Interrupted { .. } => return EXIT_INTERRUPTED,
            Error::ToolUnavailable { exit_code, .. }
            | Error::Build { exit_code, .. }
            | Error::Provision { exit_code, .. }
            | Error::TestExecution { exit_code, .. }
            | Error::Collection { exit_code, .. } => *exit_code,
            Error::Io(_) | Error::Config(_) => None,
        };
        match tool_code {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}

/// Extension trait lifting collaborator failures into the current phase's error.
pub trait PhaseErrorExt<T> {
    /// Convert a [`ToolError`] into the [`Error`] variant for `phase`.
    fn in_phase(self, phase: Phase) -> Result<T, Error>;
}

impl<T> PhaseErrorExt<T> for ToolResult<T> {
    fn in_phase(self, phase: Phase) -> Result<T, Error> {
        self.map_err(|e| {
            let code = e.exit_code();
            Error::in_phase(phase, e.to_string(), code)
        })
    }
}
