//! kind-conformance - run the Kubernetes conformance suite on a throwaway kind cluster
//!
//! A run builds a node image and the conformance binaries from a Kubernetes
//! source tree, provisions a three-node kind cluster, launches the
//! conformance pod, and copies its results into the artifacts directory.
//! The cluster is always torn down afterwards, including on SIGINT/SIGTERM.
//!
//! # Modules
//!
//! - [`lifecycle`] - Phase sequencing and guaranteed cleanup
//! - [`tools`] - kind, bazel, docker and kubectl collaborators
//! - [`config`] - Command-line and environment configuration
//! - [`platform`] - Host architecture detection
//! - [`topology`] - kind cluster topology document
//! - [`manifest`] - Conformance image reference and manifest rewriting
//! - [`version`] - Image tag derivation from workspace status
//! - [`poll`] - Timeout-bounded polling
//! - [`exec`] - Subprocess helpers
//! - [`error`] - Error types and exit status mapping

pub mod config;
pub mod error;
pub mod exec;
pub mod lifecycle;
pub mod manifest;
pub mod platform;
pub mod poll;
pub mod tools;
pub mod topology;
pub mod version;

pub use error::{Error, Phase};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
