//! Cluster topology descriptor handed to `kind create cluster --config`
//!
//! The shape is fixed: one control-plane node and two workers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// File name of the descriptor inside the artifacts directory
pub const TOPOLOGY_FILE_NAME: &str = "kind-config.yaml";

const KIND_API_VERSION: &str = "kind.x-k8s.io/v1alpha4";

/// Number of worker nodes in every cluster
pub const WORKER_COUNT: usize = 2;

/// Role of a kind node container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

/// A single node entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindNode {
    pub role: NodeRole,
}

/// kind `Cluster` configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindConfig {
    pub kind: String,
    pub api_version: String,
    pub nodes: Vec<KindNode>,
}

impl KindConfig {
    /// The conformance topology: 1 control-plane + [`WORKER_COUNT`] workers
    pub fn conformance() -> Self {
        let mut nodes = vec![KindNode {
            role: NodeRole::ControlPlane,
        }];
        nodes.extend((0..WORKER_COUNT).map(|_| KindNode {
            role: NodeRole::Worker,
        }));

        Self {
            kind: "Cluster".to_string(),
            api_version: KIND_API_VERSION.to_string(),
            nodes,
        }
    }

    pub fn count(&self, role: NodeRole) -> usize {
        self.nodes.iter().filter(|n| n.role == role).count()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| crate::Error::config(format!("failed to render topology: {e}")))
    }
}

/// Write the conformance topology into `dir`, returning the file path.
pub fn write_topology(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(TOPOLOGY_FILE_NAME);
    std::fs::write(&path, KindConfig::conformance().to_yaml()?)?;
    Ok(path)
}
