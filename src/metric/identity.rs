use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Key of one monitored resource. Equality is structural and the cluster tag
/// is part of the key.
pub trait Identity:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Serialize + Send + Sync + 'static
{
    fn cluster(&self) -> &str;
}

/// Drops every identity that belongs to another cluster.
pub fn retain_tenant<K: Identity>(mut ids: Vec<K>, cluster_uid: &str) -> Vec<K> {
    ids.retain(|id| id.cluster() == cluster_uid);
    ids
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub name: String,
    #[serde(rename = "cluster_name")]
    pub cluster: String,
}

impl NodeIdentity {
    pub fn new(name: &str, cluster: &str) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.to_string(),
        }
    }
}

impl Identity for NodeIdentity {
    fn cluster(&self) -> &str {
        &self.cluster
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "cluster_name")]
    pub cluster: String,
}

impl PodIdentity {
    pub fn new(namespace: &str, name: &str, cluster: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            cluster: cluster.to_string(),
        }
    }
}

impl Identity for PodIdentity {
    fn cluster(&self) -> &str {
        &self.cluster
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub pod: PodIdentity,
    pub name: String,
}

impl Identity for ContainerIdentity {
    fn cluster(&self) -> &str {
        &self.pod.cluster
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespaceIdentity {
    pub name: String,
    #[serde(rename = "cluster_name")]
    pub cluster: String,
}

impl NamespaceIdentity {
    pub fn new(name: &str, cluster: &str) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.to_string(),
        }
    }
}

impl Identity for NamespaceIdentity {
    fn cluster(&self) -> &str {
        &self.cluster
    }
}

impl fmt::Display for NamespaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    Deployment,
    StatefulSet,
    DeploymentConfig,
}

impl ControllerKind {
    /// Pattern matching the names of pods owned by a controller called `name`.
    pub fn pod_name_pattern(&self, name: &str) -> String {
        let name = regex::escape(name);
        match self {
            ControllerKind::Deployment => format!("{}-[a-z0-9]+-[a-z0-9]+", name),
            ControllerKind::StatefulSet => format!("{}-[0-9]+", name),
            ControllerKind::DeploymentConfig => format!("{}-[0-9]+-[a-z0-9]+", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ControllerIdentity {
    pub namespace: String,
    pub name: String,
    pub kind: ControllerKind,
    #[serde(rename = "cluster_name")]
    pub cluster: String,
}

impl ControllerIdentity {
    pub fn new(namespace: &str, name: &str, kind: ControllerKind, cluster: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
            cluster: cluster.to_string(),
        }
    }
}

impl Identity for ControllerIdentity {
    fn cluster(&self) -> &str {
        &self.cluster
    }
}

impl fmt::Display for ControllerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}/{}", self.namespace, self.kind, self.name)
    }
}

/// A cluster is its own tenant tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub name: String,
}

impl ClusterIdentity {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl Identity for ClusterIdentity {
    fn cluster(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "cluster_name")]
    pub cluster: String,
}

impl ApplicationIdentity {
    pub fn new(namespace: &str, name: &str, cluster: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            cluster: cluster.to_string(),
        }
    }
}

impl Identity for ApplicationIdentity {
    fn cluster(&self) -> &str {
        &self.cluster
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
