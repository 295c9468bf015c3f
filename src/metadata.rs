use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metric::{
    ApplicationIdentity, ClusterIdentity, ControllerIdentity, ControllerKind, NamespaceIdentity, NodeIdentity,
    PodIdentity,
};
use crate::{DatahubError, Result};

/// Identity filter as carried by requests. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    pub cluster_name: String,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str, cluster_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            cluster_name: cluster_name.to_string(),
        }
    }

    pub fn matches(&self, namespace: &str, name: &str, cluster_name: &str) -> bool {
        (self.namespace.is_empty() || self.namespace == namespace)
            && (self.name.is_empty() || self.name == name)
            && (self.cluster_name.is_empty() || self.cluster_name == cluster_name)
    }
}

/// True when no filter is given or any filter matches.
fn matches_any(filters: &[ObjectMeta], namespace: &str, name: &str, cluster_name: &str) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(namespace, name, cluster_name))
}

/// Source of resource identities. An empty filter list means all resources of the kind.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataDao: Send + Sync {
    async fn list_nodes(&self, filters: &[ObjectMeta]) -> Result<Vec<NodeIdentity>>;

    async fn list_pods(&self, filters: &[ObjectMeta]) -> Result<Vec<PodIdentity>>;

    async fn list_namespaces(&self, filters: &[ObjectMeta]) -> Result<Vec<NamespaceIdentity>>;

    async fn list_controllers(
        &self,
        filters: &[ObjectMeta],
        kind: Option<ControllerKind>,
    ) -> Result<Vec<ControllerIdentity>>;

    async fn list_clusters(&self, filters: &[ObjectMeta]) -> Result<Vec<ClusterIdentity>>;

    async fn list_applications(&self, filters: &[ObjectMeta]) -> Result<Vec<ApplicationIdentity>>;

    async fn list_pods_by_application(&self, app: &ApplicationIdentity) -> Result<Vec<PodIdentity>>;

    async fn list_nodes_by_cluster(&self, cluster: &ClusterIdentity) -> Result<Vec<NodeIdentity>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRecord {
    #[serde(flatten)]
    pub identity: PodIdentity,
    /// Application the pod belongs to, if any.
    #[serde(default)]
    pub app_name: String,
}

/// Snapshot of the cluster inventory, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub nodes: Vec<NodeIdentity>,
    pub pods: Vec<PodRecord>,
    pub namespaces: Vec<NamespaceIdentity>,
    pub controllers: Vec<ControllerIdentity>,
    pub clusters: Vec<ClusterIdentity>,
    pub applications: Vec<ApplicationIdentity>,
}

/// Metadata DAO over an inventory loaded once at startup.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    inventory: Inventory,
}

impl InMemoryMetadata {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DatahubError::Metadata(format!("read {}: {}", path.display(), e)))?;
        let inventory = serde_json::from_str(&text)
            .map_err(|e| DatahubError::Metadata(format!("parse {}: {}", path.display(), e)))?;
        Ok(Self::new(inventory))
    }
}

#[async_trait]
impl MetadataDao for InMemoryMetadata {
    async fn list_nodes(&self, filters: &[ObjectMeta]) -> Result<Vec<NodeIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .nodes
            .iter()
            .filter(|n| matches_any(filters, "", &n.name, &n.cluster))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, filters: &[ObjectMeta]) -> Result<Vec<PodIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .pods
            .iter()
            .map(|p| &p.identity)
            .filter(|p| matches_any(filters, &p.namespace, &p.name, &p.cluster))
            .cloned()
            .collect())
    }

    async fn list_namespaces(&self, filters: &[ObjectMeta]) -> Result<Vec<NamespaceIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .namespaces
            .iter()
            .filter(|n| matches_any(filters, "", &n.name, &n.cluster))
            .cloned()
            .collect())
    }

    async fn list_controllers(
        &self,
        filters: &[ObjectMeta],
        kind: Option<ControllerKind>,
    ) -> Result<Vec<ControllerIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .controllers
            .iter()
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .filter(|c| matches_any(filters, &c.namespace, &c.name, &c.cluster))
            .cloned()
            .collect())
    }

    async fn list_clusters(&self, filters: &[ObjectMeta]) -> Result<Vec<ClusterIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .clusters
            .iter()
            .filter(|c| matches_any(filters, "", &c.name, &c.name))
            .cloned()
            .collect())
    }

    async fn list_applications(&self, filters: &[ObjectMeta]) -> Result<Vec<ApplicationIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .applications
            .iter()
            .filter(|a| matches_any(filters, &a.namespace, &a.name, &a.cluster))
            .cloned()
            .collect())
    }

    async fn list_pods_by_application(&self, app: &ApplicationIdentity) -> Result<Vec<PodIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .pods
            .iter()
            .filter(|p| {
                p.app_name == app.name && p.identity.namespace == app.namespace && p.identity.cluster == app.cluster
            })
            .map(|p| p.identity.clone())
            .collect())
    }

    async fn list_nodes_by_cluster(&self, cluster: &ClusterIdentity) -> Result<Vec<NodeIdentity>> {
        let inventory = &self.inventory;
        Ok(inventory
            .nodes
            .iter()
            .filter(|n| n.cluster == cluster.name)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        serde_json::from_value(serde_json::json!({
            "nodes": [
                {"name": "n1", "cluster_name": "A"},
                {"name": "n2", "cluster_name": "B"}
            ],
            "pods": [
                {"namespace": "ns", "name": "web-1", "cluster_name": "A", "app_name": "web"},
                {"namespace": "ns", "name": "db-0", "cluster_name": "A"},
                {"namespace": "ns", "name": "web-1", "cluster_name": "B", "app_name": "web"}
            ],
            "controllers": [
                {"namespace": "ns", "name": "web", "kind": "Deployment", "cluster_name": "A"},
                {"namespace": "ns", "name": "db", "kind": "StatefulSet", "cluster_name": "A"}
            ],
            "clusters": [{"name": "A"}, {"name": "B"}],
            "applications": [{"namespace": "ns", "name": "web", "cluster_name": "A"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_filter_lists_all() {
        let dao = InMemoryMetadata::new(inventory());
        assert_eq!(dao.list_nodes(&[]).await.unwrap().len(), 2);
        assert_eq!(dao.list_pods(&[]).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_fields_are_wildcards() {
        let dao = InMemoryMetadata::new(inventory());

        let pods = dao.list_pods(&[ObjectMeta::new("ns", "web-1", "")]).await.unwrap();
        assert_eq!(pods.len(), 2);

        let pods = dao.list_pods(&[ObjectMeta::new("", "", "A")]).await.unwrap();
        assert_eq!(pods.len(), 2);

        let nodes = dao
            .list_nodes(&[ObjectMeta::new("", "n1", ""), ObjectMeta::new("", "n3", "")])
            .await
            .unwrap();
        assert_eq!(nodes, vec![NodeIdentity::new("n1", "A")]);
    }

    #[tokio::test]
    async fn test_controller_kind_filter() {
        let dao = InMemoryMetadata::new(inventory());
        let controllers = dao.list_controllers(&[], Some(ControllerKind::StatefulSet)).await.unwrap();
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].name, "db");
    }

    #[tokio::test]
    async fn test_relations() {
        let dao = InMemoryMetadata::new(inventory());

        let pods = dao
            .list_pods_by_application(&ApplicationIdentity::new("ns", "web", "A"))
            .await
            .unwrap();
        assert_eq!(pods, vec![PodIdentity::new("ns", "web-1", "A")]);

        let nodes = dao.list_nodes_by_cluster(&ClusterIdentity::new("B")).await.unwrap();
        assert_eq!(nodes, vec![NodeIdentity::new("n2", "B")]);
    }

    #[tokio::test]
    async fn test_from_file() {
        let path = std::env::temp_dir().join(format!("datahub-inventory-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&inventory()).unwrap()).unwrap();
        let dao = InMemoryMetadata::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(dao.list_clusters(&[ObjectMeta::new("", "A", "")]).await.unwrap().len(), 1);
        assert!(InMemoryMetadata::default().list_clusters(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_inventory() {
        let err = InMemoryMetadata::from_file("/nonexistent/inventory.json").unwrap_err();
        assert!(matches!(err, DatahubError::Metadata(_)));
    }
}
