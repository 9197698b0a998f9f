//! Supervised pool of tool clients.
//!
//! The pool is a fixed map from the closed tool-name vocabulary to clients;
//! membership is decided once at startup from configuration. It imposes no
//! global concurrency limit of its own - throttling belongs to the rate
//! limiter upstream.

use super::client::{ClientStatus, ToolCallError, ToolClient, ToolClientConfig};
use crate::models::ToolName;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// The client pool. Built once by the composition root.
pub struct ToolPool {
    clients: BTreeMap<ToolName, ToolClient>,
}

impl ToolPool {
    /// Build a pool from per-client configs. Tools without configuration are
    /// simply absent; the classifier projects required tools onto membership.
    pub fn new(configs: Vec<ToolClientConfig>) -> Self {
        let clients = configs
            .into_iter()
            .map(|config| (config.name, ToolClient::new(config)))
            .collect();
        Self { clients }
    }

    /// Connect every client in parallel. Individual failures are tolerated:
    /// a failed client keeps its recorded cause and reconnects on its own
    /// schedule.
    #[instrument(skip_all, name = "mg.tools.connect_all")]
    pub async fn connect_all(&self) {
        let results = join_all(self.clients.values().map(|client| async move {
            (client.name(), client.connect().await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(()) => info!(target: "mg.tools", client = %name, "connected"),
                Err(e) => {
                    warn!(target: "mg.tools", client = %name, error = %e, "initial connect failed");
                }
            }
        }
    }

    /// Whether `name` is a pool member (regardless of connection state).
    pub fn contains(&self, name: ToolName) -> bool {
        self.clients.contains_key(&name)
    }

    /// The membership set, used to project required tools onto the pool.
    pub fn membership(&self) -> BTreeSet<ToolName> {
        self.clients.keys().copied().collect()
    }

    /// Issue a call on the named client.
    pub async fn call(
        &self,
        name: ToolName,
        method: &str,
        params: Value,
        deadline: Instant,
    ) -> Result<Value, ToolCallError> {
        match self.clients.get(&name) {
            Some(client) => client.call(method, params, deadline).await,
            None => Err(ToolCallError::Unavailable(format!(
                "no {name} client configured"
            ))),
        }
    }

    /// Connection state per member.
    pub fn status_map(&self) -> BTreeMap<ToolName, ClientStatus> {
        self.clients
            .iter()
            .map(|(name, client)| (*name, client.status()))
            .collect()
    }

    /// Recorded failure causes per member.
    pub fn error_map(&self) -> BTreeMap<ToolName, String> {
        self.clients
            .iter()
            .filter_map(|(name, client)| client.last_error().map(|cause| (*name, cause)))
            .collect()
    }

    /// Sorted union of method names advertised by currently-connected
    /// clients.
    pub fn capabilities(&self) -> Vec<String> {
        let mut union = BTreeSet::new();
        for client in self.clients.values() {
            if client.status() == ClientStatus::Connected {
                union.extend(client.advertised_tools());
            }
        }
        union.into_iter().collect()
    }

    /// Number of connected members.
    pub fn connected_count(&self) -> usize {
        self.clients
            .values()
            .filter(|client| client.status() == ClientStatus::Connected)
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Close every client with the graceful shutdown protocol.
    #[instrument(skip_all, name = "mg.tools.close_all")]
    pub async fn close_all(&self) {
        join_all(self.clients.values().map(ToolClient::close)).await;
        info!(target: "mg.tools", "tool pool closed");
    }

    /// Access one client (tests and the detailed health endpoint).
    pub fn client(&self, name: ToolName) -> Option<&ToolClient> {
        self.clients.get(&name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn stream_pool(names: &[ToolName]) -> ToolPool {
        ToolPool::new(
            names
                .iter()
                .map(|name| ToolClientConfig::new(*name, Vec::new()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let pool = stream_pool(&[]);
        assert!(pool.is_empty());
        assert!(pool.capabilities().is_empty());
        assert_eq!(pool.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_membership() {
        let pool = stream_pool(&[ToolName::LiteratureIndex, ToolName::KnowledgeBase]);
        assert!(pool.contains(ToolName::LiteratureIndex));
        assert!(pool.contains(ToolName::KnowledgeBase));
        assert!(!pool.contains(ToolName::Imaging));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_call_on_unconfigured_tool() {
        let pool = stream_pool(&[ToolName::Citations]);
        let error = pool
            .call(
                ToolName::Imaging,
                "analyzeImage",
                json!({}),
                Instant::now() + Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, ToolCallError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_status_map_reports_disconnected_members() {
        let pool = stream_pool(&[ToolName::Citations, ToolName::ClinicalTrials]);
        let statuses = pool.status_map();
        assert_eq!(statuses[&ToolName::Citations], ClientStatus::Disconnected);
        assert_eq!(
            statuses[&ToolName::ClinicalTrials],
            ClientStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_capabilities_exclude_unconnected() {
        // Members exist but none is connected, so the union is empty.
        let pool = stream_pool(&[ToolName::Citations]);
        assert!(pool.capabilities().is_empty());
    }
}
