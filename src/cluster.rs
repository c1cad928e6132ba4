//! Clustering strategy resolution and the cluster pool handles handed to
//! the rendering surface.
//!
//! The shared pool is created lazily by a separate subsystem and installed
//! here when it exists. Resolution therefore tolerates "pool not yet
//! created" without error: the resolver returns its decision immediately
//! and the single-layer loader owns the retry-then-fallback step.

use crate::models::{
    ClusterStrategy, ClusteringDecision, DEFAULT_DISABLE_CLUSTERING_AT_ZOOM,
    DEFAULT_MAX_CLUSTER_RADIUS, GeometryKind, LayerDescriptor,
};
use dashmap::DashMap;
use log::debug;
use std::sync::{Arc, Mutex, RwLock};

/// Opaque grouping handle. "Shared" pools merge markers across layers,
/// independent pools merge only within one layer.
#[derive(Debug)]
pub struct ClusterPool {
    pub id: String,
    pub max_cluster_radius: u32,
    pub disable_clustering_at_zoom: u32,
    members: Mutex<Vec<String>>,
}

impl ClusterPool {
    pub fn new(id: impl Into<String>, max_cluster_radius: u32, disable_clustering_at_zoom: u32) -> Self {
        ClusterPool {
            id: id.into(),
            max_cluster_radius,
            disable_clustering_at_zoom,
            members: Mutex::new(Vec::new()),
        }
    }

    /// Idempotent: re-adding a member layer is a no-op.
    pub fn add_member(&self, layer_id: &str) {
        let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        if !members.iter().any(|m| m == layer_id) {
            members.push(layer_id.to_string());
        }
    }

    pub fn members(&self) -> Vec<String> {
        self.members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Holder for the one shared pool slot plus per-layer independent pools.
#[derive(Debug, Default)]
pub struct ClusterPools {
    shared: RwLock<Option<Arc<ClusterPool>>>,
    independent: DashMap<String, Arc<ClusterPool>>,
}

impl ClusterPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the host subsystem once the shared pool exists. First
    /// writer wins; later installs replace the handle only if none is set.
    pub fn install_shared(&self, pool: Arc<ClusterPool>) {
        let mut slot = self.shared.write().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            debug!("shared cluster pool {} installed", pool.id);
            *slot = Some(pool);
        }
    }

    pub fn shared(&self) -> Option<Arc<ClusterPool>> {
        self.shared
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the shared pool handle, e.g. when the owning profile unloads.
    pub fn clear_shared(&self) {
        *self.shared.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Get or create the independent pool for one layer.
    pub fn independent_for(
        &self,
        layer_id: &str,
        max_cluster_radius: u32,
        disable_clustering_at_zoom: u32,
    ) -> Arc<ClusterPool> {
        let pool = self
            .independent
            .entry(layer_id.to_string())
            .or_insert_with(|| {
                Arc::new(ClusterPool::new(
                    format!("cluster-{layer_id}"),
                    max_cluster_radius,
                    disable_clustering_at_zoom,
                ))
            })
            .clone();
        pool.add_member(layer_id);
        pool
    }

    pub fn remove_independent(&self, layer_id: &str) {
        self.independent.remove(layer_id);
    }
}

/// Per-layer clustering decision, evaluated in declaration order:
/// explicit opt-out, then geometry gate, then strategy.
pub fn clustering_strategy(
    descriptor: &LayerDescriptor,
    dominant_geometry: GeometryKind,
) -> ClusteringDecision {
    if let Some(config) = &descriptor.clustering {
        if !config.enabled {
            return ClusteringDecision {
                should_cluster: false,
                use_shared_cluster: false,
            };
        }
    }

    // Only point-dominant layers cluster; lines and polygons never do.
    if dominant_geometry != GeometryKind::Point {
        return ClusteringDecision {
            should_cluster: false,
            use_shared_cluster: false,
        };
    }

    let strategy = descriptor
        .clustering
        .as_ref()
        .and_then(|c| c.strategy)
        .unwrap_or(ClusterStrategy::Shared);

    ClusteringDecision {
        should_cluster: true,
        use_shared_cluster: strategy == ClusterStrategy::Shared,
    }
}

/// Pool sizing for a by-source layer, falling back to 80/18 defaults.
pub fn independent_pool_params(descriptor: &LayerDescriptor) -> (u32, u32) {
    match &descriptor.clustering {
        Some(config) => (config.radius(), config.disable_at_zoom()),
        None => (
            DEFAULT_MAX_CLUSTER_RADIUS,
            DEFAULT_DISABLE_CLUSTERING_AT_ZOOM,
        ),
    }
}
