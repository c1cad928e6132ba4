//! The layer state registry: single source of truth for every UI surface.
//!
//! Single-writer discipline: only the single-layer loader creates or
//! replaces entries (the crate-private `insert`/`update`). UI collaborators
//! get read access plus two narrow mutators, `set_visible` and `set_style`,
//! so cluster membership and z-order state can never be lost to a whole-
//! record overwrite from the outside.

use crate::models::{LayerRuntimeRecord, LayerSummary};
use crate::style::StyleRecord;
use ahash::AHashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct LayerRegistry {
    // Guard is never held across an await point.
    entries: RwLock<AHashMap<String, LayerRuntimeRecord>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, record: LayerRuntimeRecord) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record);
    }

    /// Loader-internal in-place mutation (cluster resolution, style
    /// attachment). Returns false when the layer is gone.
    pub(crate) fn update<F>(&self, layer_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut LayerRuntimeRecord),
    {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(layer_id) {
            Some(record) => {
                mutate(record);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, layer_id: &str) -> Option<LayerRuntimeRecord> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(layer_id)
            .cloned()
    }

    pub fn contains(&self, layer_id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(layer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_visible(&self, layer_id: &str, visible: bool) -> bool {
        self.update(layer_id, |record| record.visible = visible)
    }

    pub fn set_style(&self, layer_id: &str, style: Arc<StyleRecord>) -> bool {
        self.update(layer_id, |record| record.current_style = Some(style))
    }

    pub fn for_each(&self, mut f: impl FnMut(&LayerRuntimeRecord)) {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        for record in entries.values() {
            f(record);
        }
    }

    pub fn remove(&self, layer_id: &str) -> Option<LayerRuntimeRecord> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(layer_id)
    }

    /// Drops every entry; used when the owning profile unloads.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Read-only snapshots for UI collaborators, top-most layer first.
    pub fn summaries(&self) -> Vec<LayerSummary> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut summaries: Vec<LayerSummary> = entries
            .values()
            .map(|record| LayerSummary {
                id: record.id.clone(),
                label: record.label.clone(),
                visible: record.visible,
                z_index: record.z_index,
                geometry_type: record.geometry_type,
                feature_count: record.features.len(),
                style_id: record
                    .current_style
                    .as_ref()
                    .map(|s| s.metadata.style_id.clone()),
                has_integrated_labels: record
                    .current_style
                    .as_ref()
                    .map(|s| s.metadata.has_integrated_labels)
                    .unwrap_or(false),
            })
            .collect();
        summaries.sort_by(|a, b| b.z_index.cmp(&a.z_index).then_with(|| a.id.cmp(&b.id)));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeometryKind, LayerDescriptor};
    use serde_json::json;

    fn record(id: &str, z_index: i32) -> LayerRuntimeRecord {
        let config: LayerDescriptor =
            serde_json::from_value(json!({"id": id, "url": "x.geojson"})).unwrap();
        LayerRuntimeRecord {
            id: id.to_string(),
            label: id.to_string(),
            config,
            features: Vec::new(),
            geometry_type: GeometryKind::Point,
            visible: true,
            current_style: None,
            cluster_group: None,
            use_shared_cluster: false,
            pending_shared_cluster: false,
            z_index,
        }
    }

    #[test]
    fn visibility_toggle_preserves_the_rest_of_the_record() {
        let registry = LayerRegistry::new();
        let mut r = record("huts", 42);
        r.use_shared_cluster = true;
        registry.insert(r);

        assert!(registry.set_visible("huts", false));
        let after = registry.get("huts").unwrap();
        assert!(!after.visible);
        assert_eq!(after.z_index, 42);
        assert!(after.use_shared_cluster);
    }

    #[test]
    fn mutators_report_missing_layers() {
        let registry = LayerRegistry::new();
        assert!(!registry.set_visible("ghost", true));
    }

    #[test]
    fn summaries_are_ordered_top_most_first() {
        let registry = LayerRegistry::new();
        registry.insert(record("bottom", 10));
        registry.insert(record("top", 90));
        registry.insert(record("middle", 50));

        let ids: Vec<String> = registry.summaries().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["top", "middle", "bottom"]);
    }

    #[test]
    fn clear_removes_all_entries() {
        let registry = LayerRegistry::new();
        registry.insert(record("a", 1));
        registry.insert(record("b", 2));
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get("a").is_none());
    }
}
