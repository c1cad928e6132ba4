//! Single-layer load pipeline: fetch, convert, validate, z-order, cluster
//! assignment, registration, then style resolution.
//!
//! Failures stay contained to the one layer; the caller gets a
//! [`LoadResult`] either way and the batch keeps going.

use crate::batch::PipelineOptions;
use crate::cluster::{self, ClusterPools};
use crate::convert;
use crate::errors::LayerLoadError;
use crate::events::{EventBus, LayerEvent};
use crate::fetch::{PayloadSource, layer_data_url};
use crate::models::{
    LayerDescriptor, LayerRuntimeRecord, LoadOutcome, LoadResult, Severity, SourceKind,
    dominant_geometry,
};
use crate::normalize;
use crate::registry::LayerRegistry;
use crate::style::{StyleCache, StyleRequest};
use crate::validate;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const MIN_Z_INDEX: i32 = 0;
pub const MAX_Z_INDEX: i32 = 99;

/// One re-check of the shared pool slot happens this long after a layer
/// registered provisionally; after that the fallback is permanent.
pub const SHARED_CLUSTER_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadPhase {
    Fetching,
    Converting,
    Validating,
    ClusterAssigning,
    StyleLoading,
    Registered,
}

fn enter(layer_id: &str, phase: LoadPhase) {
    debug!("layer {layer_id}: entering {phase:?}");
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn load_single_layer<S: PayloadSource>(
    source: &S,
    registry: &Arc<LayerRegistry>,
    pools: &Arc<ClusterPools>,
    styles: &StyleCache,
    events: &EventBus,
    options: &PipelineOptions,
    descriptor: &LayerDescriptor,
    cached_payload: Option<&Value>,
) -> LoadResult {
    let layer_id = descriptor.id.clone();
    match run_pipeline(
        source,
        registry,
        pools,
        styles,
        events,
        options,
        descriptor,
        cached_payload,
    )
    .await
    {
        Ok(outcome) => LoadResult {
            layer_id,
            outcome,
        },
        Err(error) => {
            warn!("layer {layer_id}: load failed, skipping layer: {error}");
            LoadResult {
                layer_id,
                outcome: LoadOutcome::Failed { error },
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline<S: PayloadSource>(
    source: &S,
    registry: &Arc<LayerRegistry>,
    pools: &Arc<ClusterPools>,
    styles: &StyleCache,
    events: &EventBus,
    options: &PipelineOptions,
    descriptor: &LayerDescriptor,
    cached_payload: Option<&Value>,
) -> Result<LoadOutcome, LayerLoadError> {
    let layer_id = &descriptor.id;

    enter(layer_id, LoadPhase::Fetching);
    let payload: Value = match cached_payload {
        Some(payload) => payload.clone(),
        None => {
            let url = layer_data_url(&options.profiles_base_path, &options.profile_id, descriptor)?;
            let body = source.fetch_text(&url).await?;
            serde_json::from_str(&body).map_err(|e| LayerLoadError::parse(&url, e))?
        }
    };

    enter(layer_id, LoadPhase::Converting);
    let collection = convert::to_feature_collection(&payload, layer_id, &options.normalize)?;
    let total_features = collection
        .get("features")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    enter(layer_id, LoadPhase::Validating);
    let validation = validate::validate_collection(&collection);
    for issue in &validation.issues {
        match issue.severity {
            Severity::Error => warn!(
                "layer {layer_id}: feature {} rejected, field {}: {}",
                issue.feature_id, issue.field, issue.message
            ),
            Severity::Warning => debug!(
                "layer {layer_id}: feature {} field {}: {}",
                issue.feature_id, issue.field, issue.message
            ),
        }
    }
    let dropped_features = total_features.saturating_sub(validation.valid_features.len());

    // Everything that survives validation is feature-shaped, so normalize
    // as GeoJSON and re-stamp the provenance tag left by the converter.
    let features: Vec<_> = validation
        .valid_features
        .iter()
        .filter_map(|feature| {
            let value = serde_json::to_value(feature).ok()?;
            let kind = convert::source_kind_of_feature(&value);
            let mut poi =
                normalize::normalize_record(Some(SourceKind::GeoJson), &value, &options.normalize)?;
            poi.source_type = kind;
            Some(poi)
        })
        .collect();
    let geometry_type = dominant_geometry(&features);

    let z_index = resolve_z_index(descriptor, registry);

    enter(layer_id, LoadPhase::ClusterAssigning);
    let decision = cluster::clustering_strategy(descriptor, geometry_type);
    let (cluster_group, pending_shared_cluster) = if decision.should_cluster {
        if decision.use_shared_cluster {
            match pools.shared() {
                Some(pool) => {
                    pool.add_member(layer_id);
                    (Some(pool), false)
                }
                // Pool not created yet: register provisionally and let the
                // scheduled re-check resolve or fall back.
                None => (None, true),
            }
        } else {
            let (radius, zoom) = cluster::independent_pool_params(descriptor);
            (Some(pools.independent_for(layer_id, radius, zoom)), false)
        }
    } else {
        (None, false)
    };

    // Visibility survives a reload; everything else is rebuilt.
    let visible = registry.get(layer_id).map(|r| r.visible).unwrap_or(true);

    let feature_count = features.len();
    registry.insert(LayerRuntimeRecord {
        id: layer_id.clone(),
        label: descriptor.display_label().to_string(),
        config: descriptor.clone(),
        features,
        geometry_type,
        visible,
        current_style: None,
        cluster_group,
        use_shared_cluster: decision.use_shared_cluster,
        pending_shared_cluster,
        z_index,
    });

    enter(layer_id, LoadPhase::Registered);
    info!(
        "layer {layer_id}: registered with {feature_count} features ({dropped_features} dropped, z {z_index})"
    );
    events.emit(LayerEvent::LayerRegistered {
        layer_id: layer_id.clone(),
    });

    if pending_shared_cluster {
        schedule_shared_cluster_recheck(
            Arc::clone(registry),
            Arc::clone(pools),
            events.clone(),
            descriptor.clone(),
        );
    }

    // Style resolution happens after registration and never blocks it: the
    // layer is already navigable while its style loads.
    if let Some(style_id) = descriptor.styles.as_ref().and_then(|s| s.default.clone()) {
        enter(layer_id, LoadPhase::StyleLoading);
        let file_name = if style_id.ends_with(".json") {
            style_id.clone()
        } else {
            format!("{style_id}.json")
        };
        let request = StyleRequest {
            profile_id: &options.profile_id,
            layer_id,
            style_id: &style_id,
            file_name: &file_name,
            layer_dir: descriptor.directory(),
            base_path: &options.profiles_base_path,
        };
        match styles
            .load_and_validate(source, request, options.strict_styles)
            .await
        {
            Ok(style) => {
                registry.update(layer_id, |record| record.current_style = Some(style));
                events.emit(LayerEvent::StyleResolved {
                    layer_id: layer_id.clone(),
                    style_id,
                });
            }
            // A missing or broken style degrades the layer, never fails it.
            Err(e) => warn!("layer {layer_id}: default style {style_id} not applied: {e}"),
        }
    }

    Ok(LoadOutcome::Registered {
        feature_count,
        dropped_features,
        warnings: validation.warning_count(),
    })
}

/// Explicit z-index is clamped into `[MIN_Z_INDEX, MAX_Z_INDEX]` with a
/// warning; absent z defaults so later-loaded layers sit beneath earlier
/// ones. A reloaded layer keeps its previous default.
fn resolve_z_index(descriptor: &LayerDescriptor, registry: &LayerRegistry) -> i32 {
    match descriptor.z_index {
        Some(z) if (MIN_Z_INDEX..=MAX_Z_INDEX).contains(&z) => z,
        Some(z) => {
            let clamped = z.clamp(MIN_Z_INDEX, MAX_Z_INDEX);
            warn!(
                "layer {}: zIndex {z} outside [{MIN_Z_INDEX}, {MAX_Z_INDEX}], clamped to {clamped}",
                descriptor.id
            );
            clamped
        }
        None => match registry.get(&descriptor.id) {
            Some(existing) => existing.z_index,
            None => (MAX_Z_INDEX - registry.len() as i32).max(MIN_Z_INDEX),
        },
    }
}

/// Pending → Resolved | FallenBack, as one scheduled re-check rather than a
/// recursive timer chain.
fn schedule_shared_cluster_recheck(
    registry: Arc<LayerRegistry>,
    pools: Arc<ClusterPools>,
    events: EventBus,
    descriptor: LayerDescriptor,
) {
    tokio::spawn(async move {
        tokio::time::sleep(SHARED_CLUSTER_RETRY_DELAY).await;
        let layer_id = descriptor.id.clone();

        if let Some(pool) = pools.shared() {
            pool.add_member(&layer_id);
            registry.update(&layer_id, |record| {
                record.cluster_group = Some(pool.clone());
                record.pending_shared_cluster = false;
            });
            debug!("layer {layer_id}: shared cluster pool resolved on retry");
            return;
        }

        let (radius, zoom) = cluster::independent_pool_params(&descriptor);
        let pool = pools.independent_for(&layer_id, radius, zoom);
        let still_registered = registry.update(&layer_id, |record| {
            record.cluster_group = Some(pool.clone());
            record.use_shared_cluster = false;
            record.pending_shared_cluster = false;
        });
        if still_registered {
            warn!("layer {layer_id}: shared cluster pool never appeared, using an independent cluster");
            events.emit(LayerEvent::ClusterFallback { layer_id });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterPool;
    use crate::fetch::StaticPayloadSource;
    use serde_json::json;

    struct Harness {
        source: StaticPayloadSource,
        registry: Arc<LayerRegistry>,
        pools: Arc<ClusterPools>,
        styles: StyleCache,
        events: EventBus,
        options: PipelineOptions,
    }

    impl Harness {
        fn new(source: StaticPayloadSource) -> Self {
            Harness {
                source,
                registry: Arc::new(LayerRegistry::new()),
                pools: Arc::new(ClusterPools::new()),
                styles: StyleCache::new(false),
                events: EventBus::new(),
                options: PipelineOptions::default(),
            }
        }

        async fn load(&self, descriptor: &LayerDescriptor) -> LoadResult {
            load_single_layer(
                &self.source,
                &self.registry,
                &self.pools,
                &self.styles,
                &self.events,
                &self.options,
                descriptor,
                None,
            )
            .await
        }
    }

    fn descriptor(value: serde_json::Value) -> LayerDescriptor {
        serde_json::from_value(value).unwrap()
    }

    fn two_point_collection() -> String {
        json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [9.5, 47.1]}, "properties": {"name": "A"}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [9.6, 47.2]}, "properties": {"name": "B"}}
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn explicit_z_index_is_clamped() {
        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", two_point_collection()),
        );
        let result = harness
            .load(&descriptor(
                json!({"id": "a", "url": "a.geojson", "zIndex": 150}),
            ))
            .await;
        assert!(result.is_registered());
        assert_eq!(harness.registry.get("a").unwrap().z_index, MAX_Z_INDEX);

        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", two_point_collection()),
        );
        harness
            .load(&descriptor(
                json!({"id": "a", "url": "a.geojson", "zIndex": -5}),
            ))
            .await;
        assert_eq!(harness.registry.get("a").unwrap().z_index, MIN_Z_INDEX);
    }

    #[tokio::test]
    async fn default_z_index_stacks_later_layers_beneath() {
        let harness = Harness::new(
            StaticPayloadSource::new()
                .with_payload("a.geojson", two_point_collection())
                .with_payload("b.geojson", two_point_collection()),
        );
        harness
            .load(&descriptor(json!({"id": "a", "url": "a.geojson"})))
            .await;
        harness
            .load(&descriptor(json!({"id": "b", "url": "b.geojson"})))
            .await;

        assert_eq!(harness.registry.get("a").unwrap().z_index, MAX_Z_INDEX);
        assert_eq!(harness.registry.get("b").unwrap().z_index, MAX_Z_INDEX - 1);
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", two_point_collection()),
        );
        let d = descriptor(json!({"id": "a", "url": "a.geojson"}));

        harness.load(&d).await;
        let first = harness.registry.get("a").unwrap();
        harness.load(&d).await;
        let second = harness.registry.get("a").unwrap();

        assert_eq!(first.features.len(), second.features.len());
        assert_eq!(first.geometry_type, second.geometry_type);
        assert_eq!(first.z_index, second.z_index);
        assert_eq!(harness.registry.len(), 1);
    }

    #[tokio::test]
    async fn reload_preserves_visibility() {
        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", two_point_collection()),
        );
        let d = descriptor(json!({"id": "a", "url": "a.geojson"}));
        harness.load(&d).await;
        harness.registry.set_visible("a", false);
        harness.load(&d).await;
        assert!(!harness.registry.get("a").unwrap().visible);
    }

    #[tokio::test]
    async fn missing_payload_fails_only_that_layer() {
        let harness = Harness::new(StaticPayloadSource::new());
        let result = harness
            .load(&descriptor(json!({"id": "a", "url": "gone.geojson"})))
            .await;
        assert!(matches!(result.outcome, LoadOutcome::Failed { .. }));
        assert!(harness.registry.get("a").is_none());
    }

    #[tokio::test]
    async fn error_features_are_dropped_not_the_layer() {
        let payload = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}, "properties": {"name": "ok"}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}, "properties": {"name": "bad", "meta": {"nested": true}}}
            ]
        });
        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", payload.to_string()),
        );
        let result = harness
            .load(&descriptor(json!({"id": "a", "url": "a.geojson"})))
            .await;

        match result.outcome {
            LoadOutcome::Registered {
                feature_count,
                dropped_features,
                ..
            } => {
                assert_eq!(feature_count, 1);
                assert_eq!(dropped_features, 1);
            }
            other => panic!("expected registered, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn available_shared_pool_is_joined_immediately() {
        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", two_point_collection()),
        );
        harness
            .pools
            .install_shared(Arc::new(ClusterPool::new("shared", 80, 18)));

        harness
            .load(&descriptor(
                json!({"id": "a", "url": "a.geojson", "clustering": {"enabled": true}}),
            ))
            .await;

        let record = harness.registry.get("a").unwrap();
        assert!(record.use_shared_cluster);
        assert!(!record.pending_shared_cluster);
        assert_eq!(record.cluster_group.as_ref().unwrap().id, "shared");
        assert_eq!(harness.pools.shared().unwrap().members(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_shared_pool_falls_back_after_retry_window() {
        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", two_point_collection()),
        );
        let mut events = harness.events.subscribe();

        harness
            .load(&descriptor(
                json!({"id": "a", "url": "a.geojson", "clustering": {"enabled": true}}),
            ))
            .await;

        // Provisionally registered: visible but unclustered.
        let record = harness.registry.get("a").unwrap();
        assert!(record.use_shared_cluster);
        assert!(record.pending_shared_cluster);
        assert!(record.cluster_group.is_none());

        tokio::time::sleep(SHARED_CLUSTER_RETRY_DELAY + Duration::from_millis(50)).await;

        let record = harness.registry.get("a").unwrap();
        assert!(!record.use_shared_cluster);
        assert!(!record.pending_shared_cluster);
        let pool = record.cluster_group.expect("independent pool");
        assert_eq!(pool.id, "cluster-a");

        // Registered first, then the fallback signal.
        assert!(matches!(
            events.try_recv().unwrap(),
            LayerEvent::LayerRegistered { .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            LayerEvent::ClusterFallback { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn late_shared_pool_is_picked_up_by_the_retry() {
        let harness = Harness::new(
            StaticPayloadSource::new().with_payload("a.geojson", two_point_collection()),
        );

        harness
            .load(&descriptor(
                json!({"id": "a", "url": "a.geojson", "clustering": {"enabled": true}}),
            ))
            .await;
        assert!(harness.registry.get("a").unwrap().pending_shared_cluster);

        harness
            .pools
            .install_shared(Arc::new(ClusterPool::new("shared", 80, 18)));
        tokio::time::sleep(SHARED_CLUSTER_RETRY_DELAY + Duration::from_millis(50)).await;

        let record = harness.registry.get("a").unwrap();
        assert!(record.use_shared_cluster);
        assert!(!record.pending_shared_cluster);
        assert_eq!(record.cluster_group.unwrap().id, "shared");
    }

    #[tokio::test]
    async fn default_style_is_applied_after_registration() {
        let source = StaticPayloadSource::new()
            .with_payload("a.geojson", two_point_collection())
            .with_payload(
                "/profiles/default/a/styles/summer.json",
                json!({"marker": {"color": "#00ff00"}}).to_string(),
            );
        let harness = Harness::new(source);
        let mut events = harness.events.subscribe();

        harness
            .load(&descriptor(
                json!({"id": "a", "url": "a.geojson", "styles": {"default": "summer"}}),
            ))
            .await;

        let record = harness.registry.get("a").unwrap();
        let style = record.current_style.expect("style attached");
        assert_eq!(style.metadata.style_id, "summer");

        assert!(matches!(
            events.try_recv().unwrap(),
            LayerEvent::LayerRegistered { .. }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            LayerEvent::StyleResolved { .. }
        ));
    }

    #[tokio::test]
    async fn broken_style_degrades_but_layer_registers() {
        let source = StaticPayloadSource::new()
            .with_payload("a.geojson", two_point_collection())
            .with_payload("/profiles/default/a/styles/summer.json", "{broken");
        let harness = Harness::new(source);

        let result = harness
            .load(&descriptor(
                json!({"id": "a", "url": "a.geojson", "styles": {"default": "summer"}}),
            ))
            .await;

        assert!(result.is_registered());
        assert!(harness.registry.get("a").unwrap().current_style.is_none());
    }

    #[tokio::test]
    async fn cached_payload_bypasses_the_source() {
        let harness = Harness::new(StaticPayloadSource::new());
        let payload: Value =
            serde_json::from_str(&two_point_collection()).unwrap();

        let result = load_single_layer(
            &harness.source,
            &harness.registry,
            &harness.pools,
            &harness.styles,
            &harness.events,
            &harness.options,
            &descriptor(json!({"id": "a", "url": "a.geojson"})),
            Some(&payload),
        )
        .await;

        assert!(result.is_registered());
        assert_eq!(harness.source.fetch_count(), 0);
    }
}
