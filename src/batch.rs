//! Profile-level orchestration: loads a profile's layers in fixed-size
//! batches, each batch fully settled before the next starts. One slow or
//! broken layer delays only its own batch and fails only itself.

use crate::cluster::ClusterPools;
use crate::events::{EventBus, LayerEvent};
use crate::fetch::PayloadSource;
use crate::loader;
use crate::models::{GeoBounds, LayerDescriptor, LoadOutcome, LoadResult, ProfileLoadOutcome};
use crate::normalize::NormalizeOptions;
use crate::registry::LayerRegistry;
use crate::style::StyleCache;
use futures::future::join_all;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 3;

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub profile_id: String,
    /// Root under which `{profile}/{layerDir}/...` paths are resolved.
    pub profiles_base_path: String,
    /// Upper bound on concurrently loading layers.
    pub batch_size: usize,
    /// Bypass the style cache so style files can be edited live.
    pub debug: bool,
    /// Reject styles with schema problems instead of degrading.
    pub strict_styles: bool,
    pub normalize: NormalizeOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            profile_id: "default".to_string(),
            profiles_base_path: "/profiles".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            debug: false,
            strict_styles: false,
            normalize: NormalizeOptions::default(),
        }
    }
}

/// The whole pipeline behind one facade: payload source, layer registry,
/// cluster pools, style cache and event bus, wired together once per
/// profile session.
pub struct LayerPipeline<S: PayloadSource> {
    source: S,
    registry: Arc<LayerRegistry>,
    pools: Arc<ClusterPools>,
    styles: StyleCache,
    events: EventBus,
    options: PipelineOptions,
}

impl<S: PayloadSource> LayerPipeline<S> {
    pub fn new(source: S, options: PipelineOptions) -> Self {
        LayerPipeline {
            styles: StyleCache::new(options.debug),
            registry: Arc::new(LayerRegistry::new()),
            pools: Arc::new(ClusterPools::new()),
            events: EventBus::new(),
            source,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn pools(&self) -> &Arc<ClusterPools> {
        &self.pools
    }

    pub fn styles(&self) -> &StyleCache {
        &self.styles
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn load_layer(&self, descriptor: &LayerDescriptor) -> LoadResult {
        self.load_descriptor(descriptor, None).await
    }

    /// Load a layer from an already-parsed payload, skipping the fetch.
    pub async fn load_layer_with_payload(
        &self,
        descriptor: &LayerDescriptor,
        payload: &Value,
    ) -> LoadResult {
        self.load_descriptor(descriptor, Some(payload)).await
    }

    /// Load every descriptor in batches of `batch_size`; the next batch
    /// starts only after every layer of the previous one settled.
    pub async fn load_from_profile(&self, descriptors: &[LayerDescriptor]) -> ProfileLoadOutcome {
        let results = self.run_batches(descriptors).await;
        self.finish_profile(results)
    }

    /// Parse a raw profile document and load its `layers` array. A document
    /// without one yields an empty outcome instead of failing the host.
    pub async fn load_profile_value(&self, profile: &Value) -> ProfileLoadOutcome {
        let Some(layers) = profile.get("layers").and_then(Value::as_array) else {
            warn!(
                "profile {}: document has no layers array",
                self.options.profile_id
            );
            return ProfileLoadOutcome {
                results: Vec::new(),
                bounds: None,
            };
        };

        let mut descriptors = Vec::new();
        let mut unparsable = Vec::new();
        for (index, raw) in layers.iter().enumerate() {
            match serde_json::from_value::<LayerDescriptor>(raw.clone()) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    let layer_id = raw
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("layer-{index}"));
                    warn!("layer {layer_id}: malformed descriptor, skipping: {e}");
                    unparsable.push(LoadResult {
                        layer_id,
                        outcome: LoadOutcome::Skipped {
                            reason: format!("malformed descriptor: {e}"),
                        },
                    });
                }
            }
        }

        let mut results = self.run_batches(&descriptors).await;
        results.extend(unparsable);
        self.finish_profile(results)
    }

    async fn run_batches(&self, descriptors: &[LayerDescriptor]) -> Vec<LoadResult> {
        let batch_size = self.options.batch_size.max(1);
        let mut results = Vec::with_capacity(descriptors.len());
        for batch in descriptors.chunks(batch_size) {
            let settled = join_all(batch.iter().map(|d| self.load_descriptor(d, None))).await;
            results.extend(settled);
        }
        results
    }

    async fn load_descriptor(
        &self,
        descriptor: &LayerDescriptor,
        payload: Option<&Value>,
    ) -> LoadResult {
        if !descriptor.active {
            info!("layer {}: inactive, skipping", descriptor.id);
            return LoadResult {
                layer_id: descriptor.id.clone(),
                outcome: LoadOutcome::Skipped {
                    reason: "inactive".to_string(),
                },
            };
        }
        if payload.is_none() && !descriptor.has_data_source() {
            warn!(
                "layer {}: neither url nor dataFile configured, skipping",
                descriptor.id
            );
            return LoadResult {
                layer_id: descriptor.id.clone(),
                outcome: LoadOutcome::Skipped {
                    reason: "no data source".to_string(),
                },
            };
        }

        loader::load_single_layer(
            &self.source,
            &self.registry,
            &self.pools,
            &self.styles,
            &self.events,
            &self.options,
            descriptor,
            payload,
        )
        .await
    }

    fn finish_profile(&self, results: Vec<LoadResult>) -> ProfileLoadOutcome {
        let mut bounds: Option<GeoBounds> = None;
        for result in &results {
            if !result.is_registered() {
                continue;
            }
            let Some(record) = self.registry.get(&result.layer_id) else {
                continue;
            };
            if let Some(layer_bounds) = record.bounds() {
                match bounds.as_mut() {
                    Some(b) => b.union(&layer_bounds),
                    None => bounds = Some(layer_bounds),
                }
            }
        }

        let registered = results.iter().filter(|r| r.is_registered()).count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.outcome, LoadOutcome::Skipped { .. }))
            .count();
        let failed = results.len() - registered - skipped;

        info!(
            "profile {}: {registered} layers registered, {skipped} skipped, {failed} failed",
            self.options.profile_id
        );
        self.events.emit(LayerEvent::ProfileLoaded {
            registered,
            skipped,
            failed,
        });

        ProfileLoadOutcome { results, bounds }
    }
}
