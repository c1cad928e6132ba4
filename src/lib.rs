//! Lamina loads, validates and registers geospatial overlay layers for a
//! map host: batched concurrent fetching, conversion of heterogeneous
//! payloads into GeoJSON, per-feature validation, cluster-group assignment
//! with a retrying shared-pool handshake, z-order resolution and cached
//! style documents, all feeding one layer state registry.

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

pub mod batch;
pub mod cluster;
pub mod convert;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod registry;
pub mod style;
pub mod validate;

pub use batch::{DEFAULT_BATCH_SIZE, LayerPipeline, PipelineOptions};
pub use cluster::{ClusterPool, ClusterPools};
pub use errors::LayerLoadError;
pub use events::{EventBus, LayerEvent};
pub use fetch::{HttpPayloadSource, PayloadSource, StaticPayloadSource};
pub use models::{
    GeoBounds, GeometryKind, LayerDescriptor, LayerSummary, LoadOutcome, LoadResult,
    NormalizedPoi, ProfileLoadOutcome, Severity, SourceKind, ValidationIssue, ValidationResult,
};
pub use normalize::NormalizeOptions;
pub use registry::LayerRegistry;
pub use style::{StyleCache, StyleMetadata, StyleRecord, StyleRequest};
