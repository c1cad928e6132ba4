use crate::cluster::ClusterPool;
use crate::style::StyleRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// One entry in a profile's ordered layer list, as authored by the user.
///
/// Profiles are written in camelCase JSON, so every field keeps that casing
/// on the wire. A descriptor is immutable once read; runtime state lives in
/// [`LayerRuntimeRecord`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub data_file: Option<String>,
    /// Directory under the profile root holding dataFile and styles/.
    /// Defaults to the layer id when absent.
    #[serde(default)]
    pub layer_directory: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub z_index: Option<i32>,
    #[serde(default)]
    pub clustering: Option<ClusteringConfig>,
    #[serde(default)]
    pub styles: Option<StylesConfig>,
    #[serde(default)]
    pub tooltip: Option<Value>,
    #[serde(default)]
    pub popup: Option<Value>,
}

impl LayerDescriptor {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    pub fn directory(&self) -> &str {
        self.layer_directory.as_deref().unwrap_or(&self.id)
    }

    pub fn has_data_source(&self) -> bool {
        self.url.is_some() || self.data_file.is_some()
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylesConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub available: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStrategy {
    Shared,
    BySource,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: Option<ClusterStrategy>,
    #[serde(default)]
    pub max_cluster_radius: Option<u32>,
    #[serde(default)]
    pub disable_clustering_at_zoom: Option<u32>,
}

pub const DEFAULT_MAX_CLUSTER_RADIUS: u32 = 80;
pub const DEFAULT_DISABLE_CLUSTERING_AT_ZOOM: u32 = 18;

impl ClusteringConfig {
    pub fn radius(&self) -> u32 {
        self.max_cluster_radius
            .unwrap_or(DEFAULT_MAX_CLUSTER_RADIUS)
    }

    pub fn disable_at_zoom(&self) -> u32 {
        self.disable_clustering_at_zoom
            .unwrap_or(DEFAULT_DISABLE_CLUSTERING_AT_ZOOM)
    }
}

/// Source format a record was normalized from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Json,
    GeoJson,
    Gpx,
    Route,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
    Unknown,
}

impl GeometryKind {
    pub fn from_type_str(s: &str) -> GeometryKind {
        match s {
            "Point" => GeometryKind::Point,
            "MultiPoint" => GeometryKind::MultiPoint,
            "LineString" => GeometryKind::LineString,
            "MultiLineString" => GeometryKind::MultiLineString,
            "Polygon" => GeometryKind::Polygon,
            "MultiPolygon" => GeometryKind::MultiPolygon,
            "GeometryCollection" => GeometryKind::GeometryCollection,
            _ => GeometryKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::LineString => "LineString",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPolygon => "MultiPolygon",
            GeometryKind::GeometryCollection => "GeometryCollection",
            GeometryKind::Unknown => "Unknown",
        }
    }
}

/// Canonical POI record every source format is normalized into.
///
/// Invariants: `id` is a non-empty string (synthesized when the source has
/// no id-like field), `title` is never empty, coordinates are finite or
/// `None`, never NaN.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPoi {
    pub id: String,
    pub source_type: SourceKind,
    pub geometry_type: GeometryKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub sub_category_id: Option<String>,
    /// Raw source attributes, passed through for tooltips/popups/filters.
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
    /// Original GeoJSON geometry, kept so non-Point shapes stay renderable.
    #[serde(default)]
    pub geometry: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub feature_id: String,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

/// Output of the structural feature validator.
///
/// A feature with at least one error-severity issue is excluded from
/// `valid_features`; warnings never exclude a feature.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid_features: Vec<geojson::Feature>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }
}

/// Per-layer clustering decision, computed once at load time. Not
/// re-computed unless the layer is reloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusteringDecision {
    pub should_cluster: bool,
    pub use_shared_cluster: bool,
}

/// Runtime state for one loaded layer. Owned by the [`LayerRegistry`];
/// created by the single-layer loader, mutated in place on style change or
/// visibility toggle, destroyed when the owning profile unloads.
///
/// [`LayerRegistry`]: crate::registry::LayerRegistry
#[derive(Clone, Debug)]
pub struct LayerRuntimeRecord {
    pub id: String,
    pub label: String,
    pub config: LayerDescriptor,
    pub features: Vec<NormalizedPoi>,
    pub geometry_type: GeometryKind,
    pub visible: bool,
    pub current_style: Option<Arc<StyleRecord>>,
    pub cluster_group: Option<Arc<ClusterPool>>,
    pub use_shared_cluster: bool,
    /// Set while a shared pool resolution re-check is still scheduled.
    pub pending_shared_cluster: bool,
    pub z_index: i32,
}

impl LayerRuntimeRecord {
    /// Renderable output for the map surface: the normalized features as a
    /// GeoJSON FeatureCollection.
    pub fn feature_collection(&self) -> geojson::FeatureCollection {
        geojson::FeatureCollection {
            bbox: None,
            features: self
                .features
                .iter()
                .map(crate::normalize::poi_to_feature)
                .collect(),
            foreign_members: None,
        }
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        let mut bounds: Option<GeoBounds> = None;
        for poi in &self.features {
            if let (Some(lat), Some(lng)) = (poi.lat, poi.lng) {
                match bounds.as_mut() {
                    Some(b) => b.extend(lat, lng),
                    None => bounds = Some(GeoBounds::point(lat, lng)),
                }
            }
        }
        bounds
    }
}

/// Read-only snapshot of a registry entry handed to UI collaborators
/// (legend, layer manager, filter panel). Never exposes fetch or validation
/// internals.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    pub id: String,
    pub label: String,
    pub visible: bool,
    pub z_index: i32,
    pub geometry_type: GeometryKind,
    pub feature_count: usize,
    pub style_id: Option<String>,
    pub has_integrated_labels: bool,
}

/// Latitude/longitude bounding box, grown point by point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    pub fn point(lat: f64, lng: f64) -> GeoBounds {
        GeoBounds {
            min_lat: lat,
            min_lng: lng,
            max_lat: lat,
            max_lng: lng,
        }
    }

    pub fn extend(&mut self, lat: f64, lng: f64) {
        self.min_lat = self.min_lat.min(lat);
        self.min_lng = self.min_lng.min(lng);
        self.max_lat = self.max_lat.max(lat);
        self.max_lng = self.max_lng.max(lng);
    }

    pub fn union(&mut self, other: &GeoBounds) {
        self.extend(other.min_lat, other.min_lng);
        self.extend(other.max_lat, other.max_lng);
    }
}

/// Terminal outcome of one layer's pipeline run.
#[derive(Debug)]
pub enum LoadOutcome {
    Registered {
        feature_count: usize,
        dropped_features: usize,
        warnings: usize,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: crate::errors::LayerLoadError,
    },
}

#[derive(Debug)]
pub struct LoadResult {
    pub layer_id: String,
    pub outcome: LoadOutcome,
}

impl LoadResult {
    pub fn is_registered(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Registered { .. })
    }
}

/// Aggregate result of a whole profile load.
#[derive(Debug)]
pub struct ProfileLoadOutcome {
    pub results: Vec<LoadResult>,
    /// Union of all loaded layer bounds, for an optional viewport fit.
    pub bounds: Option<GeoBounds>,
}

impl ProfileLoadOutcome {
    pub fn registered_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_registered()).count()
    }
}

/// Most frequent geometry kind among a layer's features; ties resolve to the
/// kind seen first, empty input resolves to `Unknown`.
pub fn dominant_geometry(features: &[NormalizedPoi]) -> GeometryKind {
    use itertools::Itertools;

    let counts = features.iter().counts_by(|f| f.geometry_type);
    let mut best: Option<(GeometryKind, usize)> = None;
    for f in features {
        let count = counts.get(&f.geometry_type).copied().unwrap_or(0);
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((f.geometry_type, count));
        }
    }
    best.map(|(kind, _)| kind).unwrap_or(GeometryKind::Unknown)
}
