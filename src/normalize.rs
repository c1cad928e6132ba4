//! Converts raw records (arbitrary JSON, GeoJSON features, GPX waypoints,
//! route stops) into the canonical [`NormalizedPoi`] shape.
//!
//! Pure except for a monotonically increasing id counter, used only when a
//! record carries no id-like field. Normalizers return `None` instead of
//! failing; a record that cannot be located on the map still normalizes as
//! long as it is an object.

use crate::models::{GeometryKind, NormalizedPoi, SourceKind};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Debug)]
pub struct NormalizeOptions {
    /// Title used when a record has no name/title/label field. The invariant
    /// is that `title` is never empty, so hosts localize this string.
    pub fallback_title: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            fallback_title: "Unnamed place".to_string(),
        }
    }
}

static SYNTHETIC_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_synthetic_id() -> String {
    let n = SYNTHETIC_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("poi-{n}")
}

/// Structural sniffing for records of unknown origin. Checked in order:
/// GeoJSON feature shape, GPX waypoint shape, route stop shape, then plain
/// JSON as the fallback.
pub fn detect_source_kind(raw: &Value) -> SourceKind {
    let Some(obj) = raw.as_object() else {
        return SourceKind::Json;
    };

    if obj.get("type").and_then(Value::as_str) == Some("Feature") && obj.contains_key("geometry") {
        return SourceKind::GeoJson;
    }
    if obj.contains_key("lat") && obj.contains_key("lon") && obj.contains_key("name") {
        return SourceKind::Gpx;
    }
    if obj.contains_key("latLng") || (obj.contains_key("order") && obj.contains_key("address")) {
        return SourceKind::Route;
    }
    SourceKind::Json
}

/// Normalize one raw record. `kind == None` auto-detects by shape.
///
/// Returns `None` for null and non-object input; never panics.
pub fn normalize_record(
    kind: Option<SourceKind>,
    raw: &Value,
    opts: &NormalizeOptions,
) -> Option<NormalizedPoi> {
    if raw.is_null() || !raw.is_object() {
        return None;
    }
    let kind = kind.unwrap_or_else(|| detect_source_kind(raw));
    match kind {
        SourceKind::GeoJson => normalize_geojson(raw, opts),
        SourceKind::Gpx => normalize_gpx(raw, opts),
        SourceKind::Route => normalize_route(raw, opts),
        SourceKind::Json => normalize_json(raw, opts),
    }
}

fn normalize_geojson(raw: &Value, opts: &NormalizeOptions) -> Option<NormalizedPoi> {
    let obj = raw.as_object()?;
    let props = obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let geometry = obj.get("geometry").filter(|g| g.is_object());
    let geometry_type = geometry
        .and_then(|g| g.get("type"))
        .and_then(Value::as_str)
        .map(GeometryKind::from_type_str)
        .unwrap_or(GeometryKind::Unknown);

    // GeoJSON positions are [lng, lat]; the canonical record wants lat/lng.
    // Non-Point geometries get the arithmetic mean of all flattened vertices.
    // That is not a true area centroid; the approximation is deliberate and
    // kept for parity with how anchors were always placed.
    let (lat, lng) = match geometry_type {
        GeometryKind::Point => geometry
            .and_then(|g| g.get("coordinates"))
            .and_then(position_lng_lat)
            .map(|(lng, lat)| (Some(lat), Some(lng)))
            .unwrap_or((None, None)),
        GeometryKind::Unknown => (None, None),
        _ => geometry
            .and_then(vertex_mean)
            .map(|(lng, lat)| (Some(lat), Some(lng)))
            .unwrap_or((None, None)),
    };

    Some(NormalizedPoi {
        id: id_field(obj)
            .or_else(|| id_field(&props))
            .unwrap_or_else(next_synthetic_id),
        source_type: SourceKind::GeoJson,
        geometry_type,
        title: title_field(&props).unwrap_or_else(|| opts.fallback_title.clone()),
        description: description_field(&props),
        lat: lat.and_then(finite),
        lng: lng.and_then(finite),
        category_id: category_field(&props),
        sub_category_id: sub_category_field(&props),
        attributes: props,
        geometry: geometry.cloned(),
    })
}

fn normalize_gpx(raw: &Value, opts: &NormalizeOptions) -> Option<NormalizedPoi> {
    let obj = raw.as_object()?;
    let lat = number_field(obj, &["lat"]);
    let lng = number_field(obj, &["lon", "lng"]);

    Some(NormalizedPoi {
        id: id_field(obj).unwrap_or_else(next_synthetic_id),
        source_type: SourceKind::Gpx,
        geometry_type: GeometryKind::Point,
        title: string_field(obj, &["name"]).unwrap_or_else(|| opts.fallback_title.clone()),
        description: string_field(obj, &["desc", "description", "cmt"]).unwrap_or_default(),
        lat,
        lng,
        category_id: string_field(obj, &["type", "sym"]),
        sub_category_id: None,
        attributes: obj.clone(),
        geometry: None,
    })
}

fn normalize_route(raw: &Value, opts: &NormalizeOptions) -> Option<NormalizedPoi> {
    let obj = raw.as_object()?;

    // Route stops carry either a Leaflet-style latLng pair ([lat, lng]) or
    // flat lat/lng fields.
    let (lat, lng) = match obj.get("latLng").and_then(Value::as_array) {
        Some(pair) if pair.len() >= 2 => (
            pair[0].as_f64().and_then(finite),
            pair[1].as_f64().and_then(finite),
        ),
        _ => (
            number_field(obj, &["lat", "latitude"]),
            number_field(obj, &["lng", "lon", "longitude"]),
        ),
    };

    let title = string_field(obj, &["name", "title", "label"])
        .or_else(|| string_field(obj, &["address"]))
        .unwrap_or_else(|| opts.fallback_title.clone());

    Some(NormalizedPoi {
        id: id_field(obj).unwrap_or_else(next_synthetic_id),
        source_type: SourceKind::Route,
        geometry_type: GeometryKind::Point,
        title,
        description: string_field(obj, &["description", "desc", "notes"]).unwrap_or_default(),
        lat,
        lng,
        category_id: string_field(obj, &["category", "categoryId"]),
        sub_category_id: None,
        attributes: obj.clone(),
        geometry: None,
    })
}

fn normalize_json(raw: &Value, opts: &NormalizeOptions) -> Option<NormalizedPoi> {
    let obj = raw.as_object()?;
    let lat = number_field(obj, &["lat", "latitude"]);
    let lng = number_field(obj, &["lng", "lon", "longitude"]);

    Some(NormalizedPoi {
        id: id_field(obj).unwrap_or_else(next_synthetic_id),
        source_type: SourceKind::Json,
        geometry_type: if lat.is_some() && lng.is_some() {
            GeometryKind::Point
        } else {
            GeometryKind::Unknown
        },
        title: title_field(obj).unwrap_or_else(|| opts.fallback_title.clone()),
        description: description_field(obj),
        lat,
        lng,
        category_id: category_field(obj),
        sub_category_id: sub_category_field(obj),
        attributes: obj.clone(),
        geometry: None,
    })
}

/// Canonical record back to a GeoJSON feature for the rendering surface.
pub fn poi_to_feature(poi: &NormalizedPoi) -> geojson::Feature {
    let geometry = poi
        .geometry
        .as_ref()
        .and_then(|g| serde_json::from_value::<geojson::Geometry>(g.clone()).ok())
        .or_else(|| match (poi.lat, poi.lng) {
            (Some(lat), Some(lng)) => Some(geojson::Geometry::new(geojson::Value::Point(vec![
                lng, lat,
            ]))),
            _ => None,
        });

    let mut properties = poi.attributes.clone();
    properties.insert("name".to_string(), Value::String(poi.title.clone()));
    if !poi.description.is_empty() {
        properties
            .entry("description".to_string())
            .or_insert_with(|| Value::String(poi.description.clone()));
    }
    if let Some(category) = &poi.category_id {
        properties
            .entry("category".to_string())
            .or_insert_with(|| Value::String(category.clone()));
    }

    geojson::Feature {
        bbox: None,
        geometry,
        id: Some(geojson::feature::Id::String(poi.id.clone())),
        properties: Some(properties),
        foreign_members: None,
    }
}

fn finite(f: f64) -> Option<f64> {
    f.is_finite().then_some(f)
}

/// Reads a `[lng, lat]` position, tolerating numeric strings.
fn position_lng_lat(coords: &Value) -> Option<(f64, f64)> {
    let arr = coords.as_array()?;
    if arr.len() < 2 {
        return None;
    }
    let lng = lenient_f64(&arr[0])?;
    let lat = lenient_f64(&arr[1])?;
    Some((lng, lat))
}

/// Arithmetic mean of every vertex in a geometry's coordinates, including
/// nested rings and GeometryCollection members. Returns `(lng, lat)`.
fn vertex_mean(geometry: &Value) -> Option<(f64, f64)> {
    let mut sum_lng = 0.0;
    let mut sum_lat = 0.0;
    let mut count = 0usize;

    fn walk(v: &Value, sum_lng: &mut f64, sum_lat: &mut f64, count: &mut usize) {
        if let Some(arr) = v.as_array() {
            if arr.len() >= 2 && arr[0].is_number() && arr[1].is_number() {
                if let (Some(lng), Some(lat)) = (arr[0].as_f64(), arr[1].as_f64()) {
                    if lng.is_finite() && lat.is_finite() {
                        *sum_lng += lng;
                        *sum_lat += lat;
                        *count += 1;
                    }
                }
            } else {
                for item in arr {
                    walk(item, sum_lng, sum_lat, count);
                }
            }
        }
    }

    if let Some(coords) = geometry.get("coordinates") {
        walk(coords, &mut sum_lng, &mut sum_lat, &mut count);
    }
    if let Some(members) = geometry.get("geometries").and_then(Value::as_array) {
        for member in members {
            if let Some(coords) = member.get("coordinates") {
                walk(coords, &mut sum_lng, &mut sum_lat, &mut count);
            }
        }
    }

    (count > 0).then(|| (sum_lng / count as f64, sum_lat / count as f64))
}

fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().and_then(finite),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(finite),
        _ => None,
    }
}

fn number_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(lenient_f64))
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        obj.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn id_field(obj: &Map<String, Value>) -> Option<String> {
    for key in ["id", "@id", "poiId"] {
        match obj.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn title_field(obj: &Map<String, Value>) -> Option<String> {
    string_field(obj, &["name", "title", "label"])
}

fn description_field(obj: &Map<String, Value>) -> String {
    string_field(obj, &["description", "desc", "notes"]).unwrap_or_default()
}

fn category_field(obj: &Map<String, Value>) -> Option<String> {
    string_field(obj, &["categoryId", "category", "category_id"])
}

fn sub_category_field(obj: &Map<String, Value>) -> Option<String> {
    string_field(obj, &["subCategoryId", "subcategory", "sub_category_id"])
}
