//! Format auto-conversion: any supported payload shape in, one uniform
//! GeoJSON FeatureCollection value out.
//!
//! GeoJSON passes through untouched. GPX-derived and route payloads, plus
//! generic JSON records, go through the normalizer and come back as Point
//! features. Synthesized features carry a top-level `sourceType` member so
//! the downstream normalization step can keep their provenance; GeoJSON
//! foreign members make this round-trip safely.

use crate::errors::LayerLoadError;
use crate::models::SourceKind;
use crate::normalize::{self, NormalizeOptions};
use log::warn;
use serde_json::{Value, json};

/// Convert a fetched payload into a FeatureCollection-shaped value.
///
/// `context` names the layer for parse errors.
pub fn to_feature_collection(
    payload: &Value,
    context: &str,
    opts: &NormalizeOptions,
) -> Result<Value, LayerLoadError> {
    match payload {
        Value::Object(obj) => {
            match obj.get("type").and_then(Value::as_str) {
                Some("FeatureCollection") => return Ok(payload.clone()),
                Some("Feature") => {
                    return Ok(json!({
                        "type": "FeatureCollection",
                        "features": [payload.clone()]
                    }));
                }
                _ => {}
            }

            // GPX payloads arrive pre-parsed with a waypoint list.
            if let Some(waypoints) = obj
                .get("waypoints")
                .or_else(|| obj.get("wpt"))
                .and_then(Value::as_array)
            {
                return Ok(collection_from_records(
                    waypoints,
                    Some(SourceKind::Gpx),
                    context,
                    opts,
                ));
            }

            if let Some(stops) = obj.get("stops").and_then(Value::as_array) {
                return Ok(collection_from_records(
                    stops,
                    Some(SourceKind::Route),
                    context,
                    opts,
                ));
            }

            // A single flat record becomes a one-feature collection.
            match normalize::normalize_record(None, payload, opts) {
                Some(poi) => Ok(json!({
                    "type": "FeatureCollection",
                    "features": [tagged_feature_value(&poi)]
                })),
                None => Err(LayerLoadError::parse(
                    context,
                    "object is not a feature collection, feature or known record shape",
                )),
            }
        }
        Value::Array(records) => Ok(collection_from_records(records, None, context, opts)),
        _ => Err(LayerLoadError::parse(
            context,
            "payload must be a JSON object or array",
        )),
    }
}

fn collection_from_records(
    records: &[Value],
    kind: Option<SourceKind>,
    context: &str,
    opts: &NormalizeOptions,
) -> Value {
    let features: Vec<Value> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            // Feature-shaped elements in a mixed array stay as they are.
            if record.get("type").and_then(Value::as_str) == Some("Feature") {
                return Some(record.clone());
            }
            match normalize::normalize_record(kind, record, opts) {
                Some(poi) => Some(tagged_feature_value(&poi)),
                None => {
                    warn!("layer {context}: record {index} is not an object, dropped");
                    None
                }
            }
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features
    })
}

fn tagged_feature_value(poi: &crate::models::NormalizedPoi) -> Value {
    let mut value = serde_json::to_value(normalize::poi_to_feature(poi)).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        if let Ok(kind) = serde_json::to_value(poi.source_type) {
            obj.insert("sourceType".to_string(), kind);
        }
    }
    value
}

/// Provenance hint left by [`to_feature_collection`] on synthesized
/// features; absent on native GeoJSON input.
pub(crate) fn source_kind_of_feature(feature: &Value) -> SourceKind {
    feature
        .get("sourceType")
        .cloned()
        .and_then(|v| serde_json::from_value::<SourceKind>(v).ok())
        .unwrap_or(SourceKind::GeoJson)
}
