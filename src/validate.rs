//! Structural schema validation for GeoJSON-shaped collections.
//!
//! Runs on raw `serde_json::Value` so malformed features can be inspected
//! and reported instead of failing wholesale; features that pass every
//! error-severity check are handed on as typed [`geojson::Feature`]s.

use crate::models::{Severity, ValidationIssue, ValidationResult};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde_json::Value;
use url::Url;

const GEOMETRY_ALLOW_LIST: [&str; 7] = [
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
];

lazy_static! {
    static ref HEX_COLOR_REGEX: Regex =
        Regex::new("^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").unwrap();
    static ref RGB_COLOR_REGEX: Regex = Regex::new(
        r"^rgba?\(\s*\d{1,3}\s*,\s*\d{1,3}\s*,\s*\d{1,3}\s*(?:,\s*(?:0|1|0?\.\d+)\s*)?\)$"
    )
    .unwrap();
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub(crate) fn is_valid_color(s: &str) -> bool {
    HEX_COLOR_REGEX.is_match(s) || RGB_COLOR_REGEX.is_match(s)
}

/// Accepts absolute URLs and relative paths ("./x", "../x", "/x", "x/y.jpg").
pub(crate) fn looks_like_url(s: &str) -> bool {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return false;
    }
    if Url::parse(trimmed).is_ok() {
        return true;
    }
    // Relative form: resolvable against any base.
    Url::parse("https://relative.invalid/")
        .and_then(|base| base.join(trimmed))
        .is_ok()
}

/// Validate a FeatureCollection, a bare feature array, or a single feature.
///
/// Every check appends zero or more issues; a feature is excluded from
/// `valid_features` iff it collected at least one error-severity issue.
pub fn validate_collection(input: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let features: Vec<Value> = match input {
        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("FeatureCollection") => {
            obj.get("features")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        }
        Value::Array(arr) => arr.clone(),
        Value::Object(_) => vec![input.clone()],
        _ => {
            warn!("validator received non-collection input, nothing to validate");
            return result;
        }
    };

    for (index, feature) in features.iter().enumerate() {
        let feature_id = feature_id_for(feature, index);
        let before = result.issues.len();
        check_feature(feature, &feature_id, &mut result.issues);

        let has_error = result.issues[before..]
            .iter()
            .any(|i| i.severity == Severity::Error);
        if has_error {
            continue;
        }

        match serde_json::from_value::<geojson::Feature>(feature.clone()) {
            Ok(parsed) => result.valid_features.push(parsed),
            Err(e) => result.issues.push(ValidationIssue {
                feature_id: feature_id.clone(),
                field: "feature".to_string(),
                message: format!("not parseable as GeoJSON: {e}"),
                severity: Severity::Error,
            }),
        }
    }

    result
}

fn feature_id_for(feature: &Value, index: usize) -> String {
    let direct = match feature.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    direct
        .or_else(|| {
            feature
                .get("properties")
                .and_then(|p| p.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("#{index}"))
}

fn check_feature(feature: &Value, feature_id: &str, issues: &mut Vec<ValidationIssue>) {
    let mut push = |field: &str, message: String, severity: Severity| {
        issues.push(ValidationIssue {
            feature_id: feature_id.to_string(),
            field: field.to_string(),
            message,
            severity,
        });
    };

    let Some(obj) = feature.as_object() else {
        push(
            "feature",
            "feature is not an object".to_string(),
            Severity::Error,
        );
        return;
    };

    if obj.get("type").and_then(Value::as_str) != Some("Feature") {
        push(
            "type",
            "missing or wrong type, expected \"Feature\"".to_string(),
            Severity::Error,
        );
    }

    check_geometry(obj.get("geometry"), &mut push);

    match obj.get("properties").and_then(Value::as_object) {
        None => push(
            "properties",
            "properties object is required".to_string(),
            Severity::Error,
        ),
        Some(props) => check_properties(props, &mut push),
    }
}

fn check_geometry(
    geometry: Option<&Value>,
    push: &mut impl FnMut(&str, String, Severity),
) {
    let Some(geometry) = geometry.filter(|g| g.is_object()) else {
        push(
            "geometry",
            "geometry object is required".to_string(),
            Severity::Error,
        );
        return;
    };

    let type_str = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    if !GEOMETRY_ALLOW_LIST.contains(&type_str) {
        push(
            "geometry.type",
            format!("unknown geometry type {type_str:?}"),
            Severity::Error,
        );
        return;
    }

    if type_str == "GeometryCollection" {
        let empty = geometry
            .get("geometries")
            .and_then(Value::as_array)
            .map(Vec::is_empty)
            .unwrap_or(true);
        if empty {
            push(
                "geometry.geometries",
                "geometry collection has no members".to_string(),
                Severity::Error,
            );
        }
        return;
    }

    let empty = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .map(Vec::is_empty)
        .unwrap_or(true);
    if empty {
        push(
            "geometry.coordinates",
            "coordinates must be a non-empty array".to_string(),
            Severity::Error,
        );
    }
}

// Ranges mirror the flat property schema: distances and weights are
// non-negative, rating is a 0-5 scale, opacity is 0-1.
const NUMERIC_RULES: [(&str, f64, f64); 5] = [
    ("distance_km", 0.0, f64::INFINITY),
    ("duration_min", 0.0, f64::INFINITY),
    ("rating", 0.0, 5.0),
    ("opacity", 0.0, 1.0),
    ("weight", 0.0, f64::INFINITY),
];

const URL_FIELDS: [&str; 3] = ["link", "photo", "url"];

fn check_properties(
    props: &serde_json::Map<String, Value>,
    push: &mut impl FnMut(&str, String, Severity),
) {
    let has_title = ["name", "title", "label"].iter().any(|k| {
        props
            .get(*k)
            .and_then(Value::as_str)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    });
    if !has_title {
        push(
            "properties",
            "one of name, title or label is required".to_string(),
            Severity::Error,
        );
    }

    for (key, min, max) in NUMERIC_RULES {
        if let Some(value) = props.get(key) {
            match value.as_f64() {
                Some(n) if (min..=max).contains(&n) => {}
                Some(n) => push(
                    key,
                    format!("value {n} outside expected range [{min}, {max}]"),
                    Severity::Warning,
                ),
                None => push(
                    key,
                    "expected a number".to_string(),
                    Severity::Warning,
                ),
            }
        }
    }

    if let Some(color) = props.get("color") {
        match color.as_str() {
            Some(s) if is_valid_color(s) => {}
            Some(s) => push(
                "color",
                format!("{s:?} is not a hex or rgb/rgba color"),
                Severity::Warning,
            ),
            None => push(
                "color",
                "expected a color string".to_string(),
                Severity::Warning,
            ),
        }
    }

    for field in URL_FIELDS {
        if let Some(value) = props.get(field) {
            match value.as_str() {
                Some(s) if looks_like_url(s) => {}
                Some(s) => push(
                    field,
                    format!("{s:?} does not look like a URL"),
                    Severity::Warning,
                ),
                None => push(field, "expected a URL string".to_string(), Severity::Warning),
            }
        }
    }

    if let Some(email) = props.get("email") {
        match email.as_str() {
            Some(s) if EMAIL_REGEX.is_match(s) => {}
            _ => push(
                "email",
                "does not look like an email address".to_string(),
                Severity::Warning,
            ),
        }
    }

    match props.get("tags") {
        None => {}
        Some(Value::Array(tags)) => {
            for (i, tag) in tags.iter().enumerate() {
                if !tag.is_string() {
                    push(
                        "tags",
                        format!("tag at index {i} is not a string"),
                        Severity::Warning,
                    );
                }
            }
        }
        Some(_) => push(
            "tags",
            "expected an array of strings".to_string(),
            Severity::Warning,
        ),
    }

    // The data model requires flat properties: any plain-object value is an
    // error, not a warning.
    for (key, value) in props {
        if value.is_object() {
            push(
                key,
                "nested object properties are not allowed".to_string(),
                Severity::Error,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point_feature(props: Value) -> Value {
        json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [9.5, 47.1]},
            "properties": props
        })
    }

    #[test]
    fn valid_feature_passes() {
        let result = validate_collection(&json!({
            "type": "FeatureCollection",
            "features": [point_feature(json!({"name": "Cafe"}))]
        }));
        assert_eq!(result.valid_features.len(), 1);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn accepts_bare_array_and_single_feature() {
        let single = point_feature(json!({"name": "Cafe"}));
        assert_eq!(validate_collection(&single).valid_features.len(), 1);

        let array = json!([point_feature(json!({"name": "A"})), point_feature(json!({"name": "B"}))]);
        assert_eq!(validate_collection(&array).valid_features.len(), 2);
    }

    #[test]
    fn wrong_type_is_an_error() {
        let result = validate_collection(&json!([{
            "type": "NotAFeature",
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
            "properties": {"name": "x"}
        }]));
        assert!(result.valid_features.is_empty());
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.issues[0].field, "type");
    }

    #[test]
    fn unknown_geometry_type_rejects_feature() {
        let result = validate_collection(&json!([{
            "type": "Feature",
            "geometry": {"type": "Circle", "coordinates": [0.0, 0.0]},
            "properties": {"name": "x"}
        }]));
        assert!(result.valid_features.is_empty());
        assert_eq!(result.issues[0].field, "geometry.type");
    }

    #[test]
    fn empty_coordinates_reject_feature() {
        let result = validate_collection(&json!([{
            "type": "Feature",
            "geometry": {"type": "LineString", "coordinates": []},
            "properties": {"name": "x"}
        }]));
        assert!(result.valid_features.is_empty());
    }

    #[test]
    fn missing_title_like_property_is_an_error() {
        let result = validate_collection(&json!([point_feature(json!({"rating": 3}))]));
        assert!(result.valid_features.is_empty());
        assert!(result.issues.iter().any(|i| i.field == "properties"));
    }

    #[test]
    fn out_of_range_rating_warns_but_keeps_feature() {
        let result = validate_collection(&json!([point_feature(json!({"name": "x", "rating": 7}))]));
        assert_eq!(result.valid_features.len(), 1);
        assert_eq!(result.warning_count(), 1);
        assert_eq!(result.issues[0].severity, Severity::Warning);
        assert_eq!(result.issues[0].field, "rating");
    }

    #[test]
    fn nested_object_property_is_an_error() {
        let result = validate_collection(&json!([point_feature(
            json!({"name": "x", "details": {"phone": "123"}})
        )]));
        assert!(result.valid_features.is_empty());
        let issue = result
            .issues
            .iter()
            .find(|i| i.field == "details")
            .expect("nested object issue");
        assert_eq!(issue.severity, Severity::Error);
    }

    #[test]
    fn array_and_null_properties_are_not_nested_objects() {
        let result = validate_collection(&json!([point_feature(
            json!({"name": "x", "tags": ["a", "b"], "note": null})
        )]));
        assert_eq!(result.valid_features.len(), 1);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn bad_color_and_url_warn_only() {
        let result = validate_collection(&json!([point_feature(
            json!({"name": "x", "color": "bleu", "link": "not a url"})
        )]));
        assert_eq!(result.valid_features.len(), 1);
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn relative_and_absolute_urls_accepted() {
        assert!(looks_like_url("https://example.com/a.jpg"));
        assert!(looks_like_url("./photos/a.jpg"));
        assert!(looks_like_url("/photos/a.jpg"));
        assert!(looks_like_url("photos/a.jpg"));
        assert!(!looks_like_url("not a url"));
    }

    #[test]
    fn color_formats() {
        assert!(is_valid_color("#fff"));
        assert!(is_valid_color("#a1b2c3"));
        assert!(is_valid_color("#a1b2c3ff"));
        assert!(is_valid_color("rgb(10, 20, 30)"));
        assert!(is_valid_color("rgba(10, 20, 30, 0.5)"));
        assert!(!is_valid_color("bleu"));
        assert!(!is_valid_color("#zzz"));
    }

    #[test]
    fn non_string_tags_warn_per_element() {
        let result = validate_collection(&json!([point_feature(
            json!({"name": "x", "tags": ["ok", 2, true]})
        )]));
        assert_eq!(result.valid_features.len(), 1);
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn mixed_collection_keeps_only_clean_features() {
        let result = validate_collection(&json!({
            "type": "FeatureCollection",
            "features": [
                point_feature(json!({"name": "good"})),
                json!({"type": "Feature", "properties": {"name": "no geometry"}}),
                point_feature(json!({"name": "warned", "opacity": 3.0}))
            ]
        }));
        assert_eq!(result.valid_features.len(), 2);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.warning_count(), 1);
    }
}
