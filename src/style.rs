//! Style document loading, validation and memoization.
//!
//! Styles are cached per `profile:layer:style` key for the whole session;
//! debug mode bypasses the cache entirely so style files can be iterated on
//! without restarting the host.

use crate::errors::LayerLoadError;
use crate::fetch::{PayloadSource, style_url};
use crate::validate::is_valid_color;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::warn;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleMetadata {
    pub profile_id: String,
    pub layer_id: String,
    pub style_id: String,
    pub style_path: String,
    pub has_integrated_labels: bool,
    pub loaded_at: DateTime<Utc>,
}

/// A loaded style document. Immutable once cached; a new style id or an
/// explicit cache clear is the only way to get different contents.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleRecord {
    pub style_data: Value,
    /// Present only when the document carries a well-formed label block
    /// with `enabled: true`.
    pub label_config: Option<Value>,
    pub metadata: StyleMetadata,
}

pub fn cache_key(profile_id: &str, layer_id: &str, style_id: &str) -> String {
    format!("{profile_id}:{layer_id}:{style_id}")
}

/// Everything needed to locate one style document.
#[derive(Clone, Copy, Debug)]
pub struct StyleRequest<'a> {
    pub profile_id: &'a str,
    pub layer_id: &'a str,
    pub style_id: &'a str,
    pub file_name: &'a str,
    pub layer_dir: &'a str,
    pub base_path: &'a str,
}

#[derive(Debug, Default)]
pub struct StyleCache {
    entries: DashMap<String, Arc<StyleRecord>>,
    /// Skip both lookup and insert; every load refetches.
    debug_bypass: bool,
}

impl StyleCache {
    pub fn new(debug_bypass: bool) -> Self {
        StyleCache {
            entries: DashMap::new(),
            debug_bypass,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn get(&self, profile_id: &str, layer_id: &str, style_id: &str) -> Option<Arc<StyleRecord>> {
        if self.debug_bypass {
            return None;
        }
        self.entries
            .get(&cache_key(profile_id, layer_id, style_id))
            .map(|e| e.clone())
    }

    /// Fetch, validate and cache a style document. Strict mode fails on
    /// schema problems; lenient mode logs them and returns the best-effort
    /// parsed style for degraded-but-available rendering.
    pub async fn load_and_validate<S: PayloadSource>(
        &self,
        source: &S,
        request: StyleRequest<'_>,
        strict: bool,
    ) -> Result<Arc<StyleRecord>, LayerLoadError> {
        let key = cache_key(request.profile_id, request.layer_id, request.style_id);
        if !self.debug_bypass {
            if let Some(cached) = self.entries.get(&key) {
                return Ok(cached.clone());
            }
        }

        let path = style_url(
            request.base_path,
            request.profile_id,
            request.layer_dir,
            request.file_name,
        );
        let body = source.fetch_text(&path).await?;
        let mut style_data: Value = serde_json::from_str(&body)
            .map_err(|e| LayerLoadError::parse(format!("style {path}"), e))?;

        let problems = validate_style(&style_data);
        if !problems.is_empty() {
            if strict {
                return Err(LayerLoadError::StyleValidation {
                    style_path: path,
                    problems,
                });
            }
            for problem in &problems {
                warn!("style {path}: {problem}");
            }
        }

        let label_config = normalize_label_block(&mut style_data, &path);
        let record = Arc::new(StyleRecord {
            metadata: StyleMetadata {
                profile_id: request.profile_id.to_string(),
                layer_id: request.layer_id.to_string(),
                style_id: request.style_id.to_string(),
                style_path: path,
                has_integrated_labels: label_config.is_some(),
                loaded_at: Utc::now(),
            },
            label_config,
            style_data,
        });

        if self.debug_bypass {
            return Ok(record);
        }
        // The entry guards the check-then-insert: when two loads of the same
        // key race across the fetch await, the first insert wins and both
        // callers get the same record. A cached key stays immutable for the
        // session.
        let record = self.entries.entry(key).or_insert(record).clone();
        Ok(record)
    }

    /// Lenient variant: schema problems never fail the load.
    pub async fn load_lenient<S: PayloadSource>(
        &self,
        source: &S,
        request: StyleRequest<'_>,
    ) -> Result<Arc<StyleRecord>, LayerLoadError> {
        self.load_and_validate(source, request, false).await
    }
}

/// Applies the fail-safe label default and extracts the label config.
///
/// An enabled label block without `visibleByDefault` gets `false`: an
/// ambiguous label-visibility configuration never defaults to visible. The
/// defaulting is warned about, not silent.
fn normalize_label_block(style_data: &mut Value, path: &str) -> Option<Value> {
    let label = style_data.get_mut("label")?.as_object_mut()?;

    if label.get("enabled").and_then(Value::as_bool) != Some(true) {
        return None;
    }

    if !label.contains_key("visibleByDefault") {
        warn!("style {path}: label.enabled is true but visibleByDefault is absent, defaulting to false");
        label.insert("visibleByDefault".to_string(), Value::Bool(false));
    }

    Some(Value::Object(label.clone()))
}

/// Structural checks on a style document. Returns human-readable problems;
/// empty means the document passed.
fn validate_style(style: &Value) -> Vec<String> {
    let mut problems = Vec::new();

    let Some(root) = style.as_object() else {
        problems.push("style document must be a JSON object".to_string());
        return problems;
    };

    for block_name in ["marker", "line", "polygon", "icon"] {
        if let Some(block) = root.get(block_name) {
            match block.as_object() {
                Some(block) => check_style_block(block_name, block, &mut problems),
                None => problems.push(format!("{block_name} must be an object")),
            }
        }
    }

    if let Some(label) = root.get("label") {
        match label.as_object() {
            Some(label) => {
                if let Some(enabled) = label.get("enabled") {
                    if !enabled.is_boolean() {
                        problems.push("label.enabled must be a boolean".to_string());
                    }
                }
                if let Some(visible) = label.get("visibleByDefault") {
                    if !visible.is_boolean() {
                        problems.push("label.visibleByDefault must be a boolean".to_string());
                    }
                }
            }
            None => problems.push("label must be an object".to_string()),
        }
    }

    problems
}

fn check_style_block(
    block_name: &str,
    block: &serde_json::Map<String, Value>,
    problems: &mut Vec<String>,
) {
    for opacity_key in ["opacity", "fillOpacity"] {
        if let Some(value) = block.get(opacity_key) {
            match value.as_f64() {
                Some(n) if (0.0..=1.0).contains(&n) => {}
                _ => problems.push(format!("{block_name}.{opacity_key} must be a number in [0, 1]")),
            }
        }
    }

    if let Some(weight) = block.get("weight") {
        match weight.as_f64() {
            Some(n) if n >= 0.0 => {}
            _ => problems.push(format!("{block_name}.weight must be a non-negative number")),
        }
    }

    for color_key in ["color", "fillColor"] {
        if let Some(value) = block.get(color_key) {
            match value.as_str() {
                Some(s) if is_valid_color(s) => {}
                _ => problems.push(format!(
                    "{block_name}.{color_key} must be a hex or rgb/rgba color"
                )),
            }
        }
    }
}
