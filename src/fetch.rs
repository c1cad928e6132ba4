//! Payload acquisition boundary: layer data and style documents reachable
//! over HTTP GET, or pre-supplied in memory (cached payloads, tests).

use crate::errors::LayerLoadError;
use crate::models::LayerDescriptor;
use ahash::AHashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Where raw payload text comes from. The pipeline only ever asks for text;
/// parsing stays on the caller's side of this seam.
pub trait PayloadSource: Send + Sync {
    fn fetch_text(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<String, LayerLoadError>> + Send;
}

/// Resolve the data location for a descriptor: explicit `url` wins,
/// otherwise `dataFile` under the profile's layer directory.
pub fn layer_data_url(
    base_path: &str,
    profile_id: &str,
    descriptor: &LayerDescriptor,
) -> Result<String, LayerLoadError> {
    if let Some(url) = &descriptor.url {
        return Ok(url.clone());
    }
    if let Some(file) = &descriptor.data_file {
        return Ok(format!(
            "{}/{}/{}/{}",
            base_path.trim_end_matches('/'),
            profile_id,
            descriptor.directory(),
            file
        ));
    }
    Err(LayerLoadError::config(
        &descriptor.id,
        "descriptor has neither url nor dataFile",
    ))
}

pub fn style_url(base_path: &str, profile_id: &str, layer_dir: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}/styles/{}",
        base_path.trim_end_matches('/'),
        profile_id,
        layer_dir,
        file_name
    )
}

/// HTTP-backed source. One shared reqwest client, cloned cheaply.
#[derive(Clone, Debug, Default)]
pub struct HttpPayloadSource {
    client: reqwest::Client,
}

impl HttpPayloadSource {
    pub fn new(client: reqwest::Client) -> Self {
        HttpPayloadSource { client }
    }
}

impl PayloadSource for HttpPayloadSource {
    async fn fetch_text(&self, url: &str) -> Result<String, LayerLoadError> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|source| LayerLoadError::Network {
                    url: url.to_string(),
                    source,
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LayerLoadError::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|source| LayerLoadError::Network {
                url: url.to_string(),
                source,
            })
    }
}

/// In-memory source for pre-supplied payloads and tests. Counts fetches and
/// tracks the peak number of concurrently in-flight requests, so batch
/// concurrency bounds are observable without a network.
#[derive(Debug, Default)]
pub struct StaticPayloadSource {
    payloads: AHashMap<String, String>,
    latency: Duration,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StaticPayloadSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.payloads.insert(url.into(), body.into());
        self
    }

    /// Simulated transfer time; lets paused-clock tests observe overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.payloads.insert(url.into(), body.into());
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl PayloadSource for StaticPayloadSource {
    async fn fetch_text(&self, url: &str) -> Result<String, LayerLoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = self
            .payloads
            .get(url)
            .cloned()
            .ok_or_else(|| LayerLoadError::PayloadMissing(url.to_string()));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> LayerDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn explicit_url_wins_over_data_file() {
        let d = descriptor(json!({
            "id": "trails",
            "url": "https://example.com/trails.geojson",
            "dataFile": "trails.json"
        }));
        assert_eq!(
            layer_data_url("/profiles", "alpine", &d).unwrap(),
            "https://example.com/trails.geojson"
        );
    }

    #[test]
    fn data_file_resolves_under_layer_directory() {
        let d = descriptor(json!({"id": "huts", "dataFile": "huts.json"}));
        assert_eq!(
            layer_data_url("/profiles/", "alpine", &d).unwrap(),
            "/profiles/alpine/huts/huts.json"
        );

        let d = descriptor(json!({"id": "huts", "dataFile": "huts.json", "layerDirectory": "shelters"}));
        assert_eq!(
            layer_data_url("/profiles", "alpine", &d).unwrap(),
            "/profiles/alpine/shelters/huts.json"
        );
    }

    #[test]
    fn missing_source_is_a_config_error() {
        let d = descriptor(json!({"id": "empty"}));
        let err = layer_data_url("/profiles", "alpine", &d).unwrap_err();
        assert!(matches!(err, LayerLoadError::Config { .. }));
    }

    #[test]
    fn style_urls_live_under_styles_dir() {
        assert_eq!(
            style_url("/profiles", "alpine", "huts", "winter.json"),
            "/profiles/alpine/huts/styles/winter.json"
        );
    }

    #[tokio::test]
    async fn static_source_serves_and_counts() {
        let source = StaticPayloadSource::new().with_payload("a.json", "{}");
        assert_eq!(source.fetch_text("a.json").await.unwrap(), "{}");
        let err = source.fetch_text("missing.json").await.unwrap_err();
        assert!(matches!(err, LayerLoadError::PayloadMissing(_)));
        assert_eq!(source.fetch_count(), 2);
    }
}
