use thiserror::Error;

/// Failures contained at the single-layer boundary. A bad layer never aborts
/// the batch; callers record the error on the layer's [`LoadResult`] and
/// keep going.
///
/// [`LoadResult`]: crate::models::LoadResult
#[derive(Debug, Error)]
pub enum LayerLoadError {
    #[error("fetch of {url} returned http status {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no payload available for {0}")]
    PayloadMissing(String),

    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    #[error("layer {layer_id}: {message}")]
    Config { layer_id: String, message: String },

    #[error("style {style_path} failed validation: {}", problems.join("; "))]
    StyleValidation {
        style_path: String,
        problems: Vec<String>,
    },
}

impl LayerLoadError {
    pub fn parse(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LayerLoadError::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn config(layer_id: impl Into<String>, message: impl Into<String>) -> Self {
        LayerLoadError::Config {
            layer_id: layer_id.into(),
            message: message.into(),
        }
    }
}
