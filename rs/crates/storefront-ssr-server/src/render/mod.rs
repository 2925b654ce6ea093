//! SSR render engines.
//!
//! The UI tree is rendered outside this server. An engine takes the request
//! URL plus the fetched product (if any) and returns the rendered markup
//! together with whatever head tags the UI declared through its
//! head-management library.

mod sidecar;
#[cfg(feature = "v8")]
mod isolate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_product::Product;

pub use sidecar::SidecarRenderer;
#[cfg(feature = "v8")]
pub use isolate::V8Renderer;

/// Head tags collected by the UI's head manager during render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadTags {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub meta: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub script: String,
}

impl HeadTags {
    pub fn is_empty(&self) -> bool {
        [&self.title, &self.meta, &self.link, &self.script]
            .iter()
            .all(|s| s.trim().is_empty())
    }

    pub fn to_html(&self) -> String {
        [&self.title, &self.meta, &self.link, &self.script]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOutput {
    pub html: String,
    #[serde(default)]
    pub head: Option<HeadTags>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The UI threw; carries its stack trace.
    #[error("render failed: {0}")]
    Failed(String),
    #[error("render sidecar unreachable")]
    Transport(#[from] reqwest::Error),
    #[error("malformed render output: {0}")]
    Malformed(String),
    #[cfg(feature = "v8")]
    #[error("render engine stopped")]
    EngineStopped,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, product: Option<&Product>) -> Result<RenderOutput, RenderError>;
}
