//! Render through an HTTP sidecar that hosts the UI's server renderer.
//!
//! Contract: `POST {endpoint}` with `{"url": "...", "product": {...}|null}`;
//! a 2xx answer carries `{"html": "...", "head": {...}|null}`, anything else
//! carries the error stack as its body.

use async_trait::async_trait;
use serde::Serialize;
use storefront_product::Product;

use super::{RenderError, RenderOutput, Renderer};

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    product: Option<&'a Product>,
}

pub struct SidecarRenderer {
    http: reqwest::Client,
    endpoint: String,
}

impl SidecarRenderer {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        SidecarRenderer { http, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl Renderer for SidecarRenderer {
    async fn render(&self, url: &str, product: Option<&Product>) -> Result<RenderOutput, RenderError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&RenderRequest { url, product })
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let detail = if body.trim().is_empty() {
                format!("sidecar answered {}", status)
            } else {
                body
            };
            return Err(RenderError::Failed(detail));
        }

        serde_json::from_str(&body).map_err(|e| RenderError::Malformed(e.to_string()))
    }
}
