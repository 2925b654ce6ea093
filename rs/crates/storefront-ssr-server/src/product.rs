//! Product metadata fetch for product-detail pages.
//!
//! One GET per matching request to `{backend}/api/v1/products/slug/{slug}`.
//! Any failure is logged and reported as "no product" so a backend outage
//! costs SEO richness, never the page.

use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use storefront_product::Product;

const PRODUCT_ROUTE: &str = "/products/";

/// How the backend wraps a product in its response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProductEnvelope {
    /// `{"statusCode": 200, "data": {...product}}`
    Wrapped,
    /// The product object itself
    Bare,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("backend request failed")]
    Transport(#[from] reqwest::Error),
    #[error("backend answered {0}")]
    Status(StatusCode),
    #[error("undecodable product body")]
    Decode(#[from] serde_json::Error),
    #[error("envelope statusCode was {0:?}, expected 200")]
    EnvelopeStatus(Option<i64>),
    #[error("envelope carried no product data")]
    EnvelopeEmpty,
}

#[derive(Deserialize)]
struct WrappedBody {
    #[serde(rename = "statusCode")]
    status_code: Option<i64>,
    data: Option<Product>,
}

/// Extract the slug from a product-detail URL (`/products/{slug}`, optional
/// trailing slash, query and fragment ignored). Slugs are restricted to
/// URL-safe characters so they can be placed in the backend path verbatim.
pub fn product_slug(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let rest = path.strip_prefix(PRODUCT_ROUTE)?;
    let slug = rest.strip_suffix('/').unwrap_or(rest);
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    valid.then_some(slug)
}

/// Decode a backend body according to the configured envelope.
pub fn decode_product(body: &[u8], envelope: ProductEnvelope) -> Result<Product, FetchError> {
    match envelope {
        ProductEnvelope::Bare => Ok(serde_json::from_slice(body)?),
        ProductEnvelope::Wrapped => {
            let wrapped: WrappedBody = serde_json::from_slice(body)?;
            if wrapped.status_code != Some(200) {
                return Err(FetchError::EnvelopeStatus(wrapped.status_code));
            }
            wrapped.data.ok_or(FetchError::EnvelopeEmpty)
        }
    }
}

pub struct ProductFetcher {
    http: reqwest::Client,
    backend_url: String,
    envelope: ProductEnvelope,
}

impl ProductFetcher {
    pub fn new(http: reqwest::Client, backend_url: &str, envelope: ProductEnvelope) -> Self {
        ProductFetcher {
            http,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            envelope,
        }
    }

    pub fn endpoint(&self, slug: &str) -> String {
        format!("{}/api/v1/products/slug/{}", self.backend_url, slug)
    }

    /// Fetch the product for `slug`; `None` on any failure.
    pub async fn fetch(&self, slug: &str) -> Option<Product> {
        match self.try_fetch(slug).await {
            Ok(product) => {
                tracing::debug!(slug, name = %product.name, "product fetched");
                Some(product)
            }
            Err(e) => {
                tracing::warn!(
                    slug,
                    error = %crate::error::chain(&e, ": "),
                    "product fetch failed, using generic metadata"
                );
                None
            }
        }
    }

    pub async fn try_fetch(&self, slug: &str) -> Result<Product, FetchError> {
        let url = self.endpoint(slug);
        tracing::debug!(%url, "fetching product");
        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = resp.bytes().await?;
        decode_product(&body, self.envelope)
    }
}
