//! HTML shell loading and placeholder substitution.

use std::path::{Path, PathBuf};

use storefront_product::Product;
use storefront_render_meta::{escape_attr, escape_html, PageMeta};

use crate::error::AppError;

pub const HEAD_MARKER: &str = "<!--app-head-->";
pub const HTML_MARKER: &str = "<!--app-html-->";
pub const SCRIPTS_MARKER: &str = "<!--app-scripts-->";
pub const META_TITLE_MARKER: &str = "<!--ssr-meta-title-->";
pub const META_DESCRIPTION_MARKER: &str = "<!--ssr-meta-description-->";
pub const META_IMAGE_MARKER: &str = "<!--ssr-meta-image-->";
pub const META_URL_MARKER: &str = "<!--ssr-meta-url-->";

/// The template file, read from disk on every request.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    path: PathBuf,
}

impl TemplateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TemplateSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<String, AppError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| AppError::Template { path: self.path.clone(), source })
    }
}

/// Values substituted into one page.
pub struct Slots<'a> {
    pub head: &'a str,
    pub html: &'a str,
    pub scripts: &'a str,
    pub meta: &'a PageMeta,
}

/// Replace each marker at its first occurrence in the template. Missing
/// markers are skipped. Positions are taken from the template alone, so
/// substituted content is never scanned for markers.
pub fn compose(template: &str, slots: &Slots<'_>) -> String {
    let meta = slots.meta;
    let replacements = [
        (HEAD_MARKER, slots.head.to_string()),
        (HTML_MARKER, slots.html.to_string()),
        (SCRIPTS_MARKER, slots.scripts.to_string()),
        (META_TITLE_MARKER, escape_html(&meta.title)),
        (META_DESCRIPTION_MARKER, escape_attr(&meta.description)),
        (META_IMAGE_MARKER, escape_attr(&meta.image)),
        (META_URL_MARKER, escape_attr(&meta.url)),
    ];

    let mut hits: Vec<(usize, usize, &str)> = replacements
        .iter()
        .filter_map(|(marker, value)| {
            template.find(marker).map(|at| (at, marker.len(), value.as_str()))
        })
        .collect();
    hits.sort_by_key(|(at, _, _)| *at);

    let extra: usize = hits.iter().map(|(_, _, v)| v.len()).sum();
    let mut page = String::with_capacity(template.len() + extra);
    let mut cursor = 0;
    for (at, len, value) in hits {
        page.push_str(&template[cursor..at]);
        page.push_str(value);
        cursor = at + len;
    }
    page.push_str(&template[cursor..]);
    page
}

/// Hydration payload for the client: the product the server rendered with.
pub fn hydration_script(product: Option<&Product>) -> String {
    let Some(product) = product else { return String::new() };
    match serde_json::to_value(product) {
        Ok(json) => format!(
            "<script>window.__SSR_PRODUCT__={};</script>",
            storefront_render_meta::script_safe_json(&json)
        ),
        Err(e) => {
            tracing::warn!(error = %e, "cannot serialize product for hydration");
            String::new()
        }
    }
}
