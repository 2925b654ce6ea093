//! storefront-product — Product metadata snapshot
//!
//! The canonical Rust representation of a product as returned by the
//! storefront backend (`/api/v1/products/slug/{slug}`). The SSR server
//! fetches it, the meta renderer reads it. Nothing mutates it.
//!
//! The backend is loose about numeric types (prices arrive as numbers or
//! as decimal strings), so decoding here is lenient: a field that cannot be
//! read as a number is treated as absent instead of failing the product.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Maximum length (in characters) of a generated meta description.
pub const META_DESCRIPTION_LIMIT: usize = 160;

/// A product metadata snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProductId>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_keywords: Option<String>,

    /// Main image, either an absolute URL or a backend-relative path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Additional gallery images
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub sale_price: Option<f64>,

    #[serde(default, deserialize_with = "lenient_count", skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// Backend ids are numeric in some deployments and strings (UUIDs) in others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl Product {
    /// Price shown to shoppers: the sale price when one is set, otherwise
    /// the list price.
    pub fn display_price(&self) -> Option<f64> {
        match self.sale_price {
            Some(sale) if sale > 0.0 => Some(sale),
            _ => self.price,
        }
    }

    pub fn in_stock(&self) -> bool {
        self.stock.unwrap_or(0) > 0
    }

    /// Open Graph / Facebook Commerce availability value
    pub fn availability(&self) -> &'static str {
        if self.in_stock() { "in stock" } else { "out of stock" }
    }

    /// schema.org availability URL
    pub fn schema_availability(&self) -> &'static str {
        if self.in_stock() {
            "https://schema.org/InStock"
        } else {
            "https://schema.org/OutOfStock"
        }
    }

    pub fn meta_title_or(&self, site_name: &str) -> String {
        match non_blank(self.meta_title.as_deref()) {
            Some(t) => t.to_string(),
            None => format!("{} | {}", self.name, site_name),
        }
    }

    pub fn meta_description_or_default(&self) -> String {
        if let Some(d) = non_blank(self.meta_description.as_deref()) {
            return d.to_string();
        }
        let generated = format!(
            "Mua {} với giá tốt nhất. {}",
            self.name,
            self.description.as_deref().unwrap_or("")
        );
        truncate_chars(&generated, META_DESCRIPTION_LIMIT)
    }

    pub fn meta_keywords_or_default(&self, site_name: &str) -> String {
        match non_blank(self.meta_keywords.as_deref()) {
            Some(k) => k.to_string(),
            None => format!("{}, mua online, {}", self.name, site_name),
        }
    }

    pub fn category_name(&self) -> &str {
        self.category
            .as_ref()
            .and_then(|c| non_blank(Some(c.name.as_str())))
            .unwrap_or("General")
    }

    /// SKU, falling back to the product id
    pub fn sku_or_id(&self) -> Option<String> {
        non_blank(self.sku.as_deref())
            .map(String::from)
            .or_else(|| self.id.as_ref().map(|id| id.to_string()))
    }

    /// Main image followed by gallery images, without duplicates.
    pub fn all_images(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(1 + self.images.len());
        let candidates = self.image.iter().map(String::as_str)
            .chain(self.images.iter().map(String::as_str));
        for img in candidates {
            if !img.trim().is_empty() && !out.contains(&img) {
                out.push(img);
            }
        }
        out
    }
}

/// Format an amount the way the storefront prints prices: integral values
/// without a fractional part, everything else in shortest form.
pub fn format_amount(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn number_from_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).map(|n| n as i64))
}

/// `images` is sometimes null and sometimes holds non-string junk.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}
