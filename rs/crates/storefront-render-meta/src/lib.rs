//! storefront-render-meta — Render SEO/social head tags for storefront pages
//!
//! Produces the `<head>` block injected by the SSR server: basic meta tags,
//! Open Graph, Twitter Card, Facebook Commerce `product:*` properties and a
//! schema.org `Product`/`Offer` JSON-LD script. Every interpolated value is
//! escaped for the context it lands in.

use chrono::{Days, NaiveDate};
use serde_json::json;
use storefront_product::{format_amount, Product};

/// Days a quoted offer price stays valid in the JSON-LD `Offer`.
const PRICE_VALID_DAYS: u64 = 30;

/// Site-wide defaults used for pages without a product and as fallbacks.
#[derive(Debug, Clone)]
pub struct SiteMeta {
    pub name: String,
    /// Public base URL of the storefront (no trailing slash)
    pub url: String,
    pub title: String,
    pub description: String,
    pub keywords: String,
    /// Default share image, absolute or relative to `url`
    pub default_image: String,
    pub locale: String,
    pub currency: String,
    pub twitter_site: Option<String>,
}

impl Default for SiteMeta {
    fn default() -> Self {
        SiteMeta {
            name: "ECom Store".into(),
            url: "https://fe-eco.onrender.com".into(),
            title: "ECom Store".into(),
            description: "Cửa hàng trực tuyến".into(),
            keywords: "ecommerce, shopping, điện tử, mua online".into(),
            default_image: "/images/default-og-image.jpg".into(),
            locale: "vi_VN".into(),
            currency: "VND".into(),
            twitter_site: Some("@ecom_vn".into()),
        }
    }
}

/// Everything the server injects for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
    pub image: String,
    pub url: String,
    /// Ready-to-inject HTML for `<!--app-head-->`
    pub head_html: String,
}

pub struct MetaBuilder {
    site: SiteMeta,
    /// Base URL prepended to backend-relative product image paths
    image_base: String,
}

impl MetaBuilder {
    pub fn new(site: SiteMeta, image_base: impl Into<String>) -> Self {
        let image_base = image_base.into().trim_end_matches('/').to_string();
        MetaBuilder { site, image_base }
    }

    /// Absolute URL for a page path such as `/products/x?ref=fb`.
    pub fn page_url(&self, path: &str) -> String {
        join_url(&self.site.url, path)
    }

    /// Resolve a product image path: blank → site default, absolute as-is,
    /// otherwise relative to the backend.
    pub fn resolve_image(&self, path: Option<&str>) -> String {
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if is_absolute(p) => p.to_string(),
            Some(p) => join_url(&self.image_base, p),
            None => self.default_image(),
        }
    }

    fn default_image(&self) -> String {
        let img = self.site.default_image.as_str();
        if is_absolute(img) { img.to_string() } else { join_url(&self.site.url, img) }
    }

    /// Build the head block for a page. `today` anchors the offer validity
    /// date so output is deterministic for a given day.
    pub fn build(&self, product: Option<&Product>, page_url: &str, today: NaiveDate) -> PageMeta {
        match product {
            Some(p) => self.build_product(p, page_url, today),
            None => self.build_generic(page_url),
        }
    }

    fn build_generic(&self, page_url: &str) -> PageMeta {
        let site = &self.site;
        let image = self.default_image();

        let mut html = String::with_capacity(2048);
        write_basic(&mut html, &site.title, &site.description, &site.keywords, &site.name, page_url);

        meta_property(&mut html, "og:type", "website");
        meta_property(&mut html, "og:title", &site.title);
        meta_property(&mut html, "og:description", &site.description);
        meta_property(&mut html, "og:image", &image);
        meta_property(&mut html, "og:url", page_url);
        meta_property(&mut html, "og:site_name", &site.name);
        meta_property(&mut html, "og:locale", &site.locale);

        self.write_twitter(&mut html, &site.title, &site.description, &image);

        PageMeta {
            title: site.title.clone(),
            description: site.description.clone(),
            image,
            url: page_url.to_string(),
            head_html: html,
        }
    }

    fn build_product(&self, product: &Product, page_url: &str, today: NaiveDate) -> PageMeta {
        let site = &self.site;
        let title = product.meta_title_or(&site.name);
        let description = product.meta_description_or_default();
        let keywords = product.meta_keywords_or_default(&site.name);
        let image = self.resolve_image(product.image.as_deref());

        let mut html = String::with_capacity(4096);
        write_basic(&mut html, &title, &description, &keywords, &site.name, page_url);

        meta_property(&mut html, "og:type", "product");
        meta_property(&mut html, "og:title", &title);
        meta_property(&mut html, "og:description", &description);
        meta_property(&mut html, "og:image", &image);
        meta_property(&mut html, "og:image:width", "800");
        meta_property(&mut html, "og:image:height", "600");
        meta_property(&mut html, "og:url", page_url);
        meta_property(&mut html, "og:site_name", &site.name);
        meta_property(&mut html, "og:locale", &site.locale);

        // Facebook Commerce
        let brand = product.brand.as_deref().filter(|b| !b.trim().is_empty()).unwrap_or(&site.name);
        meta_property(&mut html, "product:brand", brand);
        meta_property(&mut html, "product:availability", product.availability());
        meta_property(&mut html, "product:condition", "new");
        if let Some(price) = product.display_price() {
            meta_property(&mut html, "product:price:amount", &format_amount(price));
        }
        meta_property(&mut html, "product:price:currency", &site.currency);
        if let Some(id) = &product.id {
            meta_property(&mut html, "product:retailer_item_id", &id.to_string());
        }
        meta_property(&mut html, "product:category", product.category_name());

        self.write_twitter(&mut html, &title, &description, &image);

        let ld = self.product_json_ld(product, page_url, today);
        html.push_str("<script type=\"application/ld+json\">");
        html.push_str(&script_safe_json(&ld));
        html.push_str("</script>\n");

        PageMeta {
            title,
            description,
            image,
            url: page_url.to_string(),
            head_html: html,
        }
    }

    /// schema.org `Product` with a nested `Offer`.
    pub fn product_json_ld(&self, product: &Product, page_url: &str, today: NaiveDate) -> serde_json::Value {
        let site = &self.site;
        let images: Vec<String> = {
            let all = product.all_images();
            if all.is_empty() {
                vec![self.default_image()]
            } else {
                all.into_iter().map(|p| self.resolve_image(Some(p))).collect()
            }
        };
        let valid_until = today
            .checked_add_days(Days::new(PRICE_VALID_DAYS))
            .unwrap_or(today)
            .format("%Y-%m-%d")
            .to_string();
        let brand = product.brand.as_deref().filter(|b| !b.trim().is_empty()).unwrap_or(&site.name);

        json!({
            "@context": "https://schema.org/",
            "@type": "Product",
            "name": product.name,
            "image": images,
            "description": product.description.as_deref().unwrap_or(""),
            "sku": product.sku_or_id(),
            "brand": { "@type": "Brand", "name": brand },
            "category": product.category_name(),
            "offers": {
                "@type": "Offer",
                "url": page_url,
                "priceCurrency": site.currency,
                "price": product.display_price().map(format_amount),
                "priceValidUntil": valid_until,
                "availability": product.schema_availability(),
                "itemCondition": "https://schema.org/NewCondition",
                "seller": { "@type": "Organization", "name": site.name }
            }
        })
    }

    fn write_twitter(&self, html: &mut String, title: &str, description: &str, image: &str) {
        meta_name(html, "twitter:card", "summary_large_image");
        meta_name(html, "twitter:title", title);
        meta_name(html, "twitter:description", description);
        meta_name(html, "twitter:image", image);
        if let Some(handle) = &self.site.twitter_site {
            meta_name(html, "twitter:site", handle);
        }
    }
}

fn write_basic(html: &mut String, title: &str, description: &str, keywords: &str, author: &str, url: &str) {
    html.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    meta_name(html, "description", description);
    meta_name(html, "keywords", keywords);
    meta_name(html, "robots", "index, follow");
    meta_name(html, "author", author);
    html.push_str(&format!("<link rel=\"canonical\" href=\"{}\" />\n", escape_attr(url)));
}

fn meta_property(html: &mut String, property: &str, content: &str) {
    html.push_str(&format!(
        "<meta property=\"{}\" content=\"{}\" />\n",
        property,
        escape_attr(content)
    ));
}

fn meta_name(html: &mut String, name: &str, content: &str) {
    html.push_str(&format!(
        "<meta name=\"{}\" content=\"{}\" />\n",
        name,
        escape_attr(content)
    ));
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//")
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Escape text content.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a value for a double- or single-quoted attribute.
pub fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Serialize JSON for embedding inside a `<script>` element.
///
/// `<` never appears literally, so no value can close the element or open a
/// comment. `<` is still valid JSON for every consumer.
pub fn script_safe_json(value: &serde_json::Value) -> String {
    value.to_string().replace('<', "\\u003c")
}
