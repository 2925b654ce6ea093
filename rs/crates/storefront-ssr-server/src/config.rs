//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use storefront_render_meta::SiteMeta;

use crate::crawler::DEFAULT_BOT_PATTERNS;
use crate::product::ProductEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Production,
    Development,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RendererKind {
    /// HTTP render sidecar
    Sidecar,
    /// Embedded V8 isolate (requires the `v8` cargo feature)
    V8,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "storefront-ssr-server", version, about = "Storefront SSR server")]
pub struct Args {
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// `production` serves the built client; anything else is development
    #[arg(long, env = "NODE_ENV", default_value = "development")]
    pub node_env: String,

    #[arg(long, env = "BACKEND_URL", default_value = "https://be-ecom-2hfk.onrender.com")]
    pub backend_url: String,

    /// Public origin of the storefront, used for canonical and og:url
    #[arg(long, env = "PUBLIC_URL", default_value = "https://fe-eco.onrender.com")]
    pub public_url: String,

    #[arg(long, env = "CLIENT_DIR", default_value = "dist/client")]
    pub client_dir: PathBuf,

    #[arg(long, env = "PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    #[arg(long, env = "DEV_TEMPLATE", default_value = "index.html")]
    pub dev_template: PathBuf,

    #[arg(long, env = "SSR_RENDERER", value_enum, default_value_t = RendererKind::Sidecar)]
    pub renderer: RendererKind,

    #[arg(long, env = "RENDER_URL", default_value = "http://127.0.0.1:13714/render")]
    pub render_url: String,

    #[arg(long, env = "SSR_BUNDLE", default_value = "dist/server/entry-server.js")]
    pub ssr_bundle: PathBuf,

    /// Seconds a crawler response stays cached; 0 disables the cache
    #[arg(long, env = "BOT_CACHE_TTL", default_value_t = 300)]
    pub bot_cache_ttl: u64,

    /// Seconds before a crawler request gives up with 504
    #[arg(long, env = "CRAWLER_TIMEOUT", default_value_t = 30)]
    pub crawler_timeout: u64,

    #[arg(long, env = "BACKEND_TIMEOUT", default_value_t = 10)]
    pub backend_timeout: u64,

    #[arg(long, env = "PRODUCT_ENVELOPE", value_enum, default_value_t = ProductEnvelope::Wrapped)]
    pub product_envelope: ProductEnvelope,

    /// User-Agent substrings treated as link-preview crawlers
    #[arg(long = "bot-pattern", env = "BOT_PATTERNS", value_delimiter = ',')]
    pub bot_patterns: Vec<String>,

    /// Liveness route outside the storefront's path space; empty disables it
    #[arg(long, env = "HEALTH_PATH", default_value = "/_health")]
    pub health_path: String,

    #[arg(long, env = "SITE_NAME", default_value = "ECom Store")]
    pub site_name: String,

    #[arg(long, env = "SITE_DESCRIPTION", default_value = "Cửa hàng trực tuyến")]
    pub site_description: String,

    #[arg(long, env = "SITE_IMAGE", default_value = "/images/default-og-image.jpg")]
    pub site_image: String,

    #[arg(long, env = "SITE_LOCALE", default_value = "vi_VN")]
    pub site_locale: String,

    #[arg(long, env = "SITE_CURRENCY", default_value = "VND")]
    pub site_currency: String,

    #[arg(long, env = "TWITTER_SITE", default_value = "@ecom_vn")]
    pub twitter_site: String,
}

/// Typed settings for one server instance, derived from [`Args`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: Mode,
    pub port: u16,
    pub backend_url: String,
    pub product_envelope: ProductEnvelope,
    pub backend_timeout: Duration,
    pub template_path: PathBuf,
    pub static_dir: PathBuf,
    pub renderer: RendererKind,
    pub render_url: String,
    pub ssr_bundle: PathBuf,
    pub cache_ttl: Duration,
    pub crawler_timeout: Duration,
    pub bot_patterns: Vec<String>,
    pub health_path: Option<String>,
    pub site: SiteMeta,
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.node_env.trim().eq_ignore_ascii_case("production") {
            Mode::Production
        } else {
            Mode::Development
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        let mode = self.mode();
        let (template_path, static_dir) = match mode {
            Mode::Production => (self.client_dir.join("index.html"), self.client_dir.clone()),
            Mode::Development => (self.dev_template.clone(), self.public_dir.clone()),
        };

        let bot_patterns = if self.bot_patterns.iter().all(|p| p.trim().is_empty()) {
            DEFAULT_BOT_PATTERNS.iter().map(|p| p.to_string()).collect()
        } else {
            self.bot_patterns.clone()
        };

        let health_path = Some(self.health_path.trim())
            .filter(|p| !p.is_empty())
            .map(|p| if p.starts_with('/') { p.to_string() } else { format!("/{}", p) });

        let twitter_site = Some(self.twitter_site.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let site = SiteMeta {
            name: self.site_name.clone(),
            url: self.public_url.trim_end_matches('/').to_string(),
            title: self.site_name.clone(),
            description: self.site_description.clone(),
            default_image: self.site_image.clone(),
            locale: self.site_locale.clone(),
            currency: self.site_currency.clone(),
            twitter_site,
            ..SiteMeta::default()
        };

        PipelineConfig {
            mode,
            port: self.port,
            backend_url: self.backend_url.trim_end_matches('/').to_string(),
            product_envelope: self.product_envelope,
            backend_timeout: Duration::from_secs(self.backend_timeout),
            template_path,
            static_dir,
            renderer: self.renderer,
            render_url: self.render_url.clone(),
            ssr_bundle: self.ssr_bundle.clone(),
            cache_ttl: Duration::from_secs(self.bot_cache_ttl),
            crawler_timeout: Duration::from_secs(self.crawler_timeout),
            bot_patterns,
            health_path,
            site,
        }
    }
}
