mod cache;
mod config;
mod crawler;
mod error;
mod product;
mod render;
mod server;
mod template;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use storefront_render_meta::MetaBuilder;
use tracing_subscriber::EnvFilter;

use crate::cache::MemoryPageCache;
use crate::config::{Args, Mode, RendererKind};
use crate::crawler::CrawlerMatcher;
use crate::product::ProductFetcher;
use crate::render::{Renderer, SidecarRenderer};
use crate::server::{AppState, SsrPipeline};
use crate::template::TemplateSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = args.pipeline();
    init_tracing(cfg.mode);

    let user_agent = format!("storefront-ssr-server/{}", env!("CARGO_PKG_VERSION"));
    let backend_http = reqwest::Client::builder()
        .user_agent(&user_agent)
        .timeout(cfg.backend_timeout)
        .build()
        .context("failed to build backend HTTP client")?;

    let renderer: Arc<dyn Renderer> = match cfg.renderer {
        RendererKind::Sidecar => {
            let http = reqwest::Client::builder()
                .user_agent(&user_agent)
                .build()
                .context("failed to build render HTTP client")?;
            Arc::new(SidecarRenderer::new(http, cfg.render_url.clone()))
        }
        RendererKind::V8 => v8_renderer(&cfg.ssr_bundle)?,
    };

    let state = Arc::new(AppState {
        pipeline: SsrPipeline {
            templates: TemplateSource::new(cfg.template_path.clone()),
            products: ProductFetcher::new(backend_http, &cfg.backend_url, cfg.product_envelope),
            renderer,
            meta: MetaBuilder::new(cfg.site.clone(), cfg.backend_url.clone()),
        },
        crawlers: CrawlerMatcher::new(&cfg.bot_patterns),
        bot_cache: Arc::new(MemoryPageCache::new(cfg.cache_ttl)),
        crawler_timeout: cfg.crawler_timeout,
        static_dir: cfg.static_dir.clone(),
        health_path: cfg.health_path.clone(),
    });

    let listener = server::bind_with_fallback("0.0.0.0", cfg.port).await?;
    let addr = listener.local_addr().context("listener has no local address")?;

    tracing::info!(
        %addr,
        mode = ?cfg.mode,
        template = %state.pipeline.templates.path().display(),
        static_dir = %cfg.static_dir.display(),
        backend = %cfg.backend_url,
        renderer = ?cfg.renderer,
        bot_cache_ttl = ?cfg.cache_ttl,
        bot_patterns = state.crawlers.patterns().len(),
        health = ?cfg.health_path,
        "storefront SSR server v{} listening",
        env!("CARGO_PKG_VERSION")
    );

    axum::serve(listener, server::router(state))
        .await
        .context("server error")?;
    Ok(())
}

fn init_tracing(mode: Mode) {
    let default = match mode {
        Mode::Production => "info",
        Mode::Development => "info,storefront_ssr_server=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "v8")]
fn v8_renderer(bundle: &Path) -> anyhow::Result<Arc<dyn Renderer>> {
    let code = std::fs::read_to_string(bundle)
        .with_context(|| format!("cannot read SSR bundle {}", bundle.display()))?;
    let renderer = render::V8Renderer::spawn(code).context("SSR bundle failed to load")?;
    Ok(Arc::new(renderer))
}

#[cfg(not(feature = "v8"))]
fn v8_renderer(_bundle: &Path) -> anyhow::Result<Arc<dyn Renderer>> {
    anyhow::bail!("the v8 renderer is not compiled in; rebuild with `--features v8` or use --renderer sidecar")
}
