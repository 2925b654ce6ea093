use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, USER_AGENT, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use storefront_render_meta::MetaBuilder;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::cache::PageCache;
use crate::crawler::CrawlerMatcher;
use crate::error::AppError;
use crate::product::{product_slug, ProductFetcher};
use crate::render::Renderer;
use crate::template::{compose, hydration_script, Slots, TemplateSource};

const X_ROBOTS_TAG: HeaderName = HeaderName::from_static("x-robots-tag");
const CRAWLER_CACHE_CONTROL: &str = "public, max-age=300";
const BROWSER_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
/// The shell file sits next to the built assets; it is only ever served rendered.
const INDEX_PATH: &str = "/index.html";

// ── Pipeline ────────────────────────────────────────────────────────

/// load template → fetch product (product pages only) → render →
/// assemble meta → compose.
pub struct SsrPipeline {
    pub templates: TemplateSource,
    pub products: ProductFetcher,
    pub renderer: Arc<dyn Renderer>,
    pub meta: MetaBuilder,
}

impl SsrPipeline {
    /// Render the page for `url` (path plus query, as received).
    pub async fn render(&self, url: &str) -> Result<String, AppError> {
        let template = self.templates.load().await?;

        let product = match product_slug(url) {
            Some(slug) => self.products.fetch(slug).await,
            None => None,
        };

        let rendered = self.renderer.render(url, product.as_ref()).await?;

        let page_url = self.meta.page_url(url);
        let meta = self
            .meta
            .build(product.as_ref(), &page_url, chrono::Utc::now().date_naive());

        let head = match &rendered.head {
            Some(tags) if !tags.is_empty() => tags.to_html(),
            Some(_) => meta.head_html.clone(),
            None => {
                tracing::warn!(url, "renderer returned no head context, using generated meta");
                meta.head_html.clone()
            }
        };
        let scripts = hydration_script(product.as_ref());

        Ok(compose(
            &template,
            &Slots {
                head: &head,
                html: &rendered.html,
                scripts: &scripts,
                meta: &meta,
            },
        ))
    }
}

// ── Shared state ────────────────────────────────────────────────────

pub struct AppState {
    pub pipeline: SsrPipeline,
    pub crawlers: CrawlerMatcher,
    pub bot_cache: Arc<dyn PageCache>,
    pub crawler_timeout: Duration,
    pub static_dir: PathBuf,
    /// Liveness route; `None` leaves every path to the storefront.
    pub health_path: Option<String>,
}

// ── Router ──────────────────────────────────────────────────────────

/// Health route (if configured), then static assets, then SSR for
/// everything else.
pub fn router(state: Arc<AppState>) -> Router {
    let ssr = any(render_page).with_state(state.clone());
    let assets = ServeDir::new(&state.static_dir)
        .append_index_html_on_directories(false)
        .call_fallback_on_method_not_allowed(true)
        .fallback(ssr.clone());

    let mut app = Router::new().route(INDEX_PATH, ssr);
    if let Some(path) = state.health_path.as_deref().filter(|p| *p != INDEX_PATH) {
        app = app.route(path, get(health));
    }
    app.fallback_service(assets)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Bind `host:port`; if the port is taken, try `port + 1` once.
pub async fn bind_with_fallback(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            let next = port.checked_add(1).context("no port above 65535 to fall back to")?;
            tracing::error!(port, "port already in use, trying {}", next);
            let listener = TcpListener::bind((host, next))
                .await
                .with_context(|| format!("cannot bind {}:{}", host, next))?;
            tracing::info!(port = next, "bound fallback port");
            Ok(listener)
        }
        Err(e) => Err(e).with_context(|| format!("cannot bind {}:{}", host, port)),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn render_page(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());

    if !state.crawlers.is_crawler(user_agent) {
        let html = state.pipeline.render(&url).await?;
        return Ok(page_response(html, false));
    }

    if let Some(hit) = state.bot_cache.get(&url) {
        tracing::debug!(%url, "bot cache hit");
        return Ok(page_response(hit.html, true));
    }
    tracing::debug!(%url, ?user_agent, "bot cache miss, rendering");

    let html = tokio::time::timeout(state.crawler_timeout, state.pipeline.render(&url))
        .await
        .map_err(|_| AppError::Timeout(state.crawler_timeout))??;
    state.bot_cache.put(url, html.clone());
    tracing::debug!(entries = state.bot_cache.len(), "bot cache stored");
    Ok(page_response(html, true))
}

fn page_response(html: String, crawler: bool) -> Response {
    let cache_control = if crawler { CRAWLER_CACHE_CONTROL } else { BROWSER_CACHE_CONTROL };
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8")),
            (CACHE_CONTROL, HeaderValue::from_static(cache_control)),
            (X_ROBOTS_TAG, HeaderValue::from_static("index, follow")),
            (VARY, HeaderValue::from_static("User-Agent")),
        ],
        html,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, MemoryPageCache};
    use crate::product::ProductEnvelope;
    use crate::render::{HeadTags, RenderError, RenderOutput};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storefront_product::Product;
    use storefront_render_meta::SiteMeta;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEMPLATE: &str = "<!doctype html><html><head><!--app-head--></head>\
        <body><div id=\"root\"><!--app-html--></div><!--app-scripts--></body></html>";
    const FB: &str = "facebookexternalhit/1.1 (+http://www.facebook.com/externalhit_uatext.php)";
    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Chrome/126.0";
    const TTL: Duration = Duration::from_secs(300);

    #[derive(Default)]
    struct StubRenderer {
        fail: bool,
        head: Option<HeadTags>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Renderer for StubRenderer {
        async fn render(&self, url: &str, product: Option<&Product>) -> Result<RenderOutput, RenderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(RenderError::Failed(
                    "TypeError: Cannot read properties of undefined (reading 'map')\n    at ProductGrid".into(),
                ));
            }
            let name = product.map(|p| p.name.as_str()).unwrap_or("home");
            Ok(RenderOutput {
                html: format!("<main data-render=\"{}\">{} {}</main>", n, name, url),
                head: self.head.clone(),
            })
        }
    }

    struct Harness {
        app: Router,
        renderer: Arc<StubRenderer>,
        cache: Arc<MemoryPageCache>,
        clock: Arc<ManualClock>,
        dir: tempfile::TempDir,
    }

    fn harness(backend: &str, renderer: StubRenderer) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("index.html");
        std::fs::write(&template, TEMPLATE).unwrap();
        let static_dir = dir.path().join("public");
        std::fs::create_dir(&static_dir).unwrap();
        std::fs::write(static_dir.join("robots.txt"), "User-agent: *\n").unwrap();

        let renderer = Arc::new(renderer);
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(MemoryPageCache::with_clock(TTL, clock.clone()));
        let site = SiteMeta { url: "https://shop.example".into(), ..SiteMeta::default() };

        let state = Arc::new(AppState {
            pipeline: SsrPipeline {
                templates: TemplateSource::new(template),
                products: ProductFetcher::new(reqwest::Client::new(), backend, ProductEnvelope::Wrapped),
                renderer: renderer.clone(),
                meta: MetaBuilder::new(site, backend),
            },
            crawlers: CrawlerMatcher::default(),
            bot_cache: cache.clone(),
            crawler_timeout: Duration::from_secs(1),
            static_dir,
            health_path: Some("/_health".into()),
        });

        Harness { app: router(state), renderer, cache, clock, dir }
    }

    async fn get(app: &Router, uri: &str, ua: &str) -> (StatusCode, HeaderMap, String) {
        let req = Request::builder()
            .uri(uri)
            .header(USER_AGENT, ua)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn mount_product(backend: &MockServer, slug: &str, data: serde_json::Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/products/slug/{}", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "statusCode": 200,
                "data": data,
            })))
            .expect(times)
            .mount(backend)
            .await;
    }

    #[tokio::test]
    async fn test_product_page_carries_product_meta() {
        let backend = MockServer::start().await;
        mount_product(
            &backend,
            "tai-nghe",
            serde_json::json!({
                "id": 42,
                "name": "Tai nghe",
                "meta_title": "Tai nghe chống ồn",
                "price": 350000,
                "sale_price": 299000,
                "stock": 3,
                "image": "/uploads/tai-nghe.jpg"
            }),
            1,
        )
        .await;
        let h = harness(&backend.uri(), StubRenderer::default());

        let (status, headers, body) = get(&h.app, "/products/tai-nghe", BROWSER).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(headers[CACHE_CONTROL], BROWSER_CACHE_CONTROL);
        assert_eq!(headers["x-robots-tag"], "index, follow");
        assert!(body.contains("<meta property=\"og:title\" content=\"Tai nghe chống ồn\" />"));
        assert!(body.contains("<meta property=\"product:price:amount\" content=\"299000\" />"));
        assert!(body.contains("<meta property=\"og:url\" content=\"https://shop.example/products/tai-nghe\" />"));
        assert!(body.contains("application/ld+json"));
        assert!(body.contains("<main data-render=\"0\">Tai nghe /products/tai-nghe</main>"));
        assert!(body.contains("<script>window.__SSR_PRODUCT__={"));
    }

    #[tokio::test]
    async fn test_product_title_falls_back_and_price_without_sale() {
        let backend = MockServer::start().await;
        mount_product(&backend, "ban", serde_json::json!({ "name": "Bàn", "price": "1500000" }), 1).await;
        let h = harness(&backend.uri(), StubRenderer::default());

        let (_, _, body) = get(&h.app, "/products/ban", BROWSER).await;
        assert!(body.contains("<meta property=\"og:title\" content=\"Bàn | ECom Store\" />"));
        assert!(body.contains("<meta property=\"product:price:amount\" content=\"1500000\" />"));
    }

    #[tokio::test]
    async fn test_backend_failure_yields_generic_block() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "statusCode": 404,
                "message": "Product not found"
            })))
            .mount(&backend)
            .await;
        let h = harness(&backend.uri(), StubRenderer::default());

        let (status, _, body) = get(&h.app, "/products/missing", BROWSER).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<title>ECom Store</title>"));
        assert!(body.contains("<meta property=\"og:type\" content=\"website\" />"));
        assert!(!body.contains("product:price:amount"));
        assert!(!body.contains("__SSR_PRODUCT__"));
    }

    #[tokio::test]
    async fn test_crawler_hits_cache_within_ttl() {
        let backend = MockServer::start().await;
        mount_product(&backend, "ghe", serde_json::json!({ "name": "Ghế", "price": 90000 }), 1).await;
        let h = harness(&backend.uri(), StubRenderer::default());

        let (s1, headers, first) = get(&h.app, "/products/ghe", FB).await;
        assert_eq!(s1, StatusCode::OK);
        assert_eq!(headers[CACHE_CONTROL], CRAWLER_CACHE_CONTROL);

        h.clock.advance(Duration::from_secs(120));
        let (_, _, second) = get(&h.app, "/products/ghe", FB).await;
        assert_eq!(first, second);
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
        // the backend mock verifies a single fetch on drop
    }

    #[tokio::test]
    async fn test_crawler_rerenders_after_ttl() {
        let backend = MockServer::start().await;
        mount_product(&backend, "ghe", serde_json::json!({ "name": "Ghế", "price": 90000 }), 2).await;
        let h = harness(&backend.uri(), StubRenderer::default());

        let (_, _, first) = get(&h.app, "/products/ghe", FB).await;
        let stored = h.cache.get("/products/ghe").unwrap().stored_at;

        h.clock.advance(TTL + Duration::from_secs(1));
        let (_, _, second) = get(&h.app, "/products/ghe", FB).await;
        assert_ne!(first, second);
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 2);
        assert!(h.cache.get("/products/ghe").unwrap().stored_at > stored);
    }

    #[tokio::test]
    async fn test_browsers_bypass_cache() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        get(&h.app, "/about", BROWSER).await;
        get(&h.app, "/about", BROWSER).await;
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 2);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_key_includes_query() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        get(&h.app, "/?ref=fb", FB).await;
        assert!(h.cache.get("/?ref=fb").is_some());
        assert!(h.cache.get("/").is_none());
    }

    #[tokio::test]
    async fn test_home_replaces_app_html() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        let (status, _, body) = get(&h.app, "/", BROWSER).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<div id=\"root\"><main data-render=\"0\">home /</main></div>"));
        assert!(!body.contains("<!--app-html-->"));
        assert!(!body.contains("<!--app-head-->"));
        assert!(!body.contains("<!--app-scripts-->"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_still_renders() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        let (status, _, body) = get(&h.app, "/products/unknown-slug", BROWSER).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<title>ECom Store</title>"));
        assert!(body.contains("home /products/unknown-slug"));
    }

    #[tokio::test]
    async fn test_render_failure_is_500_with_stack() {
        let h = harness("http://127.0.0.1:9", StubRenderer { fail: true, ..Default::default() });
        let (status, headers, body) = get(&h.app, "/", BROWSER).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert!(body.contains("TypeError: Cannot read properties of undefined"));
        assert!(body.contains("at ProductGrid"));
    }

    #[tokio::test]
    async fn test_failed_crawler_render_is_not_cached() {
        let h = harness("http://127.0.0.1:9", StubRenderer { fail: true, ..Default::default() });
        let (status, _, _) = get(&h.app, "/", FB).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_slow_crawler_render_times_out() {
        let slow = StubRenderer { delay: Some(Duration::from_secs(10)), ..Default::default() };
        let h = harness("http://127.0.0.1:9", slow);
        let (status, _, body) = get(&h.app, "/", FB).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert!(body.contains("render timed out"));
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn test_renderer_head_takes_precedence() {
        let head = HeadTags { title: "<title data-rh=\"true\">Giỏ hàng</title>".into(), ..Default::default() };
        let h = harness("http://127.0.0.1:9", StubRenderer { head: Some(head), ..Default::default() });
        let (_, _, body) = get(&h.app, "/cart", BROWSER).await;
        assert!(body.contains("<head><title data-rh=\"true\">Giỏ hàng</title></head>"));
        assert!(!body.contains("og:site_name"));
    }

    #[tokio::test]
    async fn test_missing_template_is_500() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        std::fs::remove_file(h.dir.path().join("index.html")).unwrap();
        let (status, _, body) = get(&h.app, "/", BROWSER).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("cannot read template"));
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_static_assets_and_health() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());

        let (status, _, body) = get(&h.app, "/robots.txt", BROWSER).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "User-agent: *\n");

        let (status, _, body) = get(&h.app, "/_health", BROWSER).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_health_path_does_not_shadow_storefront_routes() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        let (status, _, body) = get(&h.app, "/health", BROWSER).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("home /health"));
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_index_html_in_static_dir_is_rendered() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        std::fs::write(h.dir.path().join("public").join("index.html"), TEMPLATE).unwrap();

        let (status, _, body) = get(&h.app, "/index.html", FB).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
        assert!(!body.contains("<!--app-html-->"));
        assert!(!body.contains("<!--app-head-->"));
        assert!(body.contains("<meta property=\"og:site_name\""));
    }

    #[tokio::test]
    async fn test_pages_vary_on_user_agent() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        for ua in [BROWSER, FB] {
            let (_, headers, _) = get(&h.app, "/about", ua).await;
            assert!(headers
                .get_all(VARY)
                .iter()
                .any(|v| v.to_str().unwrap().eq_ignore_ascii_case("user-agent")));
        }
    }

    #[tokio::test]
    async fn test_bind_falls_back_to_next_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let listener = bind_with_fallback("127.0.0.1", port).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port + 1);
    }

    #[tokio::test]
    async fn test_non_get_falls_through_to_render() {
        let h = harness("http://127.0.0.1:9", StubRenderer::default());
        let req = Request::builder()
            .method("POST")
            .uri("/robots.txt")
            .body(Body::empty())
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
    }
}
