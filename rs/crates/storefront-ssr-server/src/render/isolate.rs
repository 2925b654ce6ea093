//! Embedded V8 render engine.
//!
//! One dedicated thread owns the isolate and evaluates the SSR bundle once.
//! The bundle is loaded as an ES module, the format a bundler's SSR build
//! emits, and must be self-contained: imports are not resolved. It either
//! exports `render(url, product)` or assigns `globalThis.render`; the
//! function returns `{html, helmetContext}`. Requests reach the thread over a
//! channel and get their result back on a oneshot, so renders are
//! serialized on that thread while request tasks stay async.

use std::thread;

use async_trait::async_trait;
use storefront_product::Product;
use tokio::sync::{mpsc, oneshot};

use super::{RenderError, RenderOutput, Renderer};

struct RenderJob {
    url: String,
    product_json: String,
    reply: oneshot::Sender<Result<RenderOutput, RenderError>>,
}

pub struct V8Renderer {
    tx: mpsc::UnboundedSender<RenderJob>,
}

impl V8Renderer {
    /// Start the render thread and evaluate `bundle` in a fresh isolate.
    /// Fails if the bundle does not compile or throws while loading.
    pub fn spawn(bundle: String) -> Result<Self, RenderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        thread::Builder::new()
            .name("ssr-v8".into())
            .spawn(move || v8_thread(bundle, rx, ready_tx))
            .map_err(|e| RenderError::Failed(format!("cannot start render thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(V8Renderer { tx }),
            Ok(Err(msg)) => Err(RenderError::Failed(msg)),
            Err(_) => Err(RenderError::EngineStopped),
        }
    }
}

#[async_trait]
impl Renderer for V8Renderer {
    async fn render(&self, url: &str, product: Option<&Product>) -> Result<RenderOutput, RenderError> {
        let product_json = match product {
            Some(p) => serde_json::to_string(p).map_err(|e| RenderError::Malformed(e.to_string()))?,
            None => "null".to_string(),
        };
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RenderJob { url: url.to_string(), product_json, reply })
            .map_err(|_| RenderError::EngineStopped)?;
        rx.await.map_err(|_| RenderError::EngineStopped)?
    }
}

fn v8_thread(
    bundle: String,
    mut rx: mpsc::UnboundedReceiver<RenderJob>,
    ready: std::sync::mpsc::Sender<Result<(), String>>,
) {
    use std::sync::Once;
    static V8_INIT: Once = Once::new();
    V8_INIT.call_once(|| {
        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform);
        v8::V8::initialize();
    });

    let mut isolate = v8::Isolate::new(v8::CreateParams::default());

    let global_context;
    {
        let handle_scope = &mut v8::HandleScope::new(&mut isolate);
        let context = v8::Context::new(handle_scope, Default::default());
        global_context = v8::Global::new(handle_scope, context);
        let scope = &mut v8::ContextScope::new(handle_scope, context);

        if let Err(msg) = load_bundle(scope, &bundle) {
            let _ = ready.send(Err(msg));
            return;
        }
    }

    tracing::info!("V8 render engine initialized");
    let _ = ready.send(Ok(()));

    while let Some(job) = rx.blocking_recv() {
        let result = call_render(&mut isolate, &global_context, &job.url, &job.product_json);
        let _ = job.reply.send(result);
    }
}

/// Evaluate the bundle as a module and make its `render` export reachable
/// as `globalThis.render`.
fn load_bundle(scope: &mut v8::HandleScope, bundle: &str) -> Result<(), String> {
    let tc = &mut v8::TryCatch::new(scope);

    let code = v8::String::new(tc, bundle).ok_or("SSR bundle is too large")?;
    let name = v8::String::new(tc, "entry-server.js").ok_or("cannot allocate module name")?;
    let origin = v8::ScriptOrigin::new(tc, name.into(), 0, 0, false, 0, None, false, false, true, None);
    let mut source = v8::script_compiler::Source::new(code, Some(&origin));

    let Some(module) = v8::script_compiler::compile_module(tc, &mut source) else {
        return Err(exception_text(tc, "SSR bundle failed to compile"));
    };
    if module.instantiate_module(tc, unresolved_import) != Some(true) {
        return Err(exception_text(tc, "SSR bundle imports modules that cannot be resolved"));
    }
    if module.evaluate(tc).is_none() {
        return Err(exception_text(tc, "SSR bundle threw while loading"));
    }
    tc.perform_microtask_checkpoint();
    if module.get_status() == v8::ModuleStatus::Errored {
        let err = module.get_exception().to_rust_string_lossy(tc);
        return Err(format!("SSR bundle threw while loading: {}", err));
    }

    let key = v8::String::new(tc, "render").ok_or("cannot allocate export name")?;
    let context = tc.get_current_context();
    let global = context.global(tc);
    let exported = v8::Local::<v8::Object>::try_from(module.get_module_namespace())
        .ok()
        .and_then(|ns| ns.get(tc, key.into()))
        .filter(|v| v.is_function());
    if let Some(render) = exported {
        global.set(tc, key.into(), render);
        return Ok(());
    }
    match global.get(tc, key.into()) {
        Some(v) if v.is_function() => Ok(()),
        _ => Err("SSR bundle neither exports render nor defines globalThis.render".into()),
    }
}

fn unresolved_import<'s>(
    _context: v8::Local<'s, v8::Context>,
    _specifier: v8::Local<'s, v8::String>,
    _import_attributes: v8::Local<'s, v8::FixedArray>,
    _referrer: v8::Local<'s, v8::Module>,
) -> Option<v8::Local<'s, v8::Module>> {
    None
}

fn exception_text(tc: &mut v8::TryCatch<v8::HandleScope>, what: &str) -> String {
    match tc.exception() {
        Some(e) => format!("{}: {}", what, e.to_rust_string_lossy(tc)),
        None => what.to_string(),
    }
}

/// Call `render(url, product)` inside a JS try/catch so exceptions come back
/// as data with their stack instead of tearing down the isolate.
fn call_render(
    isolate: &mut v8::OwnedIsolate,
    context: &v8::Global<v8::Context>,
    url: &str,
    product_json: &str,
) -> Result<RenderOutput, RenderError> {
    let handle_scope = &mut v8::HandleScope::new(isolate);
    let context = v8::Local::new(handle_scope, context);
    let scope = &mut v8::ContextScope::new(handle_scope, context);

    let url_literal = serde_json::to_string(url).map_err(|e| RenderError::Malformed(e.to_string()))?;
    let call_code = format!(
        r#"(function() {{ try {{
            var r = globalThis.render({url}, {product});
            var h = r && r.helmetContext && r.helmetContext.helmet;
            return JSON.stringify({{
                html: String(r.html),
                head: h ? {{ title: String(h.title), meta: String(h.meta), link: String(h.link), script: String(h.script) }} : null
            }});
        }} catch (e) {{ return JSON.stringify({{ __error: (e && e.stack) || String(e) }}); }} }})()"#,
        url = url_literal,
        product = product_json,
    );

    let code = v8::String::new(scope, &call_code)
        .ok_or_else(|| RenderError::Malformed("render call too large".into()))?;
    let script = v8::Script::compile(scope, code, None)
        .ok_or_else(|| RenderError::Failed("failed to compile render call".into()))?;
    let result = script
        .run(scope)
        .ok_or_else(|| RenderError::Failed("render() returned undefined".into()))?;
    let json = result.to_rust_string_lossy(scope);

    let value: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| RenderError::Malformed(e.to_string()))?;
    if let Some(stack) = value.get("__error").and_then(|v| v.as_str()) {
        return Err(RenderError::Failed(stack.to_string()));
    }
    serde_json::from_value(value).map_err(|e| RenderError::Malformed(e.to_string()))
}
