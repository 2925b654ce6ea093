use std::path::PathBuf;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::render::RenderError;

/// Request-fatal failures. Product fetch problems never get here; they
/// degrade to generic metadata inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("cannot read template {}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Template { .. } | Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// The error followed by its source chain, one cause per line.
    pub fn report(&self) -> String {
        chain(self, "\n    caused by: ")
    }
}

/// Render an error and all of its sources joined by `sep`.
pub fn chain(err: &dyn std::error::Error, sep: &str) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(e) = cause {
        out.push_str(sep);
        out.push_str(&e.to_string());
        cause = e.source();
    }
    out
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.report();
        tracing::error!(status = status.as_u16(), "{}", body);
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
