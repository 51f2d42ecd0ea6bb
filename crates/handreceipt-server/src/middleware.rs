//! Request correlation.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use handreceipt_logging::{CorrelationContext, TRACE_ID_HEADER, TRACEPARENT_HEADER};
use tracing::{Instrument, debug, info_span};

/// Runs the request inside a span carrying its trace id and echoes the id
/// in `x-trace-id`.
pub async fn correlate(request: Request, next: Next) -> Response {
    let traceparent = request
        .headers()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok());
    let ctx = CorrelationContext::from_traceparent_or_root(traceparent);
    let trace_id = ctx.trace_id_str();

    let span = info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        trace_id = %trace_id,
    );

    let mut response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| debug!(status = response.status().as_u16(), "request completed"));

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}
