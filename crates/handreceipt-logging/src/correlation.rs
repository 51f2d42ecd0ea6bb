//! Request correlation for the HTTP surface
//!
//! A [`CorrelationContext`] is created (or continued from an inbound W3C
//! `traceparent` header) for every request. Its trace id is recorded on the
//! request span and echoed back in the `x-trace-id` response header, so a
//! client report can be matched to the JSONL log lines of that request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the trace id back to the client.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Trace and span ids for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// Shared with the caller's trace when one was supplied
    pub trace_id: Uuid,

    /// This process's span
    pub span_id: Uuid,

    /// The caller's span, when continued from a `traceparent`
    pub parent_span_id: Option<Uuid>,
}

impl CorrelationContext {
    /// Start a fresh trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
        }
    }

    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
        }
    }

    /// Continue the caller's trace, or start a new one if the header is
    /// absent or malformed.
    pub fn from_traceparent_or_root(traceparent: Option<&str>) -> Self {
        traceparent
            .and_then(Self::from_traceparent)
            .map(|parent| parent.child())
            .unwrap_or_else(Self::new_root)
    }

    /// 32 lowercase hex digits, the form echoed in `x-trace-id`.
    pub fn trace_id_str(&self) -> String {
        self.trace_id.as_simple().to_string()
    }

    /// `00-{trace}-{span}-01`. Only the first 8 bytes of the span id fit.
    pub fn to_traceparent(&self) -> String {
        let span = self.span_id.as_simple().to_string();
        format!("00-{}-{}-01", self.trace_id_str(), &span[..16])
    }

    /// Only version `00` is accepted. The 8-byte parent span id is
    /// zero-padded into a UUID.
    pub fn from_traceparent(traceparent: &str) -> Option<Self> {
        let parts: Vec<&str> = traceparent.trim().split('-').collect();
        if parts.len() != 4 || parts[0] != "00" {
            return None;
        }
        if parts[1].len() != 32 || parts[2].len() != 16 || parts[3].len() != 2 {
            return None;
        }

        let trace_id = Uuid::parse_str(parts[1]).ok()?;
        if trace_id.is_nil() {
            return None;
        }
        let span_id = Uuid::parse_str(&format!("{}0000000000000000", parts[2])).ok()?;

        Some(Self {
            trace_id,
            span_id,
            parent_span_id: None,
        })
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new_root()
    }
}
