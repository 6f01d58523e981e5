//! Outgoing-request interceptor

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hyper::{Request, Response};
use tracing::{debug, warn};

use crate::config::CapturePolicy;
use crate::model::{Entry, HttpPayload};
use crate::recording::Coordinator;

use super::capture::{capture_body, capture_headers, content_length, parse_query, redact_url};

/// Records every call made through it as a request/response entry pair
///
/// While the coordinator is not recording, network capture is disabled or
/// the URL is excluded, calls go straight through. Recording never changes
/// what the caller sees: the original response or error is returned
/// untouched, and capture problems are logged rather than raised.
#[derive(Debug, Clone)]
pub struct Interceptor {
    coordinator: Arc<Coordinator>,
}

/// A call whose request entry has been submitted
struct PendingCall {
    policy: Arc<CapturePolicy>,
    correlation_id: String,
    template: HttpPayload,
}

impl Interceptor {
    /// Create an interceptor feeding `coordinator`
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Coordinator entries are submitted to
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Whether calls are currently being recorded
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.coordinator.is_recording() && self.coordinator.policy().config().capture_network
    }

    /// Run `call` with `request`, recording both halves
    ///
    /// # Errors
    ///
    /// Returns exactly the error produced by `call`
    pub async fn intercept<F, Fut, E>(
        &self,
        request: Request<Bytes>,
        call: F,
    ) -> std::result::Result<Response<Bytes>, E>
    where
        F: FnOnce(Request<Bytes>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<Bytes>, E>>,
        E: Display,
    {
        let Some(pending) = self.begin(&request) else {
            return call(request).await;
        };

        let started = Instant::now();
        let outcome = call(request).await;
        self.finish(pending, &outcome, started.elapsed());

        outcome
    }

    fn begin(&self, request: &Request<Bytes>) -> Option<PendingCall> {
        if !self.coordinator.is_recording() {
            return None;
        }

        let policy = self.coordinator.policy();
        if !policy.config().capture_network {
            return None;
        }

        if policy.is_url_excluded(&request.uri().to_string()) {
            debug!("Not recording excluded URL {}", request.uri().path());
            return None;
        }

        let context = self.coordinator.correlation();
        let pair_id = context.next_id();
        let correlation_id = context.current().unwrap_or_else(|| pair_id.clone());

        let template = HttpPayload {
            pair_id,
            method: request.method().as_str().to_string(),
            url: redact_url(request.uri(), &policy),
            path: request.uri().path().to_string(),
            query: parse_query(request.uri(), &policy),
            ..HttpPayload::default()
        };

        let payload = HttpPayload {
            headers: Some(capture_headers(request.headers(), &policy)),
            body: capture_body(
                request.body(),
                content_length(request.headers()),
                &policy,
            ),
            ..template.clone()
        };
        self.submit(Entry::request(payload).with_correlation(correlation_id.clone()));

        Some(PendingCall {
            policy,
            correlation_id,
            template,
        })
    }

    fn finish<E: Display>(
        &self,
        pending: PendingCall,
        outcome: &std::result::Result<Response<Bytes>, E>,
        elapsed: Duration,
    ) {
        let PendingCall {
            policy,
            correlation_id,
            template,
        } = pending;
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let payload = match outcome {
            Ok(response) => HttpPayload {
                headers: Some(capture_headers(response.headers(), &policy)),
                body: capture_body(
                    response.body(),
                    content_length(response.headers()),
                    &policy,
                ),
                status_code: Some(response.status().as_u16()),
                duration_ms: Some(duration_ms),
                success: response.status().is_success(),
                ..template
            },
            Err(e) => HttpPayload {
                duration_ms: Some(duration_ms),
                success: false,
                error_message: Some(e.to_string()),
                ..template
            },
        };

        self.submit(Entry::response(payload).with_correlation(correlation_id));
    }

    fn submit(&self, entry: Entry) {
        let kind = entry.kind();
        if let Err(e) = self.coordinator.add_entry(entry) {
            warn!("Dropped captured {} entry: {}", kind, e);
        }
    }
}
