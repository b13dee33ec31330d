//! HTTP middleware adapters for the kronicler capture database.
//!
//! Two variants, matching the two ways operators want request timings keyed:
//!
//! - [`CaptureLayer::endpoint`] records the full request path with expanded
//!   path parameters (`/users/123`).
//! - [`CaptureLayer::function`] records the declared route
//!   (`/users/{user_id}`, the closest analog of the handler's declared
//!   name); requests that matched no route are not captured.
//!
//! The adapter is a transparent pass-through: the response travels through
//! unchanged and the capture happens after the inner service finishes, so
//! the recorded delta covers the handler's full wall time. With
//! `KRONICLER_ENABLED=false` the layer degrades to an identity wrapper at
//! construction time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use axum::extract::{MatchedPath, Request};
use axum::response::Response;
use kronicler::{Database, capture_enabled, monotonic_ns};
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Where a request's capture row takes its name from.
#[derive(Debug, Clone, Copy)]
enum NameSource {
    /// Declared route pattern via [`MatchedPath`]; skip unmatched requests.
    Function,
    /// Full request path with path parameters expanded.
    Endpoint,
}

/// Tower layer that records one capture row per request.
#[derive(Clone)]
pub struct CaptureLayer {
    db: Database,
    source: NameSource,
    enabled: bool,
}

impl CaptureLayer {
    /// Captures under the declared route (`/users/{user_id}`). Requests that
    /// matched no route pass through unrecorded.
    pub fn function(db: Database) -> Self {
        Self {
            db,
            source: NameSource::Function,
            enabled: capture_enabled(),
        }
    }

    /// Captures under the full request path (`/users/123`).
    pub fn endpoint(db: Database) -> Self {
        Self {
            db,
            source: NameSource::Endpoint,
            enabled: capture_enabled(),
        }
    }

    /// Original layer behaviour, kept for embedders of the first release.
    #[deprecated(note = "use CaptureLayer::function or CaptureLayer::endpoint")]
    pub fn new(db: Database) -> Self {
        static WARNED: Once = Once::new();
        WARNED.call_once(|| {
            warn!("CaptureLayer::new is deprecated; use CaptureLayer::function instead")
        });
        Self::function(db)
    }
}

impl<S> Layer<S> for CaptureLayer {
    type Service = CaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureService {
            inner,
            db: self.db.clone(),
            source: self.source,
            enabled: self.enabled,
        }
    }
}

/// Service produced by [`CaptureLayer`].
#[derive(Clone)]
pub struct CaptureService<S> {
    inner: S,
    db: Database,
    source: NameSource,
    enabled: bool,
}

impl<S> Service<Request> for CaptureService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Take the service that was polled ready and leave the clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let name = if self.enabled {
            match self.source {
                NameSource::Endpoint => Some(req.uri().path().to_string()),
                NameSource::Function => req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str().to_string()),
            }
        } else {
            None
        };

        let Some(name) = name else {
            return Box::pin(async move { inner.call(req).await });
        };

        let db = self.db.clone();
        let start_ns = monotonic_ns();
        Box::pin(async move {
            let response = inner.call(req).await;
            let end_ns = monotonic_ns();
            if let Err(e) = db.capture(&name, 0, start_ns, end_ns) {
                debug!("request capture of {name} failed: {e}");
            }
            response
        })
    }
}
