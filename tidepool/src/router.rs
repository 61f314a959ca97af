//! Request handlers and pattern routing.
//!
//! A server session hands every decoded request to one [`RequestHandler`].
//! [`Router`] is the usual implementation: it maps pattern keys to async
//! closures and answers unknown patterns with 404.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::packet::{Pattern, RequestPacket, ResponsePacket, StatusCode};

/// Errors a handler can return; the server turns them into error responses.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// No route for the request pattern.
    #[error("Not Found")]
    NotFound {
        /// Key of the unmatched pattern.
        route: String,
    },

    /// The request was understood but rejected.
    #[error("{0}")]
    BadRequest(String),

    /// The handler failed.
    #[error("{0}")]
    Failed(String),

    /// A transport operation inside the handler failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HandlerError {
    /// Status carried by the error response.
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::NotFound { .. } => StatusCode::NOT_FOUND,
            HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HandlerError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HandlerError::Transport(e) => e.status(),
        }
    }
}

/// Answers requests on a server session.
///
/// Single-core design - no Send bounds needed.
#[async_trait(?Send)]
pub trait RequestHandler {
    /// Produce the response for `request`.
    async fn handle(&self, request: RequestPacket) -> Result<ResponsePacket, HandlerError>;
}

type RouteFuture = Pin<Box<dyn Future<Output = Result<ResponsePacket, HandlerError>>>>;
type BoxedRoute = Rc<dyn Fn(RequestPacket) -> RouteFuture>;

/// Handler dispatching on the request pattern.
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<String, BoxedRoute>,
}

impl Router {
    /// Router without routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, builder style.
    pub fn route<F, Fut>(mut self, pattern: impl Into<Pattern>, handler: F) -> Self
    where
        F: Fn(RequestPacket) -> Fut + 'static,
        Fut: Future<Output = Result<ResponsePacket, HandlerError>> + 'static,
    {
        self.insert(pattern, handler);
        self
    }

    /// Add a route, replacing any previous one with the same key.
    pub fn insert<F, Fut>(&mut self, pattern: impl Into<Pattern>, handler: F)
    where
        F: Fn(RequestPacket) -> Fut + 'static,
        Fut: Future<Output = Result<ResponsePacket, HandlerError>> + 'static,
    {
        let key = pattern.into().key();
        tracing::trace!(route = %key, "registered route");
        let route: BoxedRoute =
            Rc::new(move |request: RequestPacket| -> RouteFuture { Box::pin(handler(request)) });
        self.routes.insert(key, route);
    }

    /// Whether a route exists for `pattern`.
    pub fn contains(&self, pattern: &Pattern) -> bool {
        self.routes.contains_key(&pattern.key())
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether there are no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait(?Send)]
impl RequestHandler for Router {
    async fn handle(&self, request: RequestPacket) -> Result<ResponsePacket, HandlerError> {
        let key = request.pattern.key();
        let Some(route) = self.routes.get(&key).cloned() else {
            tracing::debug!(route = %key, "no route");
            return Err(HandlerError::NotFound { route: key });
        };
        route(request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::packet::Body;

    fn router() -> Router {
        Router::new()
            .route(Pattern::cmd("xxx"), |request: RequestPacket| async move {
                Ok(ResponsePacket::ok(request.body))
            })
            .route("sensor/temp", |_request: RequestPacket| async move {
                Err(HandlerError::Failed("sensor offline".into()))
            })
    }

    #[tokio::test]
    async fn test_dispatch_by_pattern() {
        let router = router();
        assert_eq!(router.len(), 2);
        assert!(router.contains(&Pattern::cmd("xxx")));

        let response = router
            .handle(RequestPacket::new(Pattern::cmd("xxx")).with_body(json!({ "message": "ble" })))
            .await
            .expect("routed");
        assert_eq!(response.body, Body::from(json!({ "message": "ble" })));
    }

    #[tokio::test]
    async fn test_unknown_pattern_is_not_found() {
        let err = router()
            .handle(RequestPacket::new("sensor/message"))
            .await
            .expect_err("no route");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Not Found");
    }

    #[tokio::test]
    async fn test_handler_failure_status() {
        let err = router()
            .handle(RequestPacket::new("sensor/temp"))
            .await
            .expect_err("failed");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let transport: HandlerError = TransportError::Timeout {
            after: std::time::Duration::from_secs(1),
        }
        .into();
        assert_eq!(transport.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
