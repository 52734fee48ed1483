use crate::http::{Method, Request, Response};
use crate::middleware::{Middleware, MiddlewareResult, Next};

/// Rejects write requests that declare a JSON body which does not parse.
#[derive(Clone, Copy, Default)]
pub struct JsonBodyGuard;

impl Middleware for JsonBodyGuard {
    fn handle(&self, req: Request, next: Next) -> MiddlewareResult {
        Box::pin(async move {
            let checked = matches!(req.method(), Method::POST | Method::PUT | Method::PATCH);
            if checked
                && req.is_json()
                && !req.body().is_empty()
                && serde_json::from_slice::<serde_json::Value>(req.body()).is_err()
            {
                return Ok(Response::error("Invalid JSON format", 400));
            }
            next.handle(req).await
        })
    }
}
