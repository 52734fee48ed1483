use crate::container::Container;
use crate::error::{capture_fault_traces, install_panic_hook, Fault, FrameworkError};
use crate::error_handler::ErrorHandler;
use crate::handler::{Action, HttpResponse};
use crate::http::{Method, RawRequest, Request, RequestOptions, Response};
use crate::middleware::Next;
use crate::router::{RouteMatch, Router};
use futures::FutureExt;
use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWrite;

/// Where a request is in its lifecycle. Used for trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Routed,
    MiddlewareRunning,
    HandlerRunning,
    Responded,
    Sent,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Routed => "routed",
            Stage::MiddlewareRunning => "middleware",
            Stage::HandlerRunning => "handler",
            Stage::Responded => "responded",
            Stage::Sent => "sent",
        };
        f.write_str(name)
    }
}

/// Runs a request through routing, middleware and the matched action.
///
/// Every error and panic below this point is turned into a response, so
/// `handle` always produces one.
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    container: Container,
    errors: ErrorHandler,
    options: RequestOptions,
}

impl Dispatcher {
    pub fn new(router: Router, container: Container, errors: ErrorHandler, options: RequestOptions) -> Self {
        install_panic_hook();
        if errors.is_debug() {
            capture_fault_traces();
        }
        Self {
            router: Arc::new(router),
            container,
            errors,
            options,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub async fn handle(&self, raw: RawRequest) -> Response {
        let started = Instant::now();
        let req = Request::from_raw(raw, &self.options, self.container.clone());
        let method = req.method();
        let path = req.path().to_string();
        let accept = req.header("accept").map(str::to_string);

        tracing::info!(%method, path = %path, ip = req.ip(), "request started");
        tracing::trace!(stage = %Stage::Received);

        let outcome = AssertUnwindSafe(self.run(req)).catch_unwind().await;
        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => self.errors.handle(&err, accept.as_deref()),
            Err(payload) => {
                let err = FrameworkError::Fault(Fault::from_panic(payload));
                self.errors.handle(&err, accept.as_deref())
            }
        };
        if method == Method::HEAD {
            response.strip_body_for_head();
        }

        tracing::trace!(stage = %Stage::Responded);
        tracing::info!(
            %method,
            path = %path,
            status = response.status_code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        response
    }

    /// Handles the request and writes the response to `writer`.
    pub async fn dispatch<W>(&self, raw: RawRequest, writer: &mut W) -> io::Result<Response>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut response = self.handle(raw).await;
        response.send(writer).await?;
        tracing::trace!(stage = %Stage::Sent);
        Ok(response)
    }

    async fn run(&self, req: Request) -> HttpResponse {
        let method = req.method();

        if let Some(found) = self.router.find(method, req.path()) {
            let terminal = terminal(found.route.action().clone());
            return self.run_route(found, req, terminal).await;
        }

        if method == Method::HEAD {
            if let Some(found) = self.router.find(Method::GET, req.path()) {
                let terminal = terminal(found.route.action().clone());
                return self.run_route(found, req, terminal).await;
            }
        }

        if method == Method::OPTIONS {
            if let Some(found) = self.router.find_any(req.path()) {
                let allow = self
                    .router
                    .allowed_methods(req.path())
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                return self.run_route(found, req, preflight(allow)).await;
            }
        }

        Err(FrameworkError::RouteNotFound {
            method,
            path: req.path().to_string(),
        })
    }

    async fn run_route(&self, found: RouteMatch<'_>, mut req: Request, terminal: Next) -> HttpResponse {
        let RouteMatch { route, params } = found;
        tracing::trace!(stage = %Stage::Routed, route = route.pattern().template(), params = ?params);
        req.set_params(params);

        let chain = self
            .router
            .middleware_manager()
            .build(route.middleware_entries(), terminal)?;
        tracing::trace!(stage = %Stage::MiddlewareRunning);
        chain.handle(req).await
    }
}

fn terminal(action: Action) -> Next {
    Next::new(move |req| {
        tracing::trace!(stage = %Stage::HandlerRunning, action = %action.describe());
        let reply = action.invoke(req, Response::new(200));
        Box::pin(async move { Ok(reply.await?.into_response()) })
    })
}

fn preflight(allow: String) -> Next {
    Next::new(move |_req| {
        let mut response = Response::new(200);
        response.header("Allow", &allow);
        Box::pin(async move { Ok(response) })
    })
}
