mod auth;
mod cors;
mod json;
mod rate_limit;

pub use auth::{AuthMiddleware, AuthUser, Claims, TokenService};
pub use cors::{Cors, CorsConfig};
pub use json::JsonBodyGuard;
pub use rate_limit::{ClientWindow, Decision, RateLimitPolicy, RateLimiter};

use crate::error::{FrameworkError, FrameworkResult};
use crate::handler::HttpResponse;
use crate::http::Request;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type MiddlewareResult = BoxFuture<'static, HttpResponse>;

/// A step in the request pipeline.
///
/// Implementations either call `next.handle(req)` and may decorate the
/// response it returns, or return a response of their own to stop the
/// chain early.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> MiddlewareResult;
}

/// The remainder of the pipeline after the current middleware.
#[derive(Clone)]
pub struct Next {
    handler: Arc<dyn Fn(Request) -> MiddlewareResult + Send + Sync>,
}

impl Next {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Request) -> MiddlewareResult + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub async fn handle(&self, req: Request) -> HttpResponse {
        (self.handler)(req).await
    }
}

/// A middleware reference on a route or in the global list: either a
/// registered alias or a concrete instance.
#[derive(Clone)]
pub enum MiddlewareEntry {
    Alias(String),
    Instance(Arc<dyn Middleware>),
}

impl MiddlewareEntry {
    pub fn instance<M: Middleware>(middleware: M) -> Self {
        MiddlewareEntry::Instance(Arc::new(middleware))
    }
}

impl From<&str> for MiddlewareEntry {
    fn from(alias: &str) -> Self {
        MiddlewareEntry::Alias(alias.to_string())
    }
}

impl From<String> for MiddlewareEntry {
    fn from(alias: String) -> Self {
        MiddlewareEntry::Alias(alias)
    }
}

impl From<Arc<dyn Middleware>> for MiddlewareEntry {
    fn from(middleware: Arc<dyn Middleware>) -> Self {
        MiddlewareEntry::Instance(middleware)
    }
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewareEntry::Alias(name) => f.debug_tuple("Alias").field(name).finish(),
            MiddlewareEntry::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

type MiddlewareFactory = Arc<dyn Fn() -> Arc<dyn Middleware> + Send + Sync>;

/// Holds the global middleware list and the alias table.
#[derive(Clone, Default)]
pub struct MiddlewareManager {
    global: Vec<MiddlewareEntry>,
    aliases: HashMap<String, MiddlewareFactory>,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: impl Into<MiddlewareEntry>) {
        self.global.push(entry.into());
    }

    /// Registers `name` so routes can refer to it. The factory runs once
    /// per request that uses the alias.
    pub fn alias<F, M>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Middleware,
    {
        let factory: MiddlewareFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Middleware>);
        self.aliases.insert(name.to_string(), factory);
    }

    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    pub fn global(&self) -> &[MiddlewareEntry] {
        &self.global
    }

    pub(crate) fn merge(&mut self, other: MiddlewareManager) {
        for (name, factory) in other.aliases {
            self.aliases.entry(name).or_insert(factory);
        }
    }

    pub fn resolve(&self, entry: &MiddlewareEntry) -> FrameworkResult<Arc<dyn Middleware>> {
        match entry {
            MiddlewareEntry::Instance(middleware) => Ok(middleware.clone()),
            MiddlewareEntry::Alias(name) => self
                .aliases
                .get(name)
                .map(|factory| factory())
                .ok_or_else(|| FrameworkError::MiddlewareNotFound(name.clone())),
        }
    }

    /// Resolves global then route entries and wraps them around `terminal`.
    /// Fails before anything runs if an alias is unknown.
    pub fn build(&self, route: &[MiddlewareEntry], terminal: Next) -> FrameworkResult<Next> {
        let resolved = self
            .global
            .iter()
            .chain(route)
            .map(|entry| self.resolve(entry))
            .collect::<FrameworkResult<Vec<_>>>()?;
        Ok(compose(resolved, terminal))
    }
}

/// Builds the chain back to front so the first middleware is outermost.
pub fn compose(middlewares: Vec<Arc<dyn Middleware>>, terminal: Next) -> Next {
    middlewares.into_iter().rev().fold(terminal, |next, middleware| {
        Next::new(move |req| middleware.handle(req, next.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::http::{RawRequest, RequestOptions, Response};
    use std::sync::Mutex;

    struct Trace {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Trace {
        fn handle(&self, req: Request, next: Next) -> MiddlewareResult {
            let name = self.name;
            let log = self.log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(format!("{name}-before"));
                let response = next.handle(req).await;
                log.lock().unwrap().push(format!("{name}-after"));
                response
            })
        }
    }

    struct Block;

    impl Middleware for Block {
        fn handle(&self, _req: Request, _next: Next) -> MiddlewareResult {
            Box::pin(async { Ok(Response::error("blocked", 403)) })
        }
    }

    fn request() -> Request {
        Request::from_raw(RawRequest::new("GET", "/"), &RequestOptions::default(), Container::new())
    }

    fn terminal(log: Arc<Mutex<Vec<String>>>) -> Next {
        Next::new(move |_req| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push("handler".to_string());
                Ok(Response::new(200))
            })
        })
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MiddlewareManager::new();
        manager.add(MiddlewareEntry::instance(Trace { name: "A", log: log.clone() }));
        let route = vec![MiddlewareEntry::instance(Trace { name: "B", log: log.clone() })];

        let chain = manager.build(&route, terminal(log.clone())).unwrap();
        let response = chain.handle(request()).await.unwrap();

        assert_eq!(response.status_code(), 200);
        assert_eq!(
            *log.lock().unwrap(),
            ["A-before", "B-before", "handler", "B-after", "A-after"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MiddlewareManager::new();
        manager.alias("block", || Block);
        let route = vec![
            MiddlewareEntry::from("block"),
            MiddlewareEntry::instance(Trace { name: "B", log: log.clone() }),
        ];

        let chain = manager.build(&route, terminal(log.clone())).unwrap();
        let response = chain.handle(request()).await.unwrap();

        assert_eq!(response.status_code(), 403);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_alias_fails_the_build() {
        let manager = MiddlewareManager::new();
        let result = manager.build(&[MiddlewareEntry::from("missing")], Next::new(|_req| Box::pin(async { Ok(Response::new(200)) })));
        match result {
            Err(FrameworkError::MiddlewareNotFound(name)) => assert_eq!(name, "missing"),
            _ => panic!("expected MiddlewareNotFound"),
        }
    }
}
