mod pattern;
mod route;

pub use pattern::{PatternError, RoutePattern};
pub use route::{MethodFilter, Route};

use crate::handler::{Action, ResourceController};
use crate::http::request::normalize_path;
use crate::http::Method;
use crate::middleware::{Middleware, MiddlewareEntry, MiddlewareManager};

/// A route picked for a request, with its captured path parameters.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: Vec<(String, String)>,
}

/// Ordered route table. The first registered route that matches wins.
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
    middleware: MiddlewareManager,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route and returns it for further configuration.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid route template.
    pub fn register(&mut self, method: impl Into<MethodFilter>, pattern: &str, action: Action) -> &mut Route {
        let method = method.into();
        let compiled = match RoutePattern::parse(pattern) {
            Ok(compiled) => compiled,
            Err(e) => panic!("invalid route `{pattern}`: {e}"),
        };
        tracing::debug!(
            method = ?method,
            pattern = compiled.template(),
            action = %action.describe(),
            "route registered"
        );

        let index = self.routes.len();
        self.routes.push(Route::new(method, compiled, action));
        &mut self.routes[index]
    }

    pub fn get(&mut self, pattern: &str, action: Action) -> &mut Route {
        self.register(Method::GET, pattern, action)
    }

    pub fn post(&mut self, pattern: &str, action: Action) -> &mut Route {
        self.register(Method::POST, pattern, action)
    }

    pub fn put(&mut self, pattern: &str, action: Action) -> &mut Route {
        self.register(Method::PUT, pattern, action)
    }

    pub fn patch(&mut self, pattern: &str, action: Action) -> &mut Route {
        self.register(Method::PATCH, pattern, action)
    }

    pub fn delete(&mut self, pattern: &str, action: Action) -> &mut Route {
        self.register(Method::DELETE, pattern, action)
    }

    pub fn options(&mut self, pattern: &str, action: Action) -> &mut Route {
        self.register(Method::OPTIONS, pattern, action)
    }

    /// Registers a route that accepts every method.
    pub fn any(&mut self, pattern: &str, action: Action) -> &mut Route {
        self.register(MethodFilter::Any, pattern, action)
    }

    /// Registers index, store, show, update and destroy for `base`.
    pub fn resource<C: ResourceController>(&mut self, base: &str) -> &mut Self {
        let base = base.trim_matches('/');
        let member = format!("{base}/{{id}}");
        self.get(base, Action::controller("index", C::index));
        self.post(base, Action::controller("store", C::store));
        self.get(&member, Action::controller("show", C::show));
        self.put(&member, Action::controller("update", C::update));
        self.delete(&member, Action::controller("destroy", C::destroy));
        self
    }

    /// Appends all routes of `router` under `prefix`. The mounted router's
    /// global middleware is attached to each of its routes; its aliases are
    /// added unless the name is already taken here.
    ///
    /// # Panics
    ///
    /// Panics if a prefixed template is invalid.
    pub fn mount(&mut self, prefix: &str, router: Router) -> &mut Self {
        let outer = router.middleware.global().to_vec();
        for route in router.routes {
            match route.prefixed(prefix, &outer) {
                Ok(route) => self.routes.push(route),
                Err(message) => panic!("{message}"),
            }
        }
        self.middleware.merge(router.middleware);
        self
    }

    /// Adds a middleware that runs for every matched route.
    pub fn use_middleware(&mut self, entry: impl Into<MiddlewareEntry>) -> &mut Self {
        self.middleware.add(entry);
        self
    }

    pub fn alias<F, M>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Middleware,
    {
        self.middleware.alias(name, factory);
        self
    }

    pub fn middleware_manager(&self) -> &MiddlewareManager {
        &self.middleware
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn find(&self, method: Method, path: &str) -> Option<RouteMatch<'_>> {
        let path = normalize_path(path);
        self.routes.iter().find_map(|route| {
            route
                .matches(method, &path)
                .map(|params| RouteMatch { route, params })
        })
    }

    /// Like [`Router::find`] but ignores the method.
    pub fn find_any(&self, path: &str) -> Option<RouteMatch<'_>> {
        let path = normalize_path(path);
        self.routes.iter().find_map(|route| {
            route
                .pattern()
                .matches(&path)
                .map(|params| RouteMatch { route, params })
        })
    }

    /// Methods with a route whose pattern matches `path`, in registration order.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        const ALL: [Method; 9] = [
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
            Method::CONNECT,
            Method::TRACE,
        ];
        let path = normalize_path(path);
        let mut methods = Vec::new();
        for route in self.routes.iter().filter(|r| r.pattern().matches(&path).is_some()) {
            let accepted: Vec<Method> = match route.method_filter() {
                MethodFilter::Any => ALL.to_vec(),
                MethodFilter::Only(method) => vec![method],
            };
            for method in accepted {
                if !methods.contains(&method) {
                    methods.push(method);
                }
            }
        }
        if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
            methods.push(Method::HEAD);
        }
        if !methods.is_empty() && !methods.contains(&Method::OPTIONS) {
            methods.push(Method::OPTIONS);
        }
        methods
    }
}
