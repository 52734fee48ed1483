use crate::handler::Action;
use crate::http::Method;
use crate::middleware::MiddlewareEntry;
use crate::router::pattern::RoutePattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFilter {
    Any,
    Only(Method),
}

impl MethodFilter {
    pub fn accepts(self, method: Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(expected) => expected == method,
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        MethodFilter::Only(method)
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    method: MethodFilter,
    pattern: RoutePattern,
    action: Action,
    middleware: Vec<MiddlewareEntry>,
    name: Option<String>,
}

impl Route {
    pub(crate) fn new(method: MethodFilter, pattern: RoutePattern, action: Action) -> Self {
        Self {
            method,
            pattern,
            action,
            middleware: Vec::new(),
            name: None,
        }
    }

    /// Appends a middleware to this route. Route middleware runs after the
    /// global list, in the order attached.
    pub fn middleware(&mut self, entry: impl Into<MiddlewareEntry>) -> &mut Self {
        self.middleware.push(entry.into());
        self
    }

    pub fn middlewares<I, E>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = E>,
        E: Into<MiddlewareEntry>,
    {
        self.middleware.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn method_filter(&self) -> MethodFilter {
        self.method
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn middleware_entries(&self) -> &[MiddlewareEntry] {
        &self.middleware
    }

    pub fn route_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn matches(&self, method: Method, path: &str) -> Option<Vec<(String, String)>> {
        if !self.method.accepts(method) {
            return None;
        }
        self.pattern.matches(path)
    }

    pub(crate) fn prefixed(mut self, prefix: &str, outer: &[MiddlewareEntry]) -> Result<Self, String> {
        let template = format!("{}/{}", prefix.trim_matches('/'), self.pattern.template());
        self.pattern = RoutePattern::parse(&template).map_err(|e| format!("invalid route `{template}`: {e}"))?;
        let mut middleware = outer.to_vec();
        middleware.append(&mut self.middleware);
        self.middleware = middleware;
        Ok(self)
    }
}
