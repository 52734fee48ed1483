use crate::http::{Method, Request, Response};
use crate::middleware::{Middleware, MiddlewareResult, Next};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u32>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Content-Type", "Authorization", "X-Requested-With"]
                .map(String::from)
                .to_vec(),
            allow_credentials: false,
            max_age: Some(86400),
        }
    }
}

impl CorsConfig {
    /// The `Access-Control-Allow-Origin` value for a request origin, if any.
    fn allow_origin(&self, origin: Option<&str>) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            return Some("*".to_string());
        }
        origin
            .filter(|origin| self.allowed_origins.iter().any(|o| o == origin))
            .map(str::to_string)
    }

    fn apply(&self, response: &mut Response, origin: Option<&str>) {
        if let Some(allowed) = self.allow_origin(origin) {
            response.header("Access-Control-Allow-Origin", allowed);
            if origin.is_some() && !self.allowed_origins.iter().any(|o| o == "*") {
                response.header("Vary", "Origin");
            }
        }
        response
            .header("Access-Control-Allow-Methods", self.allowed_methods.join(", "))
            .header("Access-Control-Allow-Headers", self.allowed_headers.join(", "));
        if self.allow_credentials {
            response.header("Access-Control-Allow-Credentials", "true");
        }
        if let Some(max_age) = self.max_age {
            response.header("Access-Control-Max-Age", max_age.to_string());
        }
    }
}

/// Answers preflight requests directly and adds CORS headers to every
/// other response.
#[derive(Clone, Default)]
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }
}

impl Middleware for Cors {
    fn handle(&self, req: Request, next: Next) -> MiddlewareResult {
        let config = self.config.clone();
        Box::pin(async move {
            let origin = req.header("origin").map(str::to_string);

            if req.method() == Method::OPTIONS {
                tracing::debug!(path = req.path(), "answering CORS preflight");
                let mut response = Response::new(200);
                config.apply(&mut response, origin.as_deref());
                return Ok(response);
            }

            let mut response = next.handle(req).await?;
            config.apply(&mut response, origin.as_deref());
            Ok(response)
        })
    }
}
