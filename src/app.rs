//! Application is the main entry point for building a Viper service.
//!
//! It owns the router, the service container and the configuration, wires
//! up the built-in middleware, and turns into a [`Dispatcher`] or a running
//! server when assembly is done.
//!
//! # Examples
//!
//! ```no_run
//! use viper::app::Application;
//! use viper::config::AppConfig;
//! use viper::handler::Action;
//! use viper::json;
//!
//! let mut app = Application::new(AppConfig::default());
//! app.get("/", Action::function(|_req, _res| async {
//!     Ok(json!({ "message": "Hello!" }))
//! }));
//! app.listen().unwrap();
//! ```

use crate::cache::{CacheStore, MemoryStore, RateLimitStore};
use crate::config::{AppConfig, RateLimitStoreKind};
use crate::container::Container;
use crate::dispatcher::Dispatcher;
use crate::error_handler::ErrorHandler;
use crate::handler::{Action, ResourceController};
use crate::http::RequestOptions;
use crate::middleware::{
    AuthMiddleware, Cors, JsonBodyGuard, Middleware, MiddlewareEntry, RateLimiter, TokenService,
};
use crate::router::{Route, Router};
use crate::server::{Server, ServerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

pub struct Application {
    config: AppConfig,
    router: Router,
    container: Container,
    tokens: Arc<TokenService>,
}

impl Application {
    /// Creates an application with the built-in middleware aliases
    /// (`cors`, `rate-limit`, `auth`, `json`) registered and the global
    /// middleware enabled by `config`.
    pub fn new(config: AppConfig) -> Self {
        let tokens = Arc::new(TokenService::new(&config.auth.jwt_secret, config.auth.token_ttl_secs));

        let mut container = Container::new();
        container.instance(config.clone()).instance_arc(tokens.clone());

        let mut app = Self {
            config,
            router: Router::new(),
            container,
            tokens,
        };
        app.register_middleware();
        app
    }

    fn register_middleware(&mut self) {
        let cors = self.config.cors.policy.clone();
        self.router.alias("cors", move || Cors::new(cors.clone()));

        let tokens = self.tokens.clone();
        self.router.alias("auth", move || AuthMiddleware::new(tokens.clone()));

        self.router.alias("json", || JsonBodyGuard);

        let limits = &self.config.rate_limit;
        let store: Arc<dyn RateLimitStore> = match limits.store {
            RateLimitStoreKind::Memory => Arc::new(MemoryStore::new()),
            RateLimitStoreKind::Cache => Arc::new(CacheStore::new(
                limits.cache_capacity,
                Duration::from_secs(limits.window_secs.saturating_mul(2).max(1)),
            )),
        };
        let limiter = RateLimiter::new(limits.policy(), store);
        let shared = limiter.clone();
        self.router.alias("rate-limit", move || shared.clone());

        if self.config.cors.enabled {
            self.router.use_middleware("cors");
        }
        if self.config.rate_limit.enabled {
            self.router.use_middleware(MiddlewareEntry::instance(limiter));
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tokens(&self) -> Arc<TokenService> {
        self.tokens.clone()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn get(&mut self, path: &str, action: Action) -> &mut Route {
        self.router.get(path, action)
    }

    pub fn post(&mut self, path: &str, action: Action) -> &mut Route {
        self.router.post(path, action)
    }

    pub fn put(&mut self, path: &str, action: Action) -> &mut Route {
        self.router.put(path, action)
    }

    pub fn patch(&mut self, path: &str, action: Action) -> &mut Route {
        self.router.patch(path, action)
    }

    pub fn delete(&mut self, path: &str, action: Action) -> &mut Route {
        self.router.delete(path, action)
    }

    pub fn options(&mut self, path: &str, action: Action) -> &mut Route {
        self.router.options(path, action)
    }

    pub fn any(&mut self, path: &str, action: Action) -> &mut Route {
        self.router.any(path, action)
    }

    pub fn resource<C: ResourceController>(&mut self, base: &str) -> &mut Self {
        self.router.resource::<C>(base);
        self
    }

    pub fn mount(&mut self, prefix: &str, router: Router) -> &mut Self {
        self.router.mount(prefix, router);
        self
    }

    /// Adds a global middleware, by alias or instance.
    pub fn middleware(&mut self, entry: impl Into<MiddlewareEntry>) -> &mut Self {
        self.router.use_middleware(entry);
        self
    }

    pub fn alias<F, M>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Middleware,
    {
        self.router.alias(name, factory);
        self
    }

    pub fn into_dispatcher(self) -> Dispatcher {
        let options = RequestOptions {
            url_param: self.config.routing.url_param.clone(),
        };
        Dispatcher::new(
            self.router,
            self.container,
            ErrorHandler::new(self.config.app.debug),
            options,
        )
    }

    /// Serves on an already bound listener until Ctrl-C.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let server_config = self.config.server.clone();
        let server = Server::new(self.into_dispatcher(), &server_config)?;
        server.run(listener).await
    }

    /// Binds `server.bind_address` and blocks serving until Ctrl-C.
    pub fn listen(self) -> Result<(), ServerError> {
        let runtime = Runtime::new()?;
        runtime.block_on(async {
            let listener = TcpListener::bind(&self.config.server.bind_address).await?;
            tracing::info!(
                name = %self.config.app.name,
                env = %self.config.app.env,
                debug = self.config.app.debug,
                "starting application"
            );
            self.serve(listener).await
        })
    }
}
