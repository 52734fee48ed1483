//! # Viper
//!
//! A small MVC-style web framework: a router with `{param}` placeholders,
//! an onion middleware pipeline, request and response wrappers, and a
//! dispatcher that turns every failure into a JSON (or HTML) error.
//!
//! ## Features
//!
//! - Routing by method and pattern, first registered match wins
//! - Global and per-route middleware, by alias or instance
//! - CORS, bearer-token authentication, JSON body checks and rate limiting
//! - Controllers resolved from a service container per request
//! - Rule-string validation (`required|email|min:2`)
//! - Configuration from TOML and environment variables
//!
//! ## Quick Start
//!
//! ```no_run
//! use viper::app::Application;
//! use viper::config::AppConfig;
//! use viper::handler::Action;
//! use viper::http::{Request, Response};
//! use viper::ok_json;
//!
//! let mut app = Application::new(AppConfig::default());
//!
//! app.get("/", Action::function(|_req: Request, _res: Response| async {
//!     ok_json!({ "message": "Hello, World!" })
//! }));
//!
//! app.get("/users/{id}", Action::function(|req: Request, _res: Response| async move {
//!     let id = req.param("id").unwrap_or_default().to_string();
//!     ok_json!({ "id": id })
//! }))
//! .middleware("auth");
//!
//! app.listen().unwrap();
//! ```
//!
//! ## Middleware Usage
//!
//! ```no_run
//! # use viper::app::Application;
//! # use viper::config::AppConfig;
//! use viper::middleware::{Cors, CorsConfig};
//!
//! # let mut app = Application::new(AppConfig::default());
//! app.alias("public-cors", || Cors::new(CorsConfig::default()));
//! app.middleware("public-cors");
//! ```

pub mod app;
pub mod cache;
pub mod config;
pub mod container;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod error_handler;
pub mod handler;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;
pub mod validation;
pub extern crate serde_json;

// Reexport serde_json
pub use serde_json::{json, Value};

pub use app::Application;
pub use dispatcher::Dispatcher;
pub use error::{FrameworkError, FrameworkResult};
pub use handler::{Action, Controller, ResourceController};
pub use http::{Request, Response};
pub use router::Router;
