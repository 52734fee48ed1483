//! Application configuration.
//!
//! ```text
//! viper.toml (optional)
//!     → loader.rs (parse & deserialize, defaults for missing keys)
//!     → environment overrides (APP_ENV, JWT_SECRET, ...)
//!     → validation.rs (semantic checks, all errors at once)
//!     → AppConfig handed to Application::new
//! ```

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AppConfig, AppSection, AuthConfig, CorsSection, LoggingConfig, RateLimitSection, RateLimitStoreKind,
    RoutingConfig, ServerConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
