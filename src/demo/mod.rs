//! The sample application served by the `viper` binary: a user resource,
//! token authentication and a few closure routes.

mod auth;
mod users;

pub use auth::{Accounts, AuthController};
pub use users::{User, UserController, UserDirectory};

use crate::app::Application;
use crate::config::AppConfig;
use crate::handler::Action;
use crate::http::{Request, Response};
use crate::validation::validate;
use serde_json::json;
use std::time::SystemTime;

const FEATURES: &[&str] = &[
    "Middleware System",
    "Request/Response Wrappers",
    "Error Handling",
    "Environment Config",
    "Dependency Injection",
    "Validation System",
    "Rate Limiting",
    "CORS Support",
    "Logging",
];

/// Registers the sample services and routes on `app`.
pub fn register(app: &mut Application) {
    app.container_mut()
        .instance(UserDirectory::default())
        .instance(Accounts::default());

    app.get(
        "home",
        Action::function(|_req: Request, _res: Response| async move {
            crate::ok_json!({
                "message": "Welcome to Viper!",
                "framework": "Viper",
                "version": env!("CARGO_PKG_VERSION"),
                "features": FEATURES,
            })
        }),
    )
    .name("home");

    app.get(
        "health",
        Action::function(|req: Request, mut res: Response| async move {
            res.json(
                &json!({
                    "status": "ok",
                    "timestamp": httpdate::fmt_http_date(SystemTime::now()),
                    "config_loaded": req.container().has::<AppConfig>(),
                }),
                200,
            )?;
            Ok(res)
        }),
    )
    .name("health");

    app.post(
        "api/validate",
        Action::function(|req: Request, mut res: Response| async move {
            let input = req.all();
            validate(
                &input,
                &[
                    ("name", "required|alpha|min:2"),
                    ("email", "required|email"),
                    ("age", "numeric|min:18"),
                ],
            )?;
            res.json(&json!({ "message": "Validation passed", "data": input }), 200)?;
            Ok(res)
        }),
    )
    .middleware("json");

    app.resource::<UserController>("api/users");

    app.post("api/auth/login", Action::controller("login", AuthController::login))
        .middleware("json")
        .name("auth.login");
    app.get("api/auth/me", Action::controller("me", AuthController::me))
        .middleware("auth")
        .name("auth.me");
    app.post("api/auth/refresh", Action::controller("refresh", AuthController::refresh))
        .middleware("auth")
        .name("auth.refresh");
}
