use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use viper::config::AppConfig;
use viper::handler::{Action, Controller};
use viper::http::{RawRequest, Request, Response};
use viper::middleware::{AuthUser, Claims, Middleware, MiddlewareEntry, MiddlewareResult, Next};
use viper::{Application, Dispatcher, FrameworkError, FrameworkResult};

fn quiet_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.rate_limit.enabled = false;
    config
}

fn body(response: &Response) -> Value {
    serde_json::from_str(response.body()).unwrap_or(Value::Null)
}

fn build(config: AppConfig, routes: impl FnOnce(&mut Application)) -> Dispatcher {
    let mut app = Application::new(config);
    routes(&mut app);
    app.into_dispatcher()
}

#[tokio::test]
async fn unknown_route_is_404_envelope() {
    let dispatcher = build(quiet_config(), |_| {});
    let response = dispatcher.handle(RawRequest::new("GET", "/nope")).await;

    assert_eq!(response.status_code(), 404);
    assert_eq!(
        body(&response),
        json!({"error": true, "message": "Route not found", "status": 404})
    );
}

#[tokio::test]
async fn handler_data_is_wrapped_in_success_envelope() {
    let dispatcher = build(quiet_config(), |app| {
        app.get(
            "items/{id}",
            Action::function(|req: Request, _res: Response| async move {
                Ok(json!({ "id": req.param("id") }))
            }),
        );
    });
    let response = dispatcher.handle(RawRequest::new("GET", "/items/42/")).await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(
        body(&response),
        json!({"success": true, "message": "Success", "data": {"id": "42"}})
    );
}

fn failing(app: &mut Application) {
    app.get(
        "broken",
        Action::function(|_req: Request, _res: Response| async {
            Err::<Response, _>(FrameworkError::internal("database unreachable"))
        }),
    );
    app.get(
        "panics",
        Action::function(|_req: Request, _res: Response| async {
            if true {
                panic!("boom");
            }
            Ok(())
        }),
    );
}

#[tokio::test]
async fn server_errors_are_generic_outside_debug() {
    let dispatcher = build(quiet_config(), failing);

    for path in ["/broken", "/panics"] {
        let response = dispatcher.handle(RawRequest::new("GET", path)).await;
        assert_eq!(response.status_code(), 500);
        let body = body(&response);
        assert_eq!(body["message"], json!("Internal Server Error"));
        assert_eq!(body["error"], json!(true));
        assert!(body.get("debug").is_none());
    }
}

#[tokio::test]
async fn debug_errors_point_at_the_fault() {
    let mut config = quiet_config();
    config.app.debug = true;
    let dispatcher = build(config, failing);

    let response = dispatcher.handle(RawRequest::new("GET", "/broken")).await;
    let body = body(&response);
    assert_eq!(response.status_code(), 500);
    assert_eq!(body["message"], json!("database unreachable"));
    assert_eq!(body["debug"]["file"], json!(file!()));
    assert!(body["debug"]["line"].as_u64().unwrap() > 0);
    assert_eq!(body["debug"]["detail"], json!("database unreachable"));
    assert!(body["debug"]["trace"].as_str().is_some_and(|trace| !trace.is_empty()));

    let response = dispatcher.handle(RawRequest::new("GET", "/panics")).await;
    let body = self::body(&response);
    assert_eq!(response.status_code(), 500);
    assert_eq!(body["message"], json!("Panic: boom"));
    assert_eq!(body["debug"]["file"], json!(file!()));
    assert!(body["debug"]["trace"].as_str().is_some_and(|trace| !trace.is_empty()));
}

#[tokio::test]
async fn html_errors_when_accepted() {
    let dispatcher = build(quiet_config(), |_| {});
    let response = dispatcher
        .handle(RawRequest::new("GET", "/missing").header("Accept", "text/html"))
        .await;

    assert_eq!(response.status_code(), 404);
    assert!(response.get_header("content-type").unwrap().starts_with("text/html"));
    assert!(response.body().contains("Route not found"));
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Recorder {
    fn handle(&self, req: Request, next: Next) -> MiddlewareResult {
        let name = self.name;
        let log = self.log.clone();
        Box::pin(async move {
            log.lock().unwrap().push(format!("{name}:before"));
            let response = next.handle(req).await;
            log.lock().unwrap().push(format!("{name}:after"));
            response
        })
    }
}

#[tokio::test]
async fn global_middleware_wraps_route_middleware() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();
    let route_log = log.clone();

    let mut config = quiet_config();
    config.cors.enabled = false;
    let dispatcher = build(config, |app| {
        app.middleware(MiddlewareEntry::instance(Recorder {
            name: "global",
            log: log.clone(),
        }));
        app.alias("route", move || Recorder {
            name: "route",
            log: route_log.clone(),
        });
        app.get(
            "ordered",
            Action::function(move |_req: Request, _res: Response| {
                let log = handler_log.clone();
                async move {
                    log.lock().unwrap().push("handler".to_string());
                    Ok(())
                }
            }),
        )
        .middleware("route");
    });

    let response = dispatcher.handle(RawRequest::new("GET", "/ordered")).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(
        *log.lock().unwrap(),
        ["global:before", "route:before", "handler", "route:after", "global:after"]
    );
}

#[tokio::test]
async fn globals_run_in_registration_order_around_route_middleware() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();
    let route_log = log.clone();

    let mut config = quiet_config();
    config.cors.enabled = false;
    let dispatcher = build(config, |app| {
        app.middleware(MiddlewareEntry::instance(Recorder { name: "A", log: log.clone() }));
        app.middleware(MiddlewareEntry::instance(Recorder { name: "B", log: log.clone() }));
        app.alias("c", move || Recorder {
            name: "C",
            log: route_log.clone(),
        });
        app.get(
            "layered",
            Action::function(move |_req: Request, _res: Response| {
                let log = handler_log.clone();
                async move {
                    log.lock().unwrap().push("handler".to_string());
                    Ok(())
                }
            }),
        )
        .middleware("c");
    });

    let response = dispatcher.handle(RawRequest::new("GET", "/layered")).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(
        *log.lock().unwrap(),
        ["A:before", "B:before", "C:before", "handler", "C:after", "B:after", "A:after"]
    );
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[tokio::test]
async fn rejected_tokens_never_reach_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = calls.clone();

    let mut app = Application::new(quiet_config());
    let tokens = app.tokens();
    app.get(
        "secret",
        Action::function(move |_req: Request, _res: Response| {
            let calls = handler_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    )
    .middleware("auth");
    let dispatcher = app.into_dispatcher();

    let now = unix_now();
    let expired = tokens
        .sign(&Claims {
            user_id: 1,
            email: "admin@example.com".into(),
            name: "Admin".into(),
            iat: now - 7200,
            exp: now - 3600,
        })
        .unwrap();
    let response = dispatcher
        .handle(RawRequest::new("GET", "/secret").header("Authorization", &format!("Bearer {expired}")))
        .await;
    assert_eq!(response.status_code(), 401);
    assert_eq!(body(&response)["message"], json!("Token has expired"));
    assert_eq!(response.get_header("www-authenticate"), Some("Bearer"));

    for header in ["Bearer", "Basic YWRtaW46cGFzcw==", "Bearer    "] {
        let response = dispatcher
            .handle(RawRequest::new("GET", "/secret").header("Authorization", header))
            .await;
        assert_eq!(response.status_code(), 401, "{header}");
        assert_eq!(
            body(&response)["message"],
            json!("Invalid authorization header format"),
            "{header}"
        );
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn route_limiter_after_auth_keys_by_user() {
    let mut config = quiet_config();
    config.rate_limit.max_requests = 1;
    let mut app = Application::new(config);
    let tokens = app.tokens();
    app.get("quota", Action::function(|_req: Request, _res: Response| async { Ok(()) }))
        .middleware("auth")
        .middleware("rate-limit");
    let dispatcher = app.into_dispatcher();

    let bearer = |id: u64| {
        let token = tokens
            .issue(&AuthUser {
                id,
                email: format!("user{id}@example.com"),
                name: format!("User {id}"),
            })
            .unwrap();
        format!("Bearer {token}")
    };
    let first = bearer(1);
    let second = bearer(2);

    let response = dispatcher
        .handle(RawRequest::new("GET", "/quota").header("Authorization", &first))
        .await;
    assert_eq!(response.status_code(), 200);
    let response = dispatcher
        .handle(RawRequest::new("GET", "/quota").header("Authorization", &first))
        .await;
    assert_eq!(response.status_code(), 429);

    // Same address and user agent, different account.
    let response = dispatcher
        .handle(RawRequest::new("GET", "/quota").header("Authorization", &second))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn unknown_alias_is_a_server_error() {
    let dispatcher = build(quiet_config(), |app| {
        app.get("guarded", Action::function(|_req: Request, _res: Response| async { Ok(()) }))
            .middleware("does-not-exist");
    });
    let response = dispatcher.handle(RawRequest::new("GET", "/guarded")).await;
    assert_eq!(response.status_code(), 500);
}

struct Counted;

static COUNTED_CALLS: AtomicUsize = AtomicUsize::new(0);

impl Controller for Counted {
    fn resolve(_container: &viper::container::Container) -> FrameworkResult<Self> {
        Ok(Counted)
    }
}

#[tokio::test]
async fn preflight_short_circuits_before_the_controller() {
    let dispatcher = build(quiet_config(), |app| {
        app.post(
            "api/things",
            Action::controller("store", |_c: Counted, _req: Request, _res: Response| async {
                COUNTED_CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
    });

    let response = dispatcher
        .handle(RawRequest::new("OPTIONS", "/api/things").header("Origin", "https://app.example"))
        .await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.get_header("access-control-allow-origin"), Some("*"));
    assert!(response.get_header("access-control-allow-methods").is_some());
    assert_eq!(COUNTED_CALLS.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn options_without_cors_reports_allowed_methods() {
    let mut config = quiet_config();
    config.cors.enabled = false;
    let dispatcher = build(config, |app| {
        app.get("things", Action::function(|_req: Request, _res: Response| async { Ok(()) }));
        app.post("things", Action::function(|_req: Request, _res: Response| async { Ok(()) }));
    });

    let response = dispatcher.handle(RawRequest::new("OPTIONS", "/things")).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.get_header("allow"), Some("GET, POST, HEAD, OPTIONS"));
}

#[tokio::test]
async fn head_falls_back_to_get_without_a_body() {
    let dispatcher = build(quiet_config(), |app| {
        app.get(
            "status",
            Action::function(|_req: Request, _res: Response| async { Ok(json!({"ok": true})) }),
        );
    });

    let get = dispatcher.handle(RawRequest::new("GET", "/status")).await;
    let response = dispatcher.handle(RawRequest::new("HEAD", "/status")).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.body(), "");
    assert_eq!(response.get_header("content-type"), Some("application/json"));
    assert!(get.content_length() > 0);
    assert_eq!(response.content_length(), get.content_length());

    let mut out = Vec::<u8>::new();
    dispatcher
        .dispatch(RawRequest::new("HEAD", "/status"), &mut out)
        .await
        .unwrap();
    let written = String::from_utf8(out).unwrap();
    assert!(written.contains(&format!("Content-Length: {}\r\n", get.content_length())));
    assert!(written.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn encoded_slash_is_part_of_one_parameter() {
    let dispatcher = build(quiet_config(), |app| {
        app.get(
            "files/{name}",
            Action::function(|req: Request, _res: Response| async move {
                Ok(json!(req.param("name")))
            }),
        );
    });

    let response = dispatcher.handle(RawRequest::new("GET", "/files/a%2Fb")).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(body(&response)["data"], json!("a/b"));

    let response = dispatcher.handle(RawRequest::new("GET", "/files/a/b")).await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn first_registered_route_wins() {
    let dispatcher = build(quiet_config(), |app| {
        app.get(
            "users/me",
            Action::function(|_req: Request, _res: Response| async { Ok(json!("literal")) }),
        );
        app.get(
            "users/{id}",
            Action::function(|_req: Request, _res: Response| async { Ok(json!("dynamic")) }),
        );
    });

    let response = dispatcher.handle(RawRequest::new("GET", "/users/me")).await;
    assert_eq!(body(&response)["data"], json!("literal"));
    let response = dispatcher.handle(RawRequest::new("GET", "/users/9")).await;
    assert_eq!(body(&response)["data"], json!("dynamic"));
}

#[tokio::test]
async fn rate_limit_rejects_the_request_over_the_limit() {
    let mut config = AppConfig::default();
    config.rate_limit.max_requests = 3;
    config.rate_limit.window_secs = 60;
    let dispatcher = build(config, |app| {
        app.get("ping", Action::function(|_req: Request, _res: Response| async { Ok(()) }));
    });

    for remaining in ["2", "1", "0"] {
        let response = dispatcher.handle(RawRequest::new("GET", "/ping")).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.get_header("x-ratelimit-limit"), Some("3"));
        assert_eq!(response.get_header("x-ratelimit-remaining"), Some(remaining));
    }

    let response = dispatcher.handle(RawRequest::new("GET", "/ping")).await;
    assert_eq!(response.status_code(), 429);
    assert_eq!(response.get_header("retry-after"), Some("60"));
    assert_eq!(
        body(&response),
        json!({"error": true, "message": "Rate limit exceeded", "status": 429})
    );
}

#[tokio::test]
async fn url_param_selects_the_route_path() {
    let mut config = quiet_config();
    config.routing.url_param = Some("url".into());
    let dispatcher = build(config, |app| {
        app.get(
            "reports/{year}",
            Action::function(|req: Request, _res: Response| async move {
                Ok(json!(req.param("year")))
            }),
        );
    });

    let response = dispatcher
        .handle(RawRequest::new("GET", "/index.php?url=reports/2024"))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(body(&response)["data"], json!("2024"));
}

#[tokio::test]
async fn dispatch_writes_the_response() {
    let dispatcher = build(quiet_config(), |app| {
        app.get("hello", Action::function(|_req: Request, mut res: Response| async move {
            res.text("hi", 200);
            Ok(res)
        }));
    });

    let mut out = Vec::<u8>::new();
    let response = dispatcher
        .dispatch(RawRequest::new("GET", "/hello"), &mut out)
        .await
        .unwrap();
    assert!(response.is_sent());
    let written = String::from_utf8(out).unwrap();
    assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(written.ends_with("\r\n\r\nhi"));
}
