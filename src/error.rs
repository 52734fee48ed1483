use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use crate::http::Method;
use crate::validation::ValidationErrors;

/// An unexpected failure raised below the dispatcher boundary.
///
/// Carries the source location of the fault so debug responses can point at
/// it. Faults built through [`FrameworkError::internal`] record the caller's
/// location; faults converted from a panic record the panic site.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub trace: Option<String>,
}

impl Fault {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            message: message.into(),
            file: Some(location.file().to_owned()),
            line: Some(location.line()),
            trace: captured_backtrace(),
        }
    }

    /// Builds a fault from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            msg.to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "Unknown panic".to_string()
        };
        let (file, line, trace) = match take_panic_site() {
            Some(site) => (Some(site.file), Some(site.line), site.trace),
            None => (None, None, None),
        };
        Self {
            message: format!("Panic: {message}"),
            file,
            line,
            trace,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} at {}:{}", self.message, file, line),
            _ => f.write_str(&self.message),
        }
    }
}

static FAULT_TRACES: AtomicBool = AtomicBool::new(false);

/// Makes every later fault and panic carry a stack trace, regardless of
/// `RUST_BACKTRACE`. Enabled by dispatchers running in debug mode.
pub fn capture_fault_traces() {
    FAULT_TRACES.store(true, Ordering::Relaxed);
}

fn captured_backtrace() -> Option<String> {
    if FAULT_TRACES.load(Ordering::Relaxed) {
        return Some(Backtrace::force_capture().to_string());
    }
    let backtrace = Backtrace::capture();
    (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("Route not found")]
    RouteNotFound { method: Method, path: String },

    #[error("{controller}::{method} could not be resolved: {reason}")]
    HandlerNotResolvable {
        controller: String,
        method: String,
        reason: String,
    },

    #[error("Cannot resolve {type_name} from the container")]
    Unresolvable { type_name: &'static str },

    #[error("Middleware not found: {0}")]
    MiddlewareNotFound(String),

    #[error("Validation failed")]
    Validation(ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{}", .0.message)]
    Fault(Fault),
}

impl FrameworkError {
    /// Creates an unhandled-fault error that remembers where it was raised.
    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        FrameworkError::Fault(Fault::new(message))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            FrameworkError::BadRequest(_) => 400,
            FrameworkError::Unauthorized(_) => 401,
            FrameworkError::Forbidden(_) => 403,
            FrameworkError::RouteNotFound { .. } | FrameworkError::NotFound(_) => 404,
            FrameworkError::Validation(_) => 422,
            FrameworkError::HandlerNotResolvable { .. }
            | FrameworkError::Unresolvable { .. }
            | FrameworkError::MiddlewareNotFound(_)
            | FrameworkError::Json(_)
            | FrameworkError::Io(_)
            | FrameworkError::Fault(_) => 500,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            FrameworkError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

pub type FrameworkResult<T> = Result<T, FrameworkError>;

struct PanicSite {
    file: String,
    line: u32,
    trace: Option<String>,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a panic hook that remembers the location (and, when traces are
/// enabled, the stack) of the latest panic on the panicking thread, so the
/// dispatcher can report it after `catch_unwind`.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                let site = PanicSite {
                    file: location.file().to_owned(),
                    line: location.line(),
                    trace: captured_backtrace(),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(site));
            }
            previous(info);
        }));
    });
}

fn take_panic_site() -> Option<PanicSite> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_records_caller_location() {
        let err = FrameworkError::internal("boom");
        let fault = err.fault().unwrap();
        assert_eq!(fault.file.as_deref(), Some(file!()));
        assert!(fault.line.unwrap() > 0);
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        let not_found = FrameworkError::RouteNotFound {
            method: Method::GET,
            path: "missing".into(),
        };
        assert_eq!(not_found.status_code(), 404);
        assert_eq!(not_found.to_string(), "Route not found");
        assert_eq!(FrameworkError::Unauthorized("no".into()).status_code(), 401);
        assert_eq!(
            FrameworkError::Validation(ValidationErrors::default()).status_code(),
            422
        );
        assert_eq!(FrameworkError::MiddlewareNotFound("x".into()).status_code(), 500);
    }

    #[test]
    fn panic_payload_becomes_fault() {
        install_panic_hook();
        let payload = std::panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
        let fault = Fault::from_panic(payload);
        assert_eq!(fault.message, "Panic: kaboom");
        assert_eq!(fault.file.as_deref(), Some(file!()));
    }

    #[test]
    fn enabled_traces_are_always_captured() {
        install_panic_hook();
        capture_fault_traces();

        let err = FrameworkError::internal("traced");
        assert!(err.fault().and_then(|f| f.trace.as_deref()).is_some_and(|t| !t.is_empty()));

        let payload = std::panic::catch_unwind(|| panic!("traced panic")).unwrap_err();
        let fault = Fault::from_panic(payload);
        assert!(fault.trace.is_some_and(|t| !t.is_empty()));
    }
}
