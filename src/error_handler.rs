use crate::error::FrameworkError;
use crate::http::Response;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Html,
}

impl Format {
    fn negotiate(accept: Option<&str>) -> Format {
        match accept.map(str::to_ascii_lowercase) {
            Some(accept) if accept.contains("application/json") => Format::Json,
            Some(accept) if accept.contains("text/html") => Format::Html,
            _ => Format::Json,
        }
    }
}

/// Turns errors that escaped the pipeline into responses.
///
/// In debug mode the response carries the error detail and, for faults,
/// the source location and trace. Otherwise server errors are reported
/// with a generic message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandler {
    debug: bool,
}

impl ErrorHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn handle(&self, err: &FrameworkError, accept: Option<&str>) -> Response {
        self.report(err);
        match Format::negotiate(accept) {
            Format::Json => self.render_json(err),
            Format::Html => self.render_html(err),
        }
    }

    fn report(&self, err: &FrameworkError) {
        match err.fault() {
            Some(fault) => tracing::error!(
                error = %err,
                file = fault.file.as_deref().unwrap_or("unknown"),
                line = fault.line.unwrap_or(0),
                "unhandled fault"
            ),
            None if err.is_server_error() => tracing::error!(error = %err, "request failed"),
            None => tracing::debug!(error = %err, status = err.status_code(), "request rejected"),
        }
    }

    fn public_message(&self, err: &FrameworkError) -> String {
        if err.is_server_error() && !self.debug {
            "Internal Server Error".to_string()
        } else {
            err.to_string()
        }
    }

    fn debug_details(&self, err: &FrameworkError) -> Value {
        let mut details = Map::new();
        details.insert("detail".into(), Value::String(err.to_string()));
        if let Some(fault) = err.fault() {
            details.insert("file".into(), json!(fault.file));
            details.insert("line".into(), json!(fault.line));
            details.insert("trace".into(), json!(fault.trace));
        }
        Value::Object(details)
    }

    pub fn render_json(&self, err: &FrameworkError) -> Response {
        let status = err.status_code();
        let mut body = json!({
            "error": true,
            "message": self.public_message(err),
            "status": status,
        });
        if let FrameworkError::Validation(errors) = err {
            body["errors"] = json!(errors);
        }
        if self.debug {
            body["debug"] = self.debug_details(err);
        }

        let mut response = Response::new(status);
        response.json_value(body, status);
        response
    }

    pub fn render_html(&self, err: &FrameworkError) -> Response {
        let status = err.status_code();
        let message = escape_html(&self.public_message(err));
        let mut page = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Error {status}</title></head>\n<body>\n<h1>Error {status}</h1>\n<p>{message}</p>\n"
        );
        if let FrameworkError::Validation(errors) = err {
            page.push_str("<ul>\n");
            for field in errors.fields() {
                for text in errors.get(field).unwrap_or_default() {
                    page.push_str(&format!("<li>{}</li>\n", escape_html(text)));
                }
            }
            page.push_str("</ul>\n");
        }
        if self.debug {
            if let Some(fault) = err.fault() {
                if let (Some(file), Some(line)) = (&fault.file, fault.line) {
                    page.push_str(&format!("<p><strong>File:</strong> {}:{line}</p>\n", escape_html(file)));
                }
                if let Some(trace) = &fault.trace {
                    page.push_str(&format!("<pre>{}</pre>\n", escape_html(trace)));
                }
            }
        }
        page.push_str("</body>\n</html>\n");

        let mut response = Response::new(status);
        response.html(page, status);
        response
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
