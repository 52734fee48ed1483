use crate::error::FrameworkError;
use serde::Serialize;
use serde_json::{json, Value};
use std::io;
use std::time::SystemTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Options for a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: Option<SystemTime>,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            expires: None,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
        }
    }

    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    fn to_header(&self) -> String {
        let mut header = format!(
            "{}={}",
            self.name,
            urlencoding::encode(&self.value)
        );
        if let Some(expires) = self.expires {
            header.push_str("; Expires=");
            header.push_str(&httpdate::fmt_http_date(expires));
        }
        header.push_str("; Path=");
        header.push_str(&self.path);
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

/// An outgoing response. Once sent, every mutator is a no-op and further
/// sends write nothing.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    head_length: Option<usize>,
    sent: bool,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: Vec::new(),
            body: String::new(),
            head_length: None,
            sent: false,
        }
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        if !self.sent {
            self.status = status;
        }
        self
    }

    /// Sets a header, replacing any existing header with the same name
    /// (compared case-insensitively).
    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        if self.sent {
            return self;
        }
        let name = name.as_ref();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.as_ref().to_string()));
        self
    }

    /// Adds a header line without touching existing ones with the same name.
    pub fn append_header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        if !self.sent {
            self.headers
                .push((name.as_ref().to_string(), value.as_ref().to_string()));
        }
        self
    }

    pub fn with_headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self.header(name, value);
        }
        self
    }

    pub fn content<T: AsRef<str>>(&mut self, body: T) -> &mut Self {
        if !self.sent {
            self.body = body.as_ref().to_string();
        }
        self
    }

    pub fn json<T: Serialize>(&mut self, value: &T, status: u16) -> Result<&mut Self, FrameworkError> {
        let body = serde_json::to_string(value)?;
        Ok(self
            .status(status)
            .header("Content-Type", "application/json")
            .content(body))
    }

    pub fn text<T: AsRef<str>>(&mut self, text: T, status: u16) -> &mut Self {
        self.status(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .content(text)
    }

    pub fn html<T: AsRef<str>>(&mut self, html: T, status: u16) -> &mut Self {
        self.status(status)
            .header("Content-Type", "text/html; charset=utf-8")
            .content(html)
    }

    pub fn redirect(&mut self, location: &str, status: u16) -> &mut Self {
        self.status(status).header("Location", location)
    }

    pub fn cookie(&mut self, cookie: Cookie) -> &mut Self {
        let header = cookie.to_header();
        self.append_header("Set-Cookie", header)
    }

    /// `{"error": true, "message": ..., "status": ...}` with the given status.
    pub fn error(message: &str, status: u16) -> Response {
        let mut response = Response::new(status);
        response.json_value(
            json!({
                "error": true,
                "message": message,
                "status": status,
            }),
            status,
        );
        response
    }

    /// `{"success": true, "message": ..., "data": ...}` with status 200.
    pub fn success<T: Serialize>(data: &T, message: &str) -> Result<Response, FrameworkError> {
        Ok(Response::success_value(serde_json::to_value(data)?, message))
    }

    pub fn success_value(data: Value, message: &str) -> Response {
        let mut response = Response::new(200);
        response.json_value(
            json!({
                "success": true,
                "message": message,
                "data": data,
            }),
            200,
        );
        response
    }

    pub(crate) fn json_value(&mut self, value: Value, status: u16) -> &mut Self {
        self.status(status)
            .header("Content-Type", "application/json")
            .content(value.to_string())
    }

    /// Drops the body for a HEAD reply while keeping the length the
    /// matching GET would have announced.
    pub(crate) fn strip_body_for_head(&mut self) -> &mut Self {
        if !self.sent {
            self.head_length = Some(self.body.len());
            self.body.clear();
        }
        self
    }

    /// The `Content-Length` that [`send`](Self::send) will write.
    pub fn content_length(&self) -> usize {
        self.head_length.unwrap_or(self.body.len())
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Serializes the status line, headers and body to `writer`. Returns
    /// `false` without writing anything if the response was already sent.
    pub async fn send<W>(&mut self, writer: &mut W) -> io::Result<bool>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.sent {
            return Ok(false);
        }

        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, status_reason(self.status));
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        if self.get_header("date").is_none() {
            head.push_str("Date: ");
            head.push_str(&httpdate::fmt_http_date(SystemTime::now()));
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.content_length()));

        writer.write_all(head.as_bytes()).await?;
        writer.write_all(self.body.as_bytes()).await?;
        writer.flush().await?;

        self.sent = true;
        Ok(true)
    }
}

pub fn status_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Builds a `200` JSON response from `json!` syntax.
#[macro_export]
macro_rules! ok_json {
    ($($json:tt)+) => {
        $crate::http::Response::new(200)
            .json(&$crate::json!($($json)+), 200)
            .map(|response| ::std::mem::take(response))
    };
}

#[macro_export]
macro_rules! created_json {
    ($($json:tt)+) => {
        $crate::http::Response::new(201)
            .json(&$crate::json!($($json)+), 201)
            .map(|response| ::std::mem::take(response))
    };
}
