use crate::container::Container;
use crate::http::body::{self, ParamValue, UploadedFile};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
}

impl Method {
    /// Parses a method token case-insensitively. Unknown tokens fall back to GET.
    pub fn from_string(s: &str) -> Method {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "CONNECT" => Method::CONNECT,
            "OPTIONS" => Method::OPTIONS,
            "TRACE" => Method::TRACE,
            "PATCH" => Method::PATCH,
            _ => Method::GET,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        }
    }

    /// Methods whose body is parsed into input fields.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transport-level view of a request before it is normalized.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: Option<String>,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub peer: Option<SocketAddr>,
}

impl RawRequest {
    pub fn new(method: &str, target: &str) -> Self {
        Self {
            method: Some(method.to_string()),
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(self, value: &Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(value.to_string())
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// Options that affect how a raw request is normalized.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query parameter that carries the route path, for deployments that
    /// rewrite every URL into a single front script.
    pub url_param: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: HashMap<String, ParamValue>,
    input: Map<String, Value>,
    body: Vec<u8>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    files: Vec<UploadedFile>,
    ip: String,
    params: Vec<(String, String)>,
    data: HashMap<String, Value>,
    container: Container,
}

impl Request {
    pub fn from_raw(raw: RawRequest, options: &RequestOptions, container: Container) -> Request {
        let method = raw
            .method
            .as_deref()
            .map(Method::from_string)
            .unwrap_or(Method::GET);

        let (raw_path, raw_query) = match raw.target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (raw.target.as_str(), ""),
        };
        let query = body::parse_query(raw_query);

        let routed_path = options
            .url_param
            .as_deref()
            .and_then(|name| query.get(name))
            .and_then(ParamValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| raw_path.to_string());
        let path = normalize_path(&routed_path);

        let headers: HashMap<String, String> = raw
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .collect();

        let cookies = headers
            .get("cookie")
            .map(|header| body::parse_cookies(header))
            .unwrap_or_default();

        let content_type = headers
            .get("content-type")
            .map(|ct| ct.to_lowercase())
            .unwrap_or_default();
        let (input, files) = if content_type.contains("application/json") {
            (body::parse_json(&raw.body), Vec::new())
        } else if content_type.starts_with("multipart/form-data") {
            let original = headers.get("content-type").map(String::as_str).unwrap_or("");
            body::parse_multipart(original, &raw.body)
        } else if method.carries_body() && !raw.body.is_empty() {
            (body::parse_urlencoded(&raw.body), Vec::new())
        } else {
            (Map::new(), Vec::new())
        };

        let ip = client_ip(&headers, raw.peer);

        Request {
            method,
            path,
            query,
            input,
            body: raw.body,
            headers,
            cookies,
            files,
            ip,
            params: Vec::new(),
            data: HashMap::new(),
            container,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The routed path with surrounding slashes removed; the root is `""`.
    /// Segments keep their percent-encoding; the router decodes each one.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).and_then(ParamValue::as_str)
    }

    pub fn query_value(&self, key: &str) -> Option<&ParamValue> {
        self.query.get(key)
    }

    pub fn queries(&self) -> &HashMap<String, ParamValue> {
        &self.query
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.input
    }

    /// Query parameters merged with body fields. Body fields win on collision.
    pub fn all(&self) -> Map<String, Value> {
        let mut merged: Map<String, Value> = self
            .query
            .iter()
            .map(|(key, value)| (key.clone(), value.to_value()))
            .collect();
        for (key, value) in &self.input {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    pub fn has(&self, key: &str) -> bool {
        self.input.contains_key(key) || self.query.contains_key(key)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Deserializes the raw body as JSON.
    pub fn json<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.to_lowercase().contains("application/json"))
            .unwrap_or(false)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn file(&self, field: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|file| file.field == field)
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set_data<T>(&mut self, key: &str, value: T)
    where
        T: serde::Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
    }

    pub fn get_typed_data<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.to_owned()).ok())
    }
}

pub(crate) fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn client_ip(headers: &HashMap<String, String>, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| headers.get("client-ip").map(|v| v.trim()).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
