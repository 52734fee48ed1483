use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A query-string or form value. `key[]=a&key[]=b` collects into a list;
/// a plain key that repeats keeps its last value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    List(Vec<String>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Single(value) => Some(value),
            ParamValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> &[String] {
        match self {
            ParamValue::Single(value) => std::slice::from_ref(value),
            ParamValue::List(values) => values,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ParamValue::Single(value) => Value::String(value.clone()),
            ParamValue::List(values) => {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// A file part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

#[derive(Debug)]
enum MultipartError {
    BoundaryNotFound,
    InvalidFormat,
    Utf8Error,
}

/// Decodes a url-encoded component, treating `+` as a space. Malformed
/// escapes are kept verbatim.
pub(crate) fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

pub(crate) fn parse_query(query: &str) -> HashMap<String, ParamValue> {
    let mut params: HashMap<String, ParamValue> = HashMap::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);

        if let Some(base) = key.strip_suffix("[]") {
            match params.get_mut(base) {
                Some(ParamValue::List(values)) => values.push(value),
                _ => {
                    params.insert(base.to_string(), ParamValue::List(vec![value]));
                }
            }
        } else if !key.is_empty() {
            params.insert(key, ParamValue::Single(value));
        }
    }

    params
}

pub(crate) fn parse_urlencoded(body: &[u8]) -> Map<String, Value> {
    parse_query(&String::from_utf8_lossy(body))
        .into_iter()
        .map(|(key, value)| (key, value.to_value()))
        .collect()
}

/// JSON bodies that fail to parse, or are not objects, yield no fields.
pub(crate) fn parse_json(body: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub(crate) fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), decode_component(value.trim())))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Splits a multipart body into text fields and uploaded files. A body
/// without a usable boundary produces nothing.
pub(crate) fn parse_multipart(
    content_type: &str,
    body: &[u8],
) -> (Map<String, Value>, Vec<UploadedFile>) {
    match try_parse_multipart(content_type, body) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(error = ?err, "discarding malformed multipart body");
            (Map::new(), Vec::new())
        }
    }
}

fn try_parse_multipart(
    content_type: &str,
    body: &[u8],
) -> Result<(Map<String, Value>, Vec<UploadedFile>), MultipartError> {
    let boundary = extract_boundary(content_type)?;
    let delimiter = format!("--{boundary}");

    let mut fields = Map::new();
    let mut files = Vec::new();

    for part in split_body(body, &delimiter) {
        let (headers, content) = split_headers_content(part)?;
        let headers = parse_part_headers(headers)?;

        let Some(name) = headers.get("name") else {
            continue;
        };

        if let Some(filename) = headers.get("filename") {
            files.push(UploadedFile {
                field: name.clone(),
                filename: filename.clone(),
                content_type: headers
                    .get("content-type")
                    .cloned()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                content: content.to_vec(),
            });
        } else if let Ok(text) = std::str::from_utf8(content) {
            fields.insert(name.clone(), Value::String(text.to_string()));
        }
    }

    Ok((fields, files))
}

fn extract_boundary(content_type: &str) -> Result<String, MultipartError> {
    content_type
        .split(';')
        .find_map(|s| s.trim().strip_prefix("boundary="))
        .map(|s| s.trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .ok_or(MultipartError::BoundaryNotFound)
}

fn split_body<'a>(body: &'a [u8], delimiter: &str) -> Vec<&'a [u8]> {
    let opening = format!("{delimiter}\r\n").into_bytes();
    let separator = format!("\r\n{delimiter}").into_bytes();

    let Some(first) = find_subsequence(body, &opening) else {
        return Vec::new();
    };

    let mut parts = Vec::new();
    let mut rest = &body[first + opening.len()..];
    while let Some(pos) = find_subsequence(rest, &separator) {
        parts.push(&rest[..pos]);
        rest = &rest[pos + separator.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        rest = rest.strip_prefix(b"\r\n".as_slice()).unwrap_or(rest);
    }
    parts
}

fn split_headers_content(part: &[u8]) -> Result<(&[u8], &[u8]), MultipartError> {
    let sep = b"\r\n\r\n";
    find_subsequence(part, sep)
        .map(|pos| (&part[..pos], &part[pos + sep.len()..]))
        .ok_or(MultipartError::InvalidFormat)
}

fn parse_part_headers(headers: &[u8]) -> Result<HashMap<String, String>, MultipartError> {
    let mut map = HashMap::new();
    let headers = std::str::from_utf8(headers).map_err(|_| MultipartError::Utf8Error)?;

    for line in headers.split("\r\n") {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if key == "content-disposition" {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.trim().split_once('=') {
                        map.insert(k.to_string(), v.trim_matches('"').to_string());
                    }
                }
            } else {
                map.insert(key, value.to_string());
            }
        }
    }

    Ok(map)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
