use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{([^{}/]*)\}").expect("placeholder pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("empty placeholder `{{}}`")]
    EmptyPlaceholder,
    #[error("invalid placeholder name `{0}`")]
    InvalidName(String),
    #[error("duplicate placeholder `{0}`")]
    DuplicateName(String),
    #[error("unbalanced brace")]
    UnbalancedBrace,
    #[error("{0}")]
    Regex(String),
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Dynamic { regex: Regex, names: Vec<String> },
}

/// A compiled route template such as `api/users/{id}`.
///
/// Templates are stored without leading or trailing slashes. Each `{name}`
/// placeholder matches text within exactly one non-empty path segment.
/// Paths are matched segment by segment after percent-decoding each
/// segment, so an encoded `%2F` stays inside its parameter.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    template: String,
    segments: Vec<Segment>,
    names: Vec<String>,
}

impl RoutePattern {
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        let template = template.trim_matches('/').to_string();
        let mut names: Vec<String> = Vec::new();
        let segments = split(&template)
            .map(|segment| parse_segment(segment, &mut names))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RoutePattern {
            template,
            segments,
            names,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn is_literal(&self) -> bool {
        self.names.is_empty()
    }

    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    /// Matches a normalized, still percent-encoded path, returning decoded
    /// parameters in placeholder order.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<String> = split(path).map(decode_segment).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Vec::with_capacity(self.names.len());
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(text) => {
                    if text != part {
                        return None;
                    }
                }
                Segment::Dynamic { regex, names } => {
                    let caps = regex.captures(part)?;
                    for (i, name) in names.iter().enumerate() {
                        if let Some(value) = caps.get(i + 1) {
                            params.push((name.clone(), value.as_str().to_string()));
                        }
                    }
                }
            }
        }
        Some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    let mut parts = path.split('/');
    if path.is_empty() {
        parts.next();
    }
    parts
}

fn decode_segment(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn parse_segment(segment: &str, names: &mut Vec<String>) -> Result<Segment, PatternError> {
    if !segment.contains(['{', '}']) {
        return Ok(Segment::Literal(segment.to_string()));
    }

    let mut source = String::with_capacity(segment.len() + 8);
    let mut local = Vec::new();
    let mut last = 0;

    source.push('^');
    for caps in PLACEHOLDER.captures_iter(segment) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_literal(&mut source, &segment[last..whole.start()])?;

        let name = name.as_str();
        if name.is_empty() {
            return Err(PatternError::EmptyPlaceholder);
        }
        if !is_identifier(name) {
            return Err(PatternError::InvalidName(name.to_string()));
        }
        if names.iter().any(|existing| existing == name) {
            return Err(PatternError::DuplicateName(name.to_string()));
        }
        names.push(name.to_string());
        local.push(name.to_string());
        source.push_str("(.+)");
        last = whole.end();
    }
    push_literal(&mut source, &segment[last..])?;
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| PatternError::Regex(e.to_string()))?;
    Ok(Segment::Dynamic { regex, names: local })
}

fn push_literal(source: &mut String, literal: &str) -> Result<(), PatternError> {
    if literal.contains(['{', '}']) {
        return Err(PatternError::UnbalancedBrace);
    }
    source.push_str(&regex::escape(literal));
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
