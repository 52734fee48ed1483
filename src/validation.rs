use crate::error::{FrameworkError, FrameworkResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid");
    static ref ALPHA: Regex = Regex::new(r"^[A-Za-z]+$").expect("alpha pattern is valid");
    static ref ALPHA_NUM: Regex =
        Regex::new(r"^[A-Za-z0-9]+$").expect("alpha_num pattern is valid");
}

/// Validation messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: String) {
        self.0.entry(field.to_string()).or_default().push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|messages| messages.first()).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Required,
    Email,
    Min(f64),
    Max(f64),
    Numeric,
    Alpha,
    AlphaNum,
    In(Vec<String>),
}

impl Rule {
    fn parse(spec: &str) -> Option<Rule> {
        let (name, arg) = match spec.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (spec.trim(), None),
        };
        match (name, arg) {
            ("required", _) => Some(Rule::Required),
            ("email", _) => Some(Rule::Email),
            ("numeric", _) => Some(Rule::Numeric),
            ("alpha", _) => Some(Rule::Alpha),
            ("alpha_num", _) => Some(Rule::AlphaNum),
            ("min", Some(n)) => n.parse().ok().map(Rule::Min),
            ("max", Some(n)) => n.parse().ok().map(Rule::Max),
            ("in", Some(list)) => Some(Rule::In(list.split(',').map(str::to_string).collect())),
            _ => {
                tracing::debug!(rule = spec, "ignoring unknown validation rule");
                None
            }
        }
    }

    fn check(&self, field: &str, value: Option<&Value>) -> Option<String> {
        if self != &Rule::Required && is_blank(value) {
            return None;
        }
        let text = value.map(as_text).unwrap_or_default();

        match self {
            Rule::Required if is_blank(value) => Some(format!("The {field} field is required")),
            Rule::Required => None,
            Rule::Email if !EMAIL.is_match(&text) => {
                Some(format!("The {field} must be a valid email address"))
            }
            Rule::Numeric if numeric(value).is_none() => {
                Some(format!("The {field} must be a number"))
            }
            Rule::Min(min) => match numeric(value) {
                Some(n) if n < *min => Some(format!("The {field} must be at least {min}")),
                Some(_) => None,
                None if (text.chars().count() as f64) < *min => {
                    Some(format!("The {field} must be at least {min} characters"))
                }
                None => None,
            },
            Rule::Max(max) => match numeric(value) {
                Some(n) if n > *max => Some(format!("The {field} must not exceed {max}")),
                Some(_) => None,
                None if (text.chars().count() as f64) > *max => {
                    Some(format!("The {field} must not exceed {max} characters"))
                }
                None => None,
            },
            Rule::Alpha if !ALPHA.is_match(&text) => {
                Some(format!("The {field} may only contain letters"))
            }
            Rule::AlphaNum if !ALPHA_NUM.is_match(&text) => {
                Some(format!("The {field} may only contain letters and numbers"))
            }
            Rule::In(allowed) if !allowed.iter().any(|candidate| candidate == &text) => {
                Some(format!("The selected {field} is invalid"))
            }
            _ => None,
        }
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Checks request data against `rule|rule:arg` strings, one per field.
///
/// Rules other than `required` skip absent or blank values, so optional
/// fields are only checked when present.
#[derive(Debug)]
pub struct Validator<'a> {
    data: &'a Map<String, Value>,
    rules: Vec<(String, Vec<Rule>)>,
}

impl<'a> Validator<'a> {
    pub fn make(data: &'a Map<String, Value>, rules: &[(&str, &str)]) -> Self {
        let rules = rules
            .iter()
            .map(|(field, spec)| {
                let parsed = spec.split('|').filter(|s| !s.is_empty()).filter_map(Rule::parse).collect();
                (field.to_string(), parsed)
            })
            .collect();
        Validator { data, rules }
    }

    pub fn errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::default();
        for (field, rules) in &self.rules {
            let value = self.data.get(field);
            for rule in rules {
                if let Some(message) = rule.check(field, value) {
                    errors.add(field, message);
                }
            }
        }
        errors
    }

    pub fn fails(&self) -> bool {
        !self.errors().is_empty()
    }

    pub fn validate(&self) -> FrameworkResult<()> {
        let errors = self.errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FrameworkError::Validation(errors))
        }
    }
}

/// Shorthand for `Validator::make(data, rules).validate()`.
pub fn validate(data: &Map<String, Value>, rules: &[(&str, &str)]) -> FrameworkResult<()> {
    Validator::make(data, rules).validate()
}
