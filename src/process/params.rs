use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WrightError};

/// A parameter value as written in a preset or recorded in provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "crate::data::model::float_repr")] f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(s) => write!(f, "{s}"),
            ParamValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|p| p.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl ParamValue {
    /// Parse a bare token from the compact step syntax:
    /// bool, then int, then float, else text.
    pub fn parse_token(token: &str) -> Self {
        let token = token.trim();
        match token {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = token.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(v) = token.parse::<f64>() {
            return ParamValue::Float(v);
        }
        let unquoted = token
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .or_else(|| token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
            .unwrap_or(token);
        ParamValue::Text(unquoted.to_string())
    }

    fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "string",
            ParamValue::List(_) => "list",
        }
    }
}

pub type Params = BTreeMap<String, ParamValue>;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    String,
    StringList,
    FloatList,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Bool => "bool",
            ParamKind::String => "string",
            ParamKind::StringList => "list of strings",
            ParamKind::FloatList => "list of numbers",
        };
        write!(f, "{name}")
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Filled in when the parameter is omitted.
    pub default: Option<ParamValue>,
    pub required: bool,
    /// Inclusive numeric bounds.
    pub range: (Option<f64>, Option<f64>),
    pub choices: Vec<String>,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind) -> Self {
        ParamSpec {
            name: name.to_string(),
            kind,
            default: None,
            required: true,
            range: (None, None),
            choices: Vec::new(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind) -> Self {
        ParamSpec {
            required: false,
            ..ParamSpec::required(name, kind)
        }
    }

    pub fn with_default(name: &str, kind: ParamKind, default: ParamValue) -> Self {
        ParamSpec {
            default: Some(default),
            required: false,
            ..ParamSpec::required(name, kind)
        }
    }

    pub fn min(mut self, min: f64) -> Self {
        self.range.0 = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.range.1 = Some(max);
        self
    }

    pub fn choices(mut self, choices: &[&str]) -> Self {
        self.choices = choices.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Check `value` and coerce ints to floats where floats are declared.
    fn accept(&self, value: &ParamValue) -> std::result::Result<ParamValue, String> {
        let coerced = match (self.kind, value) {
            (ParamKind::Int, ParamValue::Int(_))
            | (ParamKind::Float, ParamValue::Float(_))
            | (ParamKind::Bool, ParamValue::Bool(_))
            | (ParamKind::String, ParamValue::Text(_)) => value.clone(),
            (ParamKind::Float, ParamValue::Int(i)) => ParamValue::Float(*i as f64),
            (ParamKind::StringList, ParamValue::Text(s)) => {
                ParamValue::List(vec![ParamValue::Text(s.clone())])
            }
            (ParamKind::StringList, ParamValue::List(items))
                if items.iter().all(|i| matches!(i, ParamValue::Text(_))) =>
            {
                value.clone()
            }
            (ParamKind::FloatList, ParamValue::List(items)) => {
                let floats: Option<Vec<ParamValue>> = items
                    .iter()
                    .map(|i| match i {
                        ParamValue::Float(v) => Some(ParamValue::Float(*v)),
                        ParamValue::Int(n) => Some(ParamValue::Float(*n as f64)),
                        _ => None,
                    })
                    .collect();
                ParamValue::List(floats.ok_or_else(|| format!("expected {}", self.kind))?)
            }
            (kind, other) => {
                return Err(format!("expected {kind}, got {} '{other}'", other.type_name()))
            }
        };

        let numeric = match &coerced {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        };
        if let Some(v) = numeric {
            if v.is_nan() {
                return Err("NaN is not allowed".into());
            }
            if let Some(min) = self.range.0 {
                if v < min {
                    return Err(format!("{v} is below the minimum {min}"));
                }
            }
            if let Some(max) = self.range.1 {
                if v > max {
                    return Err(format!("{v} is above the maximum {max}"));
                }
            }
        }

        if !self.choices.is_empty() {
            if let ParamValue::Text(s) = &coerced {
                if !self.choices.iter().any(|c| c == s) {
                    return Err(format!("'{s}' is not one of {}", self.choices.join(", ")));
                }
            }
        }
        Ok(coerced)
    }
}

/// Ordered parameter declarations of one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    specs: Vec<ParamSpec>,
}

impl ParameterSchema {
    pub fn new(specs: Vec<ParamSpec>) -> Self {
        ParameterSchema { specs }
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Validate `given` for `operation` and fill in defaults.
    pub fn validate(&self, operation: &str, given: &Params) -> Result<Params> {
        let invalid = |parameter: &str, reason: String| WrightError::InvalidParameter {
            operation: operation.to_string(),
            parameter: parameter.to_string(),
            reason,
        };

        if let Some(unknown) = given.keys().find(|k| self.get(k).is_none()) {
            let known: Vec<&str> = self.specs.iter().map(|s| s.name.as_str()).collect();
            return Err(invalid(
                unknown,
                format!("unknown parameter (accepted: {})", known.join(", ")),
            ));
        }

        let mut resolved = Params::new();
        for spec in &self.specs {
            match given.get(&spec.name) {
                Some(value) => {
                    let value = spec.accept(value).map_err(|r| invalid(&spec.name, r))?;
                    resolved.insert(spec.name.clone(), value);
                }
                None => {
                    if let Some(default) = &spec.default {
                        resolved.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(invalid(&spec.name, "missing required parameter".into()));
                    }
                }
            }
        }
        Ok(resolved)
    }
}

// ---------------------------------------------------------------------------
// Typed access for operations
// ---------------------------------------------------------------------------

/// Read resolved parameters inside an operation. Values were already checked
/// against the schema, so a mismatch here is an `InvalidParameter` bug in the
/// descriptor rather than user input.
pub struct ParamReader<'a> {
    operation: &'a str,
    params: &'a Params,
}

impl<'a> ParamReader<'a> {
    pub fn new(operation: &'a str, params: &'a Params) -> Self {
        ParamReader { operation, params }
    }

    fn invalid(&self, name: &str, reason: &str) -> WrightError {
        WrightError::InvalidParameter {
            operation: self.operation.to_string(),
            parameter: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn opt_str(&self, name: &str) -> Option<&'a str> {
        match self.params.get(name) {
            Some(ParamValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Result<&'a str> {
        self.opt_str(name).ok_or_else(|| self.invalid(name, "expected a string"))
    }

    pub fn opt_f64(&self, name: &str) -> Option<f64> {
        match self.params.get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            Some(ParamValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.opt_f64(name).ok_or_else(|| self.invalid(name, "expected a number"))
    }

    pub fn usize(&self, name: &str) -> Result<usize> {
        match self.params.get(name) {
            Some(ParamValue::Int(i)) if *i >= 0 => Ok(*i as usize),
            _ => Err(self.invalid(name, "expected a non-negative integer")),
        }
    }

    pub fn strings(&self, name: &str) -> Result<Vec<&'a str>> {
        match self.params.get(name) {
            Some(ParamValue::List(items)) => items
                .iter()
                .map(|i| match i {
                    ParamValue::Text(s) => Ok(s.as_str()),
                    _ => Err(self.invalid(name, "expected a list of strings")),
                })
                .collect(),
            Some(ParamValue::Text(s)) => Ok(vec![s.as_str()]),
            _ => Err(self.invalid(name, "expected a list of strings")),
        }
    }
}
