//! Scenario and step definitions
//!
//! A [`LoadScenario`] is an ordered list of [`Step`]s built once and then
//! shared read-only by every virtual user.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::context::{json_path, render_value};

/// HTTP method of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// Request body template
#[derive(Debug, Clone, PartialEq)]
pub enum StepBody {
    /// Sent as-is after interpolation
    Text(String),
    /// Interpolated recursively, serialized as JSON, sent with a JSON content type
    Json(Value),
}

impl From<&str> for StepBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StepBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for StepBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Where an extracted value comes from
#[derive(Debug, Clone)]
pub enum ExtractSource {
    /// Dot path into the JSON response body, e.g. `data.items.0.id`
    Json { path: String },
    /// Response header value
    Header { name: String },
    /// Capture group of a regex run against the response body
    Regex { pattern: Regex, group: usize },
}

/// Store part of a response in the user's context under `variable`
#[derive(Debug, Clone)]
pub struct ExtractRule {
    pub variable: String,
    pub source: ExtractSource,
}

impl ExtractRule {
    pub fn json(variable: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            source: ExtractSource::Json { path: path.into() },
        }
    }

    pub fn header(variable: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            source: ExtractSource::Header { name: name.into() },
        }
    }

    /// Capture `group` (1 is the first parenthesized group) of `pattern`
    pub fn regex(
        variable: impl Into<String>,
        pattern: &str,
        group: usize,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            variable: variable.into(),
            source: ExtractSource::Regex {
                pattern: Regex::new(pattern)?,
                group,
            },
        })
    }
}

/// Comparison applied to an actual response value
#[derive(Debug, Clone)]
pub enum Expectation {
    /// Loose equality: `200` matches `"200"`
    Equals(Value),
    Contains(String),
    GreaterThan(f64),
    LessThan(f64),
    Matches(Regex),
}

impl Expectation {
    pub fn equals(value: impl Into<Value>) -> Self {
        Self::Equals(value.into())
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches(Regex::new(pattern)?))
    }

    /// Evaluate against an actual value; a missing value only satisfies
    /// `Equals(null)`
    pub fn evaluate(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Self::Equals(expected) => loose_eq(actual, expected),
            Self::Contains(needle) => match actual {
                Value::Array(items) => items.iter().any(|item| render_value(item) == *needle),
                Value::Null => false,
                other => render_value(other).contains(needle.as_str()),
            },
            Self::GreaterThan(bound) => as_number(actual).is_some_and(|n| n > *bound),
            Self::LessThan(bound) => as_number(actual).is_some_and(|n| n < *bound),
            Self::Matches(re) => !actual.is_null() && re.is_match(&render_value(actual)),
        }
    }

    /// Human-readable form used in validation detail
    pub fn describe(&self) -> String {
        match self {
            Self::Equals(v) => render_value(v),
            Self::Contains(s) => format!("contains {s}"),
            Self::GreaterThan(n) => format!("> {n}"),
            Self::LessThan(n) => format!("< {n}"),
            Self::Matches(re) => format!("matches {}", re.as_str()),
        }
    }
}

fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    !actual.is_null() && !expected.is_null() && render_value(actual) == render_value(expected)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One response check
#[derive(Debug, Clone)]
pub enum Validator {
    Status(u16),
    Header { name: String, expect: Expectation },
    Json { path: String, expect: Expectation },
}

/// A named response check
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub name: String,
    pub check: Validator,
}

impl ValidationRule {
    pub fn status(expected: u16) -> Self {
        Self {
            name: "status".to_string(),
            check: Validator::Status(expected),
        }
    }

    pub fn header(name: impl Into<String>, expect: Expectation) -> Self {
        let name = name.into();
        Self {
            name: format!("header:{name}"),
            check: Validator::Header { name, expect },
        }
    }

    pub fn json(path: impl Into<String>, expect: Expectation) -> Self {
        let path = path.into();
        Self {
            name: format!("json:{path}"),
            check: Validator::Json { path, expect },
        }
    }

    /// Override the name reported in validation detail
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Evaluate against a response. Returns `(passed, actual, expected)`.
    pub(crate) fn evaluate(
        &self,
        status: u16,
        header: impl Fn(&str) -> Option<String>,
        json_body: Option<&Value>,
    ) -> (bool, Value, String) {
        match &self.check {
            Validator::Status(expected) => (
                status == *expected,
                Value::from(status),
                expected.to_string(),
            ),
            Validator::Header { name, expect } => {
                let actual = header(name).map(Value::String);
                (
                    expect.evaluate(actual.as_ref()),
                    actual.unwrap_or(Value::Null),
                    expect.describe(),
                )
            }
            Validator::Json { path, expect } => {
                let actual = json_body.and_then(|body| json_path(body, path));
                (
                    expect.evaluate(actual),
                    actual.cloned().unwrap_or(Value::Null),
                    expect.describe(),
                )
            }
        }
    }
}

/// One request in a scenario
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub method: HttpMethod,
    /// URL template; a leading `/` is resolved against the transport's base URL
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<StepBody>,
    pub extract: Vec<ExtractRule>,
    pub validate: Vec<ValidationRule>,
}

impl Step {
    pub fn new(name: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            extract: Vec::new(),
            validate: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<StepBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_extract(mut self, rules: Vec<ExtractRule>) -> Self {
        self.extract = rules;
        self
    }

    pub fn with_validate(mut self, rules: Vec<ValidationRule>) -> Self {
        self.validate = rules;
        self
    }
}

/// Ordered list of steps executed by every virtual user
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use stampede::load::{Expectation, ExtractRule, LoadScenario, ValidationRule};
///
/// let scenario = LoadScenario::new("checkout")
///     .post("/login", json!({"user": "{{user_id}}"}))
///     .extract(vec![ExtractRule::json("token", "data.token")])
///     .get("/cart?token={{token}}")
///     .validate(vec![
///         ValidationRule::status(200),
///         ValidationRule::json("items.0.sku", Expectation::contains("SKU")),
///     ]);
///
/// assert_eq!(scenario.steps().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct LoadScenario {
    name: String,
    steps: Vec<Step>,
}

impl LoadScenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step; names need not be unique
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a `GET` step named `GET <url>`
    pub fn get(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.step(Step::new(format!("GET {url}"), HttpMethod::Get, url))
    }

    /// Append a `POST` step named `POST <url>`
    pub fn post(self, url: impl Into<String>, body: impl Into<StepBody>) -> Self {
        let url = url.into();
        self.step(Step::new(format!("POST {url}"), HttpMethod::Post, url).with_body(body))
    }

    /// Rename the most recently added step
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Some(last) = self.last_step("named") {
            last.name = name.into();
        }
        self
    }

    /// Add a header to the most recently added step
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(last) = self.last_step("header") {
            last.headers.insert(name.into(), value.into());
        }
        self
    }

    /// Set validation rules on the most recently added step
    pub fn validate(mut self, rules: Vec<ValidationRule>) -> Self {
        if let Some(last) = self.last_step("validate") {
            last.validate = rules;
        }
        self
    }

    /// Set extraction rules on the most recently added step
    pub fn extract(mut self, rules: Vec<ExtractRule>) -> Self {
        if let Some(last) = self.last_step("extract") {
            last.extract = rules;
        }
        self
    }

    fn last_step(&mut self, op: &str) -> Option<&mut Step> {
        let scenario = self.name.clone();
        let last = self.steps.last_mut();
        if last.is_none() {
            warn!(scenario = %scenario, op, "No step to attach to; ignoring");
        }
        last
    }
}
