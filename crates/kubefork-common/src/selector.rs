//! Label selector evaluation
//!
//! Two things live here:
//!
//! - [`routes_to`]: the subset match a Service selector performs against pod
//!   template labels. This decides which deployments are reachable through a
//!   service.
//! - [`LabelQuery`]: a parsed Kubernetes `LabelSelector` that can be rendered
//!   for API list calls and evaluated in memory against a label set.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::Error;

/// Check whether a selector map routes to a label set
///
/// Every key/value of `selector` must be present and equal in `labels`.
/// An empty selector matches everything; callers that do not want "all"
/// semantics must guard against it.
pub fn routes_to(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Operator of a single label requirement
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    /// Label must equal the single value
    Equals,
    /// Label value must be in the set
    In,
    /// Label must be absent or its value not in the set
    NotIn,
    /// Label must exist
    Exists,
    /// Label must not exist
    DoesNotExist,
}

/// One `key op values` clause of a [`LabelQuery`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    /// Label key
    pub key: String,
    /// Relationship between the label and `values`
    pub operator: Operator,
    /// Values for `Equals`, `In` and `NotIn`
    pub values: Vec<String>,
}

impl Requirement {
    /// Check if a label set satisfies this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => !value.is_some_and(|v| self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, self.values.join(",")),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A conjunction of label requirements
///
/// The empty query selects everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelQuery {
    requirements: Vec<Requirement>,
}

impl LabelQuery {
    /// Query that selects every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Query requiring each key to equal its value
    pub fn from_map(labels: &BTreeMap<String, String>) -> Self {
        labels
            .iter()
            .fold(Self::default(), |query, (k, v)| query.with_equals(k, v))
    }

    /// Parse a Kubernetes `LabelSelector` (matchLabels + matchExpressions)
    pub fn from_label_selector(selector: &LabelSelector) -> Result<Self, Error> {
        let mut query = selector
            .match_labels
            .as_ref()
            .map(Self::from_map)
            .unwrap_or_default();

        for expr in selector.match_expressions.iter().flatten() {
            let values = expr.values.clone().unwrap_or_default();
            let operator = match expr.operator.as_str() {
                "In" => Operator::In,
                "NotIn" => Operator::NotIn,
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => {
                    return Err(Error::validation(format!(
                        "unsupported label selector operator {other:?} for key {:?}",
                        expr.key
                    )))
                }
            };
            let needs_values = matches!(operator, Operator::In | Operator::NotIn);
            if needs_values == values.is_empty() {
                return Err(Error::validation(format!(
                    "label selector operator {} for key {:?} has invalid values",
                    expr.operator, expr.key
                )));
            }
            query.requirements.push(Requirement {
                key: expr.key.clone(),
                operator,
                values,
            });
        }

        Ok(query)
    }

    /// Add an equality requirement
    pub fn with_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            key: key.into(),
            operator: Operator::Equals,
            values: vec![value.into()],
        });
        self
    }

    /// True if this query selects every object
    pub fn selects_all(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Check if a label set satisfies every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| req.matches(labels))
    }
}

impl fmt::Display for LabelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", rendered.join(","))
    }
}
