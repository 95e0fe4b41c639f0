//! Filter expressions for store queries
//!
//! Predicates are evaluated against the stored JSON form of an entity, so
//! field names are the serialized field names (see [`crate::fields`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
}

/// Right-hand side of a comparison: a literal or another field of the
/// same entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operand {
    Value(Value),
    Field(String),
}

/// Filter expression for list queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterExpr {
    Compare {
        field: String,
        operator: FilterOperator,
        operand: Operand,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    /// Create an equality filter against a literal.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            operator: FilterOperator::Eq,
            operand: Operand::Value(value.into()),
        }
    }

    /// Create an inequality filter against a literal.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            operator: FilterOperator::Ne,
            operand: Operand::Value(value.into()),
        }
    }

    /// Create an inequality filter between two fields of the same entity.
    pub fn ne_field(field: impl Into<String>, other: impl Into<String>) -> Self {
        Self::Compare {
            field: field.into(),
            operator: FilterOperator::Ne,
            operand: Operand::Field(other.into()),
        }
    }

    pub fn and(exprs: Vec<FilterExpr>) -> Self {
        Self::And(exprs)
    }

    pub fn or(exprs: Vec<FilterExpr>) -> Self {
        Self::Or(exprs)
    }

    /// Evaluate against a stored entity. Missing fields compare as null.
    pub fn matches(&self, entity: &Value) -> bool {
        match self {
            Self::Compare {
                field,
                operator,
                operand,
            } => {
                let left = entity.get(field).unwrap_or(&Value::Null);
                let right = match operand {
                    Operand::Value(value) => value,
                    Operand::Field(other) => entity.get(other).unwrap_or(&Value::Null),
                };
                match operator {
                    FilterOperator::Eq => left == right,
                    FilterOperator::Ne => left != right,
                }
            }
            Self::And(exprs) => exprs.iter().all(|e| e.matches(entity)),
            Self::Or(exprs) => exprs.iter().any(|e| e.matches(entity)),
        }
    }
}
