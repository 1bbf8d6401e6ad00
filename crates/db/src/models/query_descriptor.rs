use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("column name must not be empty")]
    EmptyColumn,
    #[error("invalid column name: {0}")]
    InvalidColumn(String),
    #[error("invalid table name: {0}")]
    InvalidTable(String),
    #[error("filter on {column} must use a scalar value")]
    NonScalarValue { column: String },
    #[error("operator {operator} is not valid for value {value} on {column}")]
    OperatorMismatch {
        column: String,
        operator: FilterOperator,
        value: String,
    },
    #[error("invalid order direction for {column}: {direction} (expected asc or desc)")]
    InvalidDirection { column: String, direction: String },
    #[error("update must set at least one column")]
    EmptyPatch,
    #[error("invalid {name}: {value}")]
    InvalidPagination { name: &'static str, value: String },
}

/// Comparison applied by a single filter condition
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilterOperator {
    #[default]
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    Is,
}

impl FilterOperator {
    /// SQL operator for the plain comparison operators
    pub fn sql_symbol(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Neq => "<>",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::Ilike => "ILIKE",
            FilterOperator::Is => "IS",
        }
    }
}

/// A single `column <operator> value` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Condition {
    pub column: String,
    #[serde(default)]
    pub operator: FilterOperator,
    #[ts(type = "string | number | boolean | null")]
    pub value: Value,
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOperator::Eq, value)
    }

    pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        validate_column(&self.column)?;

        let mismatch = || DescriptorError::OperatorMismatch {
            column: self.column.clone(),
            operator: self.operator,
            value: self.value.to_string(),
        };

        match (&self.value, self.operator) {
            (Value::Array(_) | Value::Object(_), _) => Err(DescriptorError::NonScalarValue {
                column: self.column.clone(),
            }),
            (Value::Null, FilterOperator::Eq | FilterOperator::Neq | FilterOperator::Is) => Ok(()),
            (Value::Null, _) => Err(mismatch()),
            (Value::Bool(_), FilterOperator::Is) => Ok(()),
            (_, FilterOperator::Is) => Err(mismatch()),
            (Value::String(_), FilterOperator::Like | FilterOperator::Ilike) => Ok(()),
            (_, FilterOperator::Like | FilterOperator::Ilike) => Err(mismatch()),
            _ => Ok(()),
        }
    }
}

/// Sort key, applied in the order the clauses are declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct OrderClause {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl OrderClause {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Declarative read query: conjunctive filters, ordered sort keys, pagination.
///
/// Built once per request and discarded after a single store call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct QueryDescriptor {
    #[serde(default)]
    pub filter: Vec<Condition>,
    #[serde(default)]
    pub order: Vec<OrderClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    pub fn order(mut self, clause: OrderClause) -> Self {
        self.order.push(clause);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Structural checks only; column names are never looked up in a schema.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        for condition in &self.filter {
            condition.validate()?;
        }
        for clause in &self.order {
            validate_column(&clause.column)?;
        }
        Ok(())
    }

    /// Parse URL query pairs of the form
    /// `filter.<column>.<operator>=<value>`, `filter.<column>=<value>`,
    /// `order.<column>=asc|desc`, `limit=<n>` and `offset=<n>`.
    ///
    /// Unrecognised keys are ignored. Filter values stay strings; the store
    /// coerces them to the column type. The exceptions: the literal `null`
    /// under `eq`, `neq` and `is` means SQL NULL, and `true`/`false` under
    /// `is` are booleans. The text `null` can therefore only be matched with
    /// `like`/`ilike` or a JSON descriptor.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut descriptor = Self::default();

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());

            if let Some(rest) = key.strip_prefix("filter.") {
                let (column, operator) = split_filter_key(rest);
                descriptor.filter.push(Condition {
                    column: column.to_string(),
                    operator,
                    value: query_value(operator, value),
                });
            } else if let Some(column) = key.strip_prefix("order.") {
                let ascending = match value.to_ascii_lowercase().as_str() {
                    "asc" | "" => true,
                    "desc" => false,
                    _ => {
                        return Err(DescriptorError::InvalidDirection {
                            column: column.to_string(),
                            direction: value.to_string(),
                        });
                    }
                };
                descriptor.order.push(OrderClause {
                    column: column.to_string(),
                    ascending,
                });
            } else if key == "limit" {
                descriptor.limit = Some(parse_pagination("limit", value)?);
            } else if key == "offset" {
                descriptor.offset = Some(parse_pagination("offset", value)?);
            }
        }

        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Parse a raw (still percent-encoded) query string.
    pub fn from_query_string(query: &str) -> Result<Self, DescriptorError> {
        Self::from_query_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }
}

/// `status.eq` -> (`status`, Eq); `status` -> (`status`, Eq);
/// `meta.version` -> (`meta.version`, Eq) since `version` is not an operator.
fn split_filter_key(rest: &str) -> (&str, FilterOperator) {
    rest.rsplit_once('.')
        .and_then(|(column, op)| {
            op.to_ascii_lowercase()
                .parse::<FilterOperator>()
                .ok()
                .map(|operator| (column, operator))
        })
        .unwrap_or((rest, FilterOperator::Eq))
}

fn query_value(operator: FilterOperator, raw: &str) -> Value {
    match (operator, raw) {
        (FilterOperator::Eq | FilterOperator::Neq | FilterOperator::Is, "null") => Value::Null,
        (FilterOperator::Is, "true") => Value::Bool(true),
        (FilterOperator::Is, "false") => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn parse_pagination(name: &'static str, value: &str) -> Result<u32, DescriptorError> {
    value
        .parse::<u32>()
        .map_err(|_| DescriptorError::InvalidPagination {
            name,
            value: value.to_string(),
        })
}

pub fn validate_column(column: &str) -> Result<(), DescriptorError> {
    if column.is_empty() {
        return Err(DescriptorError::EmptyColumn);
    }
    if column.contains('\0') {
        return Err(DescriptorError::InvalidColumn(column.escape_default().to_string()));
    }
    Ok(())
}
