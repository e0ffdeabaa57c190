//! Backend-neutral query model and its in-memory evaluation.
//!
//! Clauses are grouped the way the document store groups them: AND and NOT
//! clauses form one conjunction, OR clauses are alternatives, and a filter
//! with both matches `conjunction OR alt1 OR alt2 ...`. An empty filter
//! matches every document.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::mapping::Document;

/// comparison operator of one clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    /// SQL wildcard pattern (`%`, `_`), case-insensitive over ASCII
    Like,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Like => "like",
        };
        f.write_str(s)
    }
}

/// how a clause combines with the rest of the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
    Not,
}

/// `field <op> operand`, with `field` a wire path (`a.b.c`)
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub operand: Value,
}

impl Condition {
    pub fn matches(&self, document: &Document) -> bool {
        let value = lookup(document, &self.field).unwrap_or(&Value::Null);
        match self.op {
            Operator::Eq => values_equal(value, &self.operand),
            Operator::Ne => !values_equal(value, &self.operand),
            Operator::Gt => compare_values(value, &self.operand) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare_values(value, &self.operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare_values(value, &self.operand) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare_values(value, &self.operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => match &self.operand {
                Value::Array(candidates) => candidates.iter().any(|c| values_equal(value, c)),
                _ => false,
            },
            Operator::Like => match (value, &self.operand) {
                (Value::String(s), Value::String(pattern)) => like_match(s, pattern),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub logic: Logic,
    pub condition: Condition,
}

impl Clause {
    pub fn matches(&self, document: &Document) -> bool {
        let matched = self.condition.matches(document);
        if self.logic == Logic::Not {
            !matched
        } else {
            matched
        }
    }
}

/// an ordered list of clauses
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, logic: Logic, condition: Condition) {
        self.clauses.push(Clause { logic, condition });
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// AND and NOT clauses
    pub fn conjunction(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter().filter(|c| c.logic != Logic::Or)
    }

    /// OR clauses
    pub fn alternatives(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter().filter(|c| c.logic == Logic::Or)
    }

    pub fn matches(&self, document: &Document) -> bool {
        let has_conjunction = self.conjunction().next().is_some();
        let has_alternatives = self.alternatives().next().is_some();

        let conjunction = || self.conjunction().all(|c| c.matches(document));
        let alternative = || self.alternatives().any(|c| c.matches(document));

        match (has_conjunction, has_alternatives) {
            (_, false) => conjunction(),
            (false, true) => alternative(),
            (true, true) => conjunction() || alternative(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// A complete query against one collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub skip: u64,
    /// `None` means unlimited
    pub limit: Option<u64>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter, sort and page documents in memory.
    ///
    /// The sort is stable, so documents with equal keys keep their scan order.
    pub fn apply(&self, documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|d| self.filter.matches(d))
            .collect();

        if let Some(sort) = &self.sort {
            matched.sort_by(|a, b| {
                let ordering = compare_for_sort(lookup(a, &sort.field), lookup(b, &sort.field));
                match sort.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        matched.into_iter().skip(skip).take(limit).collect()
    }
}

// ==================== Evaluation ====================

/// resolve a dotted path inside a document
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Structural equality with numbers compared by value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Range comparison; only values of the same kind are comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting: missing and null first, then numbers,
/// strings, documents, arrays and booleans.
pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| match (x, y) {
            (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)) => {
                x.to_string().cmp(&y.to_string())
            }
            _ => Ordering::Equal,
        }),
        _ => Ordering::Equal,
    }
}

/// SQL `LIKE` matching: `%` any run, `_` one character.
///
/// Case folding covers ASCII letters only, as in SQLite, so `é` and `É`
/// are different characters.
pub fn like_match(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().map(|c| c.to_ascii_lowercase()).collect();
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut si, mut pi) = (0, 0);
    // position of the last '%' and the input index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while si < s.len() {
        match p.get(pi) {
            Some('%') => {
                backtrack = Some((pi, si));
                pi += 1;
            }
            Some('_') => {
                si += 1;
                pi += 1;
            }
            Some(&c) if c == s[si] => {
                si += 1;
                pi += 1;
            }
            _ => match backtrack {
                Some((star, tried)) => {
                    pi = star + 1;
                    si = tried + 1;
                    backtrack = Some((star, tried + 1));
                }
                None => return false,
            },
        }
    }

    p[pi..].iter().all(|&c| c == '%')
}
