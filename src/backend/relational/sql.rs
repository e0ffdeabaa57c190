//! Compiles the query model to SQLite SQL over `json_extract`.
//!
//! Every condition compiles to an expression that is exactly 0 or 1, so NOT
//! and the OR grouping behave like the in-memory evaluation in
//! [`Filter::matches`]: a missing field never makes a row vanish from a
//! negated clause. Comparisons are guarded by `json_type` so only values of
//! the operand's kind can match.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::query::{Clause, Condition, Filter, Logic, Operator, Query, SortOrder};

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// JSON path literal for a dotted field (`a.b` -> `'$."a"."b"'`).
pub fn json_path(field: &str) -> StorageResult<String> {
    let mut path = String::from("'$");
    for segment in field.split('.') {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '$');
        if !valid {
            return Err(StorageError::Query(format!("invalid field name '{}'", field)));
        }
        path.push_str(&format!(".\"{}\"", segment));
    }
    path.push('\'');
    Ok(path)
}

/// quote an identifier that was already validated
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        composite => SqlValue::Text(composite.to_string()),
    }
}

struct Compiler {
    params: Vec<SqlValue>,
}

impl Compiler {
    fn bind(&mut self, value: &Value) -> &'static str {
        self.params.push(to_sql_value(value));
        "?"
    }

    /// `field = operand`, as a possibly-NULL SQL boolean
    fn equals(&mut self, path: &str, operand: &Value) -> String {
        let extract = format!("json_extract(data, {})", path);
        let kind = format!("json_type(data, {})", path);
        match operand {
            Value::Null => format!("{} IS NULL", extract),
            Value::Bool(true) => format!("{} = 'true'", kind),
            Value::Bool(false) => format!("{} = 'false'", kind),
            Value::Number(_) => format!("({} IN ('integer', 'real') AND {} = {})", kind, extract, self.bind(operand)),
            Value::String(_) => format!("({} = 'text' AND {} = {})", kind, extract, self.bind(operand)),
            Value::Array(_) | Value::Object(_) => format!(
                "({} IN ('array', 'object') AND {} = json({}))",
                kind,
                extract,
                self.bind(operand)
            ),
        }
    }

    /// ordered comparison, only between values of the same kind
    fn compare(&mut self, path: &str, op: &str, operand: &Value) -> String {
        let extract = format!("json_extract(data, {})", path);
        let kind = format!("json_type(data, {})", path);
        let guard = match operand {
            Value::Number(_) => "IN ('integer', 'real')",
            Value::String(_) => "= 'text'",
            Value::Bool(_) => "IN ('true', 'false')",
            _ => return "0".to_string(),
        };
        format!("({} {} AND {} {} {})", kind, guard, extract, op, self.bind(operand))
    }

    fn condition(&mut self, condition: &Condition) -> StorageResult<String> {
        let path = json_path(&condition.field)?;
        let expr = match condition.op {
            Operator::Eq => self.equals(&path, &condition.operand),
            Operator::Ne => format!("NOT COALESCE({}, 0)", self.equals(&path, &condition.operand)),
            Operator::Gt => self.compare(&path, ">", &condition.operand),
            Operator::Gte => self.compare(&path, ">=", &condition.operand),
            Operator::Lt => self.compare(&path, "<", &condition.operand),
            Operator::Lte => self.compare(&path, "<=", &condition.operand),
            Operator::In => match &condition.operand {
                Value::Array(candidates) if !candidates.is_empty() => {
                    let parts: Vec<String> = candidates.iter().map(|c| self.equals(&path, c)).collect();
                    format!("({})", parts.join(" OR "))
                }
                _ => "0".to_string(),
            },
            Operator::Like => match &condition.operand {
                Value::String(_) => format!(
                    "(json_type(data, {}) = 'text' AND json_extract(data, {}) LIKE {})",
                    path,
                    path,
                    self.bind(&condition.operand)
                ),
                _ => "0".to_string(),
            },
        };
        Ok(format!("COALESCE(({}), 0)", expr))
    }

    fn clause(&mut self, clause: &Clause) -> StorageResult<String> {
        let expr = self.condition(&clause.condition)?;
        Ok(match clause.logic {
            Logic::Not => format!("NOT {}", expr),
            Logic::And | Logic::Or => expr,
        })
    }

    fn filter(&mut self, filter: &Filter) -> StorageResult<Option<String>> {
        let conjunction = filter
            .conjunction()
            .map(|c| self.clause(c))
            .collect::<StorageResult<Vec<_>>>()?;
        let alternatives = filter
            .alternatives()
            .map(|c| self.clause(c))
            .collect::<StorageResult<Vec<_>>>()?;

        let conjunction = (!conjunction.is_empty()).then(|| format!("({})", conjunction.join(" AND ")));
        let alternatives = (!alternatives.is_empty()).then(|| alternatives.join(" OR "));

        Ok(match (conjunction, alternatives) {
            (None, None) => None,
            (Some(c), None) => Some(c),
            (None, Some(a)) => Some(a),
            (Some(c), Some(a)) => Some(format!("{} OR {}", c, a)),
        })
    }
}

/// sort rank matching [`compare_for_sort`](crate::query::compare_for_sort)
fn sort_rank(path: &str) -> String {
    format!(
        "CASE json_type(data, {}) \
         WHEN 'integer' THEN 1 WHEN 'real' THEN 1 WHEN 'text' THEN 2 \
         WHEN 'object' THEN 3 WHEN 'array' THEN 4 WHEN 'true' THEN 5 WHEN 'false' THEN 5 \
         ELSE 0 END",
        path
    )
}

fn where_clause(compiler: &mut Compiler, filter: &Filter) -> StorageResult<String> {
    Ok(match compiler.filter(filter)? {
        Some(condition) => format!(" WHERE {}", condition),
        None => String::new(),
    })
}

/// `SELECT data` for a query; ties keep insertion order
pub fn select(table: &str, query: &Query) -> StorageResult<Statement> {
    let mut compiler = Compiler { params: Vec::new() };
    let mut sql = format!("SELECT data FROM {}", quote_ident(table));
    sql.push_str(&where_clause(&mut compiler, &query.filter)?);

    match &query.sort {
        Some(sort) => {
            let path = json_path(&sort.field)?;
            let direction = match sort.order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY {} {dir}, json_extract(data, {}) {dir}, rowid ASC",
                sort_rank(&path),
                path,
                dir = direction
            ));
        }
        None => sql.push_str(" ORDER BY rowid ASC"),
    }

    match (query.limit, query.skip) {
        (None, 0) => {}
        (limit, skip) => {
            let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)).unwrap_or(-1);
            sql.push_str(" LIMIT ? OFFSET ?");
            compiler.params.push(SqlValue::Integer(limit));
            compiler.params.push(SqlValue::Integer(i64::try_from(skip).unwrap_or(i64::MAX)));
        }
    }

    Ok(Statement {
        sql,
        params: compiler.params,
    })
}

pub fn count(table: &str, filter: &Filter) -> StorageResult<Statement> {
    let mut compiler = Compiler { params: Vec::new() };
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    sql.push_str(&where_clause(&mut compiler, filter)?);
    Ok(Statement {
        sql,
        params: compiler.params,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::query::Sort;

    fn cond(field: &str, op: Operator, operand: Value) -> Condition {
        Condition {
            field: field.into(),
            op,
            operand,
        }
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("name").unwrap(), "'$.\"name\"'");
        assert_eq!(json_path("address.city").unwrap(), "'$.\"address\".\"city\"'");
        assert!(json_path("a..b").is_err());
        assert!(json_path("x'); DROP TABLE t; --").is_err());
    }

    #[test]
    fn test_select_without_filter() {
        let statement = select("cardinal_players", &Query::all()).unwrap();
        assert_eq!(statement.sql, "SELECT data FROM \"cardinal_players\" ORDER BY rowid ASC");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_parameters_are_bound() {
        let mut query = Query::all();
        query.filter.push(Logic::And, cond("name", Operator::Eq, json!("alice")));
        query.filter.push(Logic::Not, cond("level", Operator::Gt, json!(3)));
        query.limit = Some(10);

        let statement = select("players", &query).unwrap();
        assert!(!statement.sql.contains("alice"));
        assert!(statement.sql.contains("NOT COALESCE"));
        assert_eq!(
            statement.params,
            vec![
                SqlValue::Text("alice".into()),
                SqlValue::Integer(3),
                SqlValue::Integer(10),
                SqlValue::Integer(0),
            ]
        );
    }

    #[test]
    fn test_skip_without_limit() {
        let query = Query {
            skip: 5,
            ..Query::all()
        };
        let statement = select("players", &query).unwrap();
        assert!(statement.sql.ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(statement.params, vec![SqlValue::Integer(-1), SqlValue::Integer(5)]);
    }

    #[test]
    fn test_sort_and_empty_in() {
        let mut query = Query::all();
        query.filter.push(Logic::And, cond("level", Operator::In, json!([])));
        query.sort = Some(Sort {
            field: "level".into(),
            order: SortOrder::Desc,
        });

        let statement = select("players", &query).unwrap();
        assert!(statement.sql.contains("WHERE (COALESCE((0), 0))"));
        assert!(statement.sql.contains("json_extract(data, '$.\"level\"') DESC, rowid ASC"));
    }

    #[test]
    fn test_count() {
        let mut filter = Filter::new();
        filter.push(Logic::Or, cond("active", Operator::Eq, json!(true)));
        let statement = count("players", &filter).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) FROM \"players\" WHERE COALESCE((json_type(data, '$.\"active\"') = 'true'), 0)"
        );
    }
}
