//! SQLite dialect rendering for structured queries.
//!
//! # Invariants
//! - Identifiers are always double-quoted; values are always bound.
//! - Empty `In`/`Any` lists render as a false predicate, empty `All` as true.
//! - Insert queries render one statement per row, in row order.

use super::{DriverError, DriverResult};
use crate::query::{Aggregate, CompareOp, Condition, Operation, Order, Projection, Query, AGGREGATE_ALIAS};
use crate::value::{Row, Value};

/// One SQL statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn render(query: &Query) -> DriverResult<Vec<RenderedStatement>> {
    let table = quote(query.table());
    match query.operation() {
        Operation::Select(projection) => {
            let mut params = Vec::new();
            let mut sql = format!("SELECT {} FROM {table}", render_projection(projection)?);
            push_where(&mut sql, &mut params, query.conditions());
            push_order(&mut sql, query.ordering());
            push_pagination(&mut sql, &mut params, query.pagination());
            Ok(vec![RenderedStatement { sql, params }])
        }
        Operation::Insert(rows) => Ok(rows.iter().map(|row| render_insert(&table, row)).collect()),
        Operation::Update(values) => {
            if values.is_empty() {
                return Err(DriverError::Unsupported(format!(
                    "update on `{}` has no assignments",
                    query.table()
                )));
            }
            let mut params = Vec::with_capacity(values.len());
            let assignments: Vec<String> = values
                .iter()
                .map(|(column, value)| {
                    params.push(value.clone());
                    format!("{} = ?", quote(column))
                })
                .collect();
            let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
            push_where(&mut sql, &mut params, query.conditions());
            Ok(vec![RenderedStatement { sql, params }])
        }
        Operation::Delete => {
            let mut params = Vec::new();
            let mut sql = format!("DELETE FROM {table}");
            push_where(&mut sql, &mut params, query.conditions());
            Ok(vec![RenderedStatement { sql, params }])
        }
    }
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn render_projection(projection: &Projection) -> DriverResult<String> {
    match projection {
        Projection::All => Ok("*".to_string()),
        Projection::Columns(columns) if columns.is_empty() => Ok("*".to_string()),
        Projection::Columns(columns) => Ok(columns
            .iter()
            .map(|column| quote(column))
            .collect::<Vec<_>>()
            .join(", ")),
        Projection::Aggregate(aggregate, column) => {
            let function = match aggregate {
                Aggregate::Count => "COUNT",
                Aggregate::Sum => "SUM",
                Aggregate::Min => "MIN",
                Aggregate::Max => "MAX",
                Aggregate::Avg => "AVG",
            };
            let argument = match (aggregate, column) {
                (_, Some(column)) => quote(column),
                (Aggregate::Count, None) => "*".to_string(),
                (other, None) => {
                    return Err(DriverError::Unsupported(format!(
                        "{other:?} aggregate requires a column"
                    )))
                }
            };
            Ok(format!("{function}({argument}) AS {}", quote(AGGREGATE_ALIAS)))
        }
    }
}

fn render_insert(table: &str, row: &Row) -> RenderedStatement {
    if row.is_empty() {
        return RenderedStatement {
            sql: format!("INSERT INTO {table} DEFAULT VALUES"),
            params: Vec::new(),
        };
    }
    let columns: Vec<String> = row.keys().map(|column| quote(column)).collect();
    let placeholders = vec!["?"; row.len()].join(", ");
    RenderedStatement {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        ),
        params: row.values().cloned().collect(),
    }
}

fn push_where(sql: &mut String, params: &mut Vec<Value>, conditions: &[Condition]) {
    if conditions.is_empty() {
        return;
    }
    let parts: Vec<String> = conditions
        .iter()
        .map(|condition| render_condition(condition, params))
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&parts.join(" AND "));
}

fn render_condition(condition: &Condition, params: &mut Vec<Value>) -> String {
    match condition {
        Condition::Eq(column, value) => {
            params.push(value.clone());
            format!("{} = ?", quote(column))
        }
        Condition::NotEq(column, value) => {
            params.push(value.clone());
            format!("{} <> ?", quote(column))
        }
        Condition::Compare(column, op, value) => {
            params.push(value.clone());
            let op = match op {
                CompareOp::Lt => "<",
                CompareOp::Lte => "<=",
                CompareOp::Gt => ">",
                CompareOp::Gte => ">=",
            };
            format!("{} {op} ?", quote(column))
        }
        Condition::In(_, values) if values.is_empty() => "0 = 1".to_string(),
        Condition::In(column, values) => {
            params.extend(values.iter().cloned());
            format!(
                "{} IN ({})",
                quote(column),
                vec!["?"; values.len()].join(", ")
            )
        }
        Condition::IsNull(column) => format!("{} IS NULL", quote(column)),
        Condition::IsNotNull(column) => format!("{} IS NOT NULL", quote(column)),
        Condition::Like(column, pattern) => {
            params.push(Value::Text(pattern.clone()));
            format!("{} LIKE ?", quote(column))
        }
        Condition::Raw(fragment, values) => {
            params.extend(values.iter().cloned());
            format!("({fragment})")
        }
        Condition::All(items) if items.is_empty() => "1 = 1".to_string(),
        Condition::All(items) => join_group(items, " AND ", params),
        Condition::Any(items) if items.is_empty() => "0 = 1".to_string(),
        Condition::Any(items) => join_group(items, " OR ", params),
    }
}

fn join_group(items: &[Condition], separator: &str, params: &mut Vec<Value>) -> String {
    let parts: Vec<String> = items
        .iter()
        .map(|item| render_condition(item, params))
        .collect();
    format!("({})", parts.join(separator))
}

fn push_order(sql: &mut String, ordering: &[(String, Order)]) {
    if ordering.is_empty() {
        return;
    }
    let parts: Vec<String> = ordering
        .iter()
        .map(|(column, order)| {
            let direction = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {direction}", quote(column))
        })
        .collect();
    sql.push_str(" ORDER BY ");
    sql.push_str(&parts.join(", "));
}

fn push_pagination(sql: &mut String, params: &mut Vec<Value>, pagination: (Option<u64>, Option<u64>)) {
    match pagination {
        (Some(limit), offset) => {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(to_i64(limit)));
            if let Some(offset) = offset.filter(|offset| *offset > 0) {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(to_i64(offset)));
            }
        }
        (None, Some(offset)) if offset > 0 => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Value::Integer(to_i64(offset)));
        }
        (None, _) => {}
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::render;
    use crate::query::{Aggregate, Condition, Order, Projection, Query};
    use crate::scope::Scope;
    use crate::value::{row, text, Value};

    #[test]
    fn renders_select_with_conditions_order_and_pagination() {
        let query = Query::select("users", Scope::Default)
            .filter(Condition::eq("name", text("ann")))
            .filter(Condition::is_null("deleted_at"))
            .order_by("id", Order::Desc)
            .limit(10)
            .offset(20);
        let statements = render(&query).unwrap();
        assert_eq!(
            statements[0].sql,
            "SELECT * FROM \"users\" WHERE \"name\" = ? AND \"deleted_at\" IS NULL ORDER BY \"id\" DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            statements[0].params,
            vec![text("ann"), Value::Integer(10), Value::Integer(20)]
        );
    }

    #[test]
    fn offset_without_limit_uses_unbounded_limit() {
        let query = Query::select("users", Scope::Default).offset(5);
        let statements = render(&query).unwrap();
        assert_eq!(statements[0].sql, "SELECT * FROM \"users\" LIMIT -1 OFFSET ?");
    }

    #[test]
    fn empty_in_list_never_matches() {
        let query = Query::delete("users", Scope::Default)
            .filter(Condition::one_of("id", Vec::new()));
        let statements = render(&query).unwrap();
        assert_eq!(statements[0].sql, "DELETE FROM \"users\" WHERE 0 = 1");
    }

    #[test]
    fn renders_one_insert_per_row() {
        let query = Query::insert(
            "users",
            Scope::Default,
            vec![row([("name", text("a"))]), row([("age", Value::Integer(3)), ("name", text("b"))])],
        );
        let statements = render(&query).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].sql, "INSERT INTO \"users\" (\"age\", \"name\") VALUES (?, ?)");
    }

    #[test]
    fn aggregate_without_column_is_count_only() {
        let count = Query::select("users", Scope::Default)
            .project(Projection::Aggregate(Aggregate::Count, None));
        assert_eq!(
            render(&count).unwrap()[0].sql,
            "SELECT COUNT(*) AS \"aggregate\" FROM \"users\""
        );

        let sum = Query::select("users", Scope::Default)
            .project(Projection::Aggregate(Aggregate::Sum, None));
        assert!(render(&sum).is_err());
    }

    #[test]
    fn quotes_embedded_identifier_quotes() {
        let query = Query::update("we\"ird", Scope::Default, row([("a", Value::Integer(1))]));
        assert_eq!(
            render(&query).unwrap()[0].sql,
            "UPDATE \"we\"\"ird\" SET \"a\" = ?"
        );
    }
}
