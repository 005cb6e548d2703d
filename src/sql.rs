use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::BookingStatus;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertGroup {
        name: String,
        quota: u32,
    },
    UpdateGroupQuota {
        name: String,
        quota: u32,
    },
    DeleteGroup {
        name: String,
    },
    InsertBooking {
        id: Ulid,
        group: String,
        start_date: NaiveDate,
        duration_days: i64,
        label: Option<String>,
    },
    /// `UPDATE bookings SET status = … WHERE id = …` — the admin review
    /// step. Only `approved` and `rejected` are accepted.
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectGroups,
    SelectBookings {
        group: String,
        status: Option<BookingStatus>,
    },
    SelectAvailability {
        group: String,
        start_date: NaiveDate,
        duration_days: i64,
    },
    SelectBlockedDays {
        group: String,
        from_date: NaiveDate,
        to_date: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "groups" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("groups", 2, values.len()));
            }
            Ok(Command::InsertGroup {
                name: parse_string(&values[0])?,
                quota: parse_u32(&values[1])?,
            })
        }
        "bookings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let label = if values.len() >= 5 {
                parse_string_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                group: parse_string(&values[1])?,
                start_date: parse_date(&values[2])?,
                duration_days: parse_i64(&values[3])?,
                label,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table_name = table_factor_name(&table.relation)?;
    match table_name.as_str() {
        "bookings" => {
            let status_expr = assignment_value(assignments, "status")?;
            let status = parse_status_expr(status_expr)?;
            if status == BookingStatus::Pending {
                return Err(SqlError::Parse(
                    "status must be 'approved' or 'rejected'".into(),
                ));
            }
            let id = extract_where_id(selection)?;
            Ok(Command::UpdateBookingStatus { id, status })
        }
        "groups" => {
            let quota = parse_u32(assignment_value(assignments, "quota")?)?;
            let name = extract_where_name(selection)?;
            Ok(Command::UpdateGroupQuota { name, quota })
        }
        _ => Err(SqlError::UnknownTable(table_name)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "groups" => Ok(Command::DeleteGroup {
            name: extract_where_name(&delete.selection)?,
        }),
        "bookings" => Ok(Command::DeleteBooking {
            id: extract_where_id(&delete.selection)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "groups" => Ok(Command::SelectGroups),
        "bookings" => {
            let group = parse_string(&require_filter(&filters, "group_name")?)?;
            let status = match take_filter(&filters, "status") {
                Some(expr) => Some(parse_status_expr(&expr)?),
                None => None,
            };
            Ok(Command::SelectBookings { group, status })
        }
        "availability" => Ok(Command::SelectAvailability {
            group: parse_string(&require_filter(&filters, "group_name")?)?,
            start_date: parse_date(&require_filter(&filters, "start_date")?)?,
            duration_days: parse_i64(&require_filter(&filters, "duration_days")?)?,
        }),
        "blocked_days" => Ok(Command::SelectBlockedDays {
            group: parse_string(&require_filter(&filters, "group_name")?)?,
            from_date: parse_date(&require_filter(&filters, "from_date")?)?,
            to_date: parse_date(&require_filter(&filters, "to_date")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten an AND-chain of `column = value` predicates.
fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, (**right).clone()));
                }
                Ok(())
            }
            _ => Err(SqlError::Unsupported(
                "only equality filters are supported".into(),
            )),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => Err(SqlError::Unsupported("unsupported WHERE clause".into())),
    }
}

fn take_filter(filters: &[(String, Expr)], column: &str) -> Option<Expr> {
    filters
        .iter()
        .find(|(col, _)| col == column)
        .map(|(_, expr)| expr.clone())
}

fn require_filter(filters: &[(String, Expr)], column: &'static str) -> Result<Expr, SqlError> {
    take_filter(filters, column).ok_or(SqlError::MissingFilter(column))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn assignment_value<'a>(
    assignments: &'a [ast::Assignment],
    column: &str,
) -> Result<&'a Expr, SqlError> {
    for assignment in assignments {
        let col = match &assignment.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        };
        if col.as_deref() == Some(column) {
            return Ok(&assignment.value);
        }
    }
    Err(SqlError::Parse(format!("expected SET {column} = …")))
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let expr = extract_where_eq(selection, "id")?;
    parse_ulid(&expr)
}

fn extract_where_name(selection: &Option<Expr>) -> Result<String, SqlError> {
    let expr = extract_where_eq(selection, "name")?;
    parse_string(&expr)
}

fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<Expr, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some(column) {
                Ok((**right).clone())
            } else {
                Err(SqlError::MissingFilter(column))
            }
        }
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

/// Dates cross the wire exclusively as zero-padded `YYYY-MM-DD` text.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|_| SqlError::Parse(format!("bad date {s:?} (expected YYYY-MM-DD)")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_status_expr(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|_| SqlError::Parse(format!("bad status {s:?}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
