use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// How an UPDATE on `stock_requests` resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// `SET status = 'approved'` with no quantity: grant in full.
    Approve,
    /// `SET approved_quantity = N`: explicit (possibly partial) grant.
    PartialApprove(u32),
    /// `SET status = 'rejected'`.
    Reject,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVehicle {
        id: Ulid,
        name: String,
        spec: VehicleSpec,
        total_stock: u32,
    },
    UpdateVehicle {
        id: Ulid,
        name: String,
        spec: VehicleSpec,
        total_stock: u32,
    },
    DeleteVehicle {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        vehicle_id: Ulid,
        customer: Party,
        branch: Party,
        range: DateRange,
        total_amount: Decimal,
    },
    UpdateBooking {
        id: Ulid,
        action: BookingAction,
        notes: Option<String>,
    },
    DeleteBooking {
        id: Ulid,
    },
    InsertStockRequest {
        id: Ulid,
        vehicle_id: Ulid,
        branch: Party,
        requested: u32,
    },
    UpdateStockRequest {
        id: Ulid,
        decision: RequestDecision,
        notes: Option<String>,
    },
    DeleteStockRequest {
        id: Ulid,
    },
    SelectVehicles,
    SelectAvailability {
        vehicle_id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectStockRequests {
        filter: RequestFilter,
    },
    SelectConflicts {
        vehicle_id: Ulid,
        range: DateRange,
        exclude: Option<Ulid>,
    },
    SelectFleetStats,
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        // (id, name, type, brand, model, year, price_per_day, features,
        //  fuel_type, transmission, seating_capacity, image_url, total_stock)
        "vehicles" => {
            if values.len() < 13 {
                return Err(SqlError::WrongArity("vehicles", 13, values.len()));
            }
            Ok(Command::InsertVehicle {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                spec: parse_vehicle_spec(&values[2..12])?,
                total_stock: parse_u32(&values[12])?,
            })
        }
        // (id, customer_id, customer_name, vehicle_id, branch_id,
        //  branch_name, start_date, end_date, total_amount)
        "bookings" => {
            if values.len() < 9 {
                return Err(SqlError::WrongArity("bookings", 9, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                customer: Party {
                    id: parse_ulid(&values[1])?,
                    name: parse_string(&values[2])?,
                },
                vehicle_id: parse_ulid(&values[3])?,
                branch: Party {
                    id: parse_ulid(&values[4])?,
                    name: parse_string(&values[5])?,
                },
                range: DateRange {
                    start: parse_date(&values[6])?,
                    end: parse_date(&values[7])?,
                },
                total_amount: parse_decimal(&values[8])?,
            })
        }
        // (id, branch_id, branch_name, vehicle_id, requested_quantity)
        "stock_requests" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("stock_requests", 5, values.len()));
            }
            Ok(Command::InsertStockRequest {
                id: parse_ulid(&values[0])?,
                branch: Party {
                    id: parse_ulid(&values[1])?,
                    name: parse_string(&values[2])?,
                },
                vehicle_id: parse_ulid(&values[3])?,
                requested: parse_u32(&values[4])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        set.push((assignment_column(a)?, &a.value));
    }
    let get = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "bookings" => {
            let status = get("status").ok_or(SqlError::MissingAssignment("status"))?;
            let action = parse_booking_action(status)?;
            let notes = match get("notes") {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            Ok(Command::UpdateBooking { id, action, notes })
        }
        "stock_requests" => {
            let notes = match get("notes") {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            // An explicit quantity is the partial-grant path; otherwise the
            // target status decides.
            let decision = if let Some(qty) = get("approved_quantity") {
                RequestDecision::PartialApprove(parse_u32(qty)?)
            } else {
                let status = get("status").ok_or(SqlError::MissingAssignment("status"))?;
                match parse_string(status)?.to_lowercase().as_str() {
                    "approved" => RequestDecision::Approve,
                    "rejected" => RequestDecision::Reject,
                    other => {
                        return Err(SqlError::Parse(format!(
                            "cannot set stock request status to {other:?}"
                        )));
                    }
                }
            };
            Ok(Command::UpdateStockRequest { id, decision, notes })
        }
        "vehicles" => {
            let name = parse_string(get("name").ok_or(SqlError::MissingAssignment("name"))?)?;
            let spec_exprs = vehicle_spec_assignments(&get)?;
            let total_stock = parse_u32(
                get("total_stock").ok_or(SqlError::MissingAssignment("total_stock"))?,
            )?;
            Ok(Command::UpdateVehicle { id, name, spec: spec_exprs, total_stock })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_booking_action(expr: &Expr) -> Result<BookingAction, SqlError> {
    match parse_string(expr)?.to_lowercase().as_str() {
        "approved" => Ok(BookingAction::Approve),
        "rejected" => Ok(BookingAction::Reject),
        "in_process" => Ok(BookingAction::Start),
        "completed" => Ok(BookingAction::Complete),
        "cancelled" => Ok(BookingAction::Cancel),
        other => Err(SqlError::Parse(format!(
            "cannot set booking status to {other:?}"
        ))),
    }
}

fn vehicle_spec_assignments<'a>(
    get: &impl Fn(&str) -> Option<&'a Expr>,
) -> Result<VehicleSpec, SqlError> {
    Ok(VehicleSpec {
        vehicle_type: parse_string(get("type").ok_or(SqlError::MissingAssignment("type"))?)?,
        brand: parse_string(get("brand").ok_or(SqlError::MissingAssignment("brand"))?)?,
        model: parse_string(get("model").ok_or(SqlError::MissingAssignment("model"))?)?,
        year: parse_i32(get("year").ok_or(SqlError::MissingAssignment("year"))?)?,
        price_per_day: parse_decimal(
            get("price_per_day").ok_or(SqlError::MissingAssignment("price_per_day"))?,
        )?,
        features: match get("features") {
            Some(expr) => parse_features(expr)?,
            None => Vec::new(),
        },
        fuel_type: parse_string(
            get("fuel_type").ok_or(SqlError::MissingAssignment("fuel_type"))?,
        )?,
        transmission: parse_string(
            get("transmission").ok_or(SqlError::MissingAssignment("transmission"))?,
        )?,
        seating_capacity: parse_u32(
            get("seating_capacity").ok_or(SqlError::MissingAssignment("seating_capacity"))?,
        )?,
        image_url: match get("image_url") {
            Some(expr) => parse_string_or_null(expr)?,
            None => None,
        },
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "vehicles" => Ok(Command::DeleteVehicle { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        "stock_requests" => Ok(Command::DeleteStockRequest { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "vehicles" => Ok(Command::SelectVehicles),
        "fleet_stats" => Ok(Command::SelectFleetStats),
        "availability" => {
            let mut vehicle_id = None;
            if let Some(selection) = &select.selection {
                extract_eq_filters(selection, &mut |col, expr| {
                    if col == "vehicle_id" {
                        vehicle_id = Some(parse_ulid(expr)?);
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectAvailability {
                vehicle_id: vehicle_id.ok_or(SqlError::MissingFilter("vehicle_id"))?,
            })
        }
        "bookings" => {
            let mut filter = BookingFilter::All;
            if let Some(selection) = &select.selection {
                extract_eq_filters(selection, &mut |col, expr| {
                    match col {
                        "customer_id" => filter = BookingFilter::Customer(parse_ulid(expr)?),
                        "branch_id" => filter = BookingFilter::Branch(parse_ulid(expr)?),
                        _ => {}
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectBookings { filter })
        }
        "stock_requests" => {
            let mut filter = RequestFilter::All;
            if let Some(selection) = &select.selection {
                extract_eq_filters(selection, &mut |col, expr| {
                    if col == "branch_id" {
                        filter = RequestFilter::Branch(parse_ulid(expr)?);
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectStockRequests { filter })
        }
        "conflicts" => {
            let (mut vehicle_id, mut start, mut end, mut exclude) = (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_eq_filters(selection, &mut |col, expr| {
                    match col {
                        "vehicle_id" => vehicle_id = Some(parse_ulid(expr)?),
                        "start_date" => start = Some(parse_date(expr)?),
                        "end_date" => end = Some(parse_date(expr)?),
                        "exclude_booking" => exclude = Some(parse_ulid(expr)?),
                        _ => {}
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectConflicts {
                vehicle_id: vehicle_id.ok_or(SqlError::MissingFilter("vehicle_id"))?,
                range: DateRange {
                    start: start.ok_or(SqlError::MissingFilter("start_date"))?,
                    end: end.ok_or(SqlError::MissingFilter("end_date"))?,
                },
                exclude,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Walk an AND-chain of `col = value` predicates.
fn extract_eq_filters(
    expr: &Expr,
    visit: &mut impl FnMut(&str, &Expr) -> Result<(), SqlError>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_eq_filters(left, visit)?;
                extract_eq_filters(right, visit)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    visit(&col, right)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
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

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
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
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => {
                Decimal::from_str(s).map_err(|e| SqlError::Parse(format!("bad numeric: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected numeric, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Feature tags travel as a JSON array string, e.g. `'["GPS","Bluetooth"]'`.
fn parse_features(expr: &Expr) -> Result<Vec<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(Vec::new());
    }
    let s = parse_string(expr)?;
    serde_json::from_str(&s).map_err(|e| SqlError::Parse(format!("bad features array: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64_expr(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Parse the positional vehicle spec columns:
/// (type, brand, model, year, price_per_day, features, fuel_type,
///  transmission, seating_capacity, image_url)
fn parse_vehicle_spec(values: &[Expr]) -> Result<VehicleSpec, SqlError> {
    Ok(VehicleSpec {
        vehicle_type: parse_string(&values[0])?,
        brand: parse_string(&values[1])?,
        model: parse_string(&values[2])?,
        year: parse_i32(&values[3])?,
        price_per_day: parse_decimal(&values[4])?,
        features: parse_features(&values[5])?,
        fuel_type: parse_string(&values[6])?,
        transmission: parse_string(&values[7])?,
        seating_capacity: parse_u32(&values[8])?,
        image_url: parse_string_or_null(&values[9])?,
    })
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
    MissingAssignment(&'static str),
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
            SqlError::MissingAssignment(col) => write!(f, "missing assignment: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const U: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn insert_vehicle_sql() -> String {
        format!(
            "INSERT INTO vehicles (id, name, type, brand, model, year, price_per_day, \
             features, fuel_type, transmission, seating_capacity, image_url, total_stock) \
             VALUES ('{U}', 'RAV4 Hybrid', 'SUV', 'Toyota', 'RAV4', 2022, 89.50, \
             '[\"GPS\",\"Bluetooth\"]', 'Hybrid', 'Automatic', 5, NULL, 5)"
        )
    }

    #[test]
    fn parse_insert_vehicle() {
        let cmd = parse_sql(&insert_vehicle_sql()).unwrap();
        match cmd {
            Command::InsertVehicle { id, name, spec, total_stock } => {
                assert_eq!(id.to_string(), U);
                assert_eq!(name, "RAV4 Hybrid");
                assert_eq!(spec.brand, "Toyota");
                assert_eq!(spec.year, 2022);
                assert_eq!(spec.price_per_day, Decimal::new(8950, 2));
                assert_eq!(spec.features, vec!["GPS".to_string(), "Bluetooth".to_string()]);
                assert_eq!(spec.seating_capacity, 5);
                assert_eq!(spec.image_url, None);
                assert_eq!(total_stock, 5);
            }
            _ => panic!("expected InsertVehicle, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_vehicle_wrong_arity() {
        let sql = format!("INSERT INTO vehicles (id) VALUES ('{U}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("vehicles", 13, 1))
        ));
    }

    #[test]
    fn parse_insert_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, customer_id, customer_name, vehicle_id, branch_id, \
             branch_name, start_date, end_date, total_amount) \
             VALUES ('{U}', '{U}', 'Ada Lovelace', '{U}', '{U}', 'Airport', \
             '2024-06-01', '2024-06-05', 447.50)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { customer, branch, range, total_amount, .. } => {
                assert_eq!(customer.name, "Ada Lovelace");
                assert_eq!(branch.name, "Airport");
                assert_eq!(range.start.to_string(), "2024-06-01");
                assert_eq!(range.end.to_string(), "2024-06-05");
                assert_eq!(total_amount, Decimal::new(44750, 2));
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_bad_date() {
        let sql = format!(
            "INSERT INTO bookings (id, customer_id, customer_name, vehicle_id, branch_id, \
             branch_name, start_date, end_date, total_amount) \
             VALUES ('{U}', '{U}', 'Ada', '{U}', '{U}', 'Airport', \
             'June 1st', '2024-06-05', 447.50)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_stock_request() {
        let sql = format!(
            "INSERT INTO stock_requests (id, branch_id, branch_name, vehicle_id, \
             requested_quantity) VALUES ('{U}', '{U}', 'Downtown', '{U}', 10)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertStockRequest { branch, requested, .. } => {
                assert_eq!(branch.name, "Downtown");
                assert_eq!(requested, 10);
            }
            _ => panic!("expected InsertStockRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking_approve() {
        let sql = format!(
            "UPDATE bookings SET status = 'approved', notes = 'looks good' WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpdateBooking {
                id: Ulid::from_string(U).unwrap(),
                action: BookingAction::Approve,
                notes: Some("looks good".into()),
            }
        );
    }

    #[test]
    fn parse_update_booking_all_transitions() {
        for (status, action) in [
            ("approved", BookingAction::Approve),
            ("rejected", BookingAction::Reject),
            ("in_process", BookingAction::Start),
            ("completed", BookingAction::Complete),
            ("cancelled", BookingAction::Cancel),
        ] {
            let sql = format!("UPDATE bookings SET status = '{status}' WHERE id = '{U}'");
            match parse_sql(&sql).unwrap() {
                Command::UpdateBooking { action: got, notes, .. } => {
                    assert_eq!(got, action);
                    assert_eq!(notes, None);
                }
                cmd => panic!("expected UpdateBooking, got {cmd:?}"),
            }
        }
    }

    #[test]
    fn parse_update_booking_to_pending_rejected() {
        let sql = format!("UPDATE bookings SET status = 'pending' WHERE id = '{U}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_update_booking_without_where_rejected() {
        let sql = "UPDATE bookings SET status = 'approved'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_update_stock_request_full_approval() {
        let sql = format!("UPDATE stock_requests SET status = 'approved' WHERE id = '{U}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateStockRequest { decision, .. } => {
                assert_eq!(decision, RequestDecision::Approve);
            }
            cmd => panic!("expected UpdateStockRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_stock_request_partial() {
        let sql = format!(
            "UPDATE stock_requests SET approved_quantity = 4, notes = 'budget' WHERE id = '{U}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateStockRequest { decision, notes, .. } => {
                assert_eq!(decision, RequestDecision::PartialApprove(4));
                assert_eq!(notes, Some("budget".into()));
            }
            cmd => panic!("expected UpdateStockRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_stock_request_reject() {
        let sql = format!("UPDATE stock_requests SET status = 'rejected' WHERE id = '{U}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateStockRequest { decision, .. } => {
                assert_eq!(decision, RequestDecision::Reject);
            }
            cmd => panic!("expected UpdateStockRequest, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_booking() {
        let sql = format!("DELETE FROM bookings WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(cmd, Command::DeleteBooking { id: Ulid::from_string(U).unwrap() });
    }

    #[test]
    fn parse_select_vehicles() {
        assert_eq!(parse_sql("SELECT * FROM vehicles").unwrap(), Command::SelectVehicles);
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!("SELECT * FROM availability WHERE vehicle_id = '{U}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { vehicle_id } => {
                assert_eq!(vehicle_id.to_string(), U);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_requires_vehicle() {
        assert!(matches!(
            parse_sql("SELECT * FROM availability"),
            Err(SqlError::MissingFilter("vehicle_id"))
        ));
    }

    #[test]
    fn parse_select_bookings_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { filter: BookingFilter::All }
        );
        let by_customer = format!("SELECT * FROM bookings WHERE customer_id = '{U}'");
        assert_eq!(
            parse_sql(&by_customer).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Customer(Ulid::from_string(U).unwrap())
            }
        );
        let by_branch = format!("SELECT * FROM bookings WHERE branch_id = '{U}'");
        assert_eq!(
            parse_sql(&by_branch).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Branch(Ulid::from_string(U).unwrap())
            }
        );
    }

    #[test]
    fn parse_select_conflicts() {
        let sql = format!(
            "SELECT * FROM conflicts WHERE vehicle_id = '{U}' AND \
             start_date = '2024-06-01' AND end_date = '2024-06-05'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectConflicts { range, exclude, .. } => {
                assert_eq!(range.start.to_string(), "2024-06-01");
                assert_eq!(range.end.to_string(), "2024-06-05");
                assert_eq!(exclude, None);
            }
            cmd => panic!("expected SelectConflicts, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_conflicts_with_exclusion() {
        let sql = format!(
            "SELECT * FROM conflicts WHERE vehicle_id = '{U}' AND \
             start_date = '2024-06-01' AND end_date = '2024-06-05' AND \
             exclude_booking = '{U}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectConflicts { exclude, .. } => {
                assert_eq!(exclude, Some(Ulid::from_string(U).unwrap()));
            }
            cmd => panic!("expected SelectConflicts, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_fleet_stats() {
        assert_eq!(
            parse_sql("SELECT * FROM fleet_stats").unwrap(),
            Command::SelectFleetStats
        );
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN vehicle_{U}");
        match parse_sql(&sql).unwrap() {
            Command::Listen { channel } => assert_eq!(channel, format!("vehicle_{U}")),
            cmd => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO customers (id) VALUES ('{U}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
