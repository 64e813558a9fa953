use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::MotorpoolAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::sql::{self, Command, RequestDecision};
use crate::tenant::TenantManager;

pub struct MotorpoolHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<MotorpoolQueryParser>,
}

impl MotorpoolHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(MotorpoolQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.dispatch_command(engine, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    async fn dispatch_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertVehicle { id, name, spec, total_stock } => {
                engine
                    .add_vehicle(id, name, spec, total_stock)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateVehicle { id, name, spec, total_stock } => {
                engine
                    .update_vehicle(id, name, spec, total_stock)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteVehicle { id } => {
                engine.remove_vehicle(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                vehicle_id,
                customer,
                branch,
                range,
                total_amount,
            } => {
                engine
                    .create_booking(id, vehicle_id, customer, branch, range, total_amount)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBooking { id, action, notes } => {
                match action {
                    BookingAction::Approve => engine.approve_booking(id, notes).await,
                    BookingAction::Reject => engine.reject_booking(id, notes).await,
                    BookingAction::Start => engine.start_booking(id).await,
                    BookingAction::Complete => engine.complete_booking(id).await,
                    BookingAction::Cancel => engine.cancel_booking(id, notes).await,
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertStockRequest { id, vehicle_id, branch, requested } => {
                engine
                    .create_stock_request(id, vehicle_id, branch, requested)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateStockRequest { id, decision, notes } => {
                match decision {
                    RequestDecision::Approve => {
                        engine.approve_stock_request(id, Grant::Full, notes).await
                    }
                    RequestDecision::PartialApprove(units) => {
                        engine.partial_approve_stock_request(id, units, notes).await
                    }
                    RequestDecision::Reject => engine.reject_stock_request(id, notes).await,
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteStockRequest { id } => {
                engine.delete_stock_request(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectVehicles => {
                let vehicles = engine.list_vehicles().await;
                let schema = Arc::new(vehicles_schema());
                let rows: Vec<PgWireResult<_>> = vehicles
                    .into_iter()
                    .map(|v| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&v.id.to_string())?;
                        encoder.encode_field(&v.name)?;
                        encoder.encode_field(&v.spec.vehicle_type)?;
                        encoder.encode_field(&v.spec.brand)?;
                        encoder.encode_field(&v.spec.model)?;
                        encoder.encode_field(&(v.spec.year as i64))?;
                        encoder.encode_field(&v.spec.price_per_day.to_string())?;
                        encoder.encode_field(&serde_json::to_string(&v.spec.features).unwrap_or_default())?;
                        encoder.encode_field(&v.spec.fuel_type)?;
                        encoder.encode_field(&v.spec.transmission)?;
                        encoder.encode_field(&(v.spec.seating_capacity as i64))?;
                        encoder.encode_field(&v.spec.image_url)?;
                        encoder.encode_field(&(v.total_stock as i64))?;
                        encoder.encode_field(&(v.available as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { vehicle_id } => {
                let levels = engine.stock_levels(vehicle_id).await.map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&vehicle_id.to_string())?;
                encoder.encode_field(&(levels.total_stock as i64))?;
                encoder.encode_field(&(levels.available as i64))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { filter } => {
                let bookings = engine.list_bookings(filter).await;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| encode_booking(&schema, &b))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectStockRequests { filter } => {
                let requests = engine.list_requests(filter).await;
                let schema = Arc::new(requests_schema());
                let rows: Vec<PgWireResult<_>> = requests
                    .into_iter()
                    .map(|r| encode_request(&schema, &r))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectConflicts { vehicle_id, range, exclude } => {
                let conflict = engine
                    .conflict_check(vehicle_id, range, exclude)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(conflicts_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&vehicle_id.to_string())?;
                encoder.encode_field(&if conflict { "true" } else { "false" })?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectFleetStats => {
                let stats = engine.fleet_stats().await;
                let schema = Arc::new(fleet_stats_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(stats.vehicles as i64))?;
                encoder.encode_field(&(stats.vehicles_with_availability as i64))?;
                encoder.encode_field(&(stats.total_stock as i64))?;
                encoder.encode_field(&(stats.total_available as i64))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let vehicle_id_str = channel.strip_prefix("vehicle_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected vehicle_{{id}})"),
                    )))
                })?;
                let _vehicle_id = Ulid::from_string(vehicle_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn vehicles_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        varchar("type"),
        varchar("brand"),
        varchar("model"),
        int8("year"),
        varchar("price_per_day"),
        varchar("features"),
        varchar("fuel_type"),
        varchar("transmission"),
        int8("seating_capacity"),
        varchar("image_url"),
        int8("total_stock"),
        int8("available"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![varchar("vehicle_id"), int8("total_stock"), int8("available")]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("vehicle_id"),
        varchar("vehicle_name"),
        varchar("customer_id"),
        varchar("customer_name"),
        varchar("branch_id"),
        varchar("branch_name"),
        varchar("start_date"),
        varchar("end_date"),
        varchar("total_amount"),
        varchar("status"),
        varchar("booking_date"),
        varchar("approved_date"),
        varchar("notes"),
    ]
}

fn requests_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("vehicle_id"),
        varchar("vehicle_name"),
        varchar("branch_id"),
        varchar("branch_name"),
        int8("requested_quantity"),
        int8("approved_quantity"),
        varchar("status"),
        varchar("request_date"),
        varchar("approved_date"),
        varchar("notes"),
    ]
}

fn conflicts_schema() -> Vec<FieldInfo> {
    vec![varchar("vehicle_id"), varchar("has_conflict")]
}

fn fleet_stats_schema() -> Vec<FieldInfo> {
    vec![
        int8("vehicles"),
        int8("vehicles_with_availability"),
        int8("total_stock"),
        int8("total_available"),
    ]
}

fn encode_booking(
    schema: &Arc<Vec<FieldInfo>>,
    b: &BookingRecord,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.vehicle_id.to_string())?;
    encoder.encode_field(&b.vehicle_name)?;
    encoder.encode_field(&b.customer.id.to_string())?;
    encoder.encode_field(&b.customer.name)?;
    encoder.encode_field(&b.branch.id.to_string())?;
    encoder.encode_field(&b.branch.name)?;
    encoder.encode_field(&b.range.start.to_string())?;
    encoder.encode_field(&b.range.end.to_string())?;
    encoder.encode_field(&b.total_amount.to_string())?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&b.booking_date.to_rfc3339())?;
    encoder.encode_field(&b.approved_date.map(|d| d.to_rfc3339()))?;
    encoder.encode_field(&b.notes)?;
    Ok(encoder.take_row())
}

fn encode_request(
    schema: &Arc<Vec<FieldInfo>>,
    r: &RequestRecord,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.vehicle_id.to_string())?;
    encoder.encode_field(&r.vehicle_name)?;
    encoder.encode_field(&r.branch.id.to_string())?;
    encoder.encode_field(&r.branch.name)?;
    encoder.encode_field(&(r.requested as i64))?;
    encoder.encode_field(&(r.approved as i64))?;
    encoder.encode_field(&r.status.as_str())?;
    encoder.encode_field(&r.request_date.to_rfc3339())?;
    encoder.encode_field(&r.approved_date.map(|d| d.to_rfc3339()))?;
    encoder.encode_field(&r.notes)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for MotorpoolHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MotorpoolQueryParser;

#[async_trait]
impl QueryParser for MotorpoolQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(select_schema_for(stmt).unwrap_or_default())
    }
}

/// Best-effort result schema from the raw SQL text; used by Describe before
/// the statement is executed.
fn select_schema_for(stmt: &str) -> Option<Vec<FieldInfo>> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("AVAILABILITY") {
        Some(availability_schema())
    } else if upper.contains("FLEET_STATS") {
        Some(fleet_stats_schema())
    } else if upper.contains("CONFLICTS") {
        Some(conflicts_schema())
    } else if upper.contains("STOCK_REQUESTS") {
        Some(requests_schema())
    } else if upper.contains("BOOKINGS") {
        Some(bookings_schema())
    } else if upper.contains("VEHICLES") {
        Some(vehicles_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for MotorpoolHandler {
    type Statement = String;
    type QueryParser = MotorpoolQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let fields = select_schema_for(&target.statement).unwrap_or_default();
        Ok(DescribeStatementResponse::new(param_types, fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let fields = select_schema_for(&target.statement.statement).unwrap_or_default();
        Ok(DescribePortalResponse::new(fields))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MotorpoolFactory {
    handler: Arc<MotorpoolHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MotorpoolAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MotorpoolFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = MotorpoolAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MotorpoolHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MotorpoolFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = MotorpoolFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        format!("{}: {e}", e.code()),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
