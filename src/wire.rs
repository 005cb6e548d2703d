use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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

use crate::auth::KuotaAuthSource;
use crate::engine::{Availability, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct KuotaHandler {
    tenants: Arc<TenantManager>,
    query_parser: Arc<KuotaQueryParser>,
}

impl KuotaHandler {
    pub fn new(tenants: Arc<TenantManager>) -> Self {
        Self {
            tenants,
            query_parser: Arc::new(KuotaQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenants.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertGroup { name, quota } => {
                engine
                    .set_group_quota(&name, quota)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateGroupQuota { name, quota } => {
                engine
                    .update_group_quota(&name, quota)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteGroup { name } => {
                engine.delete_group(&name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                group,
                start_date,
                duration_days,
                label,
            } => {
                engine
                    .submit_booking(id, &group, DateSpan::new(start_date, duration_days), label)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBookingStatus { id, status } => {
                match status {
                    BookingStatus::Approved => engine.approve_booking(id).await,
                    BookingStatus::Rejected => engine.reject_booking(id).await,
                    // Unreachable: the parser refuses 'pending'
                    BookingStatus::Pending => Err(EngineError::InvalidTransition {
                        id,
                        from: BookingStatus::Pending,
                    }),
                }
                .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectGroups => {
                let schema = Arc::new(groups_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_groups()
                    .into_iter()
                    .map(|g| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&g.name)?;
                        encoder.encode_field(&(g.quota as i64))?;
                        encoder.encode_field(&if g.explicit { "override" } else { "default" })?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { group, status } => {
                let bookings = engine
                    .list_bookings(&group, status)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.group)?;
                        encoder.encode_field(&day_key(b.start_date))?;
                        encoder.encode_field(&b.duration_days)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.label)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability {
                group,
                start_date,
                duration_days,
            } => {
                let verdict = engine
                    .check_availability(&group, DateSpan::new(start_date, duration_days))
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&group)?;
                match verdict {
                    Availability::Available => {
                        encoder.encode_field(&"true")?;
                        encoder.encode_field(&None::<String>)?;
                    }
                    Availability::Blocked { date } => {
                        encoder.encode_field(&"false")?;
                        encoder.encode_field(&Some(day_key(date)))?;
                    }
                }
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBlockedDays {
                group,
                from_date,
                to_date,
            } => {
                let days = engine
                    .blocked_days(&group, from_date, to_date)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(blocked_days_schema());
                let rows: Vec<PgWireResult<_>> = days
                    .into_iter()
                    .map(|day| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&group)?;
                        encoder.encode_field(&day_key(day))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn groups_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("quota".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("source".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "group_name".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "start_date".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "duration_days".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("label".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new(
            "group_name".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "available".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "blocked_date".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
    ]
}

fn blocked_days_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new(
            "group_name".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("day".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

#[async_trait]
impl SimpleQueryHandler for KuotaHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct KuotaQueryParser;

#[async_trait]
impl QueryParser for KuotaQueryParser {
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
        Ok(result_schema_for(stmt))
    }
}

/// Pick the result schema by sniffing the statement's target table.
fn result_schema_for(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("BLOCKED_DAYS") {
        blocked_days_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("GROUPS") {
        groups_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for KuotaHandler {
    type Statement = String;
    type QueryParser = KuotaQueryParser;

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
        let mut responses = self.run_command(&engine, cmd).await?;
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema_for(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
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

pub struct KuotaFactory {
    handler: Arc<KuotaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<KuotaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl KuotaFactory {
    pub fn new(tenants: Arc<TenantManager>, password: String) -> Self {
        let auth_source = KuotaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(KuotaHandler::new(tenants)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for KuotaFactory {
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

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenants: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = KuotaFactory::new(tenants, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    // Store failures and quota verdicts must stay distinguishable on the
    // wire: "could not verify" is 58000, "blocked, pick another range"
    // is P0001 with the group and first conflicting date in the message.
    let code = match &e {
        EngineError::WalError(_) => "58000",
        EngineError::NotFound(_) | EngineError::GroupNotFound(_) => "P0002",
        EngineError::LimitExceeded(_) => "54000",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
