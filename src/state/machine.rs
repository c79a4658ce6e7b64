//! Protocol state machine and execution façade.

use std::collections::HashMap;

use crate::cache::StatementCache;
use crate::error::{Error, ErrorKind, Result, ServerError, field_type};
use crate::notifications::{Notification, NotificationQueue};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, CommandComplete, CopyInResponse, CopyOutResponse,
    DataRow, NotificationResponse, ParameterStatus, ReadyForQuery, RowDescription,
    check_empty_payload, msg_type, parse_notice, parse_server_error,
};
use crate::protocol::framer::Frame;
use crate::protocol::frontend::{
    auth::ScramClient, write_bind, write_close_statement, write_describe_portal, write_execute,
    write_parse, write_password, write_query, write_sasl_initial_response, write_sasl_response,
    write_startup, write_sync, write_terminate,
};
use crate::protocol::types::{
    FormatCode, Oid, ProtocolStatus, ResultFormat, TransactionStatus,
};
use crate::result::{FieldInfo, QueryResult, ResultSet, Row};
use crate::types::{SessionContext, decode_value, encode_param};
use crate::value::{Param, Value};

/// What the adapter should do after feeding one frame.
#[derive(Debug)]
pub enum Reply {
    /// Nothing to do; feed the next frame.
    Continue,
    /// Write these bytes, then keep reading.
    Send(Vec<u8>),
    /// The server accepted a COPY-IN; pump the copy source.
    CopyInReady,
    /// One COPY-OUT chunk for the copy sink.
    CopyOutChunk(Vec<u8>),
    /// Startup finished.
    StartupDone,
    /// The exchange finished; here is the result.
    Ready(ResultSet),
}

/// Cache involvement of the in-flight execute.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CacheUse {
    /// Anonymous statement, nothing recorded.
    None,
    /// Named Parse in flight; record observed metadata.
    Promoting(String),
    /// Parse skipped; verify observed metadata against the entry.
    Promoted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyMode {
    None,
    In,
    Out,
}

/// Configuration of the protocol core.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Executions of the same SQL before server-side PREPARE. 0 disables.
    pub prepare_threshold: u32,
    /// Statement cache capacity. 0 disables.
    pub cache_size: usize,
    /// Notification queue capacity.
    pub notification_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            prepare_threshold: 5,
            cache_size: 100,
            notification_capacity: NotificationQueue::DEFAULT_CAPACITY,
        }
    }
}

/// The sans-I/O protocol engine shared by both transports.
pub struct Machine {
    status: ProtocolStatus,
    transaction_status: TransactionStatus,
    context: SessionContext,
    parameters: HashMap<String, String>,
    backend_key: Option<BackendKeyData>,
    cache: StatementCache,
    notifications: NotificationQueue,
    warnings: Vec<ServerError>,

    // startup/authentication
    user: String,
    password: Option<String>,
    scram: Option<ScramClient>,
    channel_binding: Option<Vec<u8>>,

    // in-flight execute
    pending_error: Option<Error>,
    results: Vec<QueryResult>,
    fields: Option<Vec<FieldInfo>>,
    rows: Option<Vec<Row>>,
    raw_result: bool,
    cache_use: CacheUse,
    current_sql: Option<String>,
    copy: CopyMode,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            status: ProtocolStatus::Closed,
            transaction_status: TransactionStatus::Unknown,
            context: SessionContext::default(),
            parameters: HashMap::new(),
            backend_key: None,
            cache: StatementCache::new(config.prepare_threshold, config.cache_size),
            notifications: NotificationQueue::new(config.notification_capacity),
            warnings: Vec::new(),
            user: String::new(),
            password: None,
            scram: None,
            channel_binding: None,
            pending_error: None,
            results: Vec::new(),
            fields: None,
            rows: None,
            raw_result: false,
            cache_use: CacheUse::None,
            current_sql: None,
            copy: CopyMode::None,
        }
    }

    pub fn status(&self) -> ProtocolStatus {
        self.status
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Server parameter reported via ParameterStatus.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn notifications(&self) -> NotificationQueue {
        self.notifications.clone()
    }

    /// Notices collected since the last call.
    pub fn take_warnings(&mut self) -> Vec<ServerError> {
        std::mem::take(&mut self.warnings)
    }

    /// Number of cached statements (diagnostics).
    pub fn cached_statements(&self) -> usize {
        self.cache.len()
    }

    /// Channel binding data from the TLS layer, enabling SCRAM-SHA-256-PLUS.
    pub fn set_channel_binding(&mut self, data: Vec<u8>) {
        self.channel_binding = Some(data);
    }

    pub fn mark_connected(&mut self) {
        self.status = ProtocolStatus::Connecting;
    }

    /// Force the connection state to Closed (I/O failure, cancellation).
    pub fn force_close(&mut self) {
        self.status = ProtocolStatus::Closed;
    }

    // === startup ===

    /// Build the startup message and arm authentication.
    pub fn startup_message(
        &mut self,
        user: &str,
        database: Option<&str>,
        application_name: Option<&str>,
        timezone: Option<&str>,
        options: &[(String, String)],
        password: Option<&str>,
    ) -> Vec<u8> {
        let mut params: Vec<(&str, &str)> = vec![("user", user)];
        if let Some(database) = database {
            params.push(("database", database));
        }
        if let Some(application_name) = application_name {
            params.push(("application_name", application_name));
        }
        if let Some(timezone) = timezone {
            params.push(("timezone", timezone));
        }
        params.push(("DateStyle", "ISO"));
        params.push(("client_encoding", "UTF8"));
        for (name, value) in options {
            params.push((name, value));
        }

        let mut buf = Vec::with_capacity(128);
        write_startup(&mut buf, &params);

        self.user = user.to_string();
        self.password = password.map(str::to_string);
        self.status = ProtocolStatus::StartingUp;
        buf
    }

    /// Build the Terminate message.
    pub fn terminate_message(&mut self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        write_terminate(&mut buf);
        self.status = ProtocolStatus::Closing;
        buf
    }

    // === execution façade ===

    /// Turn one execute call into its wire sequence.
    ///
    /// All parameters are encoded before a single byte is produced. The
    /// simple path is taken for parameterless text-format statements with
    /// no promoted cache entry; everything else goes through the extended
    /// protocol, skipping Parse when the statement is already prepared
    /// server-side.
    pub fn start_execute(
        &mut self,
        sql: &str,
        params: &[Param],
        result_format: ResultFormat,
        raw_result: bool,
    ) -> Result<Vec<u8>> {
        match self.status {
            ProtocolStatus::ReadyForQuery => {}
            ProtocolStatus::Closed | ProtocolStatus::Closing => {
                return Err(Error::ConnectionClosed);
            }
            ProtocolStatus::Executing => {
                return Err(Error::InvalidOperation(
                    "another execute is in progress on this connection".into(),
                ));
            }
            other => {
                return Err(Error::InvalidOperation(format!(
                    "connection is not ready for queries: {other:?}"
                )));
            }
        }

        let encoded: Vec<_> = params.iter().map(encode_param).collect::<Result<_>>()?;

        self.results.clear();
        self.fields = None;
        self.rows = None;
        self.pending_error = None;
        self.raw_result = raw_result;
        self.copy = CopyMode::None;

        let touch = self.cache.touch(sql);
        let mut buf = Vec::with_capacity(64 + sql.len());

        // evicted promoted statements are released on the next round trip
        for name in self.cache.take_pending_closes() {
            write_close_statement(&mut buf, &name);
        }

        let use_simple = encoded.is_empty()
            && result_format != ResultFormat::Binary
            && touch.server_name.is_none();

        if use_simple {
            self.cache_use = CacheUse::None;
            write_query(&mut buf, sql);
        } else {
            let statement = touch.server_name.clone().unwrap_or_default();
            if touch.must_parse {
                let param_oids: Vec<Oid> = encoded.iter().map(|p| p.oid).collect();
                write_parse(&mut buf, &statement, sql, &param_oids);
                self.cache_use = match &touch.server_name {
                    Some(name) => CacheUse::Promoting(name.clone()),
                    None => CacheUse::None,
                };
                if matches!(self.cache_use, CacheUse::Promoting(_)) {
                    self.cache.store_param_oids(sql, param_oids);
                }
            } else {
                self.cache_use = CacheUse::Promoted(statement.clone());
            }
            write_bind(&mut buf, "", &statement, &encoded, result_format.bind_code());
            write_describe_portal(&mut buf, "");
            write_execute(&mut buf, "", 0);
            write_sync(&mut buf);
        }

        if matches!(self.cache_use, CacheUse::Promoting(_) | CacheUse::Promoted(_)) {
            // remember the fingerprint for invalidation bookkeeping
            self.current_sql = Some(sql.to_string());
        } else {
            self.current_sql = None;
        }

        self.status = ProtocolStatus::Executing;
        Ok(buf)
    }

    // === frame dispatch ===

    /// Consume one backend frame.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<Reply> {
        let payload = frame.payload.as_slice();
        match frame.identifier {
            msg_type::AUTHENTICATION => self.handle_auth(payload),
            msg_type::PARAMETER_STATUS => self.handle_parameter_status(payload),
            msg_type::BACKEND_KEY_DATA => {
                self.backend_key = Some(BackendKeyData::parse(payload)?);
                Ok(Reply::Continue)
            }
            msg_type::ROW_DESCRIPTION => self.handle_row_description(payload),
            msg_type::DATA_ROW => self.handle_data_row(payload),
            msg_type::COMMAND_COMPLETE => self.handle_command_complete(payload),
            msg_type::EMPTY_QUERY_RESPONSE => {
                check_empty_payload(payload, "EmptyQueryResponse")?;
                if self.pending_error.is_none() {
                    self.results.push(QueryResult {
                        fields: None,
                        rows: None,
                        command_tag: String::new(),
                    });
                }
                Ok(Reply::Continue)
            }
            msg_type::PARSE_COMPLETE => {
                check_empty_payload(payload, "ParseComplete")?;
                Ok(Reply::Continue)
            }
            msg_type::BIND_COMPLETE => {
                check_empty_payload(payload, "BindComplete")?;
                Ok(Reply::Continue)
            }
            msg_type::CLOSE_COMPLETE => {
                check_empty_payload(payload, "CloseComplete")?;
                Ok(Reply::Continue)
            }
            msg_type::NO_DATA => {
                check_empty_payload(payload, "NoData")?;
                self.fields = None;
                self.rows = None;
                Ok(Reply::Continue)
            }
            msg_type::READY_FOR_QUERY => self.handle_ready_for_query(payload),
            msg_type::ERROR_RESPONSE => self.handle_error(payload),
            msg_type::NOTICE_RESPONSE => {
                let notice = parse_notice(payload)?;
                tracing::warn!(
                    code = notice.code(),
                    message = notice.message(),
                    "server notice"
                );
                self.warnings.push(notice);
                Ok(Reply::Continue)
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification = NotificationResponse::parse(payload)?;
                self.notifications.put(Notification {
                    process_id: notification.pid,
                    channel: notification.channel.to_string(),
                    payload: notification.payload.to_string(),
                });
                Ok(Reply::Continue)
            }
            msg_type::COPY_IN_RESPONSE => {
                CopyInResponse::parse(payload)?;
                self.copy = CopyMode::In;
                Ok(Reply::CopyInReady)
            }
            msg_type::COPY_OUT_RESPONSE => {
                CopyOutResponse::parse(payload)?;
                self.copy = CopyMode::Out;
                Ok(Reply::Continue)
            }
            msg_type::COPY_BOTH_RESPONSE => Err(Error::Unsupported(
                "CopyBothResponse (replication) is not supported".into(),
            )),
            msg_type::COPY_DATA => {
                if self.copy != CopyMode::Out {
                    return Err(Error::Protocol("unexpected CopyData".into()));
                }
                if self.pending_error.is_some() {
                    return Ok(Reply::Continue);
                }
                Ok(Reply::CopyOutChunk(frame.payload.clone()))
            }
            msg_type::COPY_DONE => {
                check_empty_payload(payload, "CopyDone")?;
                self.copy = CopyMode::None;
                Ok(Reply::Continue)
            }
            other => Err(Error::Protocol(format!(
                "unknown message type: '{}'",
                other as char
            ))),
        }
    }

    fn handle_auth(&mut self, payload: &[u8]) -> Result<Reply> {
        if self.status != ProtocolStatus::StartingUp {
            return Err(Error::Protocol("unexpected authentication message".into()));
        }

        let message = AuthenticationMessage::parse(payload)?;
        match message {
            AuthenticationMessage::Ok => Ok(Reply::Continue),
            AuthenticationMessage::CleartextPassword => {
                let password = self.require_password()?;
                let mut buf = Vec::new();
                write_password(&mut buf, &password);
                Ok(Reply::Send(buf))
            }
            AuthenticationMessage::Md5Password { salt } => {
                let password = self.require_password()?;
                let hashed = crate::protocol::frontend::md5_password(&self.user, &password, &salt);
                let mut buf = Vec::new();
                write_password(&mut buf, &hashed);
                Ok(Reply::Send(buf))
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                let password = self.require_password()?;
                let (mechanism, client) = match (&self.channel_binding, &mechanisms) {
                    (Some(cb), mechs) if mechs.contains(&"SCRAM-SHA-256-PLUS") => (
                        "SCRAM-SHA-256-PLUS",
                        ScramClient::new_with_channel_binding(&password, cb),
                    ),
                    (_, mechs) if mechs.contains(&"SCRAM-SHA-256") => {
                        ("SCRAM-SHA-256", ScramClient::new(&password))
                    }
                    _ => {
                        return Err(Error::Auth(format!(
                            "no supported SASL mechanism, server offers: {mechanisms:?}"
                        )));
                    }
                };
                let first = client.client_first_message();
                let mut buf = Vec::new();
                write_sasl_initial_response(&mut buf, mechanism, first.as_bytes());
                self.scram = Some(client);
                Ok(Reply::Send(buf))
            }
            AuthenticationMessage::SaslContinue { data } => {
                let scram = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SASL continue without exchange".into()))?;
                let server_first = crate::protocol::codec::as_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-first-message: {e}")))?;
                let client_final = scram
                    .process_server_first(server_first)
                    .map_err(Error::Auth)?;
                let mut buf = Vec::new();
                write_sasl_response(&mut buf, client_final.as_bytes());
                Ok(Reply::Send(buf))
            }
            AuthenticationMessage::SaslFinal { data } => {
                let scram = self
                    .scram
                    .take()
                    .ok_or_else(|| Error::Protocol("SASL final without exchange".into()))?;
                let server_final = crate::protocol::codec::as_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-final-message: {e}")))?;
                scram.verify_server_final(server_final).map_err(Error::Auth)?;
                Ok(Reply::Continue)
            }
        }
    }

    fn require_password(&self) -> Result<String> {
        // taken by value so the cleartext is not kept past authentication
        self.password
            .clone()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    fn handle_parameter_status(&mut self, payload: &[u8]) -> Result<Reply> {
        let param = ParameterStatus::parse(payload)?;
        match param.name {
            "client_encoding" => {
                if param.value != "UTF8" {
                    return Err(Error::InvalidOperation(format!(
                        "only UTF8 client encoding is supported, server reports {:?}",
                        param.value
                    )));
                }
            }
            "DateStyle" => self.context.iso_dates = param.value.starts_with("ISO,"),
            "integer_datetimes" => self.context.integer_datetimes = param.value == "on",
            "IntervalStyle" => self.context.postgres_intervals = param.value == "postgres",
            "TimeZone" => self.context.timezone = Some(param.value.to_string()),
            _ => {}
        }
        self.parameters
            .insert(param.name.to_string(), param.value.to_string());
        Ok(Reply::Continue)
    }

    fn handle_row_description(&mut self, payload: &[u8]) -> Result<Reply> {
        let description = RowDescription::parse(payload)?;
        let fields: Vec<FieldInfo> = description
            .fields()
            .iter()
            .map(|f| FieldInfo {
                name: f.name.to_string(),
                table_oid: f.table_oid(),
                column_id: f.column_id(),
                type_oid: f.type_oid(),
                type_size: f.type_size(),
                type_modifier: f.type_modifier(),
                format: f.format(),
            })
            .collect();
        let observed: Vec<Oid> = fields.iter().map(|f| f.type_oid).collect();

        match self.cache_use.clone() {
            CacheUse::Promoting(_) => {
                if let Some(sql) = self.current_sql.clone() {
                    self.cache.store_result_oids(&sql, observed);
                }
            }
            CacheUse::Promoted(_) => {
                if let Some(sql) = self.current_sql.clone() {
                    let known = self.cache.result_oids(&sql);
                    if known.is_some_and(|oids| !oids.is_empty() && oids != observed) {
                        self.expire_cached(&sql, true);
                        if self.pending_error.is_none() {
                            self.pending_error = Some(cached_expired_error());
                        }
                    }
                }
            }
            CacheUse::None => {}
        }

        if self.pending_error.is_none() {
            self.fields = Some(fields);
            self.rows = Some(Vec::new());
        }
        Ok(Reply::Continue)
    }

    fn handle_data_row(&mut self, payload: &[u8]) -> Result<Reply> {
        if self.pending_error.is_some() {
            return Ok(Reply::Continue);
        }
        let fields = self
            .fields
            .as_ref()
            .ok_or_else(|| Error::Protocol("unexpected DataRow".into()))?;

        let data_row = DataRow::parse(payload)?;
        if data_row.len() != fields.len() {
            return Err(Error::Protocol(format!(
                "DataRow with {} values for {} fields",
                data_row.len(),
                fields.len()
            )));
        }

        let mut row = Vec::with_capacity(fields.len());
        let mut iter = data_row.iter();
        for field in fields {
            let raw = iter
                .next()
                .ok_or_else(|| Error::Protocol("DataRow: missing value".into()))??;
            let value = match raw {
                None => Value::Null,
                Some(bytes) if self.raw_result => match field.format {
                    FormatCode::Text => {
                        Value::Text(crate::protocol::codec::as_utf8(bytes)?.to_string())
                    }
                    FormatCode::Binary => Value::Bytes(bytes.to_vec()),
                },
                Some(bytes) => decode_value(&self.context, field.type_oid, field.format, bytes)?,
            };
            row.push(value);
        }
        if !iter.trailing().is_empty() {
            return Err(Error::Protocol("DataRow: data after last value".into()));
        }

        self.rows
            .as_mut()
            .ok_or_else(|| Error::Protocol("unexpected DataRow".into()))?
            .push(row);
        Ok(Reply::Continue)
    }

    fn handle_command_complete(&mut self, payload: &[u8]) -> Result<Reply> {
        let complete = CommandComplete::parse(payload)?;
        self.copy = CopyMode::None;
        if self.pending_error.is_none() {
            self.results.push(QueryResult {
                fields: self.fields.take(),
                rows: self.rows.take(),
                command_tag: complete.tag.to_string(),
            });
        } else {
            self.fields = None;
            self.rows = None;
        }
        Ok(Reply::Continue)
    }

    fn handle_ready_for_query(&mut self, payload: &[u8]) -> Result<Reply> {
        let ready = ReadyForQuery::parse(payload)?;
        self.transaction_status = ready.status;

        let starting_up = self.status == ProtocolStatus::StartingUp;
        self.status = ProtocolStatus::ReadyForQuery;
        self.copy = CopyMode::None;
        self.cache_use = CacheUse::None;
        self.current_sql = None;

        if let Some(error) = self.pending_error.take() {
            self.fields = None;
            self.rows = None;
            self.results.clear();
            return Err(error);
        }
        if starting_up {
            return Ok(Reply::StartupDone);
        }
        Ok(Reply::Ready(ResultSet::new(std::mem::take(
            &mut self.results,
        ))))
    }

    fn handle_error(&mut self, payload: &[u8]) -> Result<Reply> {
        let mut error = parse_server_error(payload)?;

        // a failing cached statement is recoverable by re-preparing
        if let Some(sql) = self.current_sql.clone() {
            match error.code() {
                "0A000" => {
                    error.set_kind(ErrorKind::CachedQueryExpired);
                    self.expire_cached(&sql, true);
                }
                "26000" => {
                    error.set_kind(ErrorKind::StatementDoesNotExist);
                    // the server already lost the statement, nothing to close
                    self.expire_cached(&sql, false);
                }
                _ => {}
            }
        }

        if error.severity().is_fatal() {
            self.status = ProtocolStatus::Closed;
            return Err(Error::Server(error));
        }

        // latch until ReadyForQuery; the first error wins
        if self.pending_error.is_none() {
            self.pending_error = Some(Error::Server(error));
        }
        self.fields = None;
        self.rows = None;
        Ok(Reply::Continue)
    }

    fn expire_cached(&mut self, sql: &str, deallocate: bool) {
        self.cache.invalidate(sql, deallocate);
    }
}

/// Error raised locally when a promoted statement's row description no
/// longer matches what the cache recorded.
fn cached_expired_error() -> Error {
    let fields = HashMap::from([
        (field_type::SEVERITY, "ERROR".to_string()),
        (field_type::SEVERITY_V, "ERROR".to_string()),
        (field_type::CODE, "0A000".to_string()),
        (
            field_type::MESSAGE,
            "cached statement result types changed".to_string(),
        ),
    ]);
    match ServerError::new(fields) {
        Ok(mut error) => {
            error.set_kind(ErrorKind::CachedQueryExpired);
            Error::Server(error)
        }
        Err(error) => error,
    }
}
