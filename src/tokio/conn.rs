//! Asynchronous PostgreSQL connection.
//!
//! One task owns the connection; exactly one `execute` may be in flight.
//! The driver suspends only on socket reads with an empty buffer and on
//! back-pressured writes. Cancelling an in-flight execute (dropping its
//! future) leaves the stream position unknown, so the next call finds the
//! connection closed rather than a corrupted exchange.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::notifications::{Notification, NotificationQueue};
use crate::opts::{ConnectTarget, Opts, SslMode};
use crate::protocol::framer::Framer;
use crate::protocol::frontend::startup::{write_cancel_request, write_ssl_request};
use crate::protocol::types::{ProtocolStatus, ResultFormat, TransactionStatus};
use crate::result::ResultSet;
use crate::state::{Machine, Reply};
use crate::value::Param;

const COPY_CHUNK_SIZE: usize = 8192;

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(feature = "tokio-tls")]
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl Stream {
    async fn connect(target: &ConnectTarget) -> Result<Self> {
        match target {
            ConnectTarget::Tcp(host, port) => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            ConnectTarget::Unix(path) => {
                Ok(Stream::Unix(tokio::net::UnixStream::connect(path).await?))
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.read(buf).await,
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read(buf).await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(stream) => stream.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.write_all(buf).await,
            #[cfg(unix)]
            Stream::Unix(stream) => stream.write_all(buf).await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(stream) => stream.write_all(buf).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.shutdown().await,
            #[cfg(unix)]
            Stream::Unix(stream) => stream.shutdown().await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(stream) => stream.shutdown().await,
        }
    }
}

/// COPY direction of one execute call.
enum CopyTarget<'a> {
    None,
    In(&'a mut (dyn AsyncRead + Unpin + Send)),
    Out(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

/// Asynchronous PostgreSQL connection.
pub struct Conn {
    stream: Stream,
    machine: Machine,
    framer: Framer,
    notifications: NotificationQueue,
    target: ConnectTarget,
    /// True while an execute future is in flight; still true afterwards
    /// only if that future was cancelled mid-exchange.
    executing: bool,
}

impl Conn {
    /// Connect and authenticate.
    pub async fn new(opts: Opts) -> Result<Self> {
        let target = opts.resolve_target();
        let ssl_mode = opts
            .ssl_mode
            .resolve(!matches!(target, ConnectTarget::Tcp(..)));

        match Self::connect_once(&opts, &target, ssl_mode, false).await {
            Ok(conn) => Ok(conn),
            Err(e)
                if ssl_mode == SslMode::Allow
                    && e.sqlstate().is_some_and(|code| code.starts_with("28")) =>
            {
                Self::connect_once(&opts, &target, ssl_mode, true).await
            }
            Err(e) => Err(e),
        }
    }

    async fn connect_once(
        opts: &Opts,
        target: &ConnectTarget,
        ssl_mode: SslMode,
        allow_retry_with_ssl: bool,
    ) -> Result<Self> {
        let mut stream = Stream::connect(target).await?;
        let mut machine = Machine::new(opts.machine_config());
        machine.mark_connected();

        let want_ssl = match ssl_mode {
            SslMode::Disable => false,
            SslMode::Allow => allow_retry_with_ssl,
            SslMode::Prefer | SslMode::Require => cfg!(feature = "tokio-tls"),
            SslMode::Default => false,
        };
        if ssl_mode == SslMode::Require && !cfg!(feature = "tokio-tls") {
            return Err(Error::Unsupported(
                "SSL required but the tokio-tls feature is not enabled".into(),
            ));
        }
        if want_ssl {
            let mut buf = Vec::with_capacity(8);
            write_ssl_request(&mut buf);
            stream.write_all(&buf).await?;
            let mut response = [0u8; 1];
            let n = stream.read(&mut response).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            match response[0] {
                b'S' => {
                    let (wrapped, channel_binding) = Self::wrap_tls(stream, target).await?;
                    stream = wrapped;
                    if let Some(data) = channel_binding {
                        // enables SCRAM-SHA-256-PLUS during authentication
                        machine.set_channel_binding(data);
                    }
                }
                b'N' => {
                    if ssl_mode == SslMode::Require {
                        return Err(Error::Auth(
                            "SSL required but refused by the server".into(),
                        ));
                    }
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected SSL response: {other:#04x}"
                    )));
                }
            }
        }

        let startup = machine.startup_message(
            &opts.user,
            opts.database.as_deref(),
            opts.application_name.as_deref(),
            opts.timezone.as_deref(),
            &opts.params,
            opts.password.as_deref(),
        );
        stream.write_all(&startup).await?;

        let mut framer = Framer::new();
        let mut buf = [0u8; 8192];
        'startup: loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                machine.force_close();
                return Err(Error::ConnectionClosed);
            }
            framer.feed(&buf[..n])?;
            while let Some(frame) = framer.next_frame() {
                match machine.handle_frame(&frame)? {
                    Reply::Continue => {}
                    Reply::Send(bytes) => stream.write_all(&bytes).await?,
                    Reply::StartupDone => break 'startup,
                    other => {
                        return Err(Error::Protocol(format!(
                            "unexpected reply during startup: {other:?}"
                        )));
                    }
                }
            }
        }

        let notifications = machine.notifications();
        Ok(Self {
            stream,
            machine,
            framer,
            notifications,
            target: target.clone(),
            executing: false,
        })
    }

    /// Perform the TLS handshake and extract the tls-server-end-point
    /// channel binding data from the server certificate.
    #[cfg(feature = "tokio-tls")]
    async fn wrap_tls(
        stream: Stream,
        target: &ConnectTarget,
    ) -> Result<(Stream, Option<Vec<u8>>)> {
        use crate::protocol::frontend::tls_server_end_point;

        let Stream::Tcp(tcp) = stream else {
            return Err(Error::Unsupported(
                "TLS over a UNIX socket is not supported".into(),
            ));
        };
        let host = match target {
            ConnectTarget::Tcp(host, _) => host.clone(),
            #[cfg(unix)]
            ConnectTarget::Unix(_) => String::new(),
        };
        let connector =
            tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
        let tls = connector
            .connect(&host, tcp)
            .await
            .map_err(|e| Error::Auth(format!("TLS handshake failed: {e}")))?;

        let channel_binding = tls
            .get_ref()
            .peer_certificate()
            .ok()
            .flatten()
            .and_then(|cert| cert.to_der().ok())
            .map(|der| tls_server_end_point(&der));

        Ok((Stream::Tls(Box::new(tls)), channel_binding))
    }

    #[cfg(not(feature = "tokio-tls"))]
    async fn wrap_tls(
        _stream: Stream,
        _target: &ConnectTarget,
    ) -> Result<(Stream, Option<Vec<u8>>)> {
        Err(Error::Unsupported(
            "server accepted SSL but the tokio-tls feature is not enabled".into(),
        ))
    }

    /// The notification queue of this connection.
    pub fn notifications(&self) -> NotificationQueue {
        self.notifications.clone()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.machine.transaction_status()
    }

    /// A server parameter reported via ParameterStatus (e.g. "TimeZone").
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.machine.parameter(name)
    }

    /// PID of the server backend for this connection.
    pub fn backend_pid(&self) -> Option<u32> {
        self.machine.backend_key().map(|k| k.pid)
    }

    /// Number of statements currently held by the statement cache.
    pub fn cached_statements(&self) -> usize {
        self.machine.cached_statements()
    }

    /// Execute a statement with the default result format.
    pub async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<ResultSet> {
        self.execute_format(sql, params, ResultFormat::Default, false)
            .await
    }

    /// Execute with an explicit result format; `raw_result` skips value
    /// decoding and yields text/bytes cells.
    pub async fn execute_format(
        &mut self,
        sql: &str,
        params: &[Param],
        result_format: ResultFormat,
        raw_result: bool,
    ) -> Result<ResultSet> {
        self.execute_with_retry(sql, params, result_format, raw_result, CopyTarget::None)
            .await
    }

    /// Execute a `COPY ... FROM STDIN`, streaming `source` to the server.
    pub async fn copy_in<R>(&mut self, sql: &str, source: &mut R) -> Result<ResultSet>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.execute_with_retry(
            sql,
            &[],
            ResultFormat::Default,
            false,
            CopyTarget::In(source),
        )
        .await
    }

    /// Execute a `COPY ... TO STDOUT`, streaming the server output to `sink`.
    pub async fn copy_out<W>(&mut self, sql: &str, sink: &mut W) -> Result<ResultSet>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.execute_with_retry(
            sql,
            &[],
            ResultFormat::Default,
            false,
            CopyTarget::Out(sink),
        )
        .await
    }

    async fn execute_with_retry(
        &mut self,
        sql: &str,
        params: &[Param],
        result_format: ResultFormat,
        raw_result: bool,
        mut copy: CopyTarget<'_>,
    ) -> Result<ResultSet> {
        match self
            .execute_once(sql, params, result_format, raw_result, &mut copy)
            .await
        {
            Err(e)
                if e.is_recoverable_statement()
                    && self.machine.transaction_status() == TransactionStatus::Idle =>
            {
                self.execute_once(sql, params, result_format, raw_result, &mut copy)
                    .await
            }
            other => other,
        }
    }

    async fn execute_once(
        &mut self,
        sql: &str,
        params: &[Param],
        result_format: ResultFormat,
        raw_result: bool,
        copy: &mut CopyTarget<'_>,
    ) -> Result<ResultSet> {
        if self.executing {
            // the previous execute future was cancelled mid-exchange; the
            // stream position is unknown and the connection unusable
            self.machine.force_close();
            return Err(Error::ConnectionClosed);
        }

        let bytes = self
            .machine
            .start_execute(sql, params, result_format, raw_result)?;
        self.executing = true;

        let result = self.drive_execute(bytes, copy).await;
        self.executing = false;
        if let Err(e) = &result {
            if e.is_connection_broken() {
                self.machine.force_close();
            }
        }
        result
    }

    async fn drive_execute(
        &mut self,
        bytes: Vec<u8>,
        copy: &mut CopyTarget<'_>,
    ) -> Result<ResultSet> {
        self.stream.write_all(&bytes).await?;

        let mut copy_error: Option<Error> = None;
        let mut buf = [0u8; 8192];
        loop {
            let Some(frame) = self.framer.next_frame() else {
                let n = self.stream.read(&mut buf).await?;
                if n == 0 {
                    self.machine.force_close();
                    return Err(Error::ConnectionClosed);
                }
                self.framer.feed(&buf[..n])?;
                continue;
            };

            match self.machine.handle_frame(&frame) {
                Ok(Reply::Continue) => {}
                Ok(Reply::Send(reply)) => self.stream.write_all(&reply).await?,
                Ok(Reply::CopyInReady) => {
                    if let Err(e) = self.pump_copy_in(copy).await {
                        if e.is_connection_broken() {
                            return Err(e);
                        }
                        copy_error.get_or_insert(e);
                    }
                }
                Ok(Reply::CopyOutChunk(chunk)) => match copy {
                    CopyTarget::Out(sink) => {
                        if let Err(e) = sink.write_all(&chunk).await {
                            copy_error.get_or_insert(Error::Io(e));
                        }
                    }
                    _ => {
                        copy_error.get_or_insert(Error::InvalidOperation(
                            "COPY OUT without an output file".into(),
                        ));
                    }
                },
                Ok(Reply::Ready(result)) => {
                    return match copy_error {
                        Some(e) => Err(e),
                        None => Ok(result),
                    };
                }
                Ok(Reply::StartupDone) => {
                    return Err(Error::Protocol("unexpected startup completion".into()));
                }
                Err(error) => {
                    return match copy_error {
                        Some(e) => Err(e),
                        None => Err(error),
                    };
                }
            }
        }
    }

    async fn pump_copy_in(&mut self, copy: &mut CopyTarget<'_>) -> Result<()> {
        let CopyTarget::In(source) = copy else {
            let mut buf = Vec::new();
            crate::protocol::frontend::write_copy_fail(&mut buf, "no COPY input provided");
            self.stream.write_all(&buf).await?;
            return Err(Error::InvalidOperation(
                "COPY IN without an input file".into(),
            ));
        };

        let mut chunk = [0u8; COPY_CHUNK_SIZE];
        loop {
            match source.read(&mut chunk).await {
                Ok(0) => {
                    let mut buf = Vec::new();
                    crate::protocol::frontend::write_copy_done(&mut buf);
                    self.stream.write_all(&buf).await?;
                    return Ok(());
                }
                Ok(n) => {
                    let mut buf = Vec::with_capacity(n + 5);
                    crate::protocol::frontend::write_copy_data(&mut buf, &chunk[..n]);
                    self.stream.write_all(&buf).await?;
                }
                Err(e) => {
                    let mut buf = Vec::new();
                    crate::protocol::frontend::write_copy_fail(&mut buf, &e.to_string());
                    self.stream.write_all(&buf).await?;
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Wait for a notification, reading from the socket while the
    /// connection is otherwise idle. `None` waits forever.
    pub async fn next_notification(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Notification> {
        if let Ok(notification) = self.notifications.get_nowait() {
            return Ok(notification);
        }
        match timeout {
            None => self.read_until_notification().await,
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.read_until_notification()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::QueueEmpty),
                }
            }
        }
    }

    async fn read_until_notification(&mut self) -> Result<Notification> {
        if self.executing || self.machine.status() != ProtocolStatus::ReadyForQuery {
            return Err(Error::InvalidOperation(
                "connection is not idle, cannot wait for notifications".into(),
            ));
        }
        let mut buf = [0u8; 8192];
        loop {
            while let Some(frame) = self.framer.next_frame() {
                match self.machine.handle_frame(&frame)? {
                    Reply::Continue => {}
                    Reply::Send(bytes) => self.stream.write_all(&bytes).await?,
                    other => {
                        return Err(Error::Protocol(format!(
                            "unexpected reply while idle: {other:?}"
                        )));
                    }
                }
                if let Ok(notification) = self.notifications.get_nowait() {
                    return Ok(notification);
                }
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                self.machine.force_close();
                return Err(Error::ConnectionClosed);
            }
            self.framer.feed(&buf[..n])?;
        }
    }

    /// Cancel the in-flight query from a second socket (out-of-band).
    pub async fn cancel_request(&self) -> Result<()> {
        let key = self
            .machine
            .backend_key()
            .copied()
            .ok_or_else(|| Error::InvalidOperation("no backend key received".into()))?;
        let mut stream = Stream::connect(&self.target).await?;
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, key.pid, key.secret_key);
        stream.write_all(&buf).await?;
        Ok(())
    }

    /// Send Terminate if the connection is idle and close the transport.
    pub async fn close(mut self) -> Result<()> {
        if self.machine.status() == ProtocolStatus::ReadyForQuery {
            let terminate = self.machine.terminate_message();
            let _ = self.stream.write_all(&terminate).await;
        }
        self.machine.force_close();
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}
