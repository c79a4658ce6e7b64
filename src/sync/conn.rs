//! Synchronous PostgreSQL connection.
//!
//! A dedicated reader thread owns the receiving half of the socket. It
//! feeds every frame to the state machine under the connection lock, which
//! keeps LISTEN/NOTIFY flowing while no query runs; during an `execute`
//! the resulting events are handed to the calling thread over a rendezvous
//! channel.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::notifications::NotificationQueue;
use crate::opts::{ConnectTarget, Opts, SslMode};
use crate::protocol::framer::Framer;
use crate::protocol::frontend::startup::{write_cancel_request, write_ssl_request};
use crate::protocol::types::{ProtocolStatus, ResultFormat, TransactionStatus};
use crate::result::ResultSet;
use crate::state::{Machine, Reply};
use crate::value::Param;

const COPY_CHUNK_SIZE: usize = 8192;

/// Byte stream to the server.
enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Stream {
    fn connect(target: &ConnectTarget) -> Result<Self> {
        match target {
            ConnectTarget::Tcp(host, port) => {
                let stream = TcpStream::connect((host.as_str(), *port))?;
                stream.set_nodelay(true)?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            ConnectTarget::Unix(path) => {
                Ok(Stream::Unix(std::os::unix::net::UnixStream::connect(path)?))
            }
        }
    }

    fn try_clone(&self) -> Result<Self> {
        match self {
            Stream::Tcp(stream) => Ok(Stream::Tcp(stream.try_clone()?)),
            #[cfg(unix)]
            Stream::Unix(stream) => Ok(Stream::Unix(stream.try_clone()?)),
        }
    }

    fn shutdown(&self) {
        match self {
            Stream::Tcp(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(unix)]
            Stream::Unix(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read(buf),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.read_exact(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read_exact(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.write_all(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.write_all(buf),
        }
    }
}

/// Event handed from the reader thread to a waiting execute.
enum ExecEvent {
    CopyInReady,
    CopyOutChunk(Vec<u8>),
    Ready(ResultSet),
}

struct Core {
    machine: Machine,
    framer: Framer,
    writer: Stream,
    waiter: Option<mpsc::Sender<Result<ExecEvent>>>,
    shutdown: bool,
}

impl Core {
    /// Run buffered frames through the machine, routing events to the
    /// waiting execute.
    fn pump_frames(&mut self) {
        while let Some(frame) = self.framer.next_frame() {
            match self.machine.handle_frame(&frame) {
                Ok(Reply::Continue) => {}
                Ok(Reply::Send(bytes)) => {
                    if let Err(e) = self.writer.write_all(&bytes) {
                        self.fail(Error::Io(e));
                        return;
                    }
                }
                Ok(Reply::CopyInReady) => self.deliver(Ok(ExecEvent::CopyInReady)),
                Ok(Reply::CopyOutChunk(chunk)) => {
                    self.deliver(Ok(ExecEvent::CopyOutChunk(chunk)));
                }
                Ok(Reply::Ready(result)) => self.deliver(Ok(ExecEvent::Ready(result))),
                Ok(Reply::StartupDone) => {
                    self.fail(Error::Protocol("unexpected startup completion".into()));
                }
                Err(error) => self.fail(error),
            }
        }
    }

    fn deliver(&mut self, event: Result<ExecEvent>) {
        let done = matches!(event, Ok(ExecEvent::Ready(_)) | Err(_));
        if let Some(waiter) = &self.waiter {
            let _ = waiter.send(event);
            if done {
                self.waiter = None;
            }
        } else if let Err(error) = event {
            tracing::warn!(%error, "protocol error with no execute in flight");
        }
    }

    fn fail(&mut self, error: Error) {
        if error.is_connection_broken() {
            self.machine.force_close();
        }
        self.deliver(Err(error));
    }
}

/// Synchronous PostgreSQL connection.
pub struct Conn {
    core: Arc<Mutex<Core>>,
    notifications: NotificationQueue,
    target: ConnectTarget,
    reader: Option<JoinHandle<()>>,
}

impl Conn {
    /// Connect and authenticate.
    pub fn new(opts: Opts) -> Result<Self> {
        let target = opts.resolve_target();
        let ssl_mode = opts
            .ssl_mode
            .resolve(!matches!(target, ConnectTarget::Tcp(..)));

        match Self::connect_once(&opts, &target, ssl_mode, false) {
            Ok(conn) => Ok(conn),
            // Allow starts unencrypted and retries encrypted after an
            // authorization failure
            Err(e)
                if ssl_mode == SslMode::Allow
                    && e.sqlstate().is_some_and(|code| code.starts_with("28")) =>
            {
                Self::connect_once(&opts, &target, ssl_mode, true)
            }
            Err(e) => Err(e),
        }
    }

    fn connect_once(
        opts: &Opts,
        target: &ConnectTarget,
        ssl_mode: SslMode,
        allow_retry_with_ssl: bool,
    ) -> Result<Self> {
        let mut stream = Stream::connect(target)?;
        let mut machine = Machine::new(opts.machine_config());
        machine.mark_connected();

        let want_ssl = match ssl_mode {
            SslMode::Disable => false,
            SslMode::Allow => allow_retry_with_ssl,
            SslMode::Prefer => cfg!(feature = "sync-tls"),
            SslMode::Require => true,
            SslMode::Default => false,
        };
        if want_ssl {
            let mut buf = Vec::with_capacity(8);
            write_ssl_request(&mut buf);
            stream.write_all(&buf)?;
            let mut response = [0u8; 1];
            stream.read_exact(&mut response)?;
            match response[0] {
                b'S' => {
                    // the wrapped transport is only wired up on the async
                    // side; the blocking transport negotiates and bows out
                    return Err(Error::Unsupported(
                        "TLS on the blocking transport is not implemented".into(),
                    ));
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

        // startup runs on the calling thread; the reader thread takes over
        // after the first ReadyForQuery
        let startup = machine.startup_message(
            &opts.user,
            opts.database.as_deref(),
            opts.application_name.as_deref(),
            opts.timezone.as_deref(),
            &opts.params,
            opts.password.as_deref(),
        );
        stream.write_all(&startup)?;

        let mut framer = Framer::new();
        let mut buf = [0u8; 8192];
        'startup: loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                machine.force_close();
                return Err(Error::ConnectionClosed);
            }
            framer.feed(&buf[..n])?;
            while let Some(frame) = framer.next_frame() {
                match machine.handle_frame(&frame)? {
                    Reply::Continue => {}
                    Reply::Send(bytes) => stream.write_all(&bytes)?,
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
        let reader_stream = stream.try_clone()?;
        let core = Arc::new(Mutex::new(Core {
            machine,
            framer,
            writer: stream,
            waiter: None,
            shutdown: false,
        }));

        let reader = {
            let core = Arc::clone(&core);
            std::thread::Builder::new()
                .name("strand-postgres-reader".into())
                .spawn(move || reader_loop(core, reader_stream))
                .map_err(Error::Io)?
        };

        Ok(Self {
            core,
            notifications,
            target: target.clone(),
            reader: Some(reader),
        })
    }

    /// The notification queue of this connection.
    pub fn notifications(&self) -> NotificationQueue {
        self.notifications.clone()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.lock_core().machine.transaction_status()
    }

    /// A server parameter reported via ParameterStatus (e.g. "TimeZone").
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.lock_core().machine.parameter(name).map(str::to_string)
    }

    /// PID of the server backend for this connection.
    pub fn backend_pid(&self) -> Option<u32> {
        self.lock_core().machine.backend_key().map(|k| k.pid)
    }

    /// Number of statements currently held by the statement cache.
    pub fn cached_statements(&self) -> usize {
        self.lock_core().machine.cached_statements()
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().expect("connection poisoned")
    }

    /// Execute a statement with the default result format.
    pub fn execute(&mut self, sql: &str, params: &[Param]) -> Result<ResultSet> {
        self.execute_format(sql, params, ResultFormat::Default, false)
    }

    /// Execute with an explicit result format; `raw_result` skips value
    /// decoding and yields text/bytes cells.
    pub fn execute_format(
        &mut self,
        sql: &str,
        params: &[Param],
        result_format: ResultFormat,
        raw_result: bool,
    ) -> Result<ResultSet> {
        self.execute_with_retry(sql, params, result_format, raw_result, CopyTarget::None)
    }

    /// Execute a `COPY ... FROM STDIN`, streaming `source` to the server.
    pub fn copy_in(&mut self, sql: &str, source: &mut dyn Read) -> Result<ResultSet> {
        self.execute_with_retry(
            sql,
            &[],
            ResultFormat::Default,
            false,
            CopyTarget::In(source),
        )
    }

    /// Execute a `COPY ... TO STDOUT`, streaming the server output to `sink`.
    pub fn copy_out(&mut self, sql: &str, sink: &mut dyn Write) -> Result<ResultSet> {
        self.execute_with_retry(
            sql,
            &[],
            ResultFormat::Default,
            false,
            CopyTarget::Out(sink),
        )
    }

    fn execute_with_retry(
        &mut self,
        sql: &str,
        params: &[Param],
        result_format: ResultFormat,
        raw_result: bool,
        mut copy: CopyTarget<'_>,
    ) -> Result<ResultSet> {
        match self.execute_once(sql, params, result_format, raw_result, &mut copy) {
            Err(e)
                if e.is_recoverable_statement()
                    && self.transaction_status() == TransactionStatus::Idle =>
            {
                self.execute_once(sql, params, result_format, raw_result, &mut copy)
            }
            other => other,
        }
    }

    fn execute_once(
        &mut self,
        sql: &str,
        params: &[Param],
        result_format: ResultFormat,
        raw_result: bool,
        copy: &mut CopyTarget<'_>,
    ) -> Result<ResultSet> {
        let rx = {
            let mut core = self.lock_core();
            if core.waiter.is_some() {
                return Err(Error::InvalidOperation(
                    "another execute is in progress on this connection".into(),
                ));
            }
            let bytes = core
                .machine
                .start_execute(sql, params, result_format, raw_result)?;
            let (tx, rx) = mpsc::channel();
            core.waiter = Some(tx);
            if let Err(e) = core.writer.write_all(&bytes) {
                core.waiter = None;
                core.machine.force_close();
                return Err(Error::Io(e));
            }
            rx
        };

        // a read error in the copy source is reported to the server with
        // CopyFail and surfaced only after the exchange drained
        let mut copy_error: Option<Error> = None;

        loop {
            let event = rx
                .recv()
                .map_err(|_| Error::ConnectionClosed)?;
            match event {
                Ok(ExecEvent::CopyInReady) => {
                    if let Err(e) = self.pump_copy_in(copy) {
                        copy_error.get_or_insert(e);
                    }
                }
                Ok(ExecEvent::CopyOutChunk(chunk)) => match copy {
                    CopyTarget::Out(sink) => {
                        if let Err(e) = sink.write_all(&chunk) {
                            copy_error.get_or_insert(Error::Io(e));
                        }
                    }
                    _ => {
                        copy_error.get_or_insert(Error::InvalidOperation(
                            "COPY OUT without an output file".into(),
                        ));
                    }
                },
                Ok(ExecEvent::Ready(result)) => {
                    return match copy_error {
                        Some(e) => Err(e),
                        None => Ok(result),
                    };
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

    fn pump_copy_in(&self, copy: &mut CopyTarget<'_>) -> Result<()> {
        let CopyTarget::In(source) = copy else {
            let mut buf = Vec::new();
            crate::protocol::frontend::write_copy_fail(&mut buf, "no COPY input provided");
            self.lock_core().writer.write_all(&buf)?;
            return Err(Error::InvalidOperation(
                "COPY IN without an input file".into(),
            ));
        };

        let mut chunk = [0u8; COPY_CHUNK_SIZE];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => {
                    let mut buf = Vec::new();
                    crate::protocol::frontend::write_copy_done(&mut buf);
                    self.lock_core().writer.write_all(&buf)?;
                    return Ok(());
                }
                Ok(n) => {
                    let mut buf = Vec::with_capacity(n + 5);
                    crate::protocol::frontend::write_copy_data(&mut buf, &chunk[..n]);
                    self.lock_core().writer.write_all(&buf)?;
                }
                Err(e) => {
                    let mut buf = Vec::new();
                    crate::protocol::frontend::write_copy_fail(&mut buf, &e.to_string());
                    self.lock_core().writer.write_all(&buf)?;
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Cancel the in-flight query from a second socket (out-of-band).
    pub fn cancel_request(&self) -> Result<()> {
        let key = self
            .lock_core()
            .machine
            .backend_key()
            .copied()
            .ok_or_else(|| Error::InvalidOperation("no backend key received".into()))?;
        let mut stream = Stream::connect(&self.target)?;
        let mut buf = Vec::with_capacity(16);
        write_cancel_request(&mut buf, key.pid, key.secret_key);
        stream.write_all(&buf)?;
        Ok(())
    }

    /// Send Terminate if the connection is idle and close the transport.
    pub fn close(&mut self) -> Result<()> {
        {
            let mut core = self.lock_core();
            core.shutdown = true;
            if core.machine.status() == ProtocolStatus::ReadyForQuery {
                let terminate = core.machine.terminate_message();
                let _ = core.writer.write_all(&terminate);
            }
            core.machine.force_close();
            core.writer.shutdown();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        Ok(())
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// COPY direction of one execute call.
enum CopyTarget<'a> {
    None,
    In(&'a mut dyn Read),
    Out(&'a mut dyn Write),
}

fn reader_loop(core: Arc<Mutex<Core>>, mut stream: Stream) {
    // frames that arrived in the same read as the startup ReadyForQuery
    {
        let mut core = core.lock().expect("connection poisoned");
        core.pump_frames();
    }

    let mut buf = [0u8; 8192];
    loop {
        let read = stream.read(&mut buf);
        let mut core = core.lock().expect("connection poisoned");
        if core.shutdown {
            return;
        }
        match read {
            Ok(0) => {
                core.machine.force_close();
                if core.waiter.is_some() {
                    core.deliver(Err(Error::ConnectionClosed));
                }
                return;
            }
            Ok(n) => {
                if let Err(e) = core.framer.feed(&buf[..n]) {
                    core.fail(e);
                    return;
                }
                core.pump_frames();
                if core.machine.status() == ProtocolStatus::Closed {
                    return;
                }
            }
            Err(e) => {
                core.machine.force_close();
                core.deliver(Err(Error::Io(e)));
                return;
            }
        }
    }
}
