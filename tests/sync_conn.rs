//! Integration tests for the blocking connection, driven against a
//! scripted in-process server on the TCP loopback.

#![cfg(feature = "sync")]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use strand_postgres::sync::Conn;
use strand_postgres::{Error, ErrorKind, Opts, Param, SslMode, TransactionStatus, Value};

/// Server side of one scripted exchange.
struct Script {
    stream: TcpStream,
}

impl Script {
    fn read_startup(&mut self) -> Vec<u8> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).unwrap();
        let len = i32::from_be_bytes(len) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).unwrap();
        payload
    }

    fn read_message(&mut self) -> (u8, Vec<u8>) {
        let mut head = [0u8; 5];
        self.stream.read_exact(&mut head).unwrap();
        let len = i32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).unwrap();
        (head[0], payload)
    }

    fn send(&mut self, identifier: u8, payload: &[u8]) {
        let mut msg = vec![identifier];
        msg.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        msg.extend_from_slice(payload);
        self.stream.write_all(&msg).unwrap();
    }

    fn send_auth_ok(&mut self) {
        self.send(b'R', &0_i32.to_be_bytes());
    }

    fn send_parameter(&mut self, name: &str, value: &str) {
        let mut payload = name.as_bytes().to_vec();
        payload.push(0);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.send(b'S', &payload);
    }

    fn send_backend_key(&mut self, pid: u32) {
        let mut payload = pid.to_be_bytes().to_vec();
        payload.extend_from_slice(&0xDEAD_u32.to_be_bytes());
        self.send(b'K', &payload);
    }

    fn send_ready(&mut self, status: u8) {
        self.send(b'Z', &[status]);
    }

    fn send_row_description_int4(&mut self, names: &[&str]) {
        let mut payload = (names.len() as u16).to_be_bytes().to_vec();
        for name in names {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&0_u32.to_be_bytes());
            payload.extend_from_slice(&0_i16.to_be_bytes());
            payload.extend_from_slice(&23_u32.to_be_bytes()); // int4
            payload.extend_from_slice(&4_i16.to_be_bytes());
            payload.extend_from_slice(&(-1_i32).to_be_bytes());
            payload.extend_from_slice(&0_u16.to_be_bytes()); // text
        }
        self.send(b'T', &payload);
    }

    fn send_data_row(&mut self, values: &[&[u8]]) {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            payload.extend_from_slice(&(value.len() as i32).to_be_bytes());
            payload.extend_from_slice(value);
        }
        self.send(b'D', &payload);
    }

    fn send_command_complete(&mut self, tag: &str) {
        let mut payload = tag.as_bytes().to_vec();
        payload.push(0);
        self.send(b'C', &payload);
    }

    fn send_error(&mut self, severity: &str, code: &str, message: &str) {
        let mut payload = Vec::new();
        for (field, value) in [
            (b'S', severity),
            (b'V', severity),
            (b'C', code),
            (b'M', message),
        ] {
            payload.push(field);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        self.send(b'E', &payload);
    }

    fn send_notification(&mut self, pid: u32, channel: &str, notify_payload: &str) {
        let mut payload = pid.to_be_bytes().to_vec();
        payload.extend_from_slice(channel.as_bytes());
        payload.push(0);
        payload.extend_from_slice(notify_payload.as_bytes());
        payload.push(0);
        self.send(b'A', &payload);
    }

    /// Auth-ok startup: parameters, backend key, ready.
    fn finish_startup(&mut self) {
        self.read_startup();
        self.send_auth_ok();
        self.send_parameter("client_encoding", "UTF8");
        self.send_parameter("DateStyle", "ISO, MDY");
        self.send_parameter("integer_datetimes", "on");
        self.send_parameter("TimeZone", "UTC");
        self.send_backend_key(4242);
        self.send_ready(b'I');
    }

    /// Read frontend messages until (and including) Sync.
    fn drain_until_sync(&mut self) -> Vec<u8> {
        let mut seen = Vec::new();
        loop {
            let (identifier, _) = self.read_message();
            seen.push(identifier);
            if identifier == b'S' {
                return seen;
            }
        }
    }
}

/// Run `script` as an in-process server and connect to it.
fn with_server<F>(script: F) -> (Conn, JoinHandle<()>)
where
    F: FnOnce(Script) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_nodelay(true).unwrap();
        script(Script { stream });
    });

    let opts = Opts {
        host: "127.0.0.1".to_string(),
        port,
        user: "tester".to_string(),
        database: Some("testdb".to_string()),
        ssl_mode: SslMode::Disable,
        prepare_threshold: 0,
        ..Opts::default()
    };
    (Conn::new(opts).unwrap(), handle)
}

#[test]
fn test_simple_query_roundtrip() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        let (identifier, payload) = script.read_message();
        assert_eq!(identifier, b'Q');
        assert_eq!(payload, b"SELECT 1 AS one\0");
        script.send_row_description_int4(&["one"]);
        script.send_data_row(&[b"1"]);
        script.send_command_complete("SELECT 1");
        script.send_ready(b'I');
    });

    let result = conn.execute("SELECT 1 AS one", &[]).unwrap();
    assert_eq!(result.command_tag(), "SELECT 1");
    assert_eq!(result.records_affected(), Some(1));
    assert_eq!(result[0][0], Value::Int4(1));
    assert_eq!(result.fields().unwrap()[0].name, "one");
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.backend_pid(), Some(4242));
    assert_eq!(conn.parameter("TimeZone").as_deref(), Some("UTC"));

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_md5_authentication() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut script = Script { stream };
        script.read_startup();

        let mut payload = 5_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[9, 8, 7, 6]);
        script.send(b'R', &payload);

        let (identifier, response) = script.read_message();
        assert_eq!(identifier, b'p');
        // "md5" + 32 hex digits + terminator
        assert_eq!(response.len(), 36);
        assert!(response.starts_with(b"md5"));

        script.send_auth_ok();
        script.send_parameter("client_encoding", "UTF8");
        script.send_ready(b'I');
    });

    let opts = Opts {
        host: "127.0.0.1".to_string(),
        port,
        user: "tester".to_string(),
        password: Some("secret".to_string()),
        ssl_mode: SslMode::Disable,
        ..Opts::default()
    };
    let mut conn = Conn::new(opts).unwrap();
    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_error_latched_and_connection_reusable() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        let (identifier, _) = script.read_message();
        assert_eq!(identifier, b'Q');
        script.send_error("ERROR", "42601", "syntax error at or near \"boom\"");
        script.send_ready(b'I');

        let (identifier, _) = script.read_message();
        assert_eq!(identifier, b'Q');
        script.send_command_complete("SET");
        script.send_ready(b'I');
    });

    let err = conn.execute("boom", &[]).unwrap_err();
    assert_eq!(err.sqlstate(), Some("42601"));
    assert_eq!(err.kind(), Some(ErrorKind::Programming));

    // the connection survived the error
    let result = conn.execute("SET TIMEZONE TO 'UTC'", &[]).unwrap();
    assert_eq!(result.command_tag(), "SET");
    assert_eq!(result.records_affected(), None);

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_multi_statement_query() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        script.read_message();
        script.send_row_description_int4(&["a"]);
        script.send_data_row(&[b"1"]);
        script.send_command_complete("SELECT 1");
        script.send_row_description_int4(&["b"]);
        script.send_data_row(&[b"2"]);
        script.send_data_row(&[b"3"]);
        script.send_command_complete("SELECT 2");
        script.send_ready(b'I');
    });

    let mut result = conn.execute("SELECT 1; SELECT 2, 3", &[]).unwrap();
    assert_eq!(result.len(), 1);
    assert!(result.nextset());
    assert_eq!(result.len(), 2);
    assert_eq!(result.command_tag(), "SELECT 2");
    assert!(!result.nextset());

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_notifications_between_queries() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        // LISTEN over the simple path
        script.read_message();
        script.send_command_complete("LISTEN");
        script.send_ready(b'I');

        // out-of-band notification while the connection is idle
        script.send_notification(777, "chan", "yes");

        // hold the connection open until the client is done
        let (identifier, _) = script.read_message();
        assert_eq!(identifier, b'X');
    });

    let result = conn.execute("LISTEN chan", &[]).unwrap();
    assert_eq!(result.command_tag(), "LISTEN");

    let notifications = conn.notifications();
    let notification = notifications.get_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(notification.process_id, 777);
    assert_eq!(notification.channel, "chan");
    assert_eq!(notification.payload, "yes");

    // a timed take on the now-empty queue raises QueueEmpty
    let err = notifications
        .get_timeout(Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, Error::QueueEmpty));

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_statement_promotion_skips_parse() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut script = Script { stream };
        script.finish_startup();

        // first execution promotes: Parse + Bind + Describe + Execute + Sync
        let seen = script.drain_until_sync();
        assert_eq!(seen, vec![b'P', b'B', b'D', b'E', b'S']);
        script.send(b'1', b"");
        script.send(b'2', b"");
        script.send_row_description_int4(&["val"]);
        script.send_data_row(&[b"1"]);
        script.send_command_complete("SELECT 1");
        script.send_ready(b'I');

        // second execution binds the promoted statement without Parse
        let seen = script.drain_until_sync();
        assert_eq!(seen, vec![b'B', b'D', b'E', b'S']);
        script.send(b'2', b"");
        script.send_row_description_int4(&["val"]);
        script.send_data_row(&[b"1"]);
        script.send_command_complete("SELECT 1");
        script.send_ready(b'I');

        let (identifier, _) = script.read_message();
        assert_eq!(identifier, b'X');
    });

    let opts = Opts {
        host: "127.0.0.1".to_string(),
        port,
        user: "tester".to_string(),
        ssl_mode: SslMode::Disable,
        prepare_threshold: 1,
        ..Opts::default()
    };
    let mut conn = Conn::new(opts).unwrap();

    for _ in 0..2 {
        let result = conn.execute("SELECT 1 AS val", &[]).unwrap();
        assert_eq!(result[0][0], Value::Int4(1));
    }
    assert_eq!(conn.cached_statements(), 1);

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_extended_query_with_params() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        let mut bind_payload = None;
        loop {
            let (identifier, payload) = script.read_message();
            if identifier == b'B' {
                bind_payload = Some(payload);
            } else if identifier == b'S' {
                break;
            }
        }
        // the int parameter must be bound as a 4-byte binary int4
        let bind = bind_payload.expect("no Bind received");
        let needle = 12_i32.to_be_bytes();
        assert!(bind.windows(4).any(|w| w == needle));

        script.send(b'1', b"");
        script.send(b'2', b"");
        script.send_row_description_int4(&["sum"]);
        script.send_data_row(&[b"13"]);
        script.send_command_complete("SELECT 1");
        script.send_ready(b'I');
    });

    let result = conn.execute("SELECT $1 + 1 AS sum", &[Param::Int(12)]).unwrap();
    assert_eq!(result[0][0], Value::Int4(13));

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_copy_in_streams_and_reports_count() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        script.read_message(); // Query
        // CopyInResponse: text format, one column
        let mut payload = vec![0u8];
        payload.extend_from_slice(&1_i16.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        script.send(b'G', &payload);

        let mut received = Vec::new();
        loop {
            let (identifier, payload) = script.read_message();
            match identifier {
                b'd' => received.extend_from_slice(&payload),
                b'c' => break,
                other => panic!("unexpected message during copy: {}", other as char),
            }
        }
        assert_eq!(received, b"1,a\n2,b\n");

        script.send_command_complete("COPY 2");
        script.send_ready(b'I');
    });

    let mut source: &[u8] = b"1,a\n2,b\n";
    let result = conn
        .copy_in("COPY t FROM STDIN (FORMAT CSV)", &mut source)
        .unwrap();
    assert_eq!(result.command_tag(), "COPY 2");
    assert_eq!(result.records_affected(), Some(2));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    conn.close().unwrap();
    server.join().unwrap();
}

/// A reader that fails after the first chunk.
struct FailingReader {
    sent: bool,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.sent {
            Err(std::io::Error::other("source exploded"))
        } else {
            self.sent = true;
            buf[..4].copy_from_slice(b"1,a\n");
            Ok(4)
        }
    }
}

#[test]
fn test_copy_in_source_failure_sends_copy_fail() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        script.read_message(); // Query
        let mut payload = vec![0u8];
        payload.extend_from_slice(&1_i16.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        script.send(b'G', &payload);

        loop {
            let (identifier, _) = script.read_message();
            if identifier == b'f' {
                break;
            }
            assert_eq!(identifier, b'd');
        }
        script.send_error("ERROR", "57014", "COPY from stdin failed");
        script.send_ready(b'I');

        // the connection is still usable afterwards
        let (identifier, _) = script.read_message();
        assert_eq!(identifier, b'Q');
        script.send_command_complete("SELECT 0");
        script.send_ready(b'I');
    });

    let mut source = FailingReader { sent: false };
    let err = conn.copy_in("COPY t FROM STDIN", &mut source).unwrap_err();
    // the source error wins over the server's copy-abort error
    assert!(matches!(err, Error::Io(_)));

    conn.execute("SELECT now()", &[]).unwrap();
    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_copy_out_writes_chunks() {
    let (mut conn, server) = with_server(|mut script| {
        script.finish_startup();

        script.read_message(); // Query
        let mut payload = vec![0u8];
        payload.extend_from_slice(&1_i16.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        script.send(b'H', &payload);
        script.send(b'd', b"1,a\n");
        script.send(b'd', b"2,b\n");
        script.send(b'c', b"");
        script.send_command_complete("COPY 2");
        script.send_ready(b'I');
    });

    let mut sink = Vec::new();
    let result = conn.copy_out("COPY t TO STDOUT", &mut sink).unwrap();
    assert_eq!(result.command_tag(), "COPY 2");
    assert_eq!(sink, b"1,a\n2,b\n");

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_cached_query_expired_retries_once_outside_transaction() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut script = Script { stream };
        script.finish_startup();

        // promotion round
        let seen = script.drain_until_sync();
        assert_eq!(seen[0], b'P');
        script.send(b'1', b"");
        script.send(b'2', b"");
        script.send_row_description_int4(&["a"]);
        script.send_command_complete("SELECT 0");
        script.send_ready(b'I');

        // second round: Bind against the stale statement fails
        let seen = script.drain_until_sync();
        assert_eq!(seen[0], b'B');
        script.send_error("ERROR", "0A000", "cached plan must not change result type");
        script.send_ready(b'I');

        // automatic retry: Close (stale name) + fresh named Parse
        let seen = script.drain_until_sync();
        assert_eq!(&seen[..3], &[b'C', b'P', b'B']);
        script.send(b'3', b"");
        script.send(b'1', b"");
        script.send(b'2', b"");
        script.send_row_description_int4(&["a"]);
        script.send_data_row(&[b"5"]);
        script.send_command_complete("SELECT 1");
        script.send_ready(b'I');

        let (identifier, _) = script.read_message();
        assert_eq!(identifier, b'X');
    });

    let opts = Opts {
        host: "127.0.0.1".to_string(),
        port,
        user: "tester".to_string(),
        ssl_mode: SslMode::Disable,
        prepare_threshold: 1,
        ..Opts::default()
    };
    let mut conn = Conn::new(opts).unwrap();

    conn.execute("SELECT a FROM t", &[]).unwrap();
    // expires server-side, retried transparently
    let result = conn.execute("SELECT a FROM t", &[]).unwrap();
    assert_eq!(result[0][0], Value::Int4(5));

    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn test_cached_query_expired_propagates_inside_transaction() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut script = Script { stream };
        script.finish_startup();

        // BEGIN
        script.read_message();
        script.send_command_complete("BEGIN");
        script.send_ready(b'T');

        // promotion round inside the transaction
        let seen = script.drain_until_sync();
        assert_eq!(seen[0], b'P');
        script.send(b'1', b"");
        script.send(b'2', b"");
        script.send_row_description_int4(&["a"]);
        script.send_command_complete("SELECT 0");
        script.send_ready(b'T');

        // stale statement: no retry is allowed in a transaction
        let seen = script.drain_until_sync();
        assert_eq!(seen[0], b'B');
        script.send_error("ERROR", "0A000", "cached plan must not change result type");
        script.send_ready(b'T');

        let (identifier, _) = script.read_message();
        assert_eq!(identifier, b'X');
    });

    let opts = Opts {
        host: "127.0.0.1".to_string(),
        port,
        user: "tester".to_string(),
        ssl_mode: SslMode::Disable,
        prepare_threshold: 1,
        ..Opts::default()
    };
    let mut conn = Conn::new(opts).unwrap();

    conn.execute("BEGIN", &[]).unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);
    conn.execute("SELECT a FROM t", &[]).unwrap();

    let err = conn.execute("SELECT a FROM t", &[]).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::CachedQueryExpired));
    // state is ReadyForQuery (in failed transaction), not closed
    assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);

    conn.close().unwrap();
    server.join().unwrap();
}
