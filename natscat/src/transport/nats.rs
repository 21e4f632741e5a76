//! Minimal client for the core NATS text protocol.
//!
//! Control lines are CRLF-terminated text (`INFO`, `CONNECT`, `PUB`, `SUB`,
//! `MSG`, `PING`, `PONG`, `+OK`, `-ERR`); message bodies are length-prefixed
//! so payloads may contain any bytes, line endings included.
//!
//! After the handshake a background task owns the read half. It answers
//! server `PING`s on its own, so an idle publisher waiting on stdin is not
//! dropped as a stale client, and forwards everything else to the
//! connection as [`Event`]s in arrival order.

use std::{io, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::{
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
        BufReader, BufWriter, ReadHalf, WriteHalf,
    },
    net::TcpStream,
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{Connection, Connector, Message, Subscription};
use crate::{config::Config, error::TransportError};

pub const DEFAULT_PORT: u16 = 4222;
const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;
/// Longest `INFO`/`MSG`/`-ERR` line accepted from a server.
const MAX_CONTROL_LINE: usize = 64 * 1024;
const LINE_ENDINGS: &[char] = &['\n', '\r'];
const SUBSCRIPTION_ID: u64 = 1;

type SharedWriter<S> = Arc<Mutex<BufWriter<WriteHalf<S>>>>;

/// Fields of the server `INFO` block this client cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

#[derive(Debug, Serialize)]
struct ConnectOptions<'a> {
    verbose: bool,
    pedantic: bool,
    name: &'a str,
    lang: &'static str,
    version: &'static str,
    protocol: u8,
    headers: bool,
}

/// Operations the server may send.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ServerOp {
    Info(String),
    Msg {
        subject: String,
        sid: u64,
        len: usize,
    },
    Ping,
    Pong,
    Ok,
    Err(String),
}

#[derive(Debug)]
enum Event {
    Message(Message),
    Pong,
    Failed(TransportError),
}

/// Connects over TCP to the first reachable server in `Config::server_urls`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NatsConnector;

impl Connector for NatsConnector {
    type Connection = NatsConnection<TcpStream>;

    async fn connect(&self, config: &Config) -> Result<Self::Connection, TransportError> {
        let addrs = parse_servers(&config.server_urls)?;
        let mut last_error = None;

        for addr in &addrs {
            let stream = match TcpStream::connect(addr.as_str()).await {
                Ok(stream) => stream,
                Err(error) => {
                    debug!(server = %addr, %error, "connect attempt failed");
                    last_error = Some(error);
                    continue;
                }
            };

            match NatsConnection::handshake(stream, &config.connection_name()).await {
                Ok(connection) => {
                    info!(
                        server = %addr,
                        server_id = %connection.info.server_id,
                        version = %connection.info.version,
                        "connected"
                    );
                    return Ok(connection);
                }
                Err(error) => {
                    debug!(server = %addr, %error, "handshake failed");
                    last_error = Some(io::Error::other(error));
                }
            }
        }

        Err(TransportError::Connect {
            addrs: addrs.join(","),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no servers given")),
        })
    }
}

/// Split a comma-separated server list into `host:port` strings.
pub fn parse_servers(list: &str) -> Result<Vec<String>, TransportError> {
    let addrs = list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_server)
        .collect::<Result<Vec<_>, _>>()?;

    if addrs.is_empty() {
        return Err(TransportError::InvalidAddress(list.to_string()));
    }
    Ok(addrs)
}

fn parse_server(entry: &str) -> Result<String, TransportError> {
    let invalid = || TransportError::InvalidAddress(entry.to_string());

    let rest = match entry.split_once("://") {
        Some(("nats", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => entry,
    };
    let host_port = rest.trim_end_matches('/');
    if host_port.is_empty() || host_port.contains('/') {
        return Err(invalid());
    }

    match host_port.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            port.parse::<u16>().map_err(|_| invalid())?;
            Ok(host_port.to_string())
        }
        Some(_) => Err(invalid()),
        None => Ok(format!("{host_port}:{DEFAULT_PORT}")),
    }
}

/// An established session. Generic over the byte stream so tests can use
/// in-memory pipes.
pub struct NatsConnection<S> {
    writer: SharedWriter<S>,
    events: mpsc::UnboundedReceiver<Event>,
    reader_task: JoinHandle<()>,
    info: ServerInfo,
}

impl<S> NatsConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Run the `INFO`/`CONNECT`/`PING`/`PONG` exchange on a fresh stream.
    pub async fn handshake(stream: S, name: &str) -> Result<Self, TransportError> {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let info = match read_op(&mut reader).await? {
            Some(ServerOp::Info(json)) => serde_json::from_str::<ServerInfo>(&json)
                .map_err(|err| TransportError::protocol(format!("bad INFO block: {err}")))?,
            Some(other) => {
                return Err(TransportError::protocol(format!(
                    "expected INFO, got {other:?}"
                )));
            }
            None => return Err(TransportError::Closed),
        };

        let options = ConnectOptions {
            verbose: false,
            pedantic: false,
            name,
            lang: "rust",
            version: env!("CARGO_PKG_VERSION"),
            protocol: 1,
            headers: false,
        };
        let encoded = serde_json::to_string(&options)
            .map_err(|err| TransportError::protocol(format!("encode CONNECT: {err}")))?;
        writer
            .write_all(format!("CONNECT {encoded}\r\nPING\r\n").as_bytes())
            .await?;
        writer.flush().await?;

        // The first PONG confirms the server accepted CONNECT.
        loop {
            match read_op(&mut reader).await? {
                Some(ServerOp::Pong) => break,
                Some(ServerOp::Ping) => {
                    writer.write_all(b"PONG\r\n").await?;
                    writer.flush().await?;
                }
                Some(ServerOp::Err(message)) => return Err(TransportError::Server(message)),
                Some(ServerOp::Ok | ServerOp::Info(_)) => {}
                Some(ServerOp::Msg { .. }) => {
                    return Err(TransportError::protocol("MSG before subscribing"));
                }
                None => return Err(TransportError::Closed),
            }
        }

        let writer = Arc::new(Mutex::new(writer));
        let (events_tx, events) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(run_reader(reader, Arc::clone(&writer), events_tx));

        Ok(Self {
            writer,
            events,
            reader_task,
            info,
        })
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// Surface any error the server reported since the last call.
    fn check_events(&mut self) -> Result<(), TransportError> {
        while let Ok(event) = self.events.try_recv() {
            match event {
                Event::Failed(error) => return Err(error),
                Event::Pong => {}
                Event::Message(message) => {
                    debug!(subject = %message.subject, "dropping unsolicited message");
                }
            }
        }
        Ok(())
    }

    async fn send(&self, bytes: &[&[u8]]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        for chunk in bytes {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

impl<S> Drop for NatsConnection<S> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl<S> Connection for NatsConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Subscription = NatsSubscription<S>;

    async fn publish(&mut self, subject: &str, payload: &[u8]) -> Result<(), TransportError> {
        validate_subject(subject)?;
        if payload.len() > self.info.max_payload {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: self.info.max_payload,
            });
        }
        self.check_events()?;

        let header = format!("PUB {subject} {}\r\n", payload.len());
        self.send(&[header.as_bytes(), payload, b"\r\n".as_slice()]).await
    }

    async fn subscribe(mut self, subject: &str) -> Result<Self::Subscription, TransportError> {
        validate_subject(subject)?;
        self.check_events()?;

        let command = format!("SUB {subject} {SUBSCRIPTION_ID}\r\n");
        self.send(&[command.as_bytes()]).await?;
        Ok(NatsSubscription { connection: self })
    }

    async fn close(mut self) -> Result<(), TransportError> {
        self.send(&[b"PING\r\n".as_slice()]).await?;

        loop {
            match self.events.recv().await {
                Some(Event::Pong) => break,
                Some(Event::Failed(error)) => return Err(error),
                Some(Event::Message(_)) => {}
                None => return Err(TransportError::Closed),
            }
        }

        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            warn!(?error, "failed to shut down connection cleanly");
        }
        Ok(())
    }
}

pub struct NatsSubscription<S> {
    connection: NatsConnection<S>,
}

impl<S> Subscription for NatsSubscription<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn next_message(&mut self) -> Result<Message, TransportError> {
        loop {
            match self.connection.events.recv().await {
                Some(Event::Message(message)) => return Ok(message),
                Some(Event::Pong) => {}
                Some(Event::Failed(error)) => return Err(error),
                None => return Err(TransportError::Closed),
            }
        }
    }
}

fn validate_subject(subject: &str) -> Result<(), TransportError> {
    if subject.is_empty() || subject.contains(char::is_whitespace) {
        return Err(TransportError::protocol(format!("invalid subject '{subject}'")));
    }
    Ok(())
}

async fn run_reader<S>(
    mut reader: BufReader<ReadHalf<S>>,
    writer: SharedWriter<S>,
    events: mpsc::UnboundedSender<Event>,
) where
    S: AsyncRead + AsyncWrite,
{
    let result = pump_events(&mut reader, &writer, &events).await;
    let error = match result {
        Ok(()) => TransportError::Closed,
        Err(error) => error,
    };
    // The receiver is gone once the connection is dropped; nothing left to tell.
    let _ = events.send(Event::Failed(error));
}

async fn pump_events<S>(
    reader: &mut BufReader<ReadHalf<S>>,
    writer: &SharedWriter<S>,
    events: &mpsc::UnboundedSender<Event>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite,
{
    while let Some(op) = read_op(reader).await? {
        let event = match op {
            ServerOp::Msg { subject, sid, len } => {
                let payload = read_payload(reader, len).await?;
                if sid != SUBSCRIPTION_ID {
                    debug!(sid, "ignoring message for unknown subscription");
                    continue;
                }
                Event::Message(Message { subject, payload })
            }
            ServerOp::Ping => {
                let mut writer = writer.lock().await;
                writer.write_all(b"PONG\r\n").await?;
                writer.flush().await?;
                continue;
            }
            ServerOp::Pong => Event::Pong,
            ServerOp::Err(message) => return Err(TransportError::Server(message)),
            ServerOp::Ok | ServerOp::Info(_) => continue,
        };

        if events.send(event).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

async fn read_op<R>(reader: &mut R) -> Result<Option<ServerOp>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let bytes = (&mut *reader)
            .take(MAX_CONTROL_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if bytes == 0 {
            return Ok(None);
        }
        if bytes == MAX_CONTROL_LINE && line.last() != Some(&b'\n') {
            return Err(TransportError::protocol(format!(
                "control line longer than {MAX_CONTROL_LINE} bytes"
            )));
        }

        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }
        return parse_op(trimmed).map(Some);
    }
}

async fn read_payload<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let framed = len
        .checked_add(2)
        .ok_or_else(|| TransportError::protocol(format!("MSG size {len} out of range")))?;
    let mut payload = vec![0; framed];
    reader.read_exact(&mut payload).await?;
    if !payload.ends_with(b"\r\n") {
        return Err(TransportError::protocol("message payload not terminated by CRLF"));
    }
    payload.truncate(len);
    Ok(payload)
}

fn parse_op(line: &str) -> Result<ServerOp, TransportError> {
    let (name, rest) = line.split_once([' ', '\t']).unwrap_or((line, ""));
    let rest = rest.trim();

    match name.to_ascii_uppercase().as_str() {
        "INFO" => Ok(ServerOp::Info(rest.to_string())),
        "MSG" => parse_msg(rest),
        "PING" => Ok(ServerOp::Ping),
        "PONG" => Ok(ServerOp::Pong),
        "+OK" => Ok(ServerOp::Ok),
        "-ERR" => Ok(ServerOp::Err(rest.trim_matches('\'').to_string())),
        _ => Err(TransportError::protocol(format!("unknown operation '{line}'"))),
    }
}

fn parse_msg(args: &str) -> Result<ServerOp, TransportError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    // MSG <subject> <sid> [reply-to] <#bytes>
    let (subject, sid, len) = match parts.as_slice() {
        [subject, sid, len] | [subject, sid, _, len] => (subject, sid, len),
        _ => return Err(TransportError::protocol(format!("malformed MSG '{args}'"))),
    };

    let sid = sid
        .parse()
        .map_err(|_| TransportError::protocol(format!("bad MSG sid '{sid}'")))?;
    let len = len
        .parse()
        .map_err(|_| TransportError::protocol(format!("bad MSG size '{len}'")))?;

    Ok(ServerOp::Msg {
        subject: (*subject).to_string(),
        sid,
        len,
    })
}
