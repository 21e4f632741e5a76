#![allow(dead_code)]

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use natscat::{
    cli::Cli,
    config::Config,
    error::TransportError,
    transport::{Connection, Connector, Message, Subscription},
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{Notify, broadcast, oneshot, watch},
    time::timeout,
};
use tracing::{debug, warn};

pub const WAIT: Duration = Duration::from_secs(3);

/// Resolve a config from command-line style arguments.
pub fn config(args: &[&str]) -> Config {
    let cli = Cli::try_parse_from(std::iter::once("natscat").chain(args.iter().copied()))
        .expect("valid command line");
    Config::resolve(&cli).expect("valid config")
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

/// Everything the dispatcher asked the transport to do.
#[derive(Debug, Default)]
pub struct Recorded {
    pub connects: usize,
    pub published: Vec<(String, Vec<u8>)>,
    pub subscribed: Option<String>,
    pub closed: bool,
}

pub enum Delivery {
    Message(Message),
    Fail,
}

/// In-memory transport that records publishes and replays scripted deliveries.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    recorded: Arc<std::sync::Mutex<Recorded>>,
    deliveries: Arc<std::sync::Mutex<VecDeque<Delivery>>>,
    exhausted: Arc<Notify>,
    fail_publish_at: Option<usize>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_publish_at(index: usize) -> Self {
        Self {
            fail_publish_at: Some(index),
            ..Self::default()
        }
    }

    pub fn deliver(&self, subject: &str, payload: &[u8]) {
        self.lock_deliveries().push_back(Delivery::Message(Message {
            subject: subject.to_string(),
            payload: payload.to_vec(),
        }));
    }

    pub fn deliver_failure(&self) {
        self.lock_deliveries().push_back(Delivery::Fail);
    }

    /// Resolves once every scripted delivery has been handed out.
    pub async fn drained(&self) {
        self.exhausted.notified().await;
    }

    pub fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().expect("recorder lock")
    }

    fn lock_deliveries(&self) -> std::sync::MutexGuard<'_, VecDeque<Delivery>> {
        self.deliveries.lock().expect("deliveries lock")
    }
}

impl Connector for RecordingConnector {
    type Connection = RecordingConnection;

    async fn connect(&self, _config: &Config) -> Result<Self::Connection, TransportError> {
        self.recorded().connects += 1;
        Ok(RecordingConnection {
            connector: self.clone(),
        })
    }
}

pub struct RecordingConnection {
    connector: RecordingConnector,
}

impl Connection for RecordingConnection {
    type Subscription = RecordingSubscription;

    async fn publish(&mut self, subject: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut recorded = self.connector.recorded();
        if self.connector.fail_publish_at == Some(recorded.published.len()) {
            return Err(TransportError::Server("Permissions Violation".into()));
        }
        recorded.published.push((subject.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn subscribe(self, subject: &str) -> Result<Self::Subscription, TransportError> {
        self.connector.recorded().subscribed = Some(subject.to_string());
        Ok(RecordingSubscription {
            connector: self.connector,
        })
    }

    async fn close(self) -> Result<(), TransportError> {
        self.connector.recorded().closed = true;
        Ok(())
    }
}

pub struct RecordingSubscription {
    connector: RecordingConnector,
}

impl Subscription for RecordingSubscription {
    async fn next_message(&mut self) -> Result<Message, TransportError> {
        let next = self.connector.lock_deliveries().pop_front();
        match next {
            Some(Delivery::Message(message)) => Ok(message),
            Some(Delivery::Fail) => Err(TransportError::Closed),
            None => {
                self.connector.exhausted.notify_one();
                std::future::pending().await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-process NATS protocol server
// ---------------------------------------------------------------------------

/// Speaks enough of the NATS client protocol for natscat: INFO, CONNECT,
/// PING/PONG, PUB, SUB and MSG with `*`/`>` wildcard matching.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
}

struct ServerState {
    published: broadcast::Sender<(String, Vec<u8>)>,
    subscriptions: watch::Sender<usize>,
    next_client: AtomicU64,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (published, _) = broadcast::channel(128);
        let (subscriptions, _) = watch::channel(0);
        let state = Arc::new(ServerState {
            published,
            subscriptions,
            next_client: AtomicU64::new(1),
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => spawn_client(stream, peer, &accept_state),
                        Err(err) => warn!(error = ?err, "failed to accept connection"),
                    },
                }
            }
        });

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn url(&self) -> String {
        format!("nats://{}", self.addr)
    }

    /// Wait until at least `count` SUB commands have been processed.
    pub async fn wait_for_subscriptions(&self, count: usize) -> Result<()> {
        let mut rx = self.state.subscriptions.subscribe();
        timeout(WAIT, rx.wait_for(|subs| *subs >= count))
            .await
            .context("timed out waiting for subscribers")?
            .context("server stopped")?;
        Ok(())
    }

    /// Receiver that observes every PUB the server accepts.
    pub fn published(&self) -> broadcast::Receiver<(String, Vec<u8>)> {
        self.state.published.subscribe()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn spawn_client(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_client(stream, state).await {
            debug!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_client(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let id = state.next_client.fetch_add(1, Ordering::Relaxed);
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut inbox = state.published.subscribe();
    let mut subs: Vec<(String, String)> = Vec::new();

    let info = format!(
        "INFO {{\"server_id\":\"test-{id}\",\"version\":\"2.10.0\",\"max_payload\":1048576}}\r\n"
    );
    writer.write_all(info.as_bytes()).await?;

    // Kept across iterations so a read cancelled by a delivery loses nothing.
    let mut line = Vec::new();
    loop {
        select! {
            read = reader.read_until(b'\n', &mut line) => {
                if read? == 0 {
                    break;
                }
                let op = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                line.clear();
                if !op.is_empty() {
                    handle_op(&op, &mut reader, &mut writer, &state, &mut subs).await?;
                }
            }
            published = inbox.recv() => {
                let Ok((subject, payload)) = published else { break };
                for (pattern, sid) in &subs {
                    if subject_matches(pattern, &subject) {
                        let header = format!("MSG {subject} {sid} {}\r\n", payload.len());
                        writer.write_all(header.as_bytes()).await?;
                        writer.write_all(&payload).await?;
                        writer.write_all(b"\r\n").await?;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_op<R, W>(
    line: &str,
    reader: &mut R,
    writer: &mut W,
    state: &ServerState,
    subs: &mut Vec<(String, String)>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut parts = line.split_whitespace();
    match parts.next().map(str::to_ascii_uppercase).as_deref() {
        Some("CONNECT") => {}
        Some("PING") => writer.write_all(b"PONG\r\n").await?,
        Some("PUB") => {
            let args: Vec<&str> = parts.collect();
            let (subject, len) = match args.as_slice() {
                [subject, len] | [subject, _, len] => (subject.to_string(), len.parse::<usize>()?),
                _ => anyhow::bail!("malformed PUB '{line}'"),
            };
            let mut payload = vec![0; len + 2];
            reader.read_exact(&mut payload).await?;
            payload.truncate(len);
            let _ = state.published.send((subject, payload));
        }
        Some("SUB") => {
            let args: Vec<&str> = parts.collect();
            let (subject, sid) = match args.as_slice() {
                [subject, sid] | [subject, _, sid] => (subject.to_string(), sid.to_string()),
                _ => anyhow::bail!("malformed SUB '{line}'"),
            };
            subs.push((subject, sid));
            state.subscriptions.send_modify(|count| *count += 1);
        }
        _ => {
            writer.write_all(b"-ERR 'Unknown Protocol Operation'\r\n").await?;
        }
    }
    Ok(())
}

/// NATS subject matching: `*` matches one token, `>` matches the rest.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut tokens = subject.split('.');
    for expected in pattern.split('.') {
        match (expected, tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (literal, Some(token)) if literal == token => {}
            _ => return false,
        }
    }
    tokens.next().is_none()
}

/// Read exactly `len` bytes from a listener's stdout, or fail after [`WAIT`].
pub async fn read_output<R>(reader: &mut R, len: usize) -> Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0; len];
    timeout(WAIT, reader.read_exact(&mut buf))
        .await
        .context("timed out waiting for output")??;
    Ok(buf)
}
