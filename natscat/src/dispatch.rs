use std::future::Future;

use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader, BufWriter},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::{Config, Mode},
    error::CatError,
    framing::{self, Framing},
    transport::{Connection, Connector, Subscription},
};

/// What a run moved: messages published or received, and their payload bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub messages: usize,
    pub bytes: usize,
}

impl Report {
    fn record(&mut self, payload: &[u8]) {
        self.messages += 1;
        self.bytes += payload.len();
    }
}

/// Run the mode selected in `config` until it completes.
///
/// Publish modes return once everything is accepted by the server. Listen
/// mode returns when `shutdown` resolves, or fails when the transport does.
pub async fn run_until<C, R, W, F>(
    config: &Config,
    connector: &C,
    stdin: R,
    stdout: W,
    shutdown: F,
) -> Result<Report, CatError>
where
    C: Connector,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let connection = connector.connect(config).await?;
    let framing = Framing::from_buffered(config.buffered);

    match config.mode {
        Mode::Listen => listen(connection, config, framing, stdout, shutdown).await,
        Mode::PublishExplicit => publish_explicit(connection, config).await,
        Mode::PublishBufferedStdin => publish_lines(connection, config, stdin).await,
        Mode::PublishRawStdin => publish_raw(connection, config, stdin).await,
    }
}

/// [`run_until`] with Ctrl-C as the listen shutdown signal.
pub async fn run_until_ctrl_c<C, R, W>(
    config: &Config,
    connector: &C,
    stdin: R,
    stdout: W,
) -> Result<Report, CatError>
where
    C: Connector,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    run_until(config, connector, stdin, stdout, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    })
    .await
}

async fn listen<T, W, F>(
    connection: T,
    config: &Config,
    framing: Framing,
    stdout: W,
    shutdown: F,
) -> Result<Report, CatError>
where
    T: Connection,
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    info!(subject = %config.subject, buffered = config.buffered, "listening");

    let mut subscription = connection.subscribe(&config.subject).await?;
    let mut stdout = BufWriter::new(stdout);
    let mut report = Report::default();
    tokio::pin!(shutdown);

    // This loop is the only writer to stdout, one message at a time.
    loop {
        select! {
            biased;
            _ = &mut shutdown => {
                info!(messages = report.messages, "listener shutting down");
                break;
            }
            message = subscription.next_message() => {
                let message = message?;
                debug!(
                    subject = %message.subject,
                    payload = %String::from_utf8_lossy(&message.payload),
                    "received"
                );
                framing.write_payload(&mut stdout, &message.payload).await?;
                report.record(&message.payload);
            }
        }
    }

    Ok(report)
}

async fn publish_explicit<T>(mut connection: T, config: &Config) -> Result<Report, CatError>
where
    T: Connection,
{
    let message = config.explicit_message.as_deref().unwrap_or_default();
    let mut report = Report::default();

    connection.publish(&config.subject, message.as_bytes()).await?;
    report.record(message.as_bytes());
    connection.close().await?;

    info!(subject = %config.subject, payload = message, "wrote message");
    Ok(report)
}

async fn publish_lines<T, R>(
    mut connection: T,
    config: &Config,
    stdin: R,
) -> Result<Report, CatError>
where
    T: Connection,
    R: AsyncRead + Unpin,
{
    let mut stdin = BufReader::new(stdin);
    let mut report = Report::default();

    while let Some(line) = framing::read_line(&mut stdin).await? {
        connection.publish(&config.subject, &line).await?;
        report.record(&line);
    }
    connection.close().await?;

    info!(subject = %config.subject, lines = report.messages, "wrote lines");
    Ok(report)
}

async fn publish_raw<T, R>(
    mut connection: T,
    config: &Config,
    mut stdin: R,
) -> Result<Report, CatError>
where
    T: Connection,
    R: AsyncRead + Unpin,
{
    let payload = framing::read_all(&mut stdin).await?;
    let mut report = Report::default();

    connection.publish(&config.subject, &payload).await?;
    report.record(&payload);
    connection.close().await?;

    info!(subject = %config.subject, bytes = report.bytes, "wrote bytes");
    Ok(report)
}
