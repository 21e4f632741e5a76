use clap::Parser;

pub const DEFAULT_SERVER: &str = "nats://127.0.0.1:4222";
pub const DEFAULT_CLIENT_ID: &str = "natscat";
pub const DEFAULT_CLUSTER_ID: &str = "test-cluster";

/// cat to/from a NATS subject.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "natscat",
    author,
    version,
    about,
    long_about = None,
    override_usage = "natscat [OPTIONS] --subject <SUBJECT> [MESSAGE]..."
)]
pub struct Cli {
    /// [Required] NATS subject ('*' and '>' wildcards only valid when listening)
    #[arg(short, long, default_value = "")]
    pub subject: String,

    /// Listen for messages
    #[arg(short, long)]
    pub listen: bool,

    /// Read/write messages in buffered mode, terminated by CR/LF
    #[arg(short, long)]
    pub buffered: bool,

    /// Message to publish
    #[arg(short, long, default_value = "")]
    pub message: String,

    /// NATS server URL(s), comma-separated
    #[arg(short = 'S', long, env = "NATS", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Client ID
    #[arg(
        short = 'c',
        long = "client_id",
        visible_alias = "cid",
        default_value = DEFAULT_CLIENT_ID
    )]
    pub client_id: String,

    /// Cluster ID
    #[arg(long = "cluster_id", default_value = DEFAULT_CLUSTER_ID)]
    pub cluster_id: String,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Message to publish, joined with spaces (ignored when listening)
    #[arg(value_name = "MESSAGE", trailing_var_arg = true)]
    pub args: Vec<String>,
}
