use crate::{cli::Cli, error::ConfigError};

const WILDCARDS: &[char] = &['*', '>'];

/// How a run moves bytes between stdio and the subject. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Listen,
    PublishExplicit,
    PublishBufferedStdin,
    PublishRawStdin,
}

/// Validated run configuration. Built once by [`Config::resolve`] and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub subject: String,
    pub server_urls: String,
    pub cluster_id: String,
    pub client_id: String,
    pub mode: Mode,
    pub explicit_message: Option<String>,
    pub buffered: bool,
    pub verbose: bool,
}

impl Config {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut buffered = cli.buffered;
        let mut message = cli.message.clone();

        // Trailing arguments are one complete line, never split further.
        if !cli.listen && !cli.args.is_empty() {
            message = cli.args.join(" ");
            buffered = true;
        }

        if cli.subject.is_empty() {
            return Err(ConfigError::MissingSubject);
        }

        if !cli.listen && cli.subject.contains(WILDCARDS) {
            return Err(ConfigError::WildcardPublish(cli.subject.clone()));
        }

        let mode = if cli.listen {
            Mode::Listen
        } else if !message.is_empty() {
            Mode::PublishExplicit
        } else if buffered {
            Mode::PublishBufferedStdin
        } else {
            Mode::PublishRawStdin
        };

        let explicit_message = (mode == Mode::PublishExplicit).then_some(message);

        Ok(Self {
            subject: cli.subject.clone(),
            server_urls: cli.server.clone(),
            cluster_id: cli.cluster_id.clone(),
            client_id: cli.client_id.clone(),
            mode,
            explicit_message,
            buffered,
            verbose: cli.verbose,
        })
    }

    /// Connection name announced to the server.
    pub fn connection_name(&self) -> String {
        format!("{}@{}", self.client_id, self.cluster_id)
    }
}
