//! Seam between the dispatcher and the messaging system.
//!
//! The dispatcher only ever sees these traits, so tests can drive every mode
//! against an in-memory recorder while the binary uses [`nats::NatsConnector`].

pub mod nats;

use crate::{config::Config, error::TransportError};

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Opens a connection for one run.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Connection: Connection;

    async fn connect(&self, config: &Config) -> Result<Self::Connection, TransportError>;
}

/// An open session with the server. Dropping it releases the socket.
#[allow(async_fn_in_trait)]
pub trait Connection: Sized {
    type Subscription: Subscription;

    async fn publish(&mut self, subject: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Register interest in `subject`. The connection is handed over to the
    /// subscription, which owns it for the rest of the run.
    async fn subscribe(self, subject: &str) -> Result<Self::Subscription, TransportError>;

    /// Wait until the server has accepted everything published, then disconnect.
    async fn close(self) -> Result<(), TransportError>;
}

/// A live subscription. Messages come back in delivery order.
#[allow(async_fn_in_trait)]
pub trait Subscription {
    async fn next_message(&mut self) -> Result<Message, TransportError>;
}
