//! # vchannel
//!
//! vchannel lets a client written against AMQP-style queue primitives (put, get, size, purge)
//! run unchanged on top of pull-based, at-least-once queue services that only offer
//! visibility timeouts: no push delivery, no exchanges, and strict rules on queue names.
//!
//! Every backend is exposed as a [`VirtualChannel`]. A channel owns exactly one lazily created
//! backend client, resolves (creating if absent) the backend queue for every operation, and
//! reports failures through [`QueueError`], whose [`ErrorKind`] tells an outer reconnect loop
//! whether the connection or only the current operation is broken.
//!
//! ## Cargo Features
//!
//! Each backend is enabled with its associated cargo feature. All backends are enabled by default.
//!
//! * In-memory broker (`in_memory`)
//! * Amazon SQS (`sqs`)
//!
//! ## How to Use vchannel
//!
//! Each backend has a [`Transport`] with its own configuration type, taken when constructing the
//! [`ChannelBuilder`]:
//!
//! ```no_run
//! # async {
//! use vchannel::{
//!     backends::sqs::SqsTransport, ConnectionInfo, Transport, TransportOptions, VirtualChannel,
//! };
//!
//! let conn = ConnectionInfo {
//!     userid: Some("AKIA...".to_owned()),
//!     password: Some("secret".to_owned()),
//!     transport_options: TransportOptions {
//!         visibility_timeout: Some(60),
//!         region: Some("eu-west-1".to_owned()),
//!         ..Default::default()
//!     },
//! };
//!
//! let channel = SqsTransport::builder(conn).build();
//!
//! channel
//!     .put_serde_json("celery.tasks", &serde_json::json!({ "task": "add", "args": [1, 2] }))
//!     .await?;
//!
//! match channel.get("celery.tasks").await? {
//!     Some(delivery) => {
//!         println!("{}", delivery.payload());
//!         delivery.ack().await.map_err(|(e, _)| e)?;
//!     }
//!     // Nothing available right now: back off for `SqsTransport::INTERVAL` and poll again.
//!     None => {}
//! }
//! # anyhow::Ok(())
//! # };
//! ```
//!
//! ## Error classification
//!
//! Backend failures propagate unchanged in meaning. The outer layer decides what to do with them:
//!
//! ```no_run
//! # async {
//! # let channel: vchannel::backends::sqs::SqsChannel = todo!();
//! use vchannel::{backends::sqs::SqsTransport, Transport, VirtualChannel};
//!
//! if let Err(e) = channel.size("orders").await {
//!     if SqsTransport::is_connection_error(&e) {
//!         // drop the channel and build a fresh one
//!     } else if SqsTransport::is_channel_error(&e) {
//!         // this operation failed, the channel is still usable
//!     }
//! }
//! # };
//! ```
#![warn(unreachable_pub)]

use thiserror::Error;

#[macro_use]
mod macros;

pub mod backends;
pub mod builder;
mod channel;
pub mod codec;
pub mod connection;
pub mod entity;
pub mod transport;

pub use self::{
    builder::ChannelBuilder,
    channel::{Acker, Delivery, DynChannel, QueueHandle, VirtualChannel},
    codec::{Codec, Envelope, JsonCodec},
    connection::{ConnectionInfo, TransportOptions},
    entity::entity_name,
    transport::Transport,
};

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend could not be reached, or the request timed out on the wire.
    #[error("transport failure: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
    /// The backend answered, but with an error or a response the SDK could not make sense of.
    #[error("backend protocol failure: {0}")]
    Protocol(Box<dyn std::error::Error + Send + Sync>),

    #[error("(de)serialization error")]
    Serde(#[from] serde_json::Error),
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("backend client does not support teardown")]
    TeardownUnsupported,
    #[error("channel is closed")]
    ChannelClosed,

    #[error("a single delivery may only be ACKed or NACKed once")]
    CannotAckOrNackTwice,

    #[error("{0}")]
    Generic(Box<dyn std::error::Error + Send + Sync>),
}

/// Coarse classification of a [`QueueError`].
///
/// Transports declare which kinds invalidate the connection and which only fail the current
/// operation, see [`Transport::CONNECTION_ERRORS`] and [`Transport::CHANNEL_ERRORS`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Decode,
    Closed,
    Other,
}

impl QueueError {
    pub fn generic<E: 'static + std::error::Error + Send + Sync>(e: E) -> Self {
        Self::Generic(Box::new(e))
    }

    pub fn transport<E: 'static + std::error::Error + Send + Sync>(e: E) -> Self {
        Self::Transport(Box::new(e))
    }

    pub fn protocol<E: 'static + std::error::Error + Send + Sync>(e: E) -> Self {
        Self::Protocol(Box::new(e))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Serde(_) | Self::MalformedResponse(_) => ErrorKind::Decode,
            Self::ChannelClosed => ErrorKind::Closed,
            Self::TeardownUnsupported
            | Self::CannotAckOrNackTwice
            | Self::Generic(_) => ErrorKind::Other,
        }
    }
}
