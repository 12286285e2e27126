use std::{
    fmt,
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};

use crate::{entity, Codec, Envelope, QueueError, Result, TransportOptions};

mod acker;
mod dyn_channel;

use self::acker::DynAcker;
pub use self::{acker::Acker, dyn_channel::DynChannel};

/// AMQP-style queue primitives on top of a backend that only knows how to be polled.
///
/// The outer consume/retry loop is written against this trait alone. Queues are addressed by
/// their logical name; implementations normalize it and create the backend queue on demand.
pub trait VirtualChannel: Send + Sync {
    /// Fetches at most one message.
    ///
    /// `Ok(None)` means nothing is available right now. It is the normal outcome of polling an
    /// exhausted queue and callers are expected to back off and try again. The message is not
    /// removed from the backend until the returned [`Delivery`] is acked.
    fn get(&self, queue: &str) -> impl Future<Output = Result<Option<Delivery>>> + Send;

    fn put(&self, queue: &str, envelope: &Envelope) -> impl Future<Output = Result<()>> + Send;

    fn put_serde_json<P: Serialize + Sync>(
        &self,
        queue: &str,
        payload: &P,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let envelope = serde_json::to_value(payload)?;
            self.put(queue, &envelope).await
        }
    }

    /// Approximate number of messages waiting in the queue. Never treat it as exact.
    fn size(&self, queue: &str) -> impl Future<Output = Result<usize>> + Send;

    /// Empties the queue and returns the approximate count observed just before doing so.
    fn purge(&self, queue: &str) -> impl Future<Output = Result<usize>> + Send;

    /// Closes the channel and releases its backend client, if one was ever opened.
    ///
    /// Closing an already closed channel does nothing.
    fn close(&mut self) -> Result<()>;

    /// The backend-legal identifier for `name`.
    fn entity_name(&self, name: &str) -> String {
        entity::entity_name(name)
    }

    fn into_dyn(self) -> DynChannel
    where
        Self: Sized + 'static,
    {
        DynChannel::new(self)
    }
}

/// A backend queue, as resolved for a single operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueHandle {
    /// Normalized queue name.
    pub name: String,
    /// Where the backend can be asked about this queue (the queue URL for SQS).
    pub url: String,
}

/// A message received through [`VirtualChannel::get`].
pub struct Delivery {
    payload: Envelope,
    acker: DynAcker,
}

impl Delivery {
    #[doc(hidden)]
    pub fn new(payload: Envelope, acker: impl Acker + 'static) -> Self {
        Self {
            payload,
            acker: DynAcker::new(acker),
        }
    }

    /// Acknowledges the successful processing of this [`Delivery`], deleting the message.
    ///
    /// On failure, `self` is returned alongside the error to allow retrying.
    pub async fn ack(mut self) -> Result<(), (QueueError, Self)> {
        self.acker.ack().await.map_err(|e| (e, self))
    }

    /// Returns the message to the queue right away instead of waiting for its visibility
    /// timeout to run out.
    ///
    /// On failure, `self` is returned alongside the error to allow retrying.
    pub async fn nack(mut self) -> Result<(), (QueueError, Self)> {
        self.acker.nack().await.map_err(|e| (e, self))
    }

    /// Keeps the message hidden from other consumers for `duration`, starting now.
    pub async fn set_ack_deadline(&mut self, duration: Duration) -> Result<()> {
        self.acker.set_ack_deadline(duration).await
    }

    pub fn payload(&self) -> &Envelope {
        &self.payload
    }

    pub fn into_payload(self) -> Envelope {
        self.payload
    }

    pub fn payload_serde_json<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload).map_err(Into::into)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Backend-independent part of a channel: the close state, the cached visibility timeout and
/// the codec.
pub(crate) struct ChannelState {
    options: TransportOptions,
    codec: Arc<dyn Codec>,
    visibility_timeout: OnceLock<Option<u32>>,
    closed: bool,
}

impl ChannelState {
    pub(crate) fn new(options: TransportOptions, codec: Arc<dyn Codec>) -> Self {
        Self {
            options,
            codec,
            visibility_timeout: OnceLock::new(),
            closed: false,
        }
    }

    pub(crate) fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub(crate) fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(QueueError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn visibility_timeout(&self) -> Option<u32> {
        *self
            .visibility_timeout
            .get_or_init(|| self.options.visibility_timeout)
    }

    /// Prefixes and normalizes a logical queue name.
    pub(crate) fn queue_name(&self, queue: &str) -> String {
        match &self.options.queue_name_prefix {
            Some(prefix) => entity::entity_name(&format!("{prefix}{queue}")),
            None => entity::entity_name(queue),
        }
    }

    /// Marks the channel closed. Returns `false` if it already was.
    pub(crate) fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }
}

/// Filters the outcome of releasing a backend client on close.
///
/// A client that has no teardown to speak of is not a failure; anything else is.
pub(crate) fn release_outcome(outcome: Result<()>) -> Result<()> {
    match outcome {
        Err(QueueError::TeardownUnsupported) => {
            tracing::debug!("backend client has no teardown, dropping it");
            Ok(())
        }
        other => other,
    }
}
