//! An in-process broker with the same shape as a visibility-timeout cloud queue.
//!
//! Queues are created on demand, a received message stays hidden for the queue's visibility
//! timeout unless it is acked, and sizes only count messages that are currently visible. The
//! broker can also be taken offline to rehearse connection failures.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{sync::OnceCell, time::Instant};

use crate::{
    channel::{release_outcome, ChannelState},
    Acker, Codec, Delivery, Envelope, ErrorKind, QueueError, QueueHandle, Result, Transport,
    TransportOptions,
};

/// Visibility timeout used for queues created without one, same as SQS.
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
enum MemoryError {
    #[error("broker is offline")]
    Offline,
    #[error("client has been shut down")]
    ClientShutDown,
    #[error("queue `{0}` does not exist")]
    NoSuchQueue(String),
    #[error("receipt handle {0} does not belong to an in-flight message")]
    NotInFlight(u64),
    #[error("visibility deadline of {0:?} is out of range")]
    DeadlineOutOfRange(Duration),
}

impl From<MemoryError> for QueueError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Offline | MemoryError::ClientShutDown => QueueError::transport(e),
            MemoryError::NoSuchQueue(_) | MemoryError::NotInFlight(_) => QueueError::protocol(e),
            MemoryError::DeadlineOutOfRange(_) => QueueError::generic(e),
        }
    }
}

struct StoredMessage {
    body: String,
    visible_at: Instant,
    receipt: Option<u64>,
}

struct MemoryQueue {
    visibility_timeout: Duration,
    messages: VecDeque<StoredMessage>,
}

impl MemoryQueue {
    fn new(visibility_timeout: Option<u32>) -> Self {
        Self {
            visibility_timeout: visibility_timeout
                .map(|secs| Duration::from_secs(secs.into()))
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT),
            messages: VecDeque::new(),
        }
    }

    fn in_flight(&self, receipt: u64) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.receipt == Some(receipt))
    }
}

struct BrokerInner {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    online: AtomicBool,
    teardown_supported: bool,
    clients_opened: AtomicUsize,
    next_receipt: AtomicU64,
}

/// Shared state behind every [`MemoryChannel`] built from it. Cloning is cheap.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_teardown(true)
    }

    /// A broker whose clients have no teardown; closing a channel then just drops its client.
    pub fn without_teardown() -> Self {
        Self::with_teardown(false)
    }

    fn with_teardown(teardown_supported: bool) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: Mutex::new(HashMap::new()),
                online: AtomicBool::new(true),
                teardown_supported,
                clients_opened: AtomicUsize::new(0),
                next_receipt: AtomicU64::new(1),
            }),
        }
    }

    /// Number of clients ever opened against this broker.
    pub fn clients_opened(&self) -> usize {
        self.inner.clients_opened.load(Ordering::SeqCst)
    }

    /// While offline every call fails with a transport error, as if the network were gone.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// Stores `body` verbatim in the queue named `queue`, bypassing any codec. The name is used
    /// as given, without normalization.
    pub fn send_raw(&self, queue: &str, body: impl Into<String>) -> Result<()> {
        self.check_online()?;
        self.queues()
            .entry(queue.to_owned())
            .or_insert_with(|| MemoryQueue::new(None))
            .messages
            .push_back(StoredMessage {
                body: body.into(),
                visible_at: Instant::now(),
                receipt: None,
            });
        Ok(())
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, MemoryQueue>> {
        self.inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), MemoryError> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryError::Offline)
        }
    }

    fn connect(&self) -> Result<MemoryClient> {
        self.check_online()?;
        let n = self.inner.clients_opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(clients_opened = n, "memory broker: client opened");
        Ok(MemoryClient {
            broker: self.clone(),
            shut_down: AtomicBool::new(false),
        })
    }

    fn with_queue<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut MemoryQueue) -> Result<T, MemoryError>,
    ) -> Result<T> {
        self.check_online()?;
        let mut queues = self.queues();
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| MemoryError::NoSuchQueue(name.to_owned()))?;
        f(queue).map_err(Into::into)
    }

    fn delete(&self, name: &str, receipt: u64) -> Result<()> {
        // Deleting a message that is already gone succeeds, as it does on SQS.
        self.with_queue(name, |q| {
            if let Some(i) = q.in_flight(receipt) {
                q.messages.remove(i);
            }
            Ok(())
        })
    }

    fn change_visibility(&self, name: &str, receipt: u64, timeout: Duration) -> Result<()> {
        self.with_queue(name, |q| {
            let visible_at = Instant::now()
                .checked_add(timeout)
                .ok_or(MemoryError::DeadlineOutOfRange(timeout))?;
            let i = q.in_flight(receipt).ok_or(MemoryError::NotInFlight(receipt))?;
            let msg = &mut q.messages[i];
            msg.visible_at = visible_at;
            if timeout.is_zero() {
                msg.receipt = None;
            }
            Ok(())
        })
    }
}

/// A connection to a [`MemoryBroker`], owned by exactly one channel.
pub(crate) struct MemoryClient {
    broker: MemoryBroker,
    shut_down: AtomicBool,
}

impl MemoryClient {
    fn check(&self) -> Result<(), MemoryError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MemoryError::ClientShutDown);
        }
        self.broker.check_online()
    }

    fn create_queue(&self, name: &str, visibility_timeout: Option<u32>) -> Result<QueueHandle> {
        self.check()?;
        self.broker
            .queues()
            .entry(name.to_owned())
            .or_insert_with(|| MemoryQueue::new(visibility_timeout));
        Ok(QueueHandle {
            name: name.to_owned(),
            url: format!("memory:///{name}"),
        })
    }

    fn receive(&self, name: &str) -> Result<Option<(u64, String)>> {
        self.check()?;
        let receipt = self.broker.inner.next_receipt.fetch_add(1, Ordering::SeqCst);
        self.broker.with_queue(name, |q| {
            let now = Instant::now();
            let hide_until = now + q.visibility_timeout;
            Ok(q.messages
                .iter_mut()
                .find(|m| m.visible_at <= now)
                .map(|m| {
                    m.visible_at = hide_until;
                    m.receipt = Some(receipt);
                    (receipt, m.body.clone())
                }))
        })
    }

    fn send(&self, name: &str, body: String) -> Result<()> {
        self.check()?;
        self.broker.with_queue(name, |q| {
            q.messages.push_back(StoredMessage {
                body,
                visible_at: Instant::now(),
                receipt: None,
            });
            Ok(())
        })
    }

    fn count(&self, name: &str) -> Result<usize> {
        self.check()?;
        self.broker.with_queue(name, |q| {
            let now = Instant::now();
            Ok(q.messages.iter().filter(|m| m.visible_at <= now).count())
        })
    }

    fn clear(&self, name: &str) -> Result<()> {
        self.check()?;
        self.broker.with_queue(name, |q| {
            q.messages.clear();
            Ok(())
        })
    }

    fn shutdown(&self) -> Result<()> {
        if !self.broker.inner.teardown_supported {
            return Err(QueueError::TeardownUnsupported);
        }
        self.check()?;
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryConfig {
    pub broker: MemoryBroker,
    pub transport_options: TransportOptions,
}

pub struct MemoryTransport;

impl Transport for MemoryTransport {
    type Config = MemoryConfig;
    type Channel = MemoryChannel;

    const CONNECTION_ERRORS: &'static [ErrorKind] = &[ErrorKind::Transport, ErrorKind::Protocol];
    const CHANNEL_ERRORS: &'static [ErrorKind] = &[ErrorKind::Decode];

    fn create_channel(config: MemoryConfig, codec: Arc<dyn Codec>) -> MemoryChannel {
        MemoryChannel {
            state: ChannelState::new(config.transport_options, codec),
            broker: config.broker,
            client: OnceCell::new(),
        }
    }
}

pub struct MemoryChannel {
    state: ChannelState,
    broker: MemoryBroker,
    client: OnceCell<MemoryClient>,
}

impl MemoryChannel {
    /// The channel's client, connecting on first use.
    pub(crate) async fn client(&self) -> Result<&MemoryClient> {
        self.state.ensure_open()?;
        self.client
            .get_or_try_init(|| async { self.broker.connect() })
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    pub fn visibility_timeout(&self) -> Option<u32> {
        self.state.visibility_timeout()
    }

    pub async fn resolve_queue(&self, queue: &str) -> Result<QueueHandle> {
        let name = self.state.queue_name(queue);
        let client = self.client().await?;
        tracing::trace!(queue, name = %name, "memory: resolving queue");
        client.create_queue(&name, self.state.visibility_timeout())
    }

    pub async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let handle = self.resolve_queue(queue).await?;
        let client = self.client().await?;
        let Some((receipt, body)) = client.receive(&handle.name)? else {
            tracing::trace!(queue = %handle.name, "memory: queue empty");
            return Ok(None);
        };

        let payload = self.state.codec().decode(&body)?;
        Ok(Some(Delivery::new(
            payload,
            MemoryAcker {
                broker: self.broker.clone(),
                queue: handle.name,
                receipt,
            },
        )))
    }

    pub async fn put(&self, queue: &str, envelope: &Envelope) -> Result<()> {
        let handle = self.resolve_queue(queue).await?;
        let body = self.state.codec().encode(envelope)?;
        self.client().await?.send(&handle.name, body)
    }

    pub async fn size(&self, queue: &str) -> Result<usize> {
        let handle = self.resolve_queue(queue).await?;
        self.client().await?.count(&handle.name)
    }

    pub async fn purge(&self, queue: &str) -> Result<usize> {
        let handle = self.resolve_queue(queue).await?;
        let client = self.client().await?;
        let size = client.count(&handle.name)?;
        client.clear(&handle.name)?;
        Ok(size)
    }

    pub fn close(&mut self) -> Result<()> {
        if !self.state.close() {
            return Ok(());
        }
        tracing::debug!("memory: channel closed");
        match self.client.take() {
            Some(client) => release_outcome(client.shutdown()),
            None => Ok(()),
        }
    }
}

impl_virtual_channel!(MemoryChannel);

struct MemoryAcker {
    broker: MemoryBroker,
    queue: String,
    receipt: u64,
}

impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<()> {
        self.broker.delete(&self.queue, self.receipt)
    }

    async fn nack(&mut self) -> Result<()> {
        self.broker
            .change_visibility(&self.queue, self.receipt, Duration::ZERO)
    }

    async fn set_ack_deadline(&mut self, duration: Duration) -> Result<()> {
        self.broker
            .change_visibility(&self.queue, self.receipt, duration)
    }
}
