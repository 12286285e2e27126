use std::{future::Future, pin::Pin, time::Duration};

use sync_wrapper::SyncWrapper;

use crate::{QueueError, Result};

/// Settles a single received message on its backend.
///
/// Implementations don't need to guard against being settled twice; [`Delivery`] does that.
///
/// [`Delivery`]: crate::Delivery
pub trait Acker: Send {
    /// Removes the message for good.
    fn ack(&mut self) -> impl Future<Output = Result<()>> + Send;
    /// Hands the message back so the next `get` may see it again.
    fn nack(&mut self) -> impl Future<Output = Result<()>> + Send;
    /// Hides the message for `duration` from now on, replacing whatever was left of the
    /// visibility window that started when it was received.
    fn set_ack_deadline(&mut self, duration: Duration) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone, Copy, Debug)]
enum Settle {
    Ack,
    Nack,
    Extend(Duration),
}

type SettleFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

trait ErasedAcker: Send {
    fn settle(&mut self, op: Settle) -> SettleFuture<'_>;
}

impl<A: Acker> ErasedAcker for A {
    fn settle(&mut self, op: Settle) -> SettleFuture<'_> {
        match op {
            Settle::Ack => Box::pin(self.ack()),
            Settle::Nack => Box::pin(self.nack()),
            Settle::Extend(duration) => Box::pin(self.set_ack_deadline(duration)),
        }
    }
}

/// Type-erased acker that refuses to settle a message more than once.
pub(crate) struct DynAcker {
    inner: SyncWrapper<Box<dyn ErasedAcker>>,
    settled: bool,
}

impl DynAcker {
    pub(super) fn new(inner: impl Acker + 'static) -> Self {
        Self {
            inner: SyncWrapper::new(Box::new(inner)),
            settled: false,
        }
    }

    async fn run(&mut self, op: Settle) -> Result<()> {
        if self.settled {
            return Err(QueueError::CannotAckOrNackTwice);
        }
        self.inner.get_mut().settle(op).await?;
        if !matches!(op, Settle::Extend(_)) {
            self.settled = true;
        }
        Ok(())
    }

    pub(super) async fn ack(&mut self) -> Result<()> {
        self.run(Settle::Ack).await
    }

    pub(super) async fn nack(&mut self) -> Result<()> {
        self.run(Settle::Nack).await
    }

    pub(super) async fn set_ack_deadline(&mut self, duration: Duration) -> Result<()> {
        self.run(Settle::Extend(duration)).await
    }
}
