use std::{future::Future, pin::Pin};

use super::{Delivery, VirtualChannel};
use crate::{Envelope, Result};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A [`VirtualChannel`] whose backend is picked at runtime.
pub struct DynChannel(Box<dyn ErasedChannel>);

impl DynChannel {
    pub(super) fn new(inner: impl VirtualChannel + 'static) -> Self {
        Self(Box::new(DynChannelInner { inner }))
    }
}

trait ErasedChannel: Send + Sync {
    fn get<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Option<Delivery>>;
    fn put<'a>(&'a self, queue: &'a str, envelope: &'a Envelope) -> BoxFuture<'a, ()>;
    fn size<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, usize>;
    fn purge<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, usize>;
    fn close(&mut self) -> Result<()>;
    fn entity_name(&self, name: &str) -> String;
}

struct DynChannelInner<C> {
    inner: C,
}

impl<C: VirtualChannel> ErasedChannel for DynChannelInner<C> {
    fn get<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Option<Delivery>> {
        Box::pin(async move { self.inner.get(queue).await })
    }

    fn put<'a>(&'a self, queue: &'a str, envelope: &'a Envelope) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.inner.put(queue, envelope).await })
    }

    fn size<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, usize> {
        Box::pin(async move { self.inner.size(queue).await })
    }

    fn purge<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, usize> {
        Box::pin(async move { self.inner.purge(queue).await })
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn entity_name(&self, name: &str) -> String {
        self.inner.entity_name(name)
    }
}

impl VirtualChannel for DynChannel {
    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        self.0.get(queue).await
    }

    async fn put(&self, queue: &str, envelope: &Envelope) -> Result<()> {
        self.0.put(queue, envelope).await
    }

    async fn size(&self, queue: &str) -> Result<usize> {
        self.0.size(queue).await
    }

    async fn purge(&self, queue: &str) -> Result<usize> {
        self.0.purge(queue).await
    }

    fn close(&mut self) -> Result<()> {
        self.0.close()
    }

    fn entity_name(&self, name: &str) -> String {
        self.0.entity_name(name)
    }

    fn into_dyn(self) -> DynChannel {
        self
    }
}
