use std::{marker::PhantomData, sync::Arc};

use crate::{codec::default_codec, Codec, DynChannel, Transport, VirtualChannel as _};

#[non_exhaustive]
pub struct Static;

#[non_exhaustive]
pub struct Dynamic;

/// Channel builder.
///
/// Created with [`Transport::builder`], e.g.
/// [`SqsTransport::builder`][crate::backends::SqsTransport].
pub struct ChannelBuilder<T: Transport, S = Static> {
    config: T::Config,
    codec: Arc<dyn Codec>,

    _pd: PhantomData<S>,
}

impl<T: Transport> ChannelBuilder<T> {
    /// Creates a new channel builder.
    ///
    /// This constructor exists primarily as an implementation detail of
    /// [`Transport::builder`], which is the more convenient way of creating
    /// a channel builder.
    pub fn new(config: T::Config) -> Self {
        Self {
            config,
            codec: default_codec(),
            _pd: PhantomData,
        }
    }

    pub fn build(self) -> T::Channel {
        T::create_channel(self.config, self.codec)
    }

    pub fn make_dynamic(self) -> ChannelBuilder<T, Dynamic> {
        ChannelBuilder {
            config: self.config,
            codec: self.codec,
            _pd: PhantomData,
        }
    }
}

impl<T: Transport, S> ChannelBuilder<T, S> {
    /// Replaces the JSON codec used for message bodies.
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }
}

impl<T: Transport> ChannelBuilder<T, Dynamic>
where
    T::Channel: 'static,
{
    pub fn build(self) -> DynChannel {
        T::create_channel(self.config, self.codec).into_dyn()
    }
}
