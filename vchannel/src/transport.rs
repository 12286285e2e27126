use std::{sync::Arc, time::Duration};

use crate::{
    builder::{ChannelBuilder, Static},
    Codec, ErrorKind, QueueError, TransportOptions, VirtualChannel,
};

/// Describes a backend to the messaging layer sitting on top of the channels.
///
/// Besides producing channels, a transport tells the outer consume loop how long to sleep after
/// an empty `get` and which failures mean the connection has to be rebuilt.
pub trait Transport {
    type Config;
    type Channel: VirtualChannel;

    /// Default pause between polls of an empty queue.
    const INTERVAL: Duration = Duration::from_secs(1);

    /// `None` for backends reached through a managed endpoint rather than a host and port.
    const DEFAULT_PORT: Option<u16> = None;

    /// Error kinds that leave the channel's connection unusable.
    const CONNECTION_ERRORS: &'static [ErrorKind];

    /// Error kinds that only fail the operation that raised them.
    const CHANNEL_ERRORS: &'static [ErrorKind];

    fn create_channel(config: Self::Config, codec: Arc<dyn Codec>) -> Self::Channel;

    /// Creates a new channel builder with the given configuration.
    fn builder(config: Self::Config) -> ChannelBuilder<Self, Static>
    where
        Self: Sized,
    {
        ChannelBuilder::new(config)
    }

    /// Pause between polls, honouring `polling_interval` when it is set to something sensible.
    fn interval(options: &TransportOptions) -> Duration {
        options
            .polling_interval
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Self::INTERVAL)
    }

    fn is_connection_error(err: &QueueError) -> bool {
        Self::CONNECTION_ERRORS.contains(&err.kind())
    }

    fn is_channel_error(err: &QueueError) -> bool {
        Self::CHANNEL_ERRORS.contains(&err.kind())
    }
}
