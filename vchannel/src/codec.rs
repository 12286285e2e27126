use std::sync::Arc;

use crate::Result;

/// The structured payload carried by a message.
///
/// Channels never look inside it; it is turned into text by a [`Codec`] on the way out and parsed
/// back on the way in.
pub type Envelope = serde_json::Value;

/// Converts envelopes to and from the text body stored on the backend.
pub trait Codec: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<String>;
    fn decode(&self, body: &str) -> Result<Envelope>;
}

/// Plain JSON bodies. Used unless the builder is given another codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<String> {
        serde_json::to_string(envelope).map_err(Into::into)
    }

    fn decode(&self, body: &str) -> Result<Envelope> {
        serde_json::from_str(body).map_err(Into::into)
    }
}

impl<C: Codec + ?Sized> Codec for Arc<C> {
    fn encode(&self, envelope: &Envelope) -> Result<String> {
        (**self).encode(envelope)
    }

    fn decode(&self, body: &str) -> Result<Envelope> {
        (**self).decode(body)
    }
}

pub(crate) fn default_codec() -> Arc<dyn Codec> {
    Arc::new(JsonCodec)
}
