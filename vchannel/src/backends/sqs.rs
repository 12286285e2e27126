//! Amazon SQS.
//!
//! SQS queue names may only contain alphanumerics, `-` and `_`, so logical names go through
//! [`entity_name`](crate::entity_name) first. Queues are created on first use with the
//! configured visibility timeout; `CreateQueue` returns the existing queue when one with the
//! same name and attributes is already there.

use std::{sync::Arc, time::Duration};

use aws_sdk_sqs::{
    config::{Credentials, Region},
    error::SdkError,
    types::QueueAttributeName,
    Client,
};
use tokio::sync::OnceCell;

use crate::{
    channel::ChannelState, Acker, Codec, ConnectionInfo, Delivery, Envelope, ErrorKind,
    QueueError, QueueHandle, Result, Transport,
};

/// Name reported by the credentials handed to the SDK.
const CREDENTIALS_PROVIDER: &str = "vchannel";

pub struct SqsTransport;

impl Transport for SqsTransport {
    type Config = ConnectionInfo;
    type Channel = SqsChannel;

    const CONNECTION_ERRORS: &'static [ErrorKind] = &[ErrorKind::Transport, ErrorKind::Protocol];
    const CHANNEL_ERRORS: &'static [ErrorKind] = &[ErrorKind::Decode];

    fn create_channel(config: ConnectionInfo, codec: Arc<dyn Codec>) -> SqsChannel {
        let ConnectionInfo {
            userid,
            password,
            transport_options,
        } = config;

        SqsChannel {
            state: ChannelState::new(transport_options, codec),
            userid,
            password,
            client: OnceCell::new(),
        }
    }
}

/// Sorts SDK failures into transport-level and protocol-level errors.
fn sdk_error<E, R>(err: SdkError<E, R>) -> QueueError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
    ) {
        QueueError::transport(err)
    } else if matches!(err, SdkError::ConstructionFailure(_)) {
        QueueError::generic(err)
    } else {
        QueueError::protocol(err)
    }
}

pub struct SqsChannel {
    state: ChannelState,
    userid: Option<String>,
    password: Option<String>,
    client: OnceCell<Client>,
}

impl SqsChannel {
    async fn open(&self) -> Client {
        let options = self.state.options();
        let mut loader = aws_config::from_env();

        match (&self.userid, &self.password) {
            (Some(userid), Some(password)) => {
                loader = loader.credentials_provider(Credentials::new(
                    userid,
                    password,
                    None,
                    None,
                    CREDENTIALS_PROVIDER,
                ));
            }
            (None, None) => {}
            _ => tracing::warn!(
                "sqs: userid and password must be given together, using the default credential chain"
            ),
        }
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &options.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let config = loader.load().await;
        tracing::debug!(
            region = ?config.region(),
            endpoint = options.endpoint_url.as_deref(),
            "sqs: client opened"
        );
        Client::new(&config)
    }

    /// The channel's client, created on first use and reused until the channel is closed.
    pub async fn client(&self) -> Result<&Client> {
        self.state.ensure_open()?;
        Ok(self.client.get_or_init(|| self.open()).await)
    }

    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    pub fn visibility_timeout(&self) -> Option<u32> {
        self.state.visibility_timeout()
    }

    /// Creates the queue behind `queue` unless it exists, and returns its URL.
    pub async fn resolve_queue(&self, queue: &str) -> Result<QueueHandle> {
        let name = self.state.queue_name(queue);
        let client = self.client().await?;

        let mut req = client.create_queue().queue_name(&name);
        if let Some(timeout) = self.state.visibility_timeout() {
            req = req.attributes(QueueAttributeName::VisibilityTimeout, timeout.to_string());
        }
        let out = req.send().await.map_err(sdk_error)?;

        let url = out.queue_url().ok_or_else(|| {
            QueueError::MalformedResponse(format!("no queue URL returned for `{name}`"))
        })?;
        tracing::trace!(queue, url, "sqs: queue resolved");

        Ok(QueueHandle {
            url: url.to_owned(),
            name,
        })
    }

    pub async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let handle = self.resolve_queue(queue).await?;
        let client = self.client().await?;

        let out = client
            .receive_message()
            .queue_url(&handle.url)
            .max_number_of_messages(1)
            .send()
            .await
            .map_err(sdk_error)?;

        let Some(message) = out.messages().first() else {
            tracing::trace!(queue = %handle.name, "sqs: queue empty");
            return Ok(None);
        };

        let Some(receipt_handle) = message.receipt_handle() else {
            return Err(QueueError::MalformedResponse(
                "message received without a receipt handle".to_owned(),
            ));
        };
        let body = message.body().unwrap_or_else(|| {
            tracing::warn!(
                message_id = message.message_id(),
                "sqs: message received without a body"
            );
            ""
        });
        let payload = self.state.codec().decode(body)?;

        Ok(Some(Delivery::new(
            payload,
            SqsAcker {
                client: client.clone(),
                queue_url: handle.url,
                receipt_handle: receipt_handle.to_owned(),
            },
        )))
    }

    pub async fn put(&self, queue: &str, envelope: &Envelope) -> Result<()> {
        let handle = self.resolve_queue(queue).await?;
        let body = self.state.codec().encode(envelope)?;

        self.client()
            .await?
            .send_message()
            .queue_url(&handle.url)
            .message_body(body)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }

    async fn approximate_count(&self, handle: &QueueHandle) -> Result<usize> {
        let out = self
            .client()
            .await?
            .get_queue_attributes()
            .queue_url(&handle.url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(sdk_error)?;

        let raw = out
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .ok_or_else(|| {
                QueueError::MalformedResponse(format!(
                    "no message count returned for `{}`",
                    handle.name
                ))
            })?;

        raw.parse().map_err(|_| {
            QueueError::MalformedResponse(format!("message count `{raw}` is not a number"))
        })
    }

    pub async fn size(&self, queue: &str) -> Result<usize> {
        let handle = self.resolve_queue(queue).await?;
        self.approximate_count(&handle).await
    }

    /// Note that SQS only allows one purge per queue every 60 seconds; a second call within
    /// that window fails with the service's `PurgeQueueInProgress` error.
    pub async fn purge(&self, queue: &str) -> Result<usize> {
        let handle = self.resolve_queue(queue).await?;
        let size = self.approximate_count(&handle).await?;

        self.client()
            .await?
            .purge_queue()
            .queue_url(&handle.url)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(size)
    }

    pub fn close(&mut self) -> Result<()> {
        if !self.state.close() {
            return Ok(());
        }
        // The SDK client has no teardown call of its own. Dropping it releases the connection
        // pool once the ackers still holding clones are gone too.
        if self.client.take().is_some() {
            tracing::debug!("sqs: client released");
        }
        Ok(())
    }
}

impl_virtual_channel!(SqsChannel);

struct SqsAcker {
    client: Client,
    queue_url: String,
    receipt_handle: String,
}

impl SqsAcker {
    async fn change_visibility(&self, timeout: i32) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&self.receipt_handle)
            .visibility_timeout(timeout)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }
}

impl Acker for SqsAcker {
    async fn ack(&mut self) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&self.receipt_handle)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }

    async fn nack(&mut self) -> Result<()> {
        self.change_visibility(0).await
    }

    async fn set_ack_deadline(&mut self, duration: Duration) -> Result<()> {
        let timeout = duration.as_secs().try_into().map_err(QueueError::generic)?;
        self.change_visibility(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use aws_sdk_sqs::error::SdkError;

    use super::{sdk_error, SqsTransport};
    use crate::{ConnectionInfo, ErrorKind, QueueError, Transport, TransportOptions};

    fn local_config() -> ConnectionInfo {
        ConnectionInfo {
            userid: Some("x".to_owned()),
            password: Some("x".to_owned()),
            transport_options: TransportOptions {
                visibility_timeout: Some(45),
                region: Some("localhost".to_owned()),
                endpoint_url: Some("http://localhost:9324".to_owned()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn network_failures_are_transport_errors() {
        let err = sdk_error(SdkError::<io::Error, ()>::timeout_error(io::Error::from(
            io::ErrorKind::TimedOut,
        )));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(SqsTransport::is_connection_error(&err));
    }

    #[test]
    fn service_failures_are_protocol_errors() {
        let err = sdk_error(SdkError::<io::Error, ()>::service_error(
            io::Error::other("AWS.SimpleQueueService.NonExistentQueue"),
            (),
        ));
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(SqsTransport::is_connection_error(&err));
        assert!(!SqsTransport::is_channel_error(&err));
    }

    #[test]
    fn local_build_failures_are_unclassified() {
        let err = sdk_error(SdkError::<io::Error, ()>::construction_failure(
            io::Error::other("missing queue url"),
        ));
        assert!(matches!(err, QueueError::Generic(_)));
        assert!(!SqsTransport::is_connection_error(&err));
        assert!(!SqsTransport::is_channel_error(&err));
    }

    #[test]
    fn transport_metadata() {
        assert_eq!(SqsTransport::DEFAULT_PORT, None);
        assert_eq!(SqsTransport::INTERVAL, std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn client_is_opened_once() {
        let c = SqsTransport::builder(local_config()).build();
        assert!(!c.is_connected());

        let first: *const _ = c.client().await.unwrap();
        let second: *const _ = c.client().await.unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(c.is_connected());
    }

    #[tokio::test]
    async fn close_never_connected() {
        let mut c = SqsTransport::builder(local_config()).build();

        c.close().unwrap();
        c.close().unwrap();
        assert!(!c.is_connected());
        assert!(matches!(
            c.client().await.unwrap_err(),
            QueueError::ChannelClosed
        ));
    }

    #[tokio::test]
    async fn close_releases_client() {
        let mut c = SqsTransport::builder(local_config()).build();
        c.client().await.unwrap();

        c.close().unwrap();
        assert!(!c.is_connected());
        c.close().unwrap();
    }

    #[test]
    fn visibility_timeout_is_cached_from_options() {
        let c = SqsTransport::builder(local_config()).build();
        assert_eq!(c.visibility_timeout(), Some(45));

        let c = SqsTransport::builder(ConnectionInfo::default()).build();
        assert_eq!(c.visibility_timeout(), None);
    }
}
