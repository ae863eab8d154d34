//! NATS JetStream publisher for upload completion events.

use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use wallcat_core::UploadStoredEvent;

use crate::publisher::{EventError, EventPublisher};

/// JetStream stream holding all wallcat upload events.
pub const STREAM_NAME: &str = "WALLCAT_UPLOADS";

/// Subject for upload completion events.
pub const STORED_SUBJECT: &str = "wallcat.uploads.stored";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Window within which JetStream drops messages with a repeated
/// `Nats-Msg-Id`. Retried publishes of the same record land well inside it.
const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Publisher backed by a NATS JetStream stream.
pub struct JetStreamPublisher {
    jetstream: async_nats::jetstream::Context,
}

impl JetStreamPublisher {
    /// Connect to NATS and ensure the upload stream exists.
    pub async fn connect(nats_url: &str) -> Result<Self, EventError> {
        tracing::info!(url = %nats_url, "Connecting to NATS");

        let client = timeout(CONNECT_TIMEOUT, async_nats::connect(nats_url))
            .await
            .map_err(|_| EventError::ConnectFailed("connection timed out".to_string()))?
            .map_err(|e| EventError::ConnectFailed(e.to_string()))?;

        let jetstream = async_nats::jetstream::new(client);

        jetstream
            .get_or_create_stream(async_nats::jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec!["wallcat.uploads.>".to_string()],
                duplicate_window: DUPLICATE_WINDOW,
                ..Default::default()
            })
            .await
            .map_err(|e| EventError::ConnectFailed(e.to_string()))?;

        tracing::info!(stream = STREAM_NAME, "Connected to NATS JetStream");

        Ok(Self { jetstream })
    }
}

#[async_trait]
impl EventPublisher for JetStreamPublisher {
    async fn publish_stored(&self, event: &UploadStoredEvent) -> Result<(), EventError> {
        let payload = serde_json::to_vec(event)?;
        let dedup_id = event.dedup_id();

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", dedup_id.as_str());

        // The double await matters: the first sends, the second waits for the
        // server's PubAck confirming durable persistence.
        let ack = timeout(PUBLISH_TIMEOUT, async {
            self.jetstream
                .publish_with_headers(STORED_SUBJECT, headers, payload.into())
                .await
                .map_err(|e| EventError::PublishFailed(e.to_string()))?
                .await
                .map_err(|e| EventError::PublishFailed(e.to_string()))
        })
        .await
        .map_err(|_| EventError::PublishTimeout)??;

        tracing::info!(
            upload_id = %event.upload_id,
            subject = STORED_SUBJECT,
            dedup_id = %dedup_id,
            stream_sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Upload completion event published"
        );

        Ok(())
    }
}
