use std::sync::Arc;

use aws_sdk_sns::Client as SnsClient;
use rocket::serde::json::{json, Value};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::mongodb::Id;

/// The kinds of message the email service knows how to render.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum TemplateKind {
    NominationReceived,
    NominationUpdated,
    VoteRecorded,
}

/// Outbound member notifications.
#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: Vec<Id>, kind: TemplateKind, context: Value) -> Result<()>;
}

/// Send a notification without waiting for it.
/// Failures are logged and never reach the caller.
pub fn notify_in_background(
    notifier: Arc<dyn Notifier>,
    recipients: Vec<Id>,
    kind: TemplateKind,
    context: Value,
) {
    rocket::tokio::spawn(async move {
        if let Err(e) = notifier.send(recipients, kind, context).await {
            warn!("Failed to send {kind:?} notification: {e}");
        }
    });
}

/// Publishes notifications to an SNS topic consumed by the email service.
pub struct SnsNotifier {
    client: SnsClient,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new(client: SnsClient, topic_arn: String) -> Self {
        Self { client, topic_arn }
    }
}

#[rocket::async_trait]
impl Notifier for SnsNotifier {
    async fn send(&self, recipients: Vec<Id>, kind: TemplateKind, context: Value) -> Result<()> {
        let message = json!({
            "template": kind,
            "recipients": recipients.iter().map(Id::to_string).collect::<Vec<_>>(),
            "context": context,
        });
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(message.to_string())
            .send()
            .await
            .map_err(|e| Error::Dependency(format!("Notifier: {e}")))?;
        debug!("Published {kind:?} notification to {} recipient(s)", recipients.len());
        Ok(())
    }
}
