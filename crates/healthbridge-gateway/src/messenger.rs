use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Mutex;
use tracing::{debug, error};

use healthbridge_db::Database;
use healthbridge_db::models::MessageRow;
use healthbridge_types::api::SendMessageRequest;
use healthbridge_types::models::MessageView;

use crate::dispatcher::Dispatcher;

/// Observer called after a message has been persisted and routed.
/// Must not block: implementations hand the work off.
pub trait MessageHook: Send + Sync {
    fn message_sent(&self, message: &MessageView);
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("{0}")]
    Validation(String),
    #[error("receiver {0} does not exist")]
    UnknownReceiver(i64),
    #[error("failed to persist message: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl SendError {
    /// Text safe to show a client. Persistence detail stays in the server log.
    pub fn client_message(&self) -> String {
        match self {
            Self::Persistence(_) => "Failed to send message".to_string(),
            other => other.to_string(),
        }
    }
}

/// Single ingestion path for direct messages, shared by the HTTP endpoint
/// and the gateway `SendMessage` command: validate, persist, route.
#[derive(Clone)]
pub struct Messenger {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    hooks: Vec<Arc<dyn MessageHook>>,
    /// Held across persist + deliver so delivery order matches insert order.
    write_order: Arc<Mutex<()>>,
}

impl Messenger {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            dispatcher,
            hooks: Vec::new(),
            write_order: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn MessageHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Validate, persist, route and notify hooks. Everything after
    /// validation runs on its own task: once a row is stored it is always
    /// routed and audited, even if the calling future is dropped.
    pub async fn send(&self, sender_id: i64, req: SendMessageRequest) -> Result<MessageView, SendError> {
        let (receiver_id, content) = validate(req)?;

        let messenger = self.clone();
        tokio::spawn(async move { messenger.persist_and_route(sender_id, receiver_id, content).await })
            .await
            .map_err(|e| SendError::Persistence(anyhow!("send task join error: {}", e)))?
    }

    async fn persist_and_route(&self, sender_id: i64, receiver_id: i64, content: String) -> Result<MessageView, SendError> {
        let order = self.write_order.lock().await;

        // Run blocking DB work off the async runtime
        let db = self.db.clone();
        let row = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<MessageRow>> {
            if db.get_user_by_id(receiver_id)?.is_none() {
                return Ok(None);
            }
            db.insert_message(sender_id, receiver_id, &content).map(Some)
        })
        .await
        .map_err(|e| SendError::Persistence(anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(|e: anyhow::Error| {
            error!("Failed to persist message from {} to {}: {:#}", sender_id, receiver_id, e);
            SendError::Persistence(e)
        })?
        .ok_or(SendError::UnknownReceiver(receiver_id))?;

        let message = row.into_view();
        let report = self.dispatcher.deliver(&message).await;
        drop(order);

        debug!(
            "Message {} from {} to {} delivered to {} receiver / {} sender connections",
            message.id, sender_id, receiver_id, report.receiver_connections, report.sender_connections
        );

        for hook in &self.hooks {
            hook.message_sent(&message);
        }

        Ok(message)
    }
}

/// Both a receiver and non-blank content are required.
pub fn validate(req: SendMessageRequest) -> Result<(i64, String), SendError> {
    match (req.receiver_id, req.content) {
        (Some(receiver_id), Some(content)) if !content.trim().is_empty() => Ok((receiver_id, content)),
        _ => Err(SendError::Validation("receiver_id and content are required".to_string())),
    }
}
