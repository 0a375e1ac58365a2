use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use healthbridge_db::Database;
use healthbridge_db::models::NewActivity;
use healthbridge_gateway::messenger::MessageHook;
use healthbridge_types::models::MessageView;

enum LogCommand {
    Record(NewActivity),
    Flush(oneshot::Sender<()>),
}

/// Audit trail writer. Callers enqueue and move on; a background task writes
/// the rows in order. A failed write is logged and never reaches the caller.
#[derive(Clone)]
pub struct ActivityLogger {
    tx: mpsc::UnboundedSender<LogCommand>,
}

impl ActivityLogger {
    pub fn spawn(db: Arc<Database>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(db, rx));
        Self { tx }
    }

    pub fn record(&self, activity: NewActivity) {
        if self.tx.send(LogCommand::Record(activity)).is_err() {
            warn!("Activity writer is gone, dropping record");
        }
    }

    /// Resolves once every record enqueued before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LogCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn login(&self, user_id: i64, name: &str) {
        self.record(NewActivity {
            user_id: Some(user_id),
            action: "LOGIN".to_string(),
            entity_type: "User".to_string(),
            entity_id: Some(user_id),
            entity_name: Some(name.to_string()),
            description: Some(format!("{} logged in", name)),
            metadata: json!({}),
        });
    }

    pub fn logout(&self, user_id: i64, name: &str) {
        self.record(NewActivity {
            user_id: Some(user_id),
            action: "LOGOUT".to_string(),
            entity_type: "User".to_string(),
            entity_id: Some(user_id),
            entity_name: Some(name.to_string()),
            description: Some(format!("{} logged out", name)),
            metadata: json!({}),
        });
    }

    /// A retention sweep; `user_id` is `None` for the scheduled run.
    pub fn archive(&self, user_id: Option<i64>, deleted_count: usize, retention_days: i64) {
        self.record(NewActivity {
            user_id,
            action: "ARCHIVE".to_string(),
            entity_type: "Message".to_string(),
            entity_id: None,
            entity_name: None,
            description: Some(format!(
                "{} read messages older than {} days purged",
                deleted_count, retention_days
            )),
            metadata: json!({ "deleted_count": deleted_count, "retention_days": retention_days }),
        });
    }
}

impl MessageHook for ActivityLogger {
    fn message_sent(&self, message: &MessageView) {
        self.record(NewActivity {
            user_id: Some(message.sender_id),
            action: "CREATE".to_string(),
            entity_type: "Message".to_string(),
            entity_id: Some(message.id),
            entity_name: None,
            description: Some(format!("Message sent to {}", message.receiver.name)),
            metadata: json!({ "receiver_id": message.receiver_id }),
        });
    }
}

async fn run_writer(db: Arc<Database>, mut rx: mpsc::UnboundedReceiver<LogCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LogCommand::Record(activity) => {
                let db = db.clone();
                let result = tokio::task::spawn_blocking(move || db.insert_activity(&activity)).await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Failed to record activity: {:#}", e),
                    Err(e) => error!("spawn_blocking join error: {}", e),
                }
            }
            LogCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthbridge_db::activities::ActivityFilter;

    #[tokio::test]
    async fn records_are_written_in_order() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = db.create_user("Alice", "alice@example.org", "hash", "doctor").unwrap();
        let logger = ActivityLogger::spawn(db.clone());

        logger.login(alice, "Alice");
        logger.archive(None, 3, 30);
        logger.logout(alice, "Alice");
        logger.flush().await;

        let (rows, total) = db.list_activities(&ActivityFilter::default(), 1, 10).unwrap();
        assert_eq!(total, 3);
        let actions: Vec<_> = rows.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, ["LOGOUT", "ARCHIVE", "LOGIN"]);
        assert_eq!(rows[1].user_id, None);
    }
}
