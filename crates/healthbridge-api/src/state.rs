use std::sync::Arc;

use healthbridge_db::Database;
use healthbridge_gateway::dispatcher::Dispatcher;
use healthbridge_gateway::messenger::Messenger;

use crate::activity::ActivityLogger;

pub type AppState = Arc<AppStateInner>;

/// Settings the handlers need at request time.
#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub retention_days: i64,
    /// Echo internal error detail to clients. Development only.
    pub expose_error_detail: bool,
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub messenger: Messenger,
    pub activity: ActivityLogger,
    pub settings: Settings,
}

impl AppStateInner {
    /// Wire the collaborators: one channel registry, one ingestion path, and
    /// the activity logger subscribed to sent messages. Must run inside a
    /// Tokio runtime (the activity writer is spawned here).
    pub fn build(db: Arc<Database>, settings: Settings) -> AppState {
        let dispatcher = Dispatcher::new();
        let activity = ActivityLogger::spawn(db.clone());
        let messenger = Messenger::new(db.clone(), dispatcher).with_hook(Arc::new(activity.clone()));

        Arc::new(Self {
            db,
            messenger,
            activity,
            settings,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.messenger.dispatcher()
    }
}
