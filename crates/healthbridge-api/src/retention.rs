use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::{error, info};

use healthbridge_db::Database;

use crate::activity::ActivityLogger;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_ARCHIVE_HOUR: u32 = 2;
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Delete messages that are read and older than `retention_days`. Unread
/// messages are kept regardless of age.
pub async fn archive_old_messages(db: &Arc<Database>, retention_days: i64) -> anyhow::Result<usize> {
    if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
        bail!("retention must be within 1..={} days, got {}", MAX_RETENTION_DAYS, retention_days);
    }
    let cutoff = Duration::try_days(retention_days)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| anyhow!("retention of {} days is out of range", retention_days))?;
    let db = db.clone();
    let deleted = tokio::task::spawn_blocking(move || db.purge_read_messages_before(cutoff)).await??;
    Ok(deleted)
}

/// The next `hour`:00 UTC strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now { today } else { today + Duration::days(1) }
}

/// Daily sweep. Errors are logged and the loop keeps going.
pub async fn run_retention_loop(db: Arc<Database>, activity: ActivityLogger, retention_days: i64, hour: u32) {
    info!("Retention sweep scheduled daily at {:02}:00 UTC ({} days)", hour, retention_days);

    let next_wait = move || {
        let now = Utc::now();
        (next_run_after(now, hour) - now).to_std().unwrap_or_default()
    };
    let purge = move || {
        let db = db.clone();
        async move { archive_old_messages(&db, retention_days).await }
    };
    let on_purged = move |count: usize| {
        info!("Retention: purged {} read messages older than {} days", count, retention_days);
        activity.archive(None, count, retention_days);
    };

    sweep_loop(next_wait, purge, on_purged).await
}

async fn sweep_loop<W, P, F>(mut next_wait: W, mut purge: P, mut on_purged: impl FnMut(usize))
where
    W: FnMut() -> std::time::Duration,
    P: FnMut() -> F,
    F: Future<Output = anyhow::Result<usize>>,
{
    loop {
        tokio::time::sleep(next_wait()).await;

        match purge().await {
            Ok(count) => on_purged(count),
            Err(e) => error!("Retention sweep failed: {:#}", e),
        }
    }
}
