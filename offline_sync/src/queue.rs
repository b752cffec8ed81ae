//! Replay queue
//!
//! Mutations that could not be delivered are stored in `sync_queue` and
//! replayed oldest first. An entry is removed only after the server answered
//! with a 2xx; anything else keeps it for the next drain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{OfflineStore, Replayer, SyncError, store::now};

/// A request waiting to be sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl PendingAction {
    pub fn json(method: &str, url: &str, body: &Value) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    pub id: i64,
    #[serde(flatten)]
    pub action: PendingAction,
    pub queued_at: String,
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    url: String,
    method: String,
    headers: String,
    body: Option<String>,
    queued_at: String,
}

impl TryFrom<QueueRow> for QueuedAction {
    type Error = SyncError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            action: PendingAction {
                url: row.url,
                method: row.method,
                headers: serde_json::from_str(&row.headers)?,
                body: row.body,
            },
            queued_at: row.queued_at,
        })
    }
}

impl OfflineStore {
    pub async fn enqueue(&self, action: &PendingAction) -> Result<i64, SyncError> {
        let done = sqlx::query(
            "INSERT INTO sync_queue (url, method, headers, body, queued_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&action.url)
        .bind(&action.method)
        .bind(serde_json::to_string(&action.headers)?)
        .bind(&action.body)
        .bind(now())
        .execute(&self.pool)
        .await?;

        let id = done.last_insert_rowid();
        info!(action_id = id, method = action.method.as_str(), url = action.url.as_str(), "Action queued");
        Ok(id)
    }

    /// Queued actions in insertion order.
    pub async fn pending(&self) -> Result<Vec<QueuedAction>, SyncError> {
        let rows = sqlx::query_as::<_, QueueRow>("SELECT * FROM sync_queue ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(QueuedAction::try_from).collect()
    }

    pub async fn remove_action(&self, id: i64) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn queue_len(&self) -> Result<i64, SyncError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await?)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub replayed: usize,
    pub failed: usize,
    pub remaining: i64,
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Replays every queued action once, sequentially. A failure is logged and
/// the drain moves on to the next entry.
pub async fn drain<R: Replayer>(store: &OfflineStore, replayer: &R) -> Result<DrainReport, SyncError> {
    let mut report = DrainReport::default();

    for queued in store.pending().await? {
        match replayer.replay(&queued.action).await {
            Ok(status) if is_success(status) => {
                store.remove_action(queued.id).await?;
                report.replayed += 1;
            }
            Ok(status) => {
                warn!(action_id = queued.id, status, "Replay rejected, keeping action");
                report.failed += 1;
            }
            Err(e) => {
                warn!(action_id = queued.id, error = %e, "Replay failed, keeping action");
                report.failed += 1;
            }
        }
    }

    report.remaining = store.queue_len().await?;
    info!(
        replayed = report.replayed,
        failed = report.failed,
        remaining = report.remaining,
        "Sync queue drained"
    );
    Ok(report)
}

/// Outcome of `submit_or_queue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The server accepted the action.
    Sent(u16),
    /// The server answered with a client error; retrying would not help.
    Rejected(u16),
    /// Stored for the next drain under this id.
    Queued(i64),
}

/// Sends `action` now, queueing it when the server is unreachable or
/// answers with a server error.
pub async fn submit_or_queue<R: Replayer>(
    store: &OfflineStore,
    replayer: &R,
    action: PendingAction,
) -> Result<Submission, SyncError> {
    match replayer.replay(&action).await {
        Ok(status) if is_success(status) => Ok(Submission::Sent(status)),
        Ok(status) if (400..500).contains(&status) => Ok(Submission::Rejected(status)),
        Ok(status) => {
            warn!(status, url = action.url.as_str(), "Server error, queueing action");
            Ok(Submission::Queued(store.enqueue(&action).await?))
        }
        Err(SyncError::Transport(e)) => {
            warn!(error = %e, url = action.url.as_str(), "Offline, queueing action");
            Ok(Submission::Queued(store.enqueue(&action).await?))
        }
        Err(e) => Err(e),
    }
}
