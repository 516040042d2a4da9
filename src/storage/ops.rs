use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::db::{
    aborted, delete_email_tx, move_email_tx, set_flagged_tx, set_unread_tx, upsert_email_tx,
    upsert_local_draft_tx, Database,
};
use crate::errors::InvalidAction;
use crate::types::{now_ts, ActionKind, ActionPayload, Email, LocalDraft, NewPendingAction, PendingAction};

/// Local side of a mutation made while offline, committed together with the
/// queued action that replays it.
#[derive(Clone, Debug)]
pub enum LocalEffect {
    DeleteEmail(String),
    MoveEmail {
        email_id: String,
        from_mailbox: String,
        to_mailbox: String,
    },
    SetFlags {
        email_id: String,
        unread: Option<bool>,
        flagged: Option<bool>,
    },
    SaveLocalDraft(LocalDraft),
}

pub async fn ensure_pending_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            email_id TEXT,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_actions_email ON pending_actions(email_id);
        "#,
    )
    .execute(pool)
    .await
    .context("creating pending_actions table")?;
    Ok(())
}

impl Database {
    pub async fn add_pending_action(&self, action: &NewPendingAction) -> Result<i64> {
        let mut conn = self.pool().acquire().await.context("acquiring connection")?;
        insert_pending_tx(&mut conn, action).await
    }

    /// Queue in replay order.
    pub async fn get_pending_actions(&self) -> Result<Vec<PendingAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, email_id, data, created_at
            FROM pending_actions
            ORDER BY id ASC;
            "#,
        )
        .fetch_all(self.pool())
        .await
        .context("list pending actions")?;

        rows.iter().map(pending_from_row).collect()
    }

    pub async fn count_pending_actions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM pending_actions")
            .fetch_one(self.pool())
            .await
            .context("count pending actions")?;
        Ok(row.get::<i64, _>(0))
    }

    pub async fn remove_pending_action(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pending_actions WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await
            .context("remove pending action")?;
        Ok(())
    }

    /// Applies the local effect and appends the action in one transaction.
    pub async fn apply_offline(&self, effect: &LocalEffect, action: &NewPendingAction) -> Result<i64> {
        validate(action)?;
        let result: Result<i64> = async {
            let mut tx = self.pool().begin().await.context("beginning offline tx")?;
            match effect {
                LocalEffect::DeleteEmail(email_id) => delete_email_tx(&mut tx, email_id).await?,
                LocalEffect::MoveEmail {
                    email_id,
                    from_mailbox,
                    to_mailbox,
                } => move_email_tx(&mut tx, email_id, from_mailbox, to_mailbox).await?,
                LocalEffect::SetFlags {
                    email_id,
                    unread,
                    flagged,
                } => {
                    if let Some(unread) = unread {
                        set_unread_tx(&mut tx, email_id, *unread).await?;
                    }
                    if let Some(flagged) = flagged {
                        set_flagged_tx(&mut tx, email_id, *flagged).await?;
                    }
                }
                LocalEffect::SaveLocalDraft(draft) => upsert_local_draft_tx(&mut tx, draft).await?,
            }
            let id = insert_pending_tx(&mut tx, action).await?;
            tx.commit().await.context("committing offline tx")?;
            Ok(id)
        }
        .await;
        result.map_err(aborted("queueing offline mutation"))
    }

    /// Retires a local draft after its queued send/save succeeded remotely.
    /// In one transaction: the action and the draft go away, later actions
    /// aimed at the local id are retargeted to `remote_id`, the remote copy
    /// is cached and a superseded remote draft row is evicted.
    pub async fn promote_local_draft(
        &self,
        action_id: i64,
        local_id: &str,
        remote_id: &str,
        promoted: Option<&Email>,
        replaced: Option<&str>,
    ) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool().begin().await.context("beginning promote tx")?;
            sqlx::query("DELETE FROM pending_actions WHERE id = ?1")
                .bind(action_id)
                .execute(&mut *tx)
                .await
                .context("remove promoted action")?;
            sqlx::query("UPDATE pending_actions SET email_id = ?1 WHERE email_id = ?2")
                .bind(remote_id)
                .bind(local_id)
                .execute(&mut *tx)
                .await
                .context("retarget queued actions")?;
            sqlx::query("DELETE FROM local_drafts WHERE id = ?1")
                .bind(local_id)
                .execute(&mut *tx)
                .await
                .context("delete promoted local draft")?;
            if let Some(old) = replaced.filter(|old| *old != remote_id) {
                delete_email_tx(&mut tx, old).await?;
            }
            if let Some(email) = promoted {
                upsert_email_tx(&mut tx, email).await?;
            }
            tx.commit().await.context("committing promote tx")?;
            Ok(())
        }
        .await;
        result.map_err(aborted("promoting local draft"))
    }

    /// Narrow fallback for a confirmed send/save whose full promotion failed:
    /// only the action goes away and later actions follow `remote_id`.
    pub async fn retire_promoted_action(
        &self,
        action_id: i64,
        local_id: &str,
        remote_id: &str,
    ) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool().begin().await.context("beginning retire tx")?;
            sqlx::query("DELETE FROM pending_actions WHERE id = ?1")
                .bind(action_id)
                .execute(&mut *tx)
                .await
                .context("remove replayed action")?;
            sqlx::query("UPDATE pending_actions SET email_id = ?1 WHERE email_id = ?2")
                .bind(remote_id)
                .bind(local_id)
                .execute(&mut *tx)
                .await
                .context("retarget queued actions")?;
            tx.commit().await.context("committing retire tx")?;
            Ok(())
        }
        .await;
        result.map_err(aborted("retiring replayed action"))
    }

    /// Removes a replayed action, optionally evicting a cached email in the
    /// same transaction.
    pub async fn complete_pending_action(&self, action_id: i64, evict: Option<&str>) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool().begin().await.context("beginning complete tx")?;
            sqlx::query("DELETE FROM pending_actions WHERE id = ?1")
                .bind(action_id)
                .execute(&mut *tx)
                .await
                .context("remove pending action")?;
            if let Some(email_id) = evict {
                delete_email_tx(&mut tx, email_id).await?;
            }
            tx.commit().await.context("committing complete tx")?;
            Ok(())
        }
        .await;
        result.map_err(aborted("completing pending action"))
    }

    /// Drops a local draft and every queued action targeting it. Returns how
    /// many actions were dropped.
    pub async fn discard_local_draft(&self, id: &str) -> Result<u64> {
        let result: Result<u64> = async {
            let mut tx = self.pool().begin().await.context("beginning discard tx")?;
            let res = sqlx::query("DELETE FROM pending_actions WHERE email_id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("dropping queued actions for draft")?;
            sqlx::query("DELETE FROM local_drafts WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("deleting local draft")?;
            tx.commit().await.context("committing discard tx")?;
            Ok(res.rows_affected())
        }
        .await;
        let dropped = result.map_err(aborted("discarding local draft"))?;
        debug!(draft = %id, dropped, "Discarded local draft");
        Ok(dropped)
    }
}

fn validate(action: &NewPendingAction) -> Result<()> {
    action
        .validate()
        .map_err(|reason| anyhow::Error::new(InvalidAction(reason)))
}

async fn insert_pending_tx(conn: &mut SqliteConnection, action: &NewPendingAction) -> Result<i64> {
    validate(action)?;
    let data = serde_json::to_string(&action.payload).context("encoding pending payload")?;
    let res = sqlx::query(
        r#"
        INSERT INTO pending_actions (type, email_id, data, created_at)
        VALUES (?1, ?2, ?3, ?4);
        "#,
    )
    .bind(action.kind().as_str())
    .bind(&action.target)
    .bind(data)
    .bind(now_ts())
    .execute(&mut *conn)
    .await
    .context("enqueue pending action")?;
    Ok(res.last_insert_rowid())
}

fn pending_from_row(row: &SqliteRow) -> Result<PendingAction> {
    let id: i64 = row.get(0);
    let raw_kind: String = row.get(1);
    let data: String = row.get(3);

    let kind = ActionKind::parse(&raw_kind)
        .ok_or_else(|| anyhow!("pending action {}: unknown type {:?}", id, raw_kind))?;
    let payload: ActionPayload = serde_json::from_str(&data)
        .with_context(|| format!("pending action {}: decoding payload", id))?;
    if payload.kind() != kind {
        return Err(anyhow!(
            "pending action {}: stored as {} but payload is {}",
            id,
            kind,
            payload.kind()
        ));
    }

    Ok(PendingAction {
        id,
        kind,
        target: row.get(2),
        payload,
        created_at: row.get(4),
    })
}
