use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::SyncCoordinator;
use crate::errors::{SyncError, SyncResult};
use crate::remote::RemoteError;
use crate::types::{is_local_draft_id, ActionKind, ActionPayload, DraftMessage, Email, PendingAction};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayStatus {
    Applied { remote_id: Option<String> },
    /// The server no longer has the target; the action was dropped.
    SkippedMissing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub action_id: i64,
    pub kind: ActionKind,
    pub target: Option<String>,
    pub status: ReplayStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayHalt {
    pub action_id: i64,
    pub kind: ActionKind,
    pub target: Option<String>,
    pub reason: String,
    /// Actions still queued, the failing one included.
    pub remaining: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub outcomes: Vec<ReplayOutcome>,
    pub halted: Option<ReplayHalt>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    pub fn into_result(self) -> SyncResult<Vec<ReplayOutcome>> {
        match self.halted {
            None => Ok(self.outcomes),
            Some(halt) => Err(SyncError::ReplayHalt {
                action_id: halt.action_id,
                kind: halt.kind,
                reason: halt.reason,
                remaining: halt.remaining,
            }),
        }
    }
}

impl SyncCoordinator {
    /// Replays queued actions oldest first, stopping at the first failure.
    /// Everything from the failing action on stays queued for the next run.
    pub async fn replay_pending(&self) -> SyncResult<ReplayReport> {
        let actions = self.db.get_pending_actions().await?;
        let total = actions.len();
        if total == 0 {
            debug!("Nothing to replay");
            return Ok(ReplayReport::default());
        }
        info!(count = total, "Replaying pending actions");

        // Local draft id -> remote id, for drafts promoted earlier in this run.
        let mut promoted: HashMap<String, String> = HashMap::new();
        let mut report = ReplayReport::default();

        for (idx, action) in actions.into_iter().enumerate() {
            match self.replay_one(&action, &mut promoted).await {
                Ok(status) => {
                    debug!(action = action.id, kind = %action.kind, ?status, "Replayed action");
                    report.outcomes.push(ReplayOutcome {
                        action_id: action.id,
                        kind: action.kind,
                        target: action.target,
                        status,
                    });
                }
                Err(err) => {
                    let remaining = total - idx;
                    warn!(
                        action = action.id,
                        kind = %action.kind,
                        remaining,
                        error = %err,
                        "Replay halted"
                    );
                    report.halted = Some(ReplayHalt {
                        action_id: action.id,
                        kind: action.kind,
                        target: action.target,
                        reason: err.to_string(),
                        remaining,
                    });
                    break;
                }
            }
        }

        info!(
            replayed = report.outcomes.len(),
            halted = report.halted.is_some(),
            "Replay finished"
        );
        Ok(report)
    }

    async fn replay_one(
        &self,
        action: &PendingAction,
        promoted: &mut HashMap<String, String>,
    ) -> SyncResult<ReplayStatus> {
        match &action.payload {
            ActionPayload::Send(msg) | ActionPayload::SaveDraft(msg) => {
                self.replay_message(action, msg, promoted).await
            }
            payload => {
                let Some(target) = resolve_target(action.target.as_deref(), promoted) else {
                    // Aimed at a draft that never reached the server.
                    self.db.complete_pending_action(action.id, None).await?;
                    return Ok(ReplayStatus::SkippedMissing);
                };
                let sent = match payload {
                    ActionPayload::Delete => self.remote.delete_email(&target).await,
                    ActionPayload::Move {
                        from_mailbox,
                        to_mailbox,
                    } => {
                        self.remote
                            .move_email(&target, from_mailbox, to_mailbox)
                            .await
                    }
                    ActionPayload::SetFlags { unread, flagged } => {
                        self.replay_flags(&target, *unread, *flagged).await
                    }
                    ActionPayload::Send(_) | ActionPayload::SaveDraft(_) => unreachable!("handled above"),
                };
                match sent {
                    Ok(()) => {
                        self.db.complete_pending_action(action.id, None).await?;
                        Ok(ReplayStatus::Applied { remote_id: None })
                    }
                    Err(RemoteError::NotFound(what)) => {
                        info!(action = action.id, email = %target, %what, "Target gone on server; dropping action");
                        self.db
                            .complete_pending_action(action.id, Some(&target))
                            .await?;
                        Ok(ReplayStatus::SkippedMissing)
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn replay_flags(
        &self,
        email_id: &str,
        unread: Option<bool>,
        flagged: Option<bool>,
    ) -> Result<(), RemoteError> {
        if let Some(unread) = unread {
            self.remote.set_unread(email_id, unread).await?;
        }
        if let Some(flagged) = flagged {
            self.remote.set_flagged(email_id, flagged).await?;
        }
        Ok(())
    }

    async fn replay_message(
        &self,
        action: &PendingAction,
        msg: &DraftMessage,
        promoted: &mut HashMap<String, String>,
    ) -> SyncResult<ReplayStatus> {
        let draft_id = remote_draft_id(action.target.as_deref(), msg, promoted);
        let id = match action.kind {
            ActionKind::Send => {
                self.remote
                    .send_email(draft_id.as_deref(), &msg.from, &msg.to, &msg.subject, &msg.body)
                    .await?
            }
            _ => {
                self.remote
                    .save_draft(draft_id.as_deref(), &msg.from, &msg.to, &msg.subject, &msg.body)
                    .await?
            }
        };

        // The remote has the message now. From here on only retiring the
        // action may fail the replay; caching the result is best effort.
        let copy = match self.cached_copy(action.kind, &id, msg).await {
            Ok(copy) => copy,
            Err(e) => {
                warn!(email = %id, error = %e, "Looking up mailbox for replayed message failed");
                None
            }
        };
        match action.target.as_deref() {
            Some(key) => {
                let full = self
                    .db
                    .promote_local_draft(action.id, key, &id, copy.as_ref(), draft_id.as_deref())
                    .await;
                if let Err(e) = full {
                    warn!(action = action.id, email = %id, error = %e, "Promotion failed; retiring action only");
                    self.db.retire_promoted_action(action.id, key, &id).await?;
                    self.tidy_after_promotion(key, &id, copy).await;
                }
                if is_local_draft_id(key) {
                    info!(draft = %key, email = %id, "Promoted local draft");
                    promoted.insert(key.to_string(), id.clone());
                }
            }
            None => {
                let replaced = draft_id.as_deref().filter(|old| *old != id);
                if let Err(e) = self.db.complete_pending_action(action.id, replaced).await {
                    warn!(action = action.id, email = %id, error = %e, "Evicting replaced draft failed");
                    self.db.complete_pending_action(action.id, None).await?;
                }
                if let Some(email) = copy {
                    if let Err(e) = self.db.save_emails(&[email]).await {
                        warn!(email = %id, error = %e, "Caching replayed message failed");
                    }
                }
            }
        }
        Ok(ReplayStatus::Applied { remote_id: Some(id) })
    }

    /// Best-effort cleanup after `retire_promoted_action`.
    async fn tidy_after_promotion(&self, key: &str, id: &str, copy: Option<Email>) {
        if is_local_draft_id(key) {
            if let Err(e) = self.db.delete_local_draft(key).await {
                warn!(draft = %key, error = %e, "Local draft left behind after replay");
            }
        } else if key != id {
            if let Err(e) = self.db.delete_email(key).await {
                warn!(email = %key, error = %e, "Evicting replaced draft failed");
            }
        }
        if let Some(email) = copy {
            if let Err(e) = self.db.save_emails(&[email]).await {
                warn!(email = %id, error = %e, "Caching replayed message failed");
            }
        }
    }
}

/// Remote id the action should act on, or `None` when it still names a
/// local draft.
fn resolve_target(target: Option<&str>, promoted: &HashMap<String, String>) -> Option<String> {
    let target = target?;
    if is_local_draft_id(target) {
        promoted.get(target).cloned()
    } else {
        Some(target.to_string())
    }
}

/// Draft id handed to the remote for a replayed send/save. Local ids never
/// leave the device.
fn remote_draft_id(
    target: Option<&str>,
    msg: &DraftMessage,
    promoted: &HashMap<String, String>,
) -> Option<String> {
    let from_payload = || msg.draft_id.clone().filter(|id| !is_local_draft_id(id));
    match target {
        Some(t) if is_local_draft_id(t) => promoted.get(t).cloned().or_else(from_payload),
        Some(t) => Some(t.to_string()),
        None => from_payload(),
    }
}
