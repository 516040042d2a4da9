use chrono::Utc;
use tracing::{info, warn};

use super::SyncCoordinator;
use crate::errors::{SyncError, SyncResult};
use crate::storage::LocalEffect;
use crate::types::{
    is_local_draft_id, now_ts, ActionKind, ActionPayload, DraftMessage, Email, LocalDraft,
    MailboxRole, Mode, NewPendingAction,
};

/// A user intent that changes mail state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Delete {
        email_id: String,
    },
    Move {
        email_id: String,
        from_mailbox: String,
        to_mailbox: String,
    },
    /// Move into whichever mailbox carries the archive role.
    Archive {
        email_id: String,
        from_mailbox: String,
    },
    SetUnread {
        email_id: String,
        unread: bool,
    },
    SetFlagged {
        email_id: String,
        flagged: bool,
    },
    Send(DraftMessage),
    SaveDraft(DraftMessage),
}

impl Mutation {
    pub fn email_id(&self) -> Option<&str> {
        match self {
            Mutation::Delete { email_id }
            | Mutation::Move { email_id, .. }
            | Mutation::Archive { email_id, .. }
            | Mutation::SetUnread { email_id, .. }
            | Mutation::SetFlagged { email_id, .. } => Some(email_id),
            Mutation::Send(_) | Mutation::SaveDraft(_) => None,
        }
    }

    fn validate(&self) -> SyncResult<()> {
        if let Some(email_id) = self.email_id() {
            if email_id.trim().is_empty() {
                return Err(SyncError::validation("email id is empty"));
            }
        }
        match self {
            Mutation::Move {
                from_mailbox,
                to_mailbox,
                ..
            } => {
                if from_mailbox.trim().is_empty() || to_mailbox.trim().is_empty() {
                    return Err(SyncError::validation("move needs source and target mailbox"));
                }
                if from_mailbox == to_mailbox {
                    return Err(SyncError::validation("email is already in that mailbox"));
                }
            }
            Mutation::Send(msg) => {
                if msg.from.trim().is_empty() {
                    return Err(SyncError::validation("sender address is empty"));
                }
                if msg.to.trim().is_empty() {
                    return Err(SyncError::validation("recipient list is empty"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The remote service accepted the change.
    Applied { remote_id: Option<String> },
    /// Applied locally and queued for replay.
    Queued {
        action_id: i64,
        local_draft_id: Option<String>,
    },
}

impl SyncCoordinator {
    /// Online: remote first, then a best-effort local mirror. Offline: local
    /// write plus queued action. The caller owns any optimistic UI change.
    pub async fn mutate(&self, mode: Mode, mutation: Mutation) -> SyncResult<MutationOutcome> {
        let mutation = self.resolve(mutation).await?;
        match mode {
            Mode::Online => self.mutate_online(&mutation).await,
            Mode::Offline => self.enqueue(mutation).await,
        }
    }

    /// Applies a mutation locally and queues it for the next replay,
    /// regardless of connectivity.
    pub async fn queue_pending_action(&self, mutation: Mutation) -> SyncResult<MutationOutcome> {
        let mutation = self.resolve(mutation).await?;
        self.enqueue(mutation).await
    }

    async fn resolve(&self, mutation: Mutation) -> SyncResult<Mutation> {
        mutation.validate()?;
        match mutation {
            Mutation::Archive {
                email_id,
                from_mailbox,
            } => {
                let archive = self
                    .db
                    .mailbox_by_role(&MailboxRole::Archive)
                    .await?
                    .ok_or_else(|| SyncError::validation("no archive mailbox cached"))?;
                let resolved = Mutation::Move {
                    email_id,
                    from_mailbox,
                    to_mailbox: archive.id,
                };
                resolved.validate()?;
                Ok(resolved)
            }
            other => Ok(other),
        }
    }

    async fn mutate_online(&self, mutation: &Mutation) -> SyncResult<MutationOutcome> {
        match mutation {
            Mutation::Delete { email_id } => {
                self.remote.delete_email(email_id).await?;
                mirror("delete", email_id, self.db.delete_email(email_id).await);
            }
            Mutation::Move {
                email_id,
                from_mailbox,
                to_mailbox,
            } => {
                self.remote.move_email(email_id, from_mailbox, to_mailbox).await?;
                mirror(
                    "move",
                    email_id,
                    self.db.move_email(email_id, from_mailbox, to_mailbox).await,
                );
            }
            Mutation::SetUnread { email_id, unread } => {
                self.remote.set_unread(email_id, *unread).await?;
                mirror("set_unread", email_id, self.db.set_unread(email_id, *unread).await);
            }
            Mutation::SetFlagged { email_id, flagged } => {
                self.remote.set_flagged(email_id, *flagged).await?;
                mirror("set_flagged", email_id, self.db.set_flagged(email_id, *flagged).await);
            }
            Mutation::Send(msg) => {
                let draft_id = msg.draft_id.as_deref().filter(|id| !is_local_draft_id(id));
                let id = self
                    .remote
                    .send_email(draft_id, &msg.from, &msg.to, &msg.subject, &msg.body)
                    .await?;
                info!(email = %id, "Sent email");
                self.mirror_message(ActionKind::Send, &id, msg).await;
                return Ok(MutationOutcome::Applied { remote_id: Some(id) });
            }
            Mutation::SaveDraft(msg) => {
                let draft_id = msg.draft_id.as_deref().filter(|id| !is_local_draft_id(id));
                let id = self
                    .remote
                    .save_draft(draft_id, &msg.from, &msg.to, &msg.subject, &msg.body)
                    .await?;
                info!(email = %id, "Saved draft");
                self.mirror_message(ActionKind::SaveDraft, &id, msg).await;
                return Ok(MutationOutcome::Applied { remote_id: Some(id) });
            }
            Mutation::Archive { .. } => unreachable!("archive is resolved to a move"),
        }
        Ok(MutationOutcome::Applied { remote_id: None })
    }

    async fn enqueue(&self, mutation: Mutation) -> SyncResult<MutationOutcome> {
        let (effect, action, local_draft_id) = match mutation {
            Mutation::Delete { email_id } => (
                LocalEffect::DeleteEmail(email_id.clone()),
                NewPendingAction::new(Some(email_id), ActionPayload::Delete),
                None,
            ),
            Mutation::Move {
                email_id,
                from_mailbox,
                to_mailbox,
            } => (
                LocalEffect::MoveEmail {
                    email_id: email_id.clone(),
                    from_mailbox: from_mailbox.clone(),
                    to_mailbox: to_mailbox.clone(),
                },
                NewPendingAction::new(
                    Some(email_id),
                    ActionPayload::Move {
                        from_mailbox,
                        to_mailbox,
                    },
                ),
                None,
            ),
            Mutation::SetUnread { email_id, unread } => {
                flag_change(email_id, Some(unread), None)
            }
            Mutation::SetFlagged { email_id, flagged } => {
                flag_change(email_id, None, Some(flagged))
            }
            Mutation::Send(msg) => local_message(msg, ActionPayload::Send),
            Mutation::SaveDraft(msg) => local_message(msg, ActionPayload::SaveDraft),
            Mutation::Archive { .. } => unreachable!("archive is resolved to a move"),
        };

        let action_id = self.db.apply_offline(&effect, &action).await?;
        info!(
            action = action_id,
            kind = %action.kind(),
            target = action.target.as_deref().unwrap_or("-"),
            "Queued pending action"
        );
        Ok(MutationOutcome::Queued {
            action_id,
            local_draft_id,
        })
    }

    /// Builds the cached copy of a sent message or saved draft, if the
    /// mailbox it belongs in is known locally.
    pub(super) async fn cached_copy(
        &self,
        kind: ActionKind,
        id: &str,
        msg: &DraftMessage,
    ) -> SyncResult<Option<Email>> {
        let role = match kind {
            ActionKind::SaveDraft => MailboxRole::Drafts,
            _ => MailboxRole::Sent,
        };
        let Some(mailbox) = self.db.mailbox_by_role(&role).await? else {
            return Ok(None);
        };
        let mut email = Email::new(id, Utc::now(), vec![mailbox.id]);
        email.subject = msg.subject.clone();
        email.from = msg.from.clone();
        email.to = msg.to.clone();
        email.preview = msg.preview();
        email.body_text = Some(msg.body.clone());
        email.draft = kind == ActionKind::SaveDraft;
        Ok(Some(email))
    }

    async fn mirror_message(&self, kind: ActionKind, id: &str, msg: &DraftMessage) {
        match self.cached_copy(kind, id, msg).await {
            Ok(Some(email)) => mirror(kind.as_str(), id, self.db.save_emails(&[email]).await),
            Ok(None) => {}
            Err(e) => warn!(email = %id, error = %e, "Looking up mailbox for mirror failed"),
        }
        match msg.draft_id.as_deref() {
            Some(local) if is_local_draft_id(local) => {
                mirror(kind.as_str(), local, self.db.discard_local_draft(local).await.map(|_| ()));
            }
            Some(previous) if previous != id => {
                mirror(kind.as_str(), previous, self.db.delete_email(previous).await);
            }
            _ => {}
        }
    }
}

fn flag_change(
    email_id: String,
    unread: Option<bool>,
    flagged: Option<bool>,
) -> (LocalEffect, NewPendingAction, Option<String>) {
    (
        LocalEffect::SetFlags {
            email_id: email_id.clone(),
            unread,
            flagged,
        },
        NewPendingAction::new(Some(email_id), ActionPayload::SetFlags { unread, flagged }),
        None,
    )
}

/// Offline send/save: the message lives as a local draft until replay. The
/// payload keeps only a remote draft id; local ids travel as the target.
fn local_message(
    msg: DraftMessage,
    wrap: fn(DraftMessage) -> ActionPayload,
) -> (LocalEffect, NewPendingAction, Option<String>) {
    let local_id = match msg.draft_id.as_deref() {
        Some(id) if is_local_draft_id(id) => id.to_string(),
        _ => LocalDraft::new_id(),
    };
    let now = now_ts();
    let draft = LocalDraft {
        id: local_id.clone(),
        from: msg.from.clone(),
        to: msg.to.clone(),
        subject: msg.subject.clone(),
        body: msg.body.clone(),
        created_at: now,
        updated_at: now,
    };
    let payload = wrap(DraftMessage {
        draft_id: msg.draft_id.filter(|id| !is_local_draft_id(id)),
        ..msg
    });
    (
        LocalEffect::SaveLocalDraft(draft),
        NewPendingAction::new(Some(local_id.clone()), payload),
        Some(local_id),
    )
}

fn mirror(op: &str, email_id: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!(op, email = %email_id, error = %e, "Mirroring remote change locally failed");
    }
}
