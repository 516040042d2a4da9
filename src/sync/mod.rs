//! Sync coordinator: decides which source answers a read, mirrors remote
//! results into the local store, and owns the pending-action queue.

pub mod dispatch;
mod replay;
mod writes;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::parse_flag;
use crate::errors::{SyncError, SyncResult};
use crate::remote::RemoteAdapter;
use crate::storage::{Database, OFFLINE_MODE_KEY};
use crate::types::{Email, Mailbox, Mode};

pub use replay::{ReplayHalt, ReplayOutcome, ReplayReport, ReplayStatus};
pub use writes::{Mutation, MutationOutcome};

/// Emails requested per page, online and offline.
pub const PAGE_SIZE: usize = 20;

/// A full page means more mail may exist. A last page of exactly
/// `PAGE_SIZE` items reports `true` until the next fetch comes back empty.
pub fn page_has_more(len: usize) -> bool {
    len >= PAGE_SIZE
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailPage {
    pub mailbox_id: String,
    pub offset: usize,
    pub emails: Vec<Email>,
    pub has_more: bool,
}

impl EmailPage {
    fn new(mailbox_id: &str, offset: usize, emails: Vec<Email>) -> Self {
        let has_more = page_has_more(emails.len());
        Self {
            mailbox_id: mailbox_id.to_string(),
            offset,
            emails,
            has_more,
        }
    }
}

pub struct SyncCoordinator {
    db: Arc<Database>,
    remote: Arc<dyn RemoteAdapter>,
    default_offline: bool,
}

impl SyncCoordinator {
    pub fn new(db: Arc<Database>, remote: Arc<dyn RemoteAdapter>) -> Self {
        Self {
            db,
            remote,
            default_offline: false,
        }
    }

    /// Offline flag used until the user has toggled it once.
    pub fn with_default_offline(mut self, offline: bool) -> Self {
        self.default_offline = offline;
        self
    }

    pub fn store(&self) -> &Arc<Database> {
        &self.db
    }

    pub async fn offline_mode(&self) -> SyncResult<bool> {
        let stored = self.db.get_config(OFFLINE_MODE_KEY).await?;
        Ok(stored
            .map(|raw| parse_flag(&raw))
            .unwrap_or(self.default_offline))
    }

    pub async fn mode(&self) -> SyncResult<Mode> {
        Ok(Mode::from_offline_flag(self.offline_mode().await?))
    }

    pub async fn set_offline_mode(&self, offline: bool) -> SyncResult<()> {
        self.db
            .set_config(OFFLINE_MODE_KEY, if offline { "true" } else { "false" })
            .await?;
        info!(offline, "Offline mode toggled");
        Ok(())
    }

    /// Leaves offline mode and replays whatever was queued meanwhile.
    pub async fn go_online(&self) -> SyncResult<ReplayReport> {
        self.set_offline_mode(false).await?;
        self.replay_pending().await
    }

    pub async fn load_mailboxes(&self, mode: Mode) -> SyncResult<Vec<Mailbox>> {
        match mode {
            Mode::Offline => {
                let mailboxes = self.db.get_mailboxes().await?;
                if mailboxes.is_empty() {
                    return Err(SyncError::NotFoundOffline("mailbox list".into()));
                }
                Ok(mailboxes)
            }
            Mode::Online => {
                let mailboxes = self.remote.fetch_mailboxes().await?;
                if let Err(e) = self.db.save_mailboxes(&mailboxes).await {
                    warn!(error = %e, "Caching mailbox list failed");
                }
                debug!(count = mailboxes.len(), "Fetched mailboxes");
                Ok(mailboxes)
            }
        }
    }

    pub async fn load_emails(&self, mode: Mode, mailbox_id: &str, offset: usize) -> SyncResult<EmailPage> {
        match mode {
            Mode::Offline => {
                if !self.db.has_mailbox(mailbox_id).await? {
                    return Err(SyncError::NotFoundOffline(format!("mailbox {}", mailbox_id)));
                }
                let emails = self.db.get_emails(mailbox_id, offset, PAGE_SIZE).await?;
                Ok(EmailPage::new(mailbox_id, offset, emails))
            }
            Mode::Online => {
                let emails = self.remote.fetch_emails(mailbox_id, offset).await?;
                if let Err(e) = self.db.save_emails(&emails).await {
                    warn!(mailbox = %mailbox_id, offset, error = %e, "Caching email page failed");
                }
                debug!(mailbox = %mailbox_id, offset, count = emails.len(), "Fetched email page");
                Ok(EmailPage::new(mailbox_id, offset, emails))
            }
        }
    }

    pub async fn load_body(&self, mode: Mode, email_id: &str) -> SyncResult<String> {
        match mode {
            Mode::Offline => self
                .db
                .get_email_body(email_id)
                .await?
                .ok_or_else(|| SyncError::NotFoundOffline(format!("email {}", email_id))),
            Mode::Online => {
                let body = self.remote.fetch_email_body(email_id).await?;
                if let Err(e) = self.db.save_email_body(email_id, &body).await {
                    warn!(email = %email_id, error = %e, "Caching body failed");
                }
                Ok(body)
            }
        }
    }

    /// Refreshes the mailbox list and the first page of one mailbox
    /// concurrently. Neither result depends on the other.
    pub async fn refresh(&self, mailbox_id: &str) -> (SyncResult<Vec<Mailbox>>, SyncResult<EmailPage>) {
        futures::join!(
            self.load_mailboxes(Mode::Online),
            self.load_emails(Mode::Online, mailbox_id, 0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_page_means_more() {
        assert!(!page_has_more(0));
        assert!(!page_has_more(PAGE_SIZE - 1));
        assert!(page_has_more(PAGE_SIZE));
    }
}
