//! Email list state for a presentation layer: pages in, optimistic edits
//! out, and reconciliation once the dispatcher reports back.

use std::collections::HashMap;

use tracing::debug;

use crate::errors::SyncResult;
use crate::sync::dispatch::RequestId;
use crate::sync::{EmailPage, Mutation, MutationOutcome};
use crate::types::Email;

/// What a speculative change replaced, so it can be put back.
#[derive(Clone, Debug)]
enum Hypothesis {
    Removed { index: usize, email: Email },
    Flags { email_id: String, unread: bool, flagged: bool },
}

#[derive(Debug, Default)]
pub struct EmailList {
    mailbox_id: Option<String>,
    epoch: u64,
    emails: Vec<Email>,
    cursor: usize,
    next_offset: usize,
    can_load_more: bool,
    hypotheses: HashMap<RequestId, Hypothesis>,
    error: Option<String>,
}

impl EmailList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to another mailbox. Pages requested for the previous one are
    /// ignored from here on; pass the returned epoch to [`Self::apply_page`].
    pub fn open_mailbox(&mut self, mailbox_id: &str) -> u64 {
        self.epoch += 1;
        self.mailbox_id = Some(mailbox_id.to_string());
        self.emails.clear();
        self.cursor = 0;
        self.next_offset = 0;
        self.can_load_more = false;
        self.hypotheses.clear();
        self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn mailbox_id(&self) -> Option<&str> {
        self.mailbox_id.as_deref()
    }

    /// Applies a fetched page. Returns `false` when the page is stale: an
    /// older epoch, another mailbox, or an offset that no longer lines up.
    pub fn apply_page(&mut self, epoch: u64, page: &EmailPage) -> bool {
        if epoch != self.epoch || self.mailbox_id.as_deref() != Some(page.mailbox_id.as_str()) {
            debug!(epoch, current = self.epoch, mailbox = %page.mailbox_id, "Dropping stale page");
            return false;
        }
        if page.offset != 0 && page.offset != self.next_offset {
            debug!(offset = page.offset, expected = self.next_offset, "Dropping out-of-order page");
            return false;
        }

        let hidden: Vec<&str> = self
            .hypotheses
            .values()
            .filter_map(|h| match h {
                Hypothesis::Removed { email, .. } => Some(email.id.as_str()),
                Hypothesis::Flags { .. } => None,
            })
            .collect();
        let incoming = page
            .emails
            .iter()
            .filter(|e| !hidden.contains(&e.id.as_str()))
            .cloned();

        if page.offset == 0 {
            self.emails = incoming.collect();
        } else {
            let fresh: Vec<Email> = incoming
                .filter(|e| !self.emails.iter().any(|have| have.id == e.id))
                .collect();
            self.emails.extend(fresh);
        }
        self.next_offset = page.offset + page.emails.len();
        self.can_load_more = page.has_more;
        self.clamp_cursor();
        true
    }

    /// Offset of the next page to request, if more mail may exist.
    pub fn next_page_offset(&self) -> Option<usize> {
        (self.mailbox_id.is_some() && self.can_load_more).then_some(self.next_offset)
    }

    pub fn can_load_more(&self) -> bool {
        self.can_load_more
    }

    /// Applies the expected result of `mutation` right away.
    pub fn hypothesize(&mut self, request: RequestId, mutation: &Mutation) {
        let hypothesis = match mutation {
            Mutation::Delete { email_id } => self.remove(email_id),
            Mutation::Move {
                email_id,
                from_mailbox,
                ..
            }
            | Mutation::Archive {
                email_id,
                from_mailbox,
            } => {
                if self.mailbox_id.as_deref() == Some(from_mailbox.as_str()) {
                    self.remove(email_id)
                } else {
                    None
                }
            }
            Mutation::SetUnread { email_id, unread } => {
                self.flip(email_id, |e| e.unread = *unread)
            }
            Mutation::SetFlagged { email_id, flagged } => {
                self.flip(email_id, |e| e.flagged = *flagged)
            }
            Mutation::Send(_) | Mutation::SaveDraft(_) => None,
        };
        if let Some(h) = hypothesis {
            self.hypotheses.insert(request, h);
        }
    }

    /// Commits or reverts the speculative change made for `request`. A
    /// failure stays visible until [`Self::acknowledge_error`].
    pub fn reconcile(&mut self, request: RequestId, result: &SyncResult<MutationOutcome>) {
        let hypothesis = self.hypotheses.remove(&request);
        match result {
            Ok(_) => {
                if let Some(Hypothesis::Removed { .. }) = hypothesis {
                    self.next_offset = self.next_offset.saturating_sub(1);
                }
            }
            Err(err) => {
                if let Some(h) = hypothesis {
                    self.revert(h);
                }
                self.error = Some(err.to_string());
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.hypotheses.is_empty()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn acknowledge_error(&mut self) {
        self.error = None;
    }

    pub fn emails(&self) -> &[Email] {
        &self.emails
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> Option<&Email> {
        self.emails.get(self.cursor)
    }

    pub fn select_next(&mut self) {
        if self.emails.is_empty() {
            return;
        }
        self.cursor = (self.cursor + 1).min(self.emails.len() - 1);
    }

    pub fn select_prev(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn remove(&mut self, email_id: &str) -> Option<Hypothesis> {
        let index = self.emails.iter().position(|e| e.id == email_id)?;
        let email = self.emails.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        self.clamp_cursor();
        Some(Hypothesis::Removed { index, email })
    }

    fn flip(&mut self, email_id: &str, apply: impl FnOnce(&mut Email)) -> Option<Hypothesis> {
        let email = self.emails.iter_mut().find(|e| e.id == email_id)?;
        let before = Hypothesis::Flags {
            email_id: email.id.clone(),
            unread: email.unread,
            flagged: email.flagged,
        };
        apply(email);
        Some(before)
    }

    fn revert(&mut self, hypothesis: Hypothesis) {
        match hypothesis {
            Hypothesis::Removed { index, email } => {
                let index = index.min(self.emails.len());
                // A restored row at the cursor takes the selection back.
                if index < self.cursor {
                    self.cursor += 1;
                }
                self.emails.insert(index, email);
                self.clamp_cursor();
            }
            Hypothesis::Flags {
                email_id,
                unread,
                flagged,
            } => {
                if let Some(email) = self.emails.iter_mut().find(|e| e.id == email_id) {
                    email.unread = unread;
                    email.flagged = flagged;
                }
            }
        }
    }

    fn clamp_cursor(&mut self) {
        if self.emails.is_empty() {
            self.cursor = 0;
        } else if self.cursor >= self.emails.len() {
            self.cursor = self.emails.len() - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use crate::remote::RemoteError;
    use crate::sync::page_has_more;
    use chrono::{TimeZone, Utc};

    fn email(id: &str, mailbox: &str, minute: u32) -> Email {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
        Email::new(id, date, vec![mailbox.to_string()])
    }

    fn page(mailbox: &str, offset: usize, ids: &[&str]) -> EmailPage {
        let emails: Vec<Email> = ids.iter().map(|id| email(id, mailbox, 0)).collect();
        EmailPage {
            mailbox_id: mailbox.to_string(),
            offset,
            has_more: page_has_more(emails.len()),
            emails,
        }
    }

    fn failed() -> SyncResult<MutationOutcome> {
        Err(SyncError::Connectivity(RemoteError::failed("offline")))
    }

    fn applied() -> SyncResult<MutationOutcome> {
        Ok(MutationOutcome::Applied { remote_id: None })
    }

    #[test]
    fn stale_epoch_and_other_mailbox_are_ignored() {
        let mut list = EmailList::new();
        let old = list.open_mailbox("inbox");
        let current = list.open_mailbox("archive");
        assert_eq!(list.epoch(), current);
        assert_eq!(list.mailbox_id(), Some("archive"));

        assert!(!list.apply_page(old, &page("archive", 0, &["a"])));
        assert!(!list.apply_page(current, &page("inbox", 0, &["b"])));
        assert!(list.emails().is_empty());

        assert!(list.apply_page(current, &page("archive", 0, &["c"])));
        assert_eq!(list.emails().len(), 1);
    }

    #[test]
    fn pages_append_at_next_offset() {
        let mut list = EmailList::new();
        let epoch = list.open_mailbox("inbox");
        let first: Vec<String> = (0..20).map(|i| format!("e{}", i)).collect();
        let ids: Vec<&str> = first.iter().map(String::as_str).collect();

        assert!(list.apply_page(epoch, &page("inbox", 0, &ids)));
        assert_eq!(list.next_page_offset(), Some(20));

        assert!(!list.apply_page(epoch, &page("inbox", 40, &["late"])));
        assert!(list.apply_page(epoch, &page("inbox", 20, &["e20"])));
        assert_eq!(list.emails().len(), 21);
        assert_eq!(list.next_page_offset(), None);
    }

    #[test]
    fn failed_delete_is_restored_with_banner() {
        let mut list = EmailList::new();
        let epoch = list.open_mailbox("inbox");
        list.apply_page(epoch, &page("inbox", 0, &["a", "b", "c"]));
        list.select_next();

        let delete = Mutation::Delete {
            email_id: "b".into(),
        };
        list.hypothesize(7, &delete);
        assert_eq!(list.emails().len(), 2);
        assert!(list.has_pending());

        list.reconcile(7, &failed());
        let ids: Vec<&str> = list.emails().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(list.cursor(), 1);
        assert_eq!(list.selected().map(|e| e.id.as_str()), Some("b"));
        assert!(list.error().is_some());
        assert!(!list.has_pending());

        // Navigation still works while the banner is up.
        list.select_next();
        assert_eq!(list.selected().map(|e| e.id.as_str()), Some("c"));
        list.acknowledge_error();
        assert!(list.error().is_none());
    }

    #[test]
    fn committed_removal_shifts_next_offset() {
        let mut list = EmailList::new();
        let epoch = list.open_mailbox("inbox");
        let ids: Vec<String> = (0..20).map(|i| format!("e{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        list.apply_page(epoch, &page("inbox", 0, &refs));

        let archive = Mutation::Archive {
            email_id: "e3".into(),
            from_mailbox: "inbox".into(),
        };
        list.hypothesize(1, &archive);
        list.reconcile(1, &applied());

        assert_eq!(list.emails().len(), 19);
        assert_eq!(list.next_page_offset(), Some(19));
        assert!(list.error().is_none());
    }

    #[test]
    fn move_into_open_mailbox_is_not_a_removal() {
        let mut list = EmailList::new();
        let epoch = list.open_mailbox("inbox");
        list.apply_page(epoch, &page("inbox", 0, &["a"]));

        let mv = Mutation::Move {
            email_id: "a".into(),
            from_mailbox: "archive".into(),
            to_mailbox: "inbox".into(),
        };
        list.hypothesize(2, &mv);
        assert_eq!(list.emails().len(), 1);
        assert!(!list.has_pending());
    }

    #[test]
    fn flag_flip_reverts_on_failure() {
        let mut list = EmailList::new();
        let epoch = list.open_mailbox("inbox");
        list.apply_page(epoch, &page("inbox", 0, &["a"]));

        list.hypothesize(
            3,
            &Mutation::SetFlagged {
                email_id: "a".into(),
                flagged: true,
            },
        );
        assert!(list.emails()[0].flagged);

        list.reconcile(3, &failed());
        assert!(!list.emails()[0].flagged);
    }

    #[test]
    fn reload_hides_pending_removals() {
        let mut list = EmailList::new();
        let epoch = list.open_mailbox("inbox");
        list.apply_page(epoch, &page("inbox", 0, &["a", "b"]));
        list.hypothesize(
            4,
            &Mutation::Delete {
                email_id: "a".into(),
            },
        );

        list.apply_page(epoch, &page("inbox", 0, &["a", "b"]));
        let ids: Vec<&str> = list.emails().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
