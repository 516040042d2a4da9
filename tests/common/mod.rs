#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use offmail::remote::{RemoteAdapter, RemoteError, RemoteResult};
use offmail::storage::Database;
use offmail::sync::{SyncCoordinator, PAGE_SIZE};
use offmail::types::{DraftMessage, Email, Mailbox, MailboxRole};

pub async fn open_store() -> (TempDir, Arc<Database>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open_in(dir.path()).await.expect("open store");
    (dir, Arc::new(db))
}

/// Runs raw SQL against the store, e.g. to install a failing trigger.
pub async fn run_sql(db: &Database, sql: &str) {
    sqlx::query(sql).execute(db.pool()).await.expect("run sql");
}

pub fn coordinator(db: &Arc<Database>, remote: &Arc<FakeRemote>) -> SyncCoordinator {
    SyncCoordinator::new(db.clone(), remote.clone())
}

pub fn mailbox(id: &str, name: &str, role: MailboxRole, sort_order: i64) -> Mailbox {
    Mailbox {
        id: id.to_string(),
        name: name.to_string(),
        role,
        parent_id: None,
        sort_order,
        unread_count: 0,
    }
}

/// Inbox, archive, drafts and sent, in that order.
pub fn standard_mailboxes() -> Vec<Mailbox> {
    vec![
        mailbox("inbox", "Inbox", MailboxRole::Inbox, 0),
        mailbox("archive", "Archive", MailboxRole::Archive, 1),
        mailbox("drafts", "Drafts", MailboxRole::Drafts, 2),
        mailbox("sent", "Sent", MailboxRole::Sent, 3),
    ]
}

pub fn at(day: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 9, minute, 0).unwrap()
}

pub fn email(id: &str, mailboxes: &[&str], date: DateTime<Utc>) -> Email {
    let mut e = Email::new(id, date, mailboxes.iter().map(|m| m.to_string()).collect());
    e.subject = format!("Subject {}", id);
    e.from = "alice@example.com".to_string();
    e.to = "me@example.com".to_string();
    e
}

/// `count` emails in one mailbox, newest first, one minute apart.
pub fn emails_in(mailbox: &str, count: usize) -> Vec<Email> {
    (0..count)
        .map(|i| {
            let date = at(1, 0) + chrono::Duration::minutes((count - i) as i64);
            email(&format!("{}-{:02}", mailbox, i), &[mailbox], date)
        })
        .collect()
}

pub fn draft(draft_id: Option<&str>) -> DraftMessage {
    DraftMessage {
        draft_id: draft_id.map(str::to_string),
        from: "me@example.com".to_string(),
        to: "bob@example.com".to_string(),
        subject: "Lunch".to_string(),
        body: "Noon works.\nSee you.".to_string(),
    }
}

#[derive(Default)]
struct FakeState {
    mailboxes: Vec<Mailbox>,
    emails: HashMap<String, Vec<Email>>,
    bodies: HashMap<String, String>,
    offline: bool,
    failing: Vec<String>,
    missing: HashSet<String>,
    calls: Vec<String>,
    next_id: u64,
}

/// Scripted remote service. Every call is logged as `name:arg:arg`; calls
/// can be made to fail by prefix, and ids can be marked as gone.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_mailboxes(&self, mailboxes: Vec<Mailbox>) {
        self.state.lock().unwrap().mailboxes = mailboxes;
    }

    pub fn set_emails(&self, mailbox_id: &str, emails: Vec<Email>) {
        self.state
            .lock()
            .unwrap()
            .emails
            .insert(mailbox_id.to_string(), emails);
    }

    pub fn set_body(&self, email_id: &str, body: &str) {
        self.state
            .lock()
            .unwrap()
            .bodies
            .insert(email_id.to_string(), body.to_string());
    }

    /// Every call fails until `go_online` is called.
    pub fn go_offline(&self) {
        self.state.lock().unwrap().offline = true;
    }

    pub fn go_online(&self) {
        self.state.lock().unwrap().offline = false;
    }

    /// Calls whose log entry starts with `prefix` fail.
    pub fn fail(&self, prefix: &str) {
        self.state.lock().unwrap().failing.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    /// Calls naming `id` report it as not found.
    pub fn mark_missing(&self, id: &str) {
        self.state.lock().unwrap().missing.insert(id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls excluding reads.
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("fetch"))
            .collect()
    }

    fn record(&self, call: String, id: Option<&str>) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        if state.offline {
            return Err(RemoteError::failed("network unreachable"));
        }
        if state.failing.iter().any(|p| call.starts_with(p.as_str())) {
            return Err(RemoteError::failed(format!("{} rejected", call)));
        }
        if let Some(id) = id {
            if state.missing.contains(id) {
                return Err(RemoteError::NotFound(id.to_string()));
            }
        }
        Ok(())
    }

    fn mint(&self, prefix: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        format!("{}{}", prefix, state.next_id)
    }
}

#[async_trait]
impl RemoteAdapter for FakeRemote {
    async fn fetch_mailboxes(&self) -> RemoteResult<Vec<Mailbox>> {
        self.record("fetch_mailboxes".to_string(), None)?;
        Ok(self.state.lock().unwrap().mailboxes.clone())
    }

    async fn fetch_emails(&self, mailbox_id: &str, offset: usize) -> RemoteResult<Vec<Email>> {
        self.record(format!("fetch_emails:{}:{}", mailbox_id, offset), None)?;
        let state = self.state.lock().unwrap();
        let all = state.emails.get(mailbox_id).cloned().unwrap_or_default();
        Ok(all.into_iter().skip(offset).take(PAGE_SIZE).collect())
    }

    async fn fetch_email_body(&self, email_id: &str) -> RemoteResult<String> {
        self.record(format!("fetch_body:{}", email_id), Some(email_id))?;
        self.state
            .lock()
            .unwrap()
            .bodies
            .get(email_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(email_id.to_string()))
    }

    async fn send_email(
        &self,
        draft_id: Option<&str>,
        _from: &str,
        to: &str,
        _subject: &str,
        _body: &str,
    ) -> RemoteResult<String> {
        self.record(format!("send:{}:{}", draft_id.unwrap_or("-"), to), draft_id)?;
        Ok(self.mint("S"))
    }

    async fn save_draft(
        &self,
        draft_id: Option<&str>,
        _from: &str,
        _to: &str,
        _subject: &str,
        _body: &str,
    ) -> RemoteResult<String> {
        self.record(format!("save_draft:{}", draft_id.unwrap_or("-")), draft_id)?;
        Ok(self.mint("D"))
    }

    async fn delete_email(&self, email_id: &str) -> RemoteResult<()> {
        self.record(format!("delete:{}", email_id), Some(email_id))
    }

    async fn move_email(&self, email_id: &str, from: &str, to: &str) -> RemoteResult<()> {
        self.record(format!("move:{}:{}:{}", email_id, from, to), Some(email_id))
    }

    async fn set_unread(&self, email_id: &str, unread: bool) -> RemoteResult<()> {
        self.record(format!("set_unread:{}:{}", email_id, unread), Some(email_id))
    }

    async fn set_flagged(&self, email_id: &str, flagged: bool) -> RemoteResult<()> {
        self.record(format!("set_flagged:{}:{}", email_id, flagged), Some(email_id))
    }
}
