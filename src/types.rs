use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix for draft ids minted on this device. Ids with this prefix are never
/// handed to the remote service.
pub const LOCAL_DRAFT_PREFIX: &str = "local-";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MailboxRole {
    Inbox,
    Archive,
    Drafts,
    Sent,
    Trash,
    Custom(String),
}

impl MailboxRole {
    pub fn as_str(&self) -> &str {
        match self {
            MailboxRole::Inbox => "inbox",
            MailboxRole::Archive => "archive",
            MailboxRole::Drafts => "drafts",
            MailboxRole::Sent => "sent",
            MailboxRole::Trash => "trash",
            MailboxRole::Custom(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "inbox" => MailboxRole::Inbox,
            "archive" => MailboxRole::Archive,
            "drafts" => MailboxRole::Drafts,
            "sent" => MailboxRole::Sent,
            "trash" => MailboxRole::Trash,
            other => MailboxRole::Custom(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox {
    pub id: String,
    pub name: String,
    pub role: MailboxRole,
    pub parent_id: Option<String>,
    pub sort_order: i64,
    pub unread_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Email {
    pub id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub reply_to: String,
    pub preview: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub date: DateTime<Utc>,
    pub unread: bool,
    pub flagged: bool,
    pub draft: bool,
    pub mailbox_ids: Vec<String>,
    pub updated_at: i64,
}

impl Email {
    /// Bare row with the given id, date and membership; every other field empty.
    pub fn new(id: impl Into<String>, date: DateTime<Utc>, mailbox_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            subject: String::new(),
            from: String::new(),
            to: String::new(),
            cc: String::new(),
            bcc: String::new(),
            reply_to: String::new(),
            preview: String::new(),
            body_text: None,
            body_html: None,
            date,
            unread: false,
            flagged: false,
            draft: false,
            mailbox_ids,
            updated_at: now_ts(),
        }
    }
}

/// Message contents handed to send / save-draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftMessage {
    /// Existing draft this message replaces: a remote draft id, a local draft
    /// id, or `None` for a fresh message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl DraftMessage {
    pub fn preview(&self) -> String {
        let first = self
            .body
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("");
        first.trim().chars().take(200).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalDraft {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl LocalDraft {
    pub fn new_id() -> String {
        format!("{}{}", LOCAL_DRAFT_PREFIX, uuid::Uuid::new_v4())
    }

    pub fn to_message(&self) -> DraftMessage {
        DraftMessage {
            draft_id: Some(self.id.clone()),
            from: self.from.clone(),
            to: self.to.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
        }
    }
}

pub fn is_local_draft_id(id: &str) -> bool {
    id.starts_with(LOCAL_DRAFT_PREFIX)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Send,
    SaveDraft,
    Delete,
    Move,
    SetFlags,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Send => "send",
            ActionKind::SaveDraft => "save_draft",
            ActionKind::Delete => "delete",
            ActionKind::Move => "move",
            ActionKind::SetFlags => "set_flags",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "send" => Some(ActionKind::Send),
            "save_draft" => Some(ActionKind::SaveDraft),
            "delete" => Some(ActionKind::Delete),
            "move" => Some(ActionKind::Move),
            "set_flags" => Some(ActionKind::SetFlags),
            _ => None,
        }
    }

    /// Whether actions of this kind must name the email they act on.
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            ActionKind::Delete | ActionKind::Move | ActionKind::SetFlags
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a queued action needs to be replayed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    Send(DraftMessage),
    SaveDraft(DraftMessage),
    Delete,
    Move {
        from_mailbox: String,
        to_mailbox: String,
    },
    SetFlags {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unread: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flagged: Option<bool>,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::Send(_) => ActionKind::Send,
            ActionPayload::SaveDraft(_) => ActionKind::SaveDraft,
            ActionPayload::Delete => ActionKind::Delete,
            ActionPayload::Move { .. } => ActionKind::Move,
            ActionPayload::SetFlags { .. } => ActionKind::SetFlags,
        }
    }
}

/// A pending action before it has been assigned a queue position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPendingAction {
    pub target: Option<String>,
    pub payload: ActionPayload,
}

impl NewPendingAction {
    pub fn new(target: Option<String>, payload: ActionPayload) -> Self {
        Self { target, payload }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    /// Checks the target and payload agree with the action kind.
    pub fn validate(&self) -> Result<(), String> {
        let kind = self.kind();
        let target = self.target.as_deref().map(str::trim).unwrap_or("");
        if kind.requires_target() && target.is_empty() {
            return Err(format!("{} action requires a target email id", kind));
        }
        match &self.payload {
            ActionPayload::Move {
                from_mailbox,
                to_mailbox,
            } => {
                if from_mailbox.trim().is_empty() || to_mailbox.trim().is_empty() {
                    return Err("move action requires source and target mailboxes".into());
                }
                if from_mailbox == to_mailbox {
                    return Err("move action source and target mailbox are the same".into());
                }
            }
            ActionPayload::SetFlags { unread, flagged } => {
                if unread.is_none() && flagged.is_none() {
                    return Err("set_flags action changes no flag".into());
                }
            }
            ActionPayload::Send(msg) => {
                if msg.to.trim().is_empty() {
                    return Err("send action requires a recipient".into());
                }
                if msg.from.trim().is_empty() {
                    return Err("send action requires a sender".into());
                }
            }
            ActionPayload::SaveDraft(_) | ActionPayload::Delete => {}
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAction {
    pub id: i64,
    pub kind: ActionKind,
    pub target: Option<String>,
    pub payload: ActionPayload,
    pub created_at: i64,
}

/// Whether a read may touch the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Online,
    Offline,
}

impl Mode {
    pub fn from_offline_flag(offline: bool) -> Self {
        if offline { Mode::Offline } else { Mode::Online }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Mode::Offline)
    }
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}
