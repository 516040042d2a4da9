//! Remote adapter seam.
//!
//! The wire client for the mail service lives outside this crate; the
//! coordinator only sees this trait. Timeouts and authentication are the
//! adapter's business.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Email, Mailbox};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{0} not found on server")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

impl RemoteError {
    pub fn failed(msg: impl Into<String>) -> Self {
        RemoteError::Failed(msg.into())
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn fetch_mailboxes(&self) -> RemoteResult<Vec<Mailbox>>;

    /// One page of at most [`crate::sync::PAGE_SIZE`] emails, newest first.
    async fn fetch_emails(&self, mailbox_id: &str, offset: usize) -> RemoteResult<Vec<Email>>;

    async fn fetch_email_body(&self, email_id: &str) -> RemoteResult<String>;

    /// Returns the id of the sent message.
    async fn send_email(
        &self,
        draft_id: Option<&str>,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> RemoteResult<String>;

    /// Returns the id of the stored draft, which may differ from `draft_id`.
    async fn save_draft(
        &self,
        draft_id: Option<&str>,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> RemoteResult<String>;

    async fn delete_email(&self, email_id: &str) -> RemoteResult<()>;

    async fn move_email(
        &self,
        email_id: &str,
        from_mailbox: &str,
        to_mailbox: &str,
    ) -> RemoteResult<()>;

    async fn set_unread(&self, email_id: &str, unread: bool) -> RemoteResult<()>;

    async fn set_flagged(&self, email_id: &str, flagged: bool) -> RemoteResult<()>;
}

/// Adapter used when no remote service is wired in. Every call fails, so only
/// offline reads and queueing succeed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

impl Unconfigured {
    fn err<T>() -> RemoteResult<T> {
        Err(RemoteError::failed("no remote adapter configured"))
    }
}

#[async_trait]
impl RemoteAdapter for Unconfigured {
    async fn fetch_mailboxes(&self) -> RemoteResult<Vec<Mailbox>> {
        Self::err()
    }

    async fn fetch_emails(&self, _mailbox_id: &str, _offset: usize) -> RemoteResult<Vec<Email>> {
        Self::err()
    }

    async fn fetch_email_body(&self, _email_id: &str) -> RemoteResult<String> {
        Self::err()
    }

    async fn send_email(
        &self,
        _draft_id: Option<&str>,
        _from: &str,
        _to: &str,
        _subject: &str,
        _body: &str,
    ) -> RemoteResult<String> {
        Self::err()
    }

    async fn save_draft(
        &self,
        _draft_id: Option<&str>,
        _from: &str,
        _to: &str,
        _subject: &str,
        _body: &str,
    ) -> RemoteResult<String> {
        Self::err()
    }

    async fn delete_email(&self, _email_id: &str) -> RemoteResult<()> {
        Self::err()
    }

    async fn move_email(&self, _email_id: &str, _from: &str, _to: &str) -> RemoteResult<()> {
        Self::err()
    }

    async fn set_unread(&self, _email_id: &str, _unread: bool) -> RemoteResult<()> {
        Self::err()
    }

    async fn set_flagged(&self, _email_id: &str, _flagged: bool) -> RemoteResult<()> {
        Self::err()
    }
}
