//! Runs each user intent as a task and reports back over a channel.
//!
//! Reads are spawned individually and may overlap. Mutations, queueing and
//! replay go through a single worker, one at a time, in the order they were
//! issued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use super::{EmailPage, Mutation, MutationOutcome, ReplayReport, SyncCoordinator};
use crate::errors::SyncResult;
use crate::types::{Mailbox, Mode};

pub type RequestId = u64;

#[derive(Debug)]
pub enum Event {
    Mailboxes(SyncResult<Vec<Mailbox>>),
    Emails {
        mailbox_id: String,
        offset: usize,
        result: SyncResult<EmailPage>,
    },
    Body {
        email_id: String,
        result: SyncResult<String>,
    },
    Refreshed {
        mailbox_id: String,
        mailboxes: SyncResult<Vec<Mailbox>>,
        emails: SyncResult<EmailPage>,
    },
    Mutation {
        mutation: Mutation,
        result: SyncResult<MutationOutcome>,
    },
    Replay(SyncResult<ReplayReport>),
}

/// A result paired with the request that produced it.
#[derive(Debug)]
pub struct Tagged {
    pub request: RequestId,
    pub event: Event,
}

type Work = Box<dyn FnOnce(Arc<SyncCoordinator>) -> BoxFuture<'static, Event> + Send>;

struct Job {
    request: RequestId,
    work: Work,
}

pub struct Dispatcher {
    coordinator: Arc<SyncCoordinator>,
    next_request: AtomicU64,
    tx: mpsc::UnboundedSender<Tagged>,
    writes: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Must be called from within a tokio runtime; the mutation worker is
    /// spawned here and lives until the dispatcher is dropped.
    pub fn new(coordinator: Arc<SyncCoordinator>) -> (Self, mpsc::UnboundedReceiver<Tagged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (writes, jobs) = mpsc::unbounded_channel();
        tokio::spawn(run_mutations(coordinator.clone(), jobs, tx.clone()));
        let dispatcher = Self {
            coordinator,
            next_request: AtomicU64::new(1),
            tx,
            writes,
        };
        (dispatcher, rx)
    }

    pub fn load_mailboxes(&self, mode: Mode) -> RequestId {
        self.spawn(move |c| async move {
            Event::Mailboxes(c.load_mailboxes(mode).await)
        })
    }

    pub fn load_emails(&self, mode: Mode, mailbox_id: &str, offset: usize) -> RequestId {
        let mailbox_id = mailbox_id.to_string();
        self.spawn(move |c| async move {
            let result = c.load_emails(mode, &mailbox_id, offset).await;
            Event::Emails {
                mailbox_id,
                offset,
                result,
            }
        })
    }

    pub fn load_body(&self, mode: Mode, email_id: &str) -> RequestId {
        let email_id = email_id.to_string();
        self.spawn(move |c| async move {
            let result = c.load_body(mode, &email_id).await;
            Event::Body { email_id, result }
        })
    }

    pub fn refresh(&self, mailbox_id: &str) -> RequestId {
        let mailbox_id = mailbox_id.to_string();
        self.spawn(move |c| async move {
            let (mailboxes, emails) = c.refresh(&mailbox_id).await;
            Event::Refreshed {
                mailbox_id,
                mailboxes,
                emails,
            }
        })
    }

    pub fn mutate(&self, mode: Mode, mutation: Mutation) -> RequestId {
        self.enqueue(move |c| async move {
            let result = c.mutate(mode, mutation.clone()).await;
            Event::Mutation { mutation, result }
        })
    }

    pub fn queue(&self, mutation: Mutation) -> RequestId {
        self.enqueue(move |c| async move {
            let result = c.queue_pending_action(mutation.clone()).await;
            Event::Mutation { mutation, result }
        })
    }

    pub fn replay(&self) -> RequestId {
        self.enqueue(move |c| async move { Event::Replay(c.replay_pending().await) })
    }

    fn spawn<F, Fut>(&self, work: F) -> RequestId
    where
        F: FnOnce(Arc<SyncCoordinator>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Event> + Send + 'static,
    {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let coordinator = self.coordinator.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let event = work(coordinator).await;
            deliver(&tx, request, event);
        });
        request
    }

    fn enqueue<F, Fut>(&self, work: F) -> RequestId
    where
        F: FnOnce(Arc<SyncCoordinator>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Event> + Send + 'static,
    {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            request,
            work: Box::new(move |c| -> BoxFuture<'static, Event> { Box::pin(work(c)) }),
        };
        if self.writes.send(job).is_err() {
            debug!(request, "Mutation dropped; worker stopped");
        }
        request
    }
}

async fn run_mutations(
    coordinator: Arc<SyncCoordinator>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    tx: mpsc::UnboundedSender<Tagged>,
) {
    while let Some(job) = jobs.recv().await {
        let event = (job.work)(coordinator.clone()).await;
        deliver(&tx, job.request, event);
    }
    debug!("Mutation worker stopped");
}

fn deliver(tx: &mpsc::UnboundedSender<Tagged>, request: RequestId, event: Event) {
    if tx.send(Tagged { request, event }).is_err() {
        debug!(request, "Result dropped; receiver closed");
    }
}
