use crate::cli::{Cli, Command, Toggle};
use crate::config::AppDefaults;
use crate::errors::SyncError;
use crate::remote::Unconfigured;
use crate::storage::Database;
use crate::sync::SyncCoordinator;
use crate::types::{is_local_draft_id, Mode};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Runs one inspector command against the cache. No remote service is wired
/// in here, so every read is served offline.
pub async fn run(cli: Cli, defaults: AppDefaults) -> Result<()> {
    let db = match cli.data_dir.as_ref().or(defaults.data_dir.as_ref()) {
        Some(dir) => {
            check_data_dir(dir)?;
            Database::open_in(dir).await?
        }
        None => Database::new_default().await?,
    };
    let db = Arc::new(db);
    info!(path = %db.path().display(), "Using SQLite store");

    let coordinator = SyncCoordinator::new(db.clone(), Arc::new(Unconfigured))
        .with_default_offline(defaults.offline);

    let outcome = execute(&coordinator, cli.command).await;
    db.close().await;

    match outcome {
        Err(SyncError::NotFoundOffline(what)) => {
            println!("{} is not in the local cache yet.", what);
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

async fn execute(coordinator: &SyncCoordinator, command: Command) -> Result<(), SyncError> {
    let db = coordinator.store();
    match command {
        Command::Mailboxes => {
            for mb in coordinator.load_mailboxes(Mode::Offline).await? {
                let role = match mb.role.as_str() {
                    "" => String::new(),
                    role => format!(" [{}]", role),
                };
                println!("{:<24} {}{} ({} unread)", mb.id, mb.name, role, mb.unread_count);
            }
        }
        Command::Emails { mailbox, offset } => {
            let page = coordinator
                .load_emails(Mode::Offline, &mailbox, offset)
                .await?;
            if page.emails.is_empty() {
                println!("No cached emails in {}", mailbox);
            }
            for (i, email) in page.emails.iter().enumerate() {
                let status = if email.unread { "U" } else { "R" };
                let flag = if email.flagged { "*" } else { " " };
                let subject = if email.subject.is_empty() {
                    "(No Subject)"
                } else {
                    email.subject.as_str()
                };
                println!(
                    "{}. [{}] [{}{}] {}",
                    offset + i + 1,
                    format_date(&email.date),
                    status,
                    flag,
                    subject
                );
                println!("   Id: {}", email.id);
                println!("   From: {}", email.from);
                if !email.preview.is_empty() {
                    println!("   Preview: {}", truncate(&email.preview, 100));
                }
            }
            if page.has_more {
                println!(
                    "\nMore may be cached: offmail emails {} --offset {}",
                    mailbox,
                    offset + page.emails.len()
                );
            }
        }
        Command::Body { email } => {
            println!("{}", coordinator.load_body(Mode::Offline, &email).await?);
        }
        Command::Pending => {
            let actions = db.get_pending_actions().await?;
            if actions.is_empty() {
                println!("No pending actions.");
            }
            for action in actions {
                let queued = DateTime::<Utc>::from_timestamp(action.created_at, 0)
                    .map(|dt| format_date(&dt))
                    .unwrap_or_else(|| "Unknown".to_string());
                println!(
                    "#{} {:<10} {} (queued {})",
                    action.id,
                    action.kind,
                    action.target.as_deref().unwrap_or("-"),
                    queued
                );
            }
        }
        Command::Drafts => {
            let drafts = db.get_local_drafts().await?;
            if drafts.is_empty() {
                println!("No local drafts.");
            }
            for draft in drafts {
                let subject = if draft.subject.is_empty() {
                    "(No Subject)"
                } else {
                    draft.subject.as_str()
                };
                println!("{}  To: {}  {}", draft.id, draft.to, subject);
            }
        }
        Command::DiscardDraft { id } => {
            if !is_local_draft_id(&id) {
                return Err(SyncError::validation(format!(
                    "{} is not a local draft id",
                    id
                )));
            }
            let dropped = db.discard_local_draft(&id).await?;
            println!("Discarded {} ({} queued action(s) dropped)", id, dropped);
        }
        Command::Offline { state } => {
            coordinator.set_offline_mode(state == Toggle::On).await?;
            println!(
                "Offline mode {}",
                if state == Toggle::On { "on" } else { "off" }
            );
        }
        Command::Status => {
            let mode = coordinator.mode().await?;
            let mailboxes = db.get_mailboxes().await?;
            let pending = db.count_pending_actions().await?;
            let drafts = db.get_local_drafts().await?;
            println!("Store:        {}", db.path().display());
            println!("Offline mode: {}", if mode.is_offline() { "on" } else { "off" });
            println!("Mailboxes:    {}", mailboxes.len());
            println!("Pending:      {}", pending);
            println!("Local drafts: {}", drafts.len());
        }
    }
    Ok(())
}

fn format_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let truncated: String = text.chars().take(max).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

fn check_data_dir(path: &std::path::Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        bail!("{} exists and is not a directory", path.display());
    }
    Ok(())
}
