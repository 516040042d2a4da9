use clap::{Parser, Subcommand, ValueEnum};

/// Inspect and manage the offline mail cache.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Use this data directory instead of the configured one.
    #[arg(long, global = true)]
    pub data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List cached mailboxes.
    Mailboxes,
    /// List one page of cached emails in a mailbox.
    Emails {
        mailbox: String,
        /// Skip this many emails (pages are 20 long).
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print the cached body of an email.
    Body { email: String },
    /// Show queued actions in replay order.
    Pending,
    /// List drafts that have not reached the server yet.
    Drafts,
    /// Drop a local draft and every action queued for it.
    DiscardDraft { id: String },
    /// Persist the offline toggle.
    Offline { state: Toggle },
    /// Summarize the cache.
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}
