use crate::errors::PartialWrite;
use crate::sanitize::render_cached_body;
use crate::types::{now_ts, Email, LocalDraft, Mailbox, MailboxRole};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dirs::home_dir;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::ops::ensure_pending_table;

const DB_FILE_NAME: &str = "offmail.db";

pub const OFFLINE_MODE_KEY: &str = "offline_mode";

/// Membership is aggregated from the junction table so a row never disagrees
/// with `email_mailboxes`.
const EMAIL_COLUMNS: &str = r#"
    e.id, e.thread_id, e.subject, e.from_addr, e.to_addr, e.cc_addr, e.bcc_addr,
    e.reply_to, e.preview, e.body_text, e.body_html, e.date, e.is_unread,
    e.is_flagged, e.is_draft, e.updated_at,
    (SELECT json_group_array(m.mailbox_id) FROM email_mailboxes m WHERE m.email_id = e.id)
        AS mailbox_ids
"#;

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    pub async fn new_default() -> Result<Self> {
        let base = default_data_dir()?;
        Self::open_in(&base).await
    }

    pub async fn open_in(dir: &Path) -> Result<Self> {
        Self::open(&dir.join(DB_FILE_NAME)).await
    }

    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to sqlite at {}", db_path.display()))?;

        let db = Database {
            pool,
            path: db_path.to_path_buf(),
        };
        db.migrate().await?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Creates any missing table or index. Safe to run on every start.
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mailboxes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT '',
                parent_id TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                unread_count INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY,
                thread_id TEXT,
                subject TEXT NOT NULL DEFAULT '',
                from_addr TEXT NOT NULL DEFAULT '',
                to_addr TEXT NOT NULL DEFAULT '',
                cc_addr TEXT NOT NULL DEFAULT '',
                bcc_addr TEXT NOT NULL DEFAULT '',
                reply_to TEXT NOT NULL DEFAULT '',
                preview TEXT NOT NULL DEFAULT '',
                body_text TEXT,
                body_html TEXT,
                date INTEGER NOT NULL,
                is_unread INTEGER NOT NULL DEFAULT 0,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                is_draft INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_emails_thread ON emails(thread_id);
            CREATE INDEX IF NOT EXISTS idx_emails_date ON emails(date DESC);

            CREATE TABLE IF NOT EXISTS email_mailboxes (
                email_id TEXT NOT NULL,
                mailbox_id TEXT NOT NULL,
                PRIMARY KEY (email_id, mailbox_id),
                FOREIGN KEY (email_id) REFERENCES emails(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_email_mailboxes_mailbox ON email_mailboxes(mailbox_id);

            CREATE TABLE IF NOT EXISTS local_drafts (
                id TEXT PRIMARY KEY,
                from_addr TEXT NOT NULL DEFAULT '',
                to_addr TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("running migrations")?;

        ensure_pending_table(&self.pool).await?;
        debug!(path = %self.path.display(), "Schema ready");
        Ok(())
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("reading config key {}", key))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("writing config key {}", key))?;
        Ok(())
    }

    pub async fn save_mailboxes(&self, mailboxes: &[Mailbox]) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await.context("beginning mailbox tx")?;
            let now = now_ts();
            for mb in mailboxes {
                sqlx::query(
                    r#"
                    INSERT INTO mailboxes (id, name, role, parent_id, sort_order, unread_count, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        role = excluded.role,
                        parent_id = excluded.parent_id,
                        sort_order = excluded.sort_order,
                        unread_count = excluded.unread_count,
                        updated_at = excluded.updated_at;
                    "#,
                )
                .bind(&mb.id)
                .bind(&mb.name)
                .bind(mb.role.as_str())
                .bind(&mb.parent_id)
                .bind(mb.sort_order)
                .bind(mb.unread_count)
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("upserting mailbox {}", mb.id))?;
            }
            tx.commit().await.context("committing mailbox tx")?;
            Ok(())
        }
        .await;
        result.map_err(aborted("saving mailboxes"))
    }

    pub async fn get_mailboxes(&self) -> Result<Vec<Mailbox>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, role, parent_id, sort_order, unread_count
            FROM mailboxes
            ORDER BY sort_order, name;
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("loading mailboxes")?;

        Ok(rows.iter().map(mailbox_from_row).collect())
    }

    pub async fn has_mailbox(&self, mailbox_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM mailboxes WHERE id = ?1")
            .bind(mailbox_id)
            .fetch_optional(&self.pool)
            .await
            .context("looking up mailbox")?;
        Ok(row.is_some())
    }

    pub async fn mailbox_by_role(&self, role: &MailboxRole) -> Result<Option<Mailbox>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, role, parent_id, sort_order, unread_count
            FROM mailboxes
            WHERE role = ?1
            ORDER BY sort_order, name
            LIMIT 1;
            "#,
        )
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("looking up {} mailbox", role.as_str()))?;
        Ok(row.as_ref().map(mailbox_from_row))
    }

    /// Upserts every email and replaces its membership with exactly the ids
    /// given. Callers must pass the complete membership set.
    pub async fn save_emails(&self, emails: &[Email]) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await.context("beginning email tx")?;
            for email in emails {
                upsert_email_tx(&mut tx, email).await?;
            }
            tx.commit().await.context("committing email tx")?;
            Ok(())
        }
        .await;
        result.map_err(aborted("saving emails"))
    }

    pub async fn get_emails(&self, mailbox_id: &str, offset: usize, limit: usize) -> Result<Vec<Email>> {
        let query = format!(
            r#"
            SELECT {}
            FROM emails e
            JOIN email_mailboxes em ON e.id = em.email_id
            WHERE em.mailbox_id = ?1
            ORDER BY e.date DESC, e.id ASC
            LIMIT ?2 OFFSET ?3;
            "#,
            EMAIL_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(mailbox_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("loading emails for mailbox {}", mailbox_id))?;

        rows.iter().map(email_from_row).collect()
    }

    pub async fn get_email(&self, email_id: &str) -> Result<Option<Email>> {
        let query = format!("SELECT {} FROM emails e WHERE e.id = ?1;", EMAIL_COLUMNS);
        let row = sqlx::query(&query)
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading email {}", email_id))?;
        row.as_ref().map(email_from_row).transpose()
    }

    /// Best cached body for display; `None` when the email itself is unknown.
    pub async fn get_email_body(&self, email_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body_text, body_html, preview FROM emails WHERE id = ?1")
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading body for {}", email_id))?;

        Ok(row.map(|r| {
            let text: Option<String> = r.get(0);
            let html: Option<String> = r.get(1);
            let preview: String = r.get(2);
            render_cached_body(text.as_deref(), html.as_deref(), Some(&preview))
        }))
    }

    pub async fn save_email_body(&self, email_id: &str, body: &str) -> Result<()> {
        let res = sqlx::query("UPDATE emails SET body_text = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(body)
            .bind(now_ts())
            .bind(email_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("caching body for {}", email_id))?;
        if res.rows_affected() == 0 {
            debug!(email = %email_id, "Body not cached; email row missing");
        }
        Ok(())
    }

    pub async fn save_email_html_body(&self, email_id: &str, html: &str) -> Result<()> {
        sqlx::query("UPDATE emails SET body_html = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(html)
            .bind(now_ts())
            .bind(email_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("caching html body for {}", email_id))?;
        Ok(())
    }

    pub async fn get_email_html_body(&self, email_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body_html FROM emails WHERE id = ?1")
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading html body for {}", email_id))?;
        Ok(row
            .and_then(|r| r.get::<Option<String>, _>(0))
            .filter(|html| !html.is_empty()))
    }

    pub async fn delete_email(&self, email_id: &str) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await.context("beginning delete tx")?;
            delete_email_tx(&mut tx, email_id).await?;
            tx.commit().await.context("committing delete tx")?;
            Ok(())
        }
        .await;
        result.map_err(aborted("deleting email"))
    }

    pub async fn move_email(&self, email_id: &str, from_mailbox: &str, to_mailbox: &str) -> Result<()> {
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await.context("beginning move tx")?;
            move_email_tx(&mut tx, email_id, from_mailbox, to_mailbox).await?;
            tx.commit().await.context("committing move tx")?;
            Ok(())
        }
        .await;
        result.map_err(aborted("moving email"))
    }

    pub async fn set_unread(&self, email_id: &str, unread: bool) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        set_unread_tx(&mut conn, email_id, unread).await
    }

    pub async fn set_flagged(&self, email_id: &str, flagged: bool) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        set_flagged_tx(&mut conn, email_id, flagged).await
    }

    pub async fn save_local_draft(&self, draft: &LocalDraft) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        upsert_local_draft_tx(&mut conn, draft).await
    }

    /// Newest edit first.
    pub async fn get_local_drafts(&self) -> Result<Vec<LocalDraft>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_addr, to_addr, subject, body, created_at, updated_at
            FROM local_drafts
            ORDER BY updated_at DESC, id ASC;
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("loading local drafts")?;
        Ok(rows.iter().map(local_draft_from_row).collect())
    }

    pub async fn get_local_draft(&self, id: &str) -> Result<Option<LocalDraft>> {
        let row = sqlx::query(
            r#"
            SELECT id, from_addr, to_addr, subject, body, created_at, updated_at
            FROM local_drafts
            WHERE id = ?1;
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading local draft {}", id))?;
        Ok(row.as_ref().map(local_draft_from_row))
    }

    /// Removes the draft only; queued actions naming it are left alone. See
    /// [`Database::discard_local_draft`] for the user-facing discard.
    pub async fn delete_local_draft(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_drafts WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting local draft {}", id))?;
        Ok(())
    }
}

/// Tags a failed multi-row write so callers can tell it apart from a plain
/// storage error. The transaction has already rolled back when this runs.
pub(crate) fn aborted(stage: &'static str) -> impl FnOnce(anyhow::Error) -> anyhow::Error {
    move |err| {
        warn!(stage, error = %err, "Local transaction rolled back");
        err.context(PartialWrite(stage))
    }
}

pub(crate) async fn upsert_email_tx(conn: &mut SqliteConnection, email: &Email) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO emails (id, thread_id, subject, from_addr, to_addr, cc_addr, bcc_addr, reply_to,
                            preview, body_text, body_html, date, is_unread, is_flagged, is_draft, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ON CONFLICT(id) DO UPDATE SET
            thread_id = excluded.thread_id,
            subject = excluded.subject,
            from_addr = excluded.from_addr,
            to_addr = excluded.to_addr,
            cc_addr = excluded.cc_addr,
            bcc_addr = excluded.bcc_addr,
            reply_to = excluded.reply_to,
            preview = excluded.preview,
            body_text = COALESCE(excluded.body_text, emails.body_text),
            body_html = COALESCE(excluded.body_html, emails.body_html),
            date = excluded.date,
            is_unread = excluded.is_unread,
            is_flagged = excluded.is_flagged,
            is_draft = excluded.is_draft,
            updated_at = excluded.updated_at;
        "#,
    )
    .bind(&email.id)
    .bind(&email.thread_id)
    .bind(&email.subject)
    .bind(&email.from)
    .bind(&email.to)
    .bind(&email.cc)
    .bind(&email.bcc)
    .bind(&email.reply_to)
    .bind(&email.preview)
    .bind(&email.body_text)
    .bind(&email.body_html)
    .bind(email.date.timestamp())
    .bind(email.unread)
    .bind(email.flagged)
    .bind(email.draft)
    .bind(now_ts())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("upserting email {}", email.id))?;

    sqlx::query("DELETE FROM email_mailboxes WHERE email_id = ?1")
        .bind(&email.id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("clearing membership of {}", email.id))?;

    for mailbox_id in &email.mailbox_ids {
        sqlx::query("INSERT OR IGNORE INTO email_mailboxes (email_id, mailbox_id) VALUES (?1, ?2)")
            .bind(&email.id)
            .bind(mailbox_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("linking {} to mailbox {}", email.id, mailbox_id))?;
    }
    Ok(())
}

pub(crate) async fn delete_email_tx(conn: &mut SqliteConnection, email_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM email_mailboxes WHERE email_id = ?1")
        .bind(email_id)
        .execute(&mut *conn)
        .await
        .context("deleting membership")?;
    sqlx::query("DELETE FROM emails WHERE id = ?1")
        .bind(email_id)
        .execute(&mut *conn)
        .await
        .context("deleting email")?;
    Ok(())
}

pub(crate) async fn move_email_tx(
    conn: &mut SqliteConnection,
    email_id: &str,
    from_mailbox: &str,
    to_mailbox: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM email_mailboxes WHERE email_id = ?1 AND mailbox_id = ?2")
        .bind(email_id)
        .bind(from_mailbox)
        .execute(&mut *conn)
        .await
        .context("removing source membership")?;
    // Only link rows that are actually cached.
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO email_mailboxes (email_id, mailbox_id)
        SELECT id, ?2 FROM emails WHERE id = ?1;
        "#,
    )
    .bind(email_id)
    .bind(to_mailbox)
    .execute(&mut *conn)
    .await
    .context("adding target membership")?;
    sqlx::query("UPDATE emails SET updated_at = ?1 WHERE id = ?2")
        .bind(now_ts())
        .bind(email_id)
        .execute(&mut *conn)
        .await
        .context("touching moved email")?;
    Ok(())
}

pub(crate) async fn set_unread_tx(conn: &mut SqliteConnection, email_id: &str, unread: bool) -> Result<()> {
    sqlx::query("UPDATE emails SET is_unread = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(unread)
        .bind(now_ts())
        .bind(email_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("updating unread flag of {}", email_id))?;
    Ok(())
}

pub(crate) async fn set_flagged_tx(conn: &mut SqliteConnection, email_id: &str, flagged: bool) -> Result<()> {
    sqlx::query("UPDATE emails SET is_flagged = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(flagged)
        .bind(now_ts())
        .bind(email_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("updating flagged flag of {}", email_id))?;
    Ok(())
}

pub(crate) async fn upsert_local_draft_tx(conn: &mut SqliteConnection, draft: &LocalDraft) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO local_drafts (id, from_addr, to_addr, subject, body, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            from_addr = excluded.from_addr,
            to_addr = excluded.to_addr,
            subject = excluded.subject,
            body = excluded.body,
            updated_at = excluded.updated_at;
        "#,
    )
    .bind(&draft.id)
    .bind(&draft.from)
    .bind(&draft.to)
    .bind(&draft.subject)
    .bind(&draft.body)
    .bind(draft.created_at)
    .bind(draft.updated_at)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("saving local draft {}", draft.id))?;
    Ok(())
}

fn mailbox_from_row(row: &SqliteRow) -> Mailbox {
    Mailbox {
        id: row.get(0),
        name: row.get(1),
        role: MailboxRole::parse(&row.get::<String, _>(2)),
        parent_id: row.get(3),
        sort_order: row.get(4),
        unread_count: row.get(5),
    }
}

fn email_from_row(row: &SqliteRow) -> Result<Email> {
    let ids_json: String = row.try_get("mailbox_ids")?;
    let mut mailbox_ids: Vec<String> =
        serde_json::from_str(&ids_json).context("decoding mailbox membership")?;
    mailbox_ids.sort();

    let date_ts: i64 = row.try_get("date")?;
    Ok(Email {
        id: row.try_get("id")?,
        thread_id: row.try_get("thread_id")?,
        subject: row.try_get("subject")?,
        from: row.try_get("from_addr")?,
        to: row.try_get("to_addr")?,
        cc: row.try_get("cc_addr")?,
        bcc: row.try_get("bcc_addr")?,
        reply_to: row.try_get("reply_to")?,
        preview: row.try_get("preview")?,
        body_text: row.try_get("body_text")?,
        body_html: row.try_get("body_html")?,
        date: DateTime::<Utc>::from_timestamp(date_ts, 0).unwrap_or_default(),
        unread: row.try_get("is_unread")?,
        flagged: row.try_get("is_flagged")?,
        draft: row.try_get("is_draft")?,
        mailbox_ids,
        updated_at: row.try_get("updated_at")?,
    })
}

fn local_draft_from_row(row: &SqliteRow) -> LocalDraft {
    LocalDraft {
        id: row.get(0),
        from: row.get(1),
        to: row.get(2),
        subject: row.get(3),
        body: row.get(4),
        created_at: row.get(5),
        updated_at: row.get(6),
    }
}

pub(crate) fn default_data_dir() -> Result<PathBuf> {
    if let Ok(custom) = env::var("OFFMAIL_DATA_DIR") {
        let path = PathBuf::from(custom);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating OFFMAIL_DATA_DIR at {}", path.display()))?;
        return Ok(path);
    }

    if let Some(home) = home_dir() {
        let path = home.join(".offmail");
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        } else {
            warn!(
                "Unable to create {}/.offmail; falling back to workspace-local storage",
                home.display()
            );
        }
    }

    let cwd = env::current_dir().context("determining current directory")?;
    let path = cwd.join("offmail-data");
    std::fs::create_dir_all(&path)
        .with_context(|| format!("creating fallback data directory {}", path.display()))?;
    Ok(path)
}
