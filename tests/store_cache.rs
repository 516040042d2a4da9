mod common;

use common::{at, email, mailbox, open_store, run_sql};

use offmail::errors::SyncError;
use offmail::sanitize::{BODY_UNAVAILABLE_OFFLINE, DEGRADED_BODY_PREFIX};
use offmail::storage::{Database, LocalEffect};
use offmail::types::{ActionKind, ActionPayload, LocalDraft, MailboxRole, NewPendingAction};

fn ids(emails: &[offmail::types::Email]) -> Vec<&str> {
    emails.iter().map(|e| e.id.as_str()).collect()
}

#[tokio::test]
async fn mailboxes_round_trip_in_sort_order() {
    let (_dir, db) = open_store().await;
    let mut work = mailbox("m3", "Work", MailboxRole::Custom("work".into()), 1);
    work.parent_id = Some("m1".into());
    work.unread_count = 4;
    let saved = vec![
        work.clone(),
        mailbox("m2", "Archive", MailboxRole::Archive, 1),
        mailbox("m1", "Inbox", MailboxRole::Inbox, 0),
    ];
    db.save_mailboxes(&saved).await.unwrap();

    let loaded = db.get_mailboxes().await.unwrap();
    let names: Vec<&str> = loaded.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Inbox", "Archive", "Work"]);
    assert_eq!(loaded[2], work);

    let archive = db.mailbox_by_role(&MailboxRole::Archive).await.unwrap();
    assert_eq!(archive.map(|m| m.id), Some("m2".to_string()));
    assert!(db.mailbox_by_role(&MailboxRole::Sent).await.unwrap().is_none());
}

#[tokio::test]
async fn emails_listed_newest_first() {
    let (_dir, db) = open_store().await;
    db.save_mailboxes(&[mailbox("m1", "Inbox", MailboxRole::Inbox, 0)])
        .await
        .unwrap();
    db.save_emails(&[
        email("e2", &["m1"], at(1, 0)),
        email("e1", &["m1"], at(2, 0)),
    ])
    .await
    .unwrap();

    let page = db.get_emails("m1", 0, 20).await.unwrap();
    assert_eq!(ids(&page), vec!["e1", "e2"]);
}

#[tokio::test]
async fn membership_is_replaced_not_merged() {
    let (_dir, db) = open_store().await;
    db.save_emails(&[email("e1", &["inbox", "work"], at(1, 0))])
        .await
        .unwrap();
    assert_eq!(ids(&db.get_emails("work", 0, 20).await.unwrap()), vec!["e1"]);

    db.save_emails(&[email("e1", &["archive"], at(1, 0))])
        .await
        .unwrap();

    assert!(db.get_emails("inbox", 0, 20).await.unwrap().is_empty());
    assert!(db.get_emails("work", 0, 20).await.unwrap().is_empty());
    let cached = db.get_email("e1").await.unwrap().unwrap();
    assert_eq!(cached.mailbox_ids, vec!["archive".to_string()]);
}

#[tokio::test]
async fn saving_twice_creates_no_duplicates() {
    let (_dir, db) = open_store().await;
    let batch = vec![
        email("e1", &["inbox"], at(3, 0)),
        email("e2", &["inbox", "work"], at(2, 0)),
    ];
    db.save_emails(&batch).await.unwrap();
    db.save_emails(&batch).await.unwrap();

    assert_eq!(ids(&db.get_emails("inbox", 0, 20).await.unwrap()), vec!["e1", "e2"]);
    assert_eq!(ids(&db.get_emails("work", 0, 20).await.unwrap()), vec!["e2"]);
}

#[tokio::test]
async fn same_date_breaks_ties_by_id() {
    let (_dir, db) = open_store().await;
    db.save_emails(&[
        email("b", &["inbox"], at(1, 0)),
        email("a", &["inbox"], at(1, 0)),
        email("c", &["inbox"], at(1, 5)),
    ])
    .await
    .unwrap();
    assert_eq!(
        ids(&db.get_emails("inbox", 0, 20).await.unwrap()),
        vec!["c", "a", "b"]
    );
    assert_eq!(ids(&db.get_emails("inbox", 1, 1).await.unwrap()), vec!["a"]);
}

#[tokio::test]
async fn body_falls_back_to_marked_preview_then_sentinel() {
    let (_dir, db) = open_store().await;
    let mut with_preview = email("e1", &["inbox"], at(1, 0));
    with_preview.preview = "See you at noon".into();
    let bare = email("e2", &["inbox"], at(1, 1));
    db.save_emails(&[with_preview, bare]).await.unwrap();

    let degraded = db.get_email_body("e1").await.unwrap().unwrap();
    assert!(degraded.starts_with(DEGRADED_BODY_PREFIX));
    assert!(degraded.contains("See you at noon"));

    let sentinel = db.get_email_body("e2").await.unwrap().unwrap();
    assert_eq!(sentinel, BODY_UNAVAILABLE_OFFLINE);

    assert!(db.get_email_body("nope").await.unwrap().is_none());

    db.save_email_body("e1", "Full text").await.unwrap();
    assert_eq!(db.get_email_body("e1").await.unwrap().unwrap(), "Full text");
}

#[tokio::test]
async fn html_body_is_flattened_when_no_text_cached() {
    let (_dir, db) = open_store().await;
    db.save_emails(&[email("e1", &["inbox"], at(1, 0))])
        .await
        .unwrap();
    db.save_email_html_body("e1", "<p>Hello <b>world</b></p>")
        .await
        .unwrap();

    assert!(db.get_email_html_body("e1").await.unwrap().is_some());
    let body = db.get_email_body("e1").await.unwrap().unwrap();
    assert!(body.contains("Hello"));
    assert!(!body.starts_with(DEGRADED_BODY_PREFIX));
}

#[tokio::test]
async fn resaving_headers_keeps_cached_body() {
    let (_dir, db) = open_store().await;
    let mut full = email("e1", &["inbox"], at(1, 0));
    full.body_text = Some("Cached body".into());
    db.save_emails(&[full]).await.unwrap();

    let mut headers_only = email("e1", &["inbox"], at(1, 0));
    headers_only.unread = true;
    db.save_emails(&[headers_only]).await.unwrap();

    let cached = db.get_email("e1").await.unwrap().unwrap();
    assert!(cached.unread);
    assert_eq!(cached.body_text.as_deref(), Some("Cached body"));
}

#[tokio::test]
async fn pending_action_add_then_remove() {
    let (_dir, db) = open_store().await;
    let action = NewPendingAction::new(
        Some("e1".into()),
        ActionPayload::Move {
            from_mailbox: "inbox".into(),
            to_mailbox: "archive".into(),
        },
    );
    let id = db.add_pending_action(&action).await.unwrap();

    let queued = db.get_pending_actions().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, id);
    assert_eq!(queued[0].kind, ActionKind::Move);
    assert_eq!(queued[0].target.as_deref(), Some("e1"));
    assert_eq!(queued[0].payload, action.payload);

    db.remove_pending_action(id).await.unwrap();
    assert!(db.get_pending_actions().await.unwrap().is_empty());
}

#[tokio::test]
async fn pending_actions_keep_creation_order() {
    let (_dir, db) = open_store().await;
    for target in ["e3", "e1", "e2"] {
        db.add_pending_action(&NewPendingAction::new(
            Some(target.into()),
            ActionPayload::Delete,
        ))
        .await
        .unwrap();
    }
    let targets: Vec<String> = db
        .get_pending_actions()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|a| a.target)
        .collect();
    assert_eq!(targets, vec!["e3", "e1", "e2"]);
    assert_eq!(db.count_pending_actions().await.unwrap(), 3);
}

#[tokio::test]
async fn invalid_pending_action_is_rejected() {
    let (_dir, db) = open_store().await;
    let untargeted = NewPendingAction::new(None, ActionPayload::Delete);
    let err = db.add_pending_action(&untargeted).await.unwrap_err();
    assert!(matches!(SyncError::from(err), SyncError::Validation(_)));

    let no_flags = NewPendingAction::new(
        Some("e1".into()),
        ActionPayload::SetFlags {
            unread: None,
            flagged: None,
        },
    );
    assert!(db.add_pending_action(&no_flags).await.is_err());
    assert_eq!(db.count_pending_actions().await.unwrap(), 0);
}

#[tokio::test]
async fn offline_effect_and_action_commit_together() {
    let (_dir, db) = open_store().await;
    db.save_emails(&[email("e1", &["inbox"], at(1, 0))])
        .await
        .unwrap();

    let effect = LocalEffect::MoveEmail {
        email_id: "e1".into(),
        from_mailbox: "inbox".into(),
        to_mailbox: "archive".into(),
    };
    let action = NewPendingAction::new(
        Some("e1".into()),
        ActionPayload::Move {
            from_mailbox: "inbox".into(),
            to_mailbox: "archive".into(),
        },
    );
    db.apply_offline(&effect, &action).await.unwrap();

    assert!(db.get_emails("inbox", 0, 20).await.unwrap().is_empty());
    assert_eq!(ids(&db.get_emails("archive", 0, 20).await.unwrap()), vec!["e1"]);
    assert_eq!(db.count_pending_actions().await.unwrap(), 1);

    // A rejected action leaves the local effect unapplied.
    let bad = NewPendingAction::new(None, ActionPayload::Delete);
    let err = db
        .apply_offline(&LocalEffect::DeleteEmail("e1".into()), &bad)
        .await
        .unwrap_err();
    assert!(matches!(SyncError::from(err), SyncError::Validation(_)));
    assert!(db.get_email("e1").await.unwrap().is_some());
}

#[tokio::test]
async fn failed_email_batch_rolls_back_every_row() {
    let (_dir, db) = open_store().await;
    run_sql(
        &db,
        "CREATE TRIGGER reject_work BEFORE INSERT ON email_mailboxes \
         WHEN NEW.mailbox_id = 'work' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .await;

    let err = db
        .save_emails(&[
            email("e1", &["inbox"], at(2, 0)),
            email("e2", &["inbox", "work"], at(1, 0)),
        ])
        .await
        .unwrap_err();

    assert!(matches!(SyncError::from(err), SyncError::PartialWrite(_)));
    assert!(db.get_email("e1").await.unwrap().is_none());
    assert!(db.get_email("e2").await.unwrap().is_none());
    assert!(db.get_emails("inbox", 0, 20).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_queue_insert_undoes_offline_effect() {
    let (_dir, db) = open_store().await;
    db.save_emails(&[email("e1", &["inbox"], at(1, 0))])
        .await
        .unwrap();
    run_sql(
        &db,
        "CREATE TRIGGER reject_queue BEFORE INSERT ON pending_actions \
         BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .await;

    let err = db
        .apply_offline(
            &LocalEffect::DeleteEmail("e1".into()),
            &NewPendingAction::new(Some("e1".into()), ActionPayload::Delete),
        )
        .await
        .unwrap_err();

    assert!(matches!(SyncError::from(err), SyncError::PartialWrite(_)));
    assert_eq!(ids(&db.get_emails("inbox", 0, 20).await.unwrap()), vec!["e1"]);
    assert_eq!(db.count_pending_actions().await.unwrap(), 0);
}

#[tokio::test]
async fn moving_an_uncached_email_links_nothing() {
    let (_dir, db) = open_store().await;
    db.move_email("ghost", "inbox", "archive").await.unwrap();
    assert!(db.get_emails("archive", 0, 20).await.unwrap().is_empty());
}

#[tokio::test]
async fn discarding_a_local_draft_drops_its_actions() {
    let (_dir, db) = open_store().await;
    let id = LocalDraft::new_id();
    let local = LocalDraft {
        id: id.clone(),
        from: "me@example.com".into(),
        to: "bob@example.com".into(),
        subject: "Hi".into(),
        body: "Body".into(),
        created_at: 1,
        updated_at: 1,
    };
    db.apply_offline(
        &LocalEffect::SaveLocalDraft(local.clone()),
        &NewPendingAction::new(Some(id.clone()), ActionPayload::SaveDraft(local.to_message())),
    )
    .await
    .unwrap();
    db.add_pending_action(&NewPendingAction::new(
        Some(id.clone()),
        ActionPayload::Send(local.to_message()),
    ))
    .await
    .unwrap();
    db.add_pending_action(&NewPendingAction::new(Some("e9".into()), ActionPayload::Delete))
        .await
        .unwrap();

    assert_eq!(db.get_local_draft(&id).await.unwrap(), Some(local));
    let dropped = db.discard_local_draft(&id).await.unwrap();

    assert_eq!(dropped, 2);
    assert!(db.get_local_drafts().await.unwrap().is_empty());
    let left = db.get_pending_actions().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].target.as_deref(), Some("e9"));
}

#[tokio::test]
async fn reopening_keeps_data_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::open_in(dir.path()).await.unwrap();
        db.save_mailboxes(&[mailbox("m1", "Inbox", MailboxRole::Inbox, 0)])
            .await
            .unwrap();
        db.set_config("offline_mode", "true").await.unwrap();
        db.close().await;
    }

    let db = Database::open_in(dir.path()).await.unwrap();
    assert_eq!(db.get_mailboxes().await.unwrap().len(), 1);
    assert_eq!(
        db.get_config("offline_mode").await.unwrap().as_deref(),
        Some("true")
    );
    assert!(db.get_config("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn local_draft_edits_keep_creation_time() {
    let (_dir, db) = open_store().await;
    let mut local = LocalDraft {
        id: LocalDraft::new_id(),
        from: "me@example.com".into(),
        to: "bob@example.com".into(),
        subject: "First".into(),
        body: "v1".into(),
        created_at: 10,
        updated_at: 10,
    };
    db.save_local_draft(&local).await.unwrap();

    local.subject = "Second".into();
    local.created_at = 99;
    local.updated_at = 20;
    db.save_local_draft(&local).await.unwrap();

    let stored = db.get_local_draft(&local.id).await.unwrap().unwrap();
    assert_eq!(stored.subject, "Second");
    assert_eq!(stored.created_at, 10);
    assert_eq!(stored.updated_at, 20);
    assert_eq!(db.get_local_drafts().await.unwrap().len(), 1);

    db.delete_local_draft(&local.id).await.unwrap();
    assert!(db.get_local_draft(&local.id).await.unwrap().is_none());
}
