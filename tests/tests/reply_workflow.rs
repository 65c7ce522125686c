use chrono::{Duration, Utc};
use commentstreams_api::{
    AuthToken, CommentId, Config, CsrfToken, Error, FeedMessage, Namespace, NewReply, PageId,
    REPLY_CREATE_ACTION,
};
use commentstreams_mock_server::{InsertMode, MockServer};

struct Fixture {
    server: MockServer,
    alice: (AuthToken, CsrfToken),
    bob: (AuthToken, CsrfToken),
    page: PageId,
    discussion: CommentId,
}

fn fixture(config: Config) -> Fixture {
    let mut server = MockServer::new(config);
    let alice = server.test_create_user("Alice", true);
    let bob = server.test_create_user("Bob", true);
    let page = server.test_create_page(alice.0, Namespace::MAIN, "Main Page", "Hello");
    let discussion = server.test_create_comment(
        bob.0,
        page,
        None,
        Some("First discussion"),
        "What do you think?",
        Utc::now() - Duration::hours(1),
    );
    Fixture {
        server,
        alice,
        bob,
        page,
        discussion,
    }
}

fn reply(parent: CommentId, text: &str) -> NewReply {
    NewReply {
        wikitext: String::from(text),
        parentid: parent,
    }
}

#[tokio::test]
async fn reply_is_stored_logged_and_notified() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    let id = f
        .server
        .post_reply(tok, Some(csrf), reply(f.discussion, "I agree"))
        .await
        .expect("posting reply");

    let params = f
        .server
        .fetch_comments(Some(tok), f.page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed on the main page");
    assert_eq!(params.comments.len(), 1);
    assert_eq!(params.comments[0].id, f.discussion);
    assert_eq!(params.comments[0].children.len(), 1);
    assert_eq!(params.comments[0].children[0].id, id);
    assert_eq!(params.comments[0].children[0].body, "I agree");
    assert_eq!(params.comments[0].children[0].author, "Alice");

    let alice = f.server.whoami(tok).expect("alice is logged in");
    let log = f.server.db.log_entries();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, REPLY_CREATE_ACTION);
    assert_eq!(log[0].performer, alice);
    assert_eq!(log[0].target, f.page);
    assert!(log[0].published);

    let sent = f.server.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reply.id, id);
    assert_eq!(sent[0].reply.parent_id, Some(f.discussion));
    assert_eq!(sent[0].reply.associated_page_id, Some(f.page));
    assert_eq!(sent[0].reply.author_id, alice);
    assert_eq!(sent[0].page.id, f.page);
    assert_eq!(sent[0].actor.id, alice);
    assert_eq!(sent[0].parent.id, f.discussion);
}

#[tokio::test]
async fn missing_parent_has_no_side_effects() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    let before = f.server.db.test_num_comments();
    let res = f
        .server
        .post_reply(tok, Some(csrf), reply(CommentId(9999), "Hello?"))
        .await;
    assert_eq!(res, Err(Error::ParentNotFound));
    assert_eq!(f.server.db.test_num_comments(), before);
    assert!(f.server.db.log_entries().is_empty());
    assert!(f.server.notifier.sent().is_empty());
}

#[tokio::test]
async fn parent_must_be_a_comment() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    // a regular page id is not a comment id
    let res = f
        .server
        .post_reply(tok, Some(csrf), reply(CommentId(f.page.0), "Hello?"))
        .await;
    assert_eq!(res, Err(Error::ParentNotFound));
}

#[tokio::test]
async fn deleted_page_looks_like_missing_parent() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    f.server.test_delete_page(f.page);
    let res = f
        .server
        .post_reply(tok, Some(csrf), reply(f.discussion, "Too late"))
        .await;
    assert_eq!(res, Err(Error::ParentNotFound));
    assert!(f.server.notifier.sent().is_empty());
}

#[tokio::test]
async fn deleted_parent_is_not_found() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    f.server.test_delete_page(f.discussion.page());
    let res = f
        .server
        .post_reply(tok, Some(csrf), reply(f.discussion, "Too late"))
        .await;
    assert_eq!(res, Err(Error::ParentNotFound));
}

#[tokio::test]
async fn actor_needs_comment_right() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.server.test_create_user("Reader", false);
    let before = f.server.db.test_num_comments();
    let res = f
        .server
        .post_reply(tok, Some(csrf), reply(f.discussion, "Let me in"))
        .await;
    assert_eq!(res, Err(Error::PermissionDenied));
    assert_eq!(f.server.db.test_num_comments(), before);
}

#[tokio::test]
async fn csrf_token_must_match_session() {
    let mut f = fixture(Config::default());
    let (tok, _) = f.alice;
    let (_, bob_csrf) = f.bob;
    for csrf in [None, Some(bob_csrf)] {
        let res = f
            .server
            .post_reply(tok, csrf, reply(f.discussion, "Forged"))
            .await;
        assert_eq!(res, Err(Error::InvalidCsrfToken));
    }
    assert!(f.server.db.log_entries().is_empty());
    assert_eq!(f.server.csrf_token(f.bob.0), Ok(bob_csrf));
}

#[tokio::test]
async fn unknown_session_is_denied() {
    let mut f = fixture(Config::default());
    let res = f
        .server
        .post_reply(AuthToken::stub(), None, reply(f.discussion, "Who am I?"))
        .await;
    assert_eq!(res, Err(Error::PermissionDenied));
    assert_eq!(f.server.whoami(AuthToken::stub()), Err(Error::PermissionDenied));
}

#[tokio::test]
async fn null_byte_is_rejected_before_storing() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    let res = f
        .server
        .post_reply(tok, Some(csrf), reply(f.discussion, "a\0b"))
        .await;
    assert_eq!(res, Err(Error::NullByteInString(String::from("a\0b"))));
    assert!(f.server.notifier.sent().is_empty());
}

#[tokio::test]
async fn storage_failures_are_persist_failures() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    for mode in [InsertMode::Refuse, InsertMode::Fail] {
        f.server.db.set_insert_mode(mode);
        let res = f
            .server
            .post_reply(tok, Some(csrf), reply(f.discussion, "Lost"))
            .await;
        assert_eq!(res, Err(Error::PersistFailure));
    }
    assert!(f.server.db.log_entries().is_empty());
    assert!(f.server.notifier.sent().is_empty());
}

#[tokio::test]
async fn log_and_notification_failures_do_not_fail_the_reply() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    f.server.db.set_log_failing(true);
    f.server.notifier.fail = true;
    let id = f
        .server
        .post_reply(tok, Some(csrf), reply(f.discussion, "Still here"))
        .await
        .expect("posting reply despite failing log and notifier");
    let params = f
        .server
        .fetch_comments(None, f.page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed");
    assert_eq!(params.comments[0].children[0].id, id);
    assert!(f.server.db.log_entries().is_empty());
    assert!(f.server.notifier.sent().is_empty());
}

#[tokio::test]
async fn suppressed_log_entries_stay_out_of_recent_changes() {
    let mut f = fixture(Config {
        suppress_logs_from_rcs: true,
        ..Config::default()
    });
    let (tok, csrf) = f.alice;
    f.server
        .post_reply(tok, Some(csrf), reply(f.discussion, "Quietly"))
        .await
        .expect("posting reply");
    let log = f.server.db.log_entries();
    assert_eq!(log.len(), 1);
    assert!(!log[0].published);
}

#[tokio::test]
async fn reply_to_reply_joins_the_discussion() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    let first = f
        .server
        .post_reply(tok, Some(csrf), reply(f.discussion, "First"))
        .await
        .expect("posting first reply");
    let (bob_tok, bob_csrf) = f.bob;
    let second = f
        .server
        .post_reply(bob_tok, Some(bob_csrf), reply(first, "Second"))
        .await
        .expect("posting reply to a reply");

    let sent = f.server.notifier.sent();
    assert_eq!(sent[1].reply.parent_id, Some(f.discussion));
    assert_eq!(sent[1].parent.id, f.discussion);

    let params = f
        .server
        .fetch_comments(Some(tok), f.page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed");
    let children = params.comments[0]
        .children
        .iter()
        .map(|c| c.id)
        .collect::<Vec<_>>();
    assert_eq!(children, vec![first, second]);
}

#[tokio::test]
async fn reply_to_nested_reply_lands_on_the_root() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    // stored before replies were flattened: discussion <- nested <- deeper
    let nested = f.server.test_create_comment(
        tok,
        f.page,
        Some(f.discussion),
        None,
        "nested",
        Utc::now() - Duration::minutes(30),
    );
    let deeper = f.server.test_create_comment(
        f.bob.0,
        f.page,
        Some(nested),
        None,
        "deeper",
        Utc::now() - Duration::minutes(20),
    );
    let id = f
        .server
        .post_reply(tok, Some(csrf), reply(deeper, "Flat again"))
        .await
        .expect("posting reply to a nested reply");

    let sent = f.server.notifier.sent();
    assert_eq!(sent[0].reply.parent_id, Some(f.discussion));
    assert_eq!(sent[0].parent.id, f.discussion);

    let params = f
        .server
        .fetch_comments(Some(tok), f.page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed");
    let children = params.comments[0]
        .children
        .iter()
        .map(|c| c.id)
        .collect::<Vec<_>>();
    assert_eq!(children, vec![nested, id]);
}

#[tokio::test]
async fn participants_are_notified_except_the_actor() {
    let mut f = fixture(Config::default());
    let (alice_tok, alice_csrf) = f.alice;
    let (carol_tok, carol_csrf) = f.server.test_create_user("Carol", true);
    let alice = f.server.whoami(alice_tok).expect("alice is logged in");
    let bob = f.server.whoami(f.bob.0).expect("bob is logged in");

    let mut alice_feed = f
        .server
        .notification_feed(alice_tok)
        .expect("opening alice's feed");
    let mut bob_feed = f
        .server
        .notification_feed(f.bob.0)
        .expect("opening bob's feed");
    let mut carol_feed = f
        .server
        .notification_feed(carol_tok)
        .expect("opening carol's feed");

    f.server
        .post_reply(alice_tok, Some(alice_csrf), reply(f.discussion, "Hi Bob"))
        .await
        .expect("posting alice's reply");
    let id = f
        .server
        .post_reply(carol_tok, Some(carol_csrf), reply(f.discussion, "Hi all"))
        .await
        .expect("posting carol's reply");

    let sent = f.server.notifier.sent();
    assert_eq!(sent[1].recipients.iter().copied().collect::<Vec<_>>(), {
        let mut expected = vec![alice, bob];
        expected.sort();
        expected
    });

    // bob started the discussion, so hears about both replies
    for _ in 0..2 {
        assert!(matches!(
            bob_feed.try_recv(),
            Ok(FeedMessage::NewReply { parent, .. }) if parent == f.discussion
        ));
    }
    match alice_feed.try_recv() {
        Ok(FeedMessage::NewReply { reply, actor, .. }) => {
            assert_eq!(reply.id, id);
            assert_ne!(actor, alice);
        }
        msg => panic!("unexpected feed message for alice: {msg:?}"),
    }
    assert!(alice_feed.try_recv().is_err());
    // carol was not a participant before her own reply
    assert!(carol_feed.try_recv().is_err());
}

#[tokio::test]
async fn successive_replies_get_distinct_ids() {
    let mut f = fixture(Config::default());
    let (tok, csrf) = f.alice;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            f.server
                .post_reply(tok, Some(csrf), reply(f.discussion, &format!("Reply {i}")))
                .await
                .expect("posting reply"),
        );
    }
    let mut dedup = ids.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(dedup.len(), ids.len());
    assert!(ids.iter().all(|id| *id != f.discussion));
}
