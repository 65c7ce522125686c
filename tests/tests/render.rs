use chrono::{Duration, TimeZone, Utc};
use commentstreams_api::{
    AuthToken, CommentId, CommentPageView, CommentPermissions, Config, Error, Namespace, NewReply,
    PageId, DEFAULT_NAMESPACE_INDEX,
};
use commentstreams_mock_server::MockServer;

fn server(config: Config) -> (MockServer, AuthToken) {
    let mut server = MockServer::new(config);
    let (tok, _) = server.test_create_user("Alice", true);
    (server, tok)
}

async fn shown(server: &mut MockServer, tok: AuthToken, page: PageId, action: &str) -> bool {
    server
        .fetch_comments(Some(tok), page, action)
        .await
        .expect("fetching comments")
        .is_some()
}

#[tokio::test]
async fn visibility_follows_page_and_request() {
    let (mut server, tok) = server(Config::default());
    let main = server.test_create_page(tok, Namespace::MAIN, "Main Page", "Hello");
    let opted_out = server.test_create_page(
        tok,
        Namespace::MAIN,
        "Quiet",
        "No talking here <no-comment-streams/>",
    );
    let user_page = server.test_create_page(tok, Namespace(2), "Alice", "About me");
    let deleted = server.test_create_page(tok, Namespace::MAIN, "Gone", "Bye");
    server.test_delete_page(deleted);

    assert!(shown(&mut server, tok, main, "view").await);
    assert!(!shown(&mut server, tok, main, "edit").await);
    assert!(!shown(&mut server, tok, main, "history").await);
    assert!(!shown(&mut server, tok, opted_out, "view").await);
    assert!(!shown(&mut server, tok, user_page, "view").await);
    assert!(!shown(&mut server, tok, deleted, "view").await);
}

#[tokio::test]
async fn unknown_page_renders_nothing() {
    let (mut server, tok) = server(Config::default());
    let page = server.test_create_page(tok, Namespace::MAIN, "Main Page", "Hello");
    let res = server
        .fetch_comments(Some(tok), PageId(page.0 + 100), "view")
        .await;
    assert_eq!(res, Ok(None));
}

#[tokio::test]
async fn talk_pages_follow_their_subject_namespace() {
    let (mut server, tok) = server(Config::default());
    let main_talk = server.test_create_page(tok, Namespace(1), "Main Page", "Let's talk");
    let user_talk = server.test_create_page(tok, Namespace(3), "Alice", "Let's talk");
    assert!(server
        .fetch_comments(Some(tok), main_talk, "view")
        .await
        .expect("fetching comments")
        .is_some());
    assert!(server
        .fetch_comments(Some(tok), user_talk, "view")
        .await
        .expect("fetching comments")
        .is_none());

    let (mut server, tok) = self::server(Config {
        enable_talk: true,
        ..Config::default()
    });
    let user_talk = server.test_create_page(tok, Namespace(3), "Alice", "Let's talk");
    assert!(server
        .fetch_comments(Some(tok), user_talk, "view")
        .await
        .expect("fetching comments")
        .is_some());
}

#[tokio::test]
async fn comment_pages_never_host_comments() {
    let (mut server, tok) = server(Config {
        allowed_namespaces: Some(
            [Namespace::MAIN, Namespace(DEFAULT_NAMESPACE_INDEX)]
                .into_iter()
                .collect(),
        ),
        ..Config::default()
    });
    let page = server.test_create_page(tok, Namespace::MAIN, "Main Page", "Hello");
    let comment = server.test_create_comment(tok, page, None, Some("Hi"), "Hi", Utc::now());
    let res = server
        .fetch_comments(Some(tok), comment.page(), "view")
        .await
        .expect("fetching comments");
    assert_eq!(res, None);
}

#[tokio::test]
async fn discussions_are_ordered_for_display() {
    let (mut server, alice) = server(Config::default());
    let (bob, _) = server.test_create_user("Bob", true);
    let page = server.test_create_page(alice, Namespace::MAIN, "Main Page", "Hello");
    let at = |h| Utc.timestamp_opt(1_600_000_000, 0).unwrap() + Duration::hours(h);

    let late = server.test_create_comment(alice, page, None, Some("Late"), "late", at(5));
    let early = server.test_create_comment(bob, page, None, Some("Early"), "early", at(1));
    let r2 = server.test_create_comment(alice, page, Some(early), None, "second", at(4));
    let r1 = server.test_create_comment(bob, page, Some(early), None, "first", at(2));
    let other = server.test_create_page(alice, Namespace::MAIN, "Other", "Hello");
    server.test_create_comment(bob, other, None, Some("Elsewhere"), "elsewhere", at(3));

    let params = server
        .fetch_comments(None, page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed");
    assert_eq!(params.user_display_name, None);
    assert!(!params.newest_streams_on_top);
    let roots = params.comments.iter().map(|n| n.id).collect::<Vec<_>>();
    assert_eq!(roots, vec![early, late]);
    let replies = params.comments[0]
        .children
        .iter()
        .map(|n| n.id)
        .collect::<Vec<_>>();
    assert_eq!(replies, vec![r1, r2]);
    assert_eq!(params.comments[0].author, "Bob");
    assert_eq!(params.comments[0].title.as_deref(), Some("Early"));
    assert!(params.comments[1].children.is_empty());
}

#[tokio::test]
async fn newest_on_top_only_flips_discussions() {
    let (mut server, tok) = server(Config {
        newest_streams_on_top: true,
        initially_collapsed_namespaces: [Namespace::MAIN].into_iter().collect(),
        ..Config::default()
    });
    let page = server.test_create_page(tok, Namespace::MAIN, "Main Page", "Hello");
    let at = |h| Utc.timestamp_opt(1_600_000_000, 0).unwrap() + Duration::hours(h);
    let old = server.test_create_comment(tok, page, None, Some("Old"), "old", at(1));
    let new = server.test_create_comment(tok, page, None, Some("New"), "new", at(2));
    let r1 = server.test_create_comment(tok, page, Some(old), None, "r1", at(3));
    let r2 = server.test_create_comment(tok, page, Some(old), None, "r2", at(4));

    let params = server
        .fetch_comments(Some(tok), page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed");
    assert_eq!(params.user_display_name.as_deref(), Some("Alice"));
    assert_eq!(params.user_avatar, None);
    assert!(params.newest_streams_on_top);
    assert!(params.initially_collapsed);
    let roots = params.comments.iter().map(|n| n.id).collect::<Vec<_>>();
    assert_eq!(roots, vec![new, old]);
    let replies = params.comments[1]
        .children
        .iter()
        .map(|n| n.id)
        .collect::<Vec<_>>();
    assert_eq!(replies, vec![r1, r2]);
}

#[tokio::test]
async fn only_the_original_author_edits() {
    let (mut server, alice) = server(Config::default());
    let (bob, bob_csrf) = server.test_create_user("Bob", true);
    let page = server.test_create_page(alice, Namespace::MAIN, "Main Page", "Hello");
    let discussion = server.test_create_comment(alice, page, None, Some("Hi"), "Hi", Utc::now());
    let reply = server
        .post_reply(
            bob,
            Some(bob_csrf),
            NewReply {
                wikitext: String::from("Hello"),
                parentid: discussion,
            },
        )
        .await
        .expect("posting reply");

    let allowed = CommentPermissions {
        can_edit: true,
        can_delete: true,
    };
    let denied = CommentPermissions {
        can_edit: false,
        can_delete: false,
    };
    assert_eq!(server.comment_permissions(alice, discussion).await, Ok(allowed));
    assert_eq!(server.comment_permissions(bob, discussion).await, Ok(denied));
    assert_eq!(server.comment_permissions(bob, reply).await, Ok(allowed));

    // a later edit by someone else does not transfer authorship
    server.test_edit_page(bob, discussion.page(), "Hi, edited by Bob");
    assert_eq!(server.comment_permissions(alice, discussion).await, Ok(allowed));
    assert_eq!(server.comment_permissions(bob, discussion).await, Ok(denied));

    // the latest revision is what gets displayed
    let params = server
        .fetch_comments(Some(alice), page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed");
    assert_eq!(params.comments[0].body, "Hi, edited by Bob");
    assert_eq!(params.comments[0].author, "Alice");
}

#[tokio::test]
async fn permissions_need_a_comment() {
    let (mut server, tok) = server(Config::default());
    let page = server.test_create_page(tok, Namespace::MAIN, "Main Page", "Hello");
    let res = server
        .comment_permissions(tok, CommentId(page.0))
        .await;
    assert_eq!(res, Err(Error::NotAComment));
}

#[tokio::test]
async fn viewer_avatar_is_sent_to_the_renderer() {
    let (mut server, tok) = server(Config::default());
    server.test_set_avatar(tok, "/avatars/alice.png");
    let page = server.test_create_page(tok, Namespace::MAIN, "Main Page", "Hello");
    let params = server
        .fetch_comments(Some(tok), page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed");
    assert_eq!(params.user_avatar.as_deref(), Some("/avatars/alice.png"));

    let params = server
        .fetch_comments(None, page, "view")
        .await
        .expect("fetching comments")
        .expect("comments are displayed to anonymous readers");
    assert_eq!(params.user_avatar, None);
}

#[tokio::test]
async fn comment_page_links_back_to_its_page() {
    let (mut server, tok) = server(Config::default());
    let page = server.test_create_page(tok, Namespace::MAIN, "Main Page", "Hello");
    let discussion =
        server.test_create_comment(tok, page, None, Some("Typo"), "See intro", Utc::now());

    match server.comment_page(discussion, "view") {
        Ok(CommentPageView::Comment {
            title,
            body,
            associated_page: Some(linked),
        }) => {
            assert_eq!(title.as_deref(), Some("Typo"));
            assert_eq!(body, "See intro");
            assert_eq!(linked.id, page);
            assert_eq!(linked.title, "Main Page");
        }
        other => panic!("unexpected comment page view {other:?}"),
    }
    assert_eq!(
        server.comment_page(discussion, "info"),
        Ok(CommentPageView::PassThrough)
    );
    assert_eq!(
        server.comment_page(discussion, "edit"),
        Err(Error::PermissionDenied)
    );
    assert_eq!(
        server.comment_page(CommentId(page.0), "view"),
        Err(Error::NotAComment)
    );

    server.test_delete_page(page);
    assert!(matches!(
        server.comment_page(discussion, "view"),
        Ok(CommentPageView::Comment {
            associated_page: None,
            ..
        })
    ));
}
