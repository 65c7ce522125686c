#![cfg(test)]

use std::{fmt::Debug, panic::AssertUnwindSafe, path::Path};

use axum::{
    extract::FromRequestParts,
    http::{self, request},
    response::IntoResponse,
};
use chrono::{TimeZone, Utc};
use commentstreams_api::{
    AuthToken, CommentId, CommentPageView, CommentPermissions, CommentStore, CsrfToken,
    DiscussionNode, Error as ApiError, LogEntry, NewReply, PageId, StreamParams, Time, UserId,
    Uuid, REPLY_CREATE_ACTION,
};
use commentstreams_mock_server::MockServer;
use sqlx::Row;
use structopt::StructOpt;
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

do_tokio_test!(fuzz_csrf_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::POST)
        .uri("/")
        .header(CSRF_HEADER, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = CsrfHeader::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::InvalidCsrfToken)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

fn parts(headers: &[(&str, String)]) -> request::Parts {
    let mut req = http::Request::builder().method(http::Method::GET).uri("/");
    for (name, value) in headers {
        req = req.header(*name, value);
    }
    req.body(()).expect("building request").into_parts().0
}

#[tokio::test]
async fn preauth_accepts_bearer_tokens() {
    let token = Uuid::new_v4();
    for auth in [format!("bearer {token}"), format!("Bearer {token}")] {
        let mut req = parts(&[("authorization", auth)]);
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        assert!(matches!(res, Ok(PreAuth(tok)) if tok.0 == token));
    }
    for auth in [
        format!("Basic {token}"),
        format!("bearer {token} extra"),
        String::from("bearer not-a-uuid"),
        String::from("bearer"),
    ] {
        let mut req = parts(&[("authorization", auth)]);
        assert!(PreAuth::from_request_parts(&mut req, &()).await.is_err());
    }
    let mut req = parts(&[]);
    assert!(PreAuth::from_request_parts(&mut req, &()).await.is_err());
}

#[tokio::test]
async fn csrf_header_is_required() {
    let token = Uuid::new_v4();
    let mut req = parts(&[(CSRF_HEADER, token.to_string())]);
    let res = CsrfHeader::from_request_parts(&mut req, &()).await;
    assert!(matches!(res, Ok(CsrfHeader(tok)) if tok.0 == token));
    let mut req = parts(&[]);
    assert!(matches!(
        CsrfHeader::from_request_parts(&mut req, &()).await,
        Err(Error::Api(ApiError::InvalidCsrfToken))
    ));
}

async fn error_of(resp: axum::response::Response) -> (http::StatusCode, ApiError) {
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    let err = ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}"));
    (status, err)
}

#[tokio::test]
async fn errors_become_structured_responses() {
    let (status, err) = error_of(Error::Api(ApiError::ParentNotFound).into_response()).await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert_eq!(err, ApiError::ParentNotFound);

    let err = Error::Anyhow(anyhow::anyhow!("db is down"));
    let (status, err) = error_of(err.into_response()).await;
    assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(matches!(err, ApiError::Unknown(msg) if msg.contains("db is down")));
}

/// An app whose database is never reachable, for requests refused before any query
fn offline_app() -> Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/commentstreams-offline")
        .expect("creating lazy sqlx pool");
    app(pool, Config::default())
}

async fn run_on_app(
    method: http::Method,
    uri: &str,
    headers: &[(&str, String)],
    body: Option<&NewReply>,
) -> (http::StatusCode, ApiError) {
    let mut req = http::Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        req = req.header(*name, value);
    }
    let body = match body {
        Some(body) => serde_json::to_vec(body).expect("serializing request body to json"),
        None => Vec::new(),
    };
    let req = req
        .body(axum::body::Body::from(body))
        .expect("building request");
    let resp = offline_app().oneshot(req).await.expect("running request");
    error_of(resp).await
}

#[tokio::test]
async fn requests_without_session_are_refused() {
    let bad_auth = ("authorization", String::from("Basic dXNlcjpwYXNz"));
    for (method, uri, headers) in [
        (http::Method::GET, "/api/whoami", vec![]),
        (http::Method::GET, "/api/csrf-token", vec![]),
        (http::Method::GET, "/api/comment/1/permissions", vec![]),
        (http::Method::GET, "/api/page/1/comments", vec![bad_auth.clone()]),
        (http::Method::POST, "/api/post-reply", vec![bad_auth]),
    ] {
        let reply = NewReply {
            wikitext: String::from("Hello"),
            parentid: CommentId(1),
        };
        let (status, err) = run_on_app(method, uri, &headers, Some(&reply)).await;
        assert_eq!(status, http::StatusCode::FORBIDDEN, "for {uri}");
        assert_eq!(err, ApiError::PermissionDenied, "for {uri}");
    }
}

#[tokio::test]
async fn replies_need_a_csrf_token() {
    let reply = NewReply {
        wikitext: String::from("Hello"),
        parentid: CommentId(1),
    };
    let auth = ("authorization", format!("bearer {}", Uuid::new_v4()));
    for headers in [
        vec![auth.clone()],
        vec![auth, (CSRF_HEADER, String::from("not-a-uuid"))],
    ] {
        let (status, err) =
            run_on_app(http::Method::POST, "/api/post-reply", &headers, Some(&reply)).await;
        assert_eq!(status, http::StatusCode::FORBIDDEN);
        assert_eq!(err, ApiError::InvalidCsrfToken);
    }
}

#[test]
fn command_line_builds_config() {
    let opt = Opt::from_iter([
        "commentstreams-server",
        "--database-url",
        "postgres://localhost/commentstreams",
        "--content-namespace",
        "0",
        "--content-namespace",
        "4",
        "--enable-talk",
        "--initially-collapsed-namespace",
        "4",
        "--namespace-index",
        "1000",
    ]);
    let config = opt.config();
    assert_eq!(config.allowed_namespaces, None);
    assert!(config.is_allowed(Namespace(4)));
    assert!(!config.is_allowed(Namespace(2)));
    assert!(config.enable_talk);
    assert!(!config.newest_streams_on_top);
    assert!(config.initially_collapsed_namespaces.contains(&Namespace(4)));
    assert_eq!(config.comment_namespace(), Namespace(1000));

    let opt = Opt::from_iter([
        "commentstreams-server",
        "--database-url",
        "postgres://localhost/commentstreams",
        "--allowed-namespace",
        "2",
    ]);
    let config = opt.config();
    assert!(config.is_allowed(Namespace(2)));
    assert!(!config.is_allowed(Namespace::MAIN));
    assert_eq!(config.namespace_index, DEFAULT_NAMESPACE_INDEX);
}

fn build_pg_cluster(data: &Path) -> Option<postgresfixture::cluster::Cluster> {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    Some(postgresfixture::cluster::Cluster::new(data, runtime?))
}

macro_rules! do_sqlx_test {
    ( $name:ident, $fn:expr ) => {
        #[test]
        fn $name() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let cluster = match build_pg_cluster(datadir_path) {
                Some(cluster) => cluster,
                None => {
                    tracing::warn!("postgresql is not installed in path, skipping {}", stringify!($name));
                    return;
                }
            };
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime");
                runtime.block_on(async move {
                    let pool = create_sqlx_pool(&format!("postgresql://?host={}&dbname=test_db", datadir_path)).await.expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    let () = $fn(pool).await;
                });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

async fn call<Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
) -> Result<Resp, ApiError>
where
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            panic!("failed parsing resp body {err}, body is {body:?}")
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

/// Dates of replies posted during the test differ between app and mock
fn without_dates(
    params: Result<Option<StreamParams>, ApiError>,
) -> Result<Option<StreamParams>, ApiError> {
    fn strip(node: &mut DiscussionNode) {
        node.timestamp = Time::default();
        node.children.iter_mut().for_each(strip);
    }
    params.map(|params| {
        params.map(|mut params| {
            params.comments.iter_mut().for_each(strip);
            params
        })
    })
}

/// Runs the same operations against the app backed by postgres and against the mock server.
///
/// Every row is inserted with the id the mock allocated, and the page id sequence is kept in
/// step so that replies get the same ids on both sides.
struct ComparativeTest {
    pool: sqlx::PgPool,
    app: Router,
    mock: MockServer,
}

impl ComparativeTest {
    fn new(pool: sqlx::PgPool) -> ComparativeTest {
        ComparativeTest {
            app: app(pool.clone(), Config::default()),
            mock: MockServer::new(Config::default()),
            pool,
        }
    }

    async fn sync_ids(&self, last: i64) {
        sqlx::query("SELECT setval('pages_id_seq', $1)")
            .bind(last)
            .execute(&self.pool)
            .await
            .expect("syncing page ids with the mock");
    }

    fn user(&self, tok: AuthToken) -> UserId {
        self.mock.whoami(tok).expect("test session is unknown to the mock")
    }

    async fn create_user(&mut self, name: &str, can_comment: bool) -> (AuthToken, CsrfToken) {
        let (tok, csrf) = self.mock.test_create_user(name, can_comment);
        let id = self.user(tok);
        sqlx::query("INSERT INTO users (id, name, can_comment) VALUES ($1, $2, $3)")
            .bind(id.0)
            .bind(name)
            .bind(can_comment)
            .execute(&self.pool)
            .await
            .expect("creating user");
        sqlx::query("INSERT INTO sessions VALUES ($1, $2, $3, 'test', NOW(), NOW())")
            .bind(tok.0)
            .bind(id.0)
            .bind(csrf.0)
            .execute(&self.pool)
            .await
            .expect("creating session");
        self.sync_ids(id.0).await;
        (tok, csrf)
    }

    async fn set_avatar(&mut self, tok: AuthToken, avatar: &str) {
        self.mock.test_set_avatar(tok, avatar);
        sqlx::query("UPDATE users SET avatar = $2 WHERE id = $1")
            .bind(self.user(tok).0)
            .bind(avatar)
            .execute(&self.pool)
            .await
            .expect("setting avatar");
    }

    async fn insert_page(
        &self,
        id: i64,
        ns: Namespace,
        title: &str,
        author: UserId,
        date: Time,
        text: &str,
    ) {
        sqlx::query("INSERT INTO pages (id, namespace, title) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(ns.0)
            .bind(title)
            .execute(&self.pool)
            .await
            .expect("creating page");
        self.insert_revision(id, author, date, text).await;
        self.sync_ids(id).await;
    }

    async fn insert_revision(&self, page: i64, author: UserId, date: Time, text: &str) {
        sqlx::query(
            "INSERT INTO revisions (page_id, author_id, date, wikitext) VALUES ($1, $2, $3, $4)",
        )
        .bind(page)
        .bind(author.0)
        .bind(date.naive_utc())
        .bind(text)
        .execute(&self.pool)
        .await
        .expect("creating revision");
    }

    async fn create_page(
        &mut self,
        tok: AuthToken,
        ns: Namespace,
        title: &str,
        text: &str,
    ) -> PageId {
        let id = self.mock.test_create_page(tok, ns, title, text);
        self.insert_page(id.0, ns, title, self.user(tok), Utc::now(), text)
            .await;
        id
    }

    async fn create_comment(
        &mut self,
        tok: AuthToken,
        page: PageId,
        parent: Option<CommentId>,
        title: Option<&str>,
        text: &str,
        date: Time,
    ) -> CommentId {
        let id = self
            .mock
            .test_create_comment(tok, page, parent, title, text, date);
        let ns = self.mock.config().comment_namespace();
        let page_title = format!("Comment{}", id.0);
        self.insert_page(id.0, ns, &page_title, self.user(tok), date, text)
            .await;
        sqlx::query("INSERT INTO cs_comments VALUES ($1, $2, $3, $4)")
            .bind(id.0)
            .bind(page.0)
            .bind(parent.map(|p| p.0))
            .bind(title)
            .execute(&self.pool)
            .await
            .expect("registering comment");
        id
    }

    async fn edit_page(&mut self, tok: AuthToken, page: PageId, text: &str) {
        self.mock.test_edit_page(tok, page, text);
        self.insert_revision(page.0, self.user(tok), Utc::now(), text)
            .await;
    }

    async fn delete_page(&mut self, page: PageId) {
        self.mock.test_delete_page(page);
        sqlx::query("UPDATE pages SET deleted = TRUE WHERE id = $1")
            .bind(page.0)
            .execute(&self.pool)
            .await
            .expect("deleting page");
    }

    async fn on_app<Resp>(
        &mut self,
        method: http::Method,
        uri: &str,
        auth: Option<AuthToken>,
        csrf: Option<CsrfToken>,
        body: Option<&NewReply>,
    ) -> Result<Resp, ApiError>
    where
        Resp: 'static + for<'de> serde::Deserialize<'de>,
    {
        let mut req = request::Builder::new()
            .method(method)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json");
        if let Some(tok) = auth {
            req = req.header(http::header::AUTHORIZATION, format!("bearer {}", tok.0));
        }
        if let Some(csrf) = csrf {
            req = req.header(CSRF_HEADER, csrf.0.to_string());
        }
        let body = match body {
            Some(body) => serde_json::to_vec(body).expect("serializing request body to json"),
            None => Vec::new(),
        };
        let req = req
            .body(axum::body::Body::from(body))
            .expect("building request");
        call(&mut self.app, req).await
    }

    async fn post_reply(
        &mut self,
        tok: AuthToken,
        csrf: CsrfToken,
        parent: CommentId,
        text: &str,
    ) -> Result<CommentId, ApiError> {
        let reply = NewReply {
            wikitext: String::from(text),
            parentid: parent,
        };
        let app_res = self
            .on_app(
                http::Method::POST,
                "/api/post-reply",
                Some(tok),
                Some(csrf),
                Some(&reply),
            )
            .await;
        let mock_res = self.mock.post_reply(tok, Some(csrf), reply).await;
        compare("PostReply", app_res.clone(), mock_res);
        app_res
    }

    async fn fetch_comments(
        &mut self,
        tok: Option<AuthToken>,
        page: PageId,
        action: &str,
    ) -> Option<StreamParams> {
        let uri = format!("/api/page/{}/comments?action={action}", page.0);
        let app_res = without_dates(self.on_app(http::Method::GET, &uri, tok, None, None).await);
        let mock_res = without_dates(self.mock.fetch_comments(tok, page, action).await);
        compare("FetchComments", app_res.clone(), mock_res);
        app_res.expect("fetching comments")
    }

    async fn comment_permissions(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
    ) -> Result<CommentPermissions, ApiError> {
        let uri = format!("/api/comment/{}/permissions", comment.0);
        let app_res = self.on_app(http::Method::GET, &uri, Some(tok), None, None).await;
        let mock_res = self.mock.comment_permissions(tok, comment).await;
        compare("CommentPermissions", app_res.clone(), mock_res);
        app_res
    }

    async fn comment_page(
        &mut self,
        comment: CommentId,
        action: &str,
    ) -> Result<CommentPageView, ApiError> {
        let uri = format!("/api/comment/{}/page?action={action}", comment.0);
        let app_res = self.on_app(http::Method::GET, &uri, None, None, None).await;
        let mock_res = self.mock.comment_page(comment, action);
        compare("CommentPage", app_res.clone(), mock_res);
        app_res
    }

    async fn compare_logs(&self) -> Vec<LogEntry> {
        let rows = sqlx::query(
            "
                SELECT log_action, performer_id, target_page_id, in_recent_changes
                    FROM logging
                WHERE log_type = 'commentstreams'
                ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .expect("fetching log entries");
        let app_log = rows
            .iter()
            .map(|r| LogEntry {
                action: r.get("log_action"),
                performer: UserId(r.get("performer_id")),
                target: PageId(r.get("target_page_id")),
                published: r.get("in_recent_changes"),
            })
            .collect::<Vec<_>>();
        assert_eq!(app_log, self.mock.db.log_entries(), "app and mock logs differ");
        app_log
    }
}

do_sqlx_test!(app_matches_mock, |pool: sqlx::PgPool| async move {
    let mut t = ComparativeTest::new(pool);
    let at = |s: i64| Utc.timestamp_opt(1_600_000_000 + s, 0).unwrap();
    let allowed = CommentPermissions {
        can_edit: true,
        can_delete: true,
    };
    let denied = CommentPermissions {
        can_edit: false,
        can_delete: false,
    };

    let (alice, alice_csrf) = t.create_user("Alice", true).await;
    let (bob, bob_csrf) = t.create_user("Bob", true).await;
    let (carol, carol_csrf) = t.create_user("Carol", false).await;
    t.set_avatar(bob, "/avatars/bob.png").await;
    let main = t.create_page(alice, Namespace::MAIN, "Main_Page", "Hello").await;
    let quiet = t
        .create_page(alice, Namespace::MAIN, "Quiet", "Shh <no-comment-streams/>")
        .await;
    let welcome = t
        .create_comment(alice, main, None, Some("Welcome"), "Hi all", at(10))
        .await;
    t.create_comment(bob, main, None, Some("Later"), "Another topic", at(20))
        .await;
    // stored before replies were flattened
    let nested = t
        .create_comment(bob, main, Some(welcome), None, "nested", at(30))
        .await;
    let deeper = t
        .create_comment(alice, main, Some(nested), None, "deeper", at(40))
        .await;

    // authorship stays with the oldest revision
    t.edit_page(bob, welcome.page(), "Hi all, edited by Bob").await;
    assert_eq!(t.comment_permissions(alice, welcome).await, Ok(allowed));
    assert_eq!(t.comment_permissions(bob, welcome).await, Ok(denied));
    assert_eq!(t.comment_permissions(bob, nested).await, Ok(allowed));
    assert_eq!(
        t.comment_permissions(bob, CommentId(main.0)).await,
        Err(ApiError::NotAComment)
    );

    match t.comment_page(welcome, "view").await {
        Ok(CommentPageView::Comment {
            body,
            associated_page: Some(page),
            ..
        }) => {
            assert_eq!(body, "Hi all, edited by Bob");
            assert_eq!(page.id, main);
        }
        other => panic!("unexpected comment page view {other:?}"),
    }
    assert_eq!(
        t.comment_page(welcome, "history").await,
        Ok(CommentPageView::PassThrough)
    );
    assert_eq!(
        t.comment_page(welcome, "edit").await,
        Err(ApiError::PermissionDenied)
    );

    let thanks = t
        .post_reply(bob, bob_csrf, welcome, "Thanks")
        .await
        .expect("posting reply");
    let flat = t
        .post_reply(alice, alice_csrf, deeper, "Flat again")
        .await
        .expect("posting reply to a nested reply");
    assert_eq!(
        t.post_reply(carol, carol_csrf, welcome, "Let me in").await,
        Err(ApiError::PermissionDenied)
    );
    assert_eq!(
        t.post_reply(alice, bob_csrf, welcome, "Forged").await,
        Err(ApiError::InvalidCsrfToken)
    );
    assert_eq!(
        t.post_reply(alice, alice_csrf, CommentId(main.0), "Not a comment").await,
        Err(ApiError::ParentNotFound)
    );
    assert!(matches!(
        t.post_reply(alice, alice_csrf, welcome, "nul\0byte").await,
        Err(ApiError::NullByteInString(_))
    ));

    let params = t
        .fetch_comments(Some(bob), main, "view")
        .await
        .expect("comments are displayed on the main page");
    assert_eq!(params.user_avatar.as_deref(), Some("/avatars/bob.png"));
    assert_eq!(params.comments.len(), 2);
    assert_eq!(params.comments[0].id, welcome);
    assert_eq!(params.comments[0].body, "Hi all, edited by Bob");
    assert_eq!(params.comments[0].author, "Alice");
    let children = params.comments[0]
        .children
        .iter()
        .map(|c| c.id)
        .collect::<Vec<_>>();
    assert_eq!(children, vec![nested, thanks, flat]);
    t.fetch_comments(Some(alice), main, "view").await;
    t.fetch_comments(None, main, "view").await;
    assert_eq!(t.fetch_comments(None, main, "edit").await, None);
    assert_eq!(t.fetch_comments(None, quiet, "view").await, None);

    let log = t.compare_logs().await;
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|e| e.action == REPLY_CREATE_ACTION && e.target == main));

    // a deleted page looks like a missing parent, and is no longer linked
    t.delete_page(main).await;
    assert_eq!(
        t.post_reply(bob, bob_csrf, welcome, "Too late").await,
        Err(ApiError::ParentNotFound)
    );
    assert!(matches!(
        t.comment_page(welcome, "view").await,
        Ok(CommentPageView::Comment {
            associated_page: None,
            ..
        })
    ));
    assert_eq!(t.fetch_comments(None, main, "view").await, None);
    t.compare_logs().await;
});

do_sqlx_test!(postgres_storage_rules, |pool: sqlx::PgPool| async move {
    let config = Config::default();
    let mut conn = pool.acquire().await.expect("getting db connection");
    sqlx::query("INSERT INTO users (id, name, real_name) VALUES (1, 'Jdoe', 'Jane Doe')")
        .execute(&mut *conn)
        .await
        .expect("creating user");
    sqlx::query(
        "INSERT INTO pages (id, namespace, title) VALUES (10, 0, 'Main_Page'), (11, 0, 'Empty')",
    )
    .execute(&mut *conn)
    .await
    .expect("creating pages");
    sqlx::query("INSERT INTO pages (id, namespace, title) VALUES (12, $1, 'Discussion')")
        .bind(config.comment_namespace().0)
        .execute(&mut *conn)
        .await
        .expect("creating comment page");
    sqlx::query(
        "
            INSERT INTO revisions (page_id, author_id, date, wikitext)
            VALUES (10, 1, NOW(), 'Hello'), (12, 1, NOW(), 'Hi')
        ",
    )
    .execute(&mut *conn)
    .await
    .expect("creating revisions");
    sqlx::query("INSERT INTO cs_comments VALUES (12, 10, NULL, 'Hi')")
        .execute(&mut *conn)
        .await
        .expect("registering comment");
    sqlx::query("SELECT setval('pages_id_seq', 12)")
        .execute(&mut *conn)
        .await
        .expect("moving page ids past the fixtures");

    // a page exists once it has a revision
    let (page, text) = db::fetch_page_with_text(&mut *conn, PageId(10))
        .await
        .expect("fetching page")
        .expect("page is known");
    assert!(page.is_live());
    assert_eq!(text, "Hello");
    let (page, text) = db::fetch_page_with_text(&mut *conn, PageId(11))
        .await
        .expect("fetching page")
        .expect("page is known");
    assert!(!page.exists);
    assert_eq!(text, "");
    assert!(db::fetch_page_with_text(&mut *conn, PageId(99))
        .await
        .expect("fetching page")
        .is_none());

    // the stored reply is exactly what reading it back gives
    let actor = db::fetch_actor(&mut *conn, UserId(1))
        .await
        .expect("fetching actor");
    assert_eq!(actor.name, "Jane Doe");
    let mut store = db::PostgresDb {
        conn: &mut *conn,
        config: &config,
    };
    let parent = store
        .get_comment(CommentId(12))
        .await
        .expect("fetching comment")
        .expect("comment exists");
    let reply = store
        .insert_reply(&actor, "Hello back", &parent)
        .await
        .expect("inserting reply")
        .expect("reply is accepted");
    assert_eq!(reply.id, CommentId(13));
    assert_eq!(reply.parent_id, Some(parent.id));
    assert_eq!(
        store.get_comment(reply.id).await.expect("fetching reply"),
        Some(reply.clone())
    );
    assert_eq!(
        store
            .get_associated_comments(PageId(10))
            .await
            .expect("fetching comments of page"),
        vec![parent, reply]
    );
});
