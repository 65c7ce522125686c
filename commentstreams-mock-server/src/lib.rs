use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use commentstreams_api::{
    self as api, Actor, AuditLog, AuthToken, Comment, CommentId, CommentPageView,
    CommentPermissions, CommentStore, Config, CsrfToken, Error, FeedMessage, LogEntry, Namespace,
    NewReply, Notifier, OriginalAuthor, Page, PageContext, PageId, StreamParams, Time, User, UserId,
    Uuid,
};
use tokio::sync::mpsc;

/// What `insert_reply` does, so tests can exercise storage failures
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertMode {
    Accept,
    Refuse,
    Fail,
}

#[derive(Debug)]
struct DbUser {
    user: User,
    can_comment: bool,
    avatar: Option<String>,
}

#[derive(Debug)]
struct Session {
    user: UserId,
    csrf: CsrfToken,
}

#[derive(Debug)]
struct Revision {
    author: UserId,
    date: Time,
    wikitext: String,
}

#[derive(Debug)]
struct DbPage {
    page: Page,
    // oldest first
    revisions: Vec<Revision>,
}

#[derive(Debug)]
struct DbComment {
    associated_page: Option<PageId>,
    parent: Option<CommentId>,
    title: Option<String>,
}

#[derive(Debug)]
struct State {
    config: Config,
    users: BTreeMap<UserId, DbUser>,
    sessions: HashMap<AuthToken, Session>,
    pages: BTreeMap<PageId, DbPage>,
    comments: BTreeMap<CommentId, DbComment>,
    log: Vec<LogEntry>,
    next_id: i64,
    insert_mode: InsertMode,
    fail_log: bool,
}

impl State {
    fn fresh_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_page(&mut self, namespace: Namespace, title: String, rev: Revision) -> PageId {
        let id = PageId(self.fresh_id());
        self.pages.insert(
            id,
            DbPage {
                page: Page {
                    id,
                    namespace,
                    title,
                    exists: true,
                    deleted: false,
                },
                revisions: vec![rev],
            },
        );
        id
    }

    fn display_name(&self, u: UserId) -> String {
        self.users
            .get(&u)
            .map(|u| String::from(u.user.display_name()))
            .unwrap_or_default()
    }

    fn comment(&self, id: CommentId) -> Option<Comment> {
        let c = self.comments.get(&id)?;
        let page = self.pages.get(&id.page())?;
        if !page.page.is_live() {
            return None;
        }
        let first = page.revisions.first()?;
        let last = page.revisions.last()?;
        Some(Comment {
            id,
            associated_page_id: c.associated_page,
            parent_id: c.parent,
            author_id: first.author,
            author_name: self.display_name(first.author),
            creation_timestamp: first.date,
            title: c.title.clone(),
            body_wikitext: last.wikitext.clone(),
            body_html: None,
        })
    }

    fn associated_comments(&self, page: PageId) -> Vec<Comment> {
        self.comments
            .iter()
            .filter(|(_, c)| c.associated_page == Some(page))
            .filter_map(|(id, _)| self.comment(*id))
            .collect()
    }

    fn insert_comment(
        &mut self,
        author: UserId,
        page: PageId,
        parent: Option<CommentId>,
        title: Option<String>,
        wikitext: String,
        date: Time,
    ) -> CommentId {
        let ns = self.config.comment_namespace();
        let id = self.next_id + 1;
        let page_id = self.create_page(
            ns,
            format!("Comment{id}"),
            Revision {
                author,
                date,
                wikitext,
            },
        );
        let id = CommentId(page_id.0);
        self.comments.insert(
            id,
            DbComment {
                associated_page: Some(page),
                parent,
                title,
            },
        );
        id
    }
}

#[derive(Clone, Debug)]
pub struct MockDb(Arc<Mutex<State>>);

impl MockDb {
    fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().expect("mock state lock poisoned")
    }

    pub fn set_insert_mode(&self, mode: InsertMode) {
        self.state().insert_mode = mode;
    }

    pub fn set_log_failing(&self, fail: bool) {
        self.state().fail_log = fail;
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.state().log.clone()
    }

    /// Number of comments ever stored, including those of deleted pages
    pub fn test_num_comments(&self) -> usize {
        self.state().comments.len()
    }
}

#[async_trait]
impl CommentStore for MockDb {
    async fn get_comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        Ok(self.state().comment(id))
    }

    async fn get_associated_comments(&mut self, page: PageId) -> anyhow::Result<Vec<Comment>> {
        Ok(self.state().associated_comments(page))
    }

    async fn get_page(&mut self, page: PageId) -> anyhow::Result<Option<Page>> {
        Ok(self.state().pages.get(&page).map(|p| p.page.clone()))
    }

    async fn insert_reply(
        &mut self,
        actor: &Actor,
        wikitext: &str,
        parent: &Comment,
    ) -> anyhow::Result<Option<Comment>> {
        let mut state = self.state();
        match state.insert_mode {
            InsertMode::Accept => (),
            InsertMode::Refuse => return Ok(None),
            InsertMode::Fail => return Err(anyhow!("mock storage is failing")),
        }
        let page = parent
            .associated_page_id
            .ok_or_else(|| anyhow!("parent comment {:?} has no associated page", parent.id))?;
        let id = state.insert_comment(
            actor.id,
            page,
            Some(parent.id),
            None,
            String::from(wikitext),
            Utc::now(),
        );
        Ok(state.comment(id))
    }
}

#[async_trait]
impl OriginalAuthor for MockDb {
    async fn original_author(&mut self, page: PageId) -> anyhow::Result<Option<UserId>> {
        Ok(self
            .state()
            .pages
            .get(&page)
            .filter(|p| p.page.is_live())
            .and_then(|p| p.revisions.first())
            .map(|r| r.author))
    }
}

#[async_trait]
impl AuditLog for MockDb {
    async fn record(&mut self, entry: LogEntry) -> anyhow::Result<()> {
        let mut state = self.state();
        if state.fail_log {
            return Err(anyhow!("mock audit log is failing"));
        }
        state.log.push(entry);
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub reply: Comment,
    pub page: Page,
    pub actor: Actor,
    pub parent: Comment,
    pub recipients: BTreeSet<UserId>,
}

#[derive(Debug)]
pub struct MockNotifier {
    db: MockDb,
    sent: Mutex<Vec<Notification>>,
    feeds: Mutex<HashMap<UserId, Vec<mpsc::UnboundedSender<FeedMessage>>>>,
    pub fail: bool,
}

impl MockNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notification lock poisoned").clone()
    }

    fn add_feed(&self, user: UserId) -> mpsc::UnboundedReceiver<FeedMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .expect("feeds lock poisoned")
            .entry(user)
            .or_insert_with(Vec::new)
            .push(sender);
        receiver
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_reply_notifications(
        &self,
        reply: &Comment,
        page: &Page,
        actor: &Actor,
        parent: &Comment,
    ) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("mock notifier is failing"));
        }
        let all = self.db.state().associated_comments(page.id);
        let recipients = api::discussion_participants(&all, parent, actor.id);
        tracing::debug!(?recipients, reply = ?reply.id, "relaying reply to mock feeds");
        let msg = FeedMessage::NewReply {
            reply: reply.clone(),
            page: page.id,
            parent: parent.id,
            actor: actor.id,
        };
        {
            let mut feeds = self.feeds.lock().expect("feeds lock poisoned");
            for u in recipients.iter() {
                if let Some(socks) = feeds.get_mut(u) {
                    socks.retain(|s| s.send(msg.clone()).is_ok());
                }
            }
        }
        self.sent
            .lock()
            .expect("notification lock poisoned")
            .push(Notification {
                reply: reply.clone(),
                page: page.clone(),
                actor: actor.clone(),
                parent: parent.clone(),
                recipients,
            });
        Ok(())
    }
}

pub struct MockServer {
    pub db: MockDb,
    pub notifier: MockNotifier,
    config: Config,
}

impl MockServer {
    pub fn new(config: Config) -> MockServer {
        let db = MockDb(Arc::new(Mutex::new(State {
            config: config.clone(),
            users: BTreeMap::new(),
            sessions: HashMap::new(),
            pages: BTreeMap::new(),
            comments: BTreeMap::new(),
            log: Vec::new(),
            next_id: 0,
            insert_mode: InsertMode::Accept,
            fail_log: false,
        })));
        MockServer {
            notifier: MockNotifier {
                db: db.clone(),
                sent: Mutex::new(Vec::new()),
                feeds: Mutex::new(HashMap::new()),
                fail: false,
            },
            db,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates a user with an open session, returning its session and csrf tokens
    pub fn test_create_user(&mut self, name: &str, can_comment: bool) -> (AuthToken, CsrfToken) {
        let mut state = self.db.state();
        let id = UserId(state.fresh_id());
        state.users.insert(
            id,
            DbUser {
                user: User {
                    id,
                    name: String::from(name),
                    real_name: None,
                },
                can_comment,
                avatar: None,
            },
        );
        let tok = AuthToken(Uuid::new_v4());
        let csrf = CsrfToken(Uuid::new_v4());
        state.sessions.insert(tok, Session { user: id, csrf });
        (tok, csrf)
    }

    pub fn test_set_avatar(&mut self, tok: AuthToken, avatar: &str) {
        let mut state = self.db.state();
        let user = state
            .sessions
            .get(&tok)
            .map(|s| s.user)
            .expect("setting avatar with unknown session");
        if let Some(u) = state.users.get_mut(&user) {
            u.avatar = Some(String::from(avatar));
        }
    }

    pub fn test_create_page(
        &mut self,
        tok: AuthToken,
        ns: Namespace,
        title: &str,
        text: &str,
    ) -> PageId {
        let mut state = self.db.state();
        let author = state
            .sessions
            .get(&tok)
            .map(|s| s.user)
            .expect("creating page with unknown session");
        state.create_page(
            ns,
            String::from(title),
            Revision {
                author,
                date: Utc::now(),
                wikitext: String::from(text),
            },
        )
    }

    pub fn test_delete_page(&mut self, page: PageId) {
        if let Some(p) = self.db.state().pages.get_mut(&page) {
            p.page.deleted = true;
        }
    }

    /// Adds a revision to `page`, as someone editing it after its creation would
    pub fn test_edit_page(&mut self, tok: AuthToken, page: PageId, text: &str) {
        let mut state = self.db.state();
        let author = state
            .sessions
            .get(&tok)
            .map(|s| s.user)
            .expect("editing page with unknown session");
        state
            .pages
            .get_mut(&page)
            .expect("editing unknown page")
            .revisions
            .push(Revision {
                author,
                date: Utc::now(),
                wikitext: String::from(text),
            });
    }

    /// Stores a comment directly, bypassing all checks
    pub fn test_create_comment(
        &mut self,
        tok: AuthToken,
        page: PageId,
        parent: Option<CommentId>,
        title: Option<&str>,
        text: &str,
        date: Time,
    ) -> CommentId {
        let mut state = self.db.state();
        let author = state
            .sessions
            .get(&tok)
            .map(|s| s.user)
            .expect("creating comment with unknown session");
        state.insert_comment(
            author,
            page,
            parent,
            title.map(String::from),
            String::from(text),
            date,
        )
    }

    fn resolve(&self, tok: AuthToken) -> Result<Actor, Error> {
        let state = self.db.state();
        let session = state.sessions.get(&tok).ok_or(Error::PermissionDenied)?;
        let u = state
            .users
            .get(&session.user)
            .ok_or(Error::PermissionDenied)?;
        Ok(Actor {
            id: u.user.id,
            name: String::from(u.user.display_name()),
            can_comment: u.can_comment,
            avatar: u.avatar.clone(),
        })
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        Ok(self.resolve(tok)?.id)
    }

    pub fn csrf_token(&self, tok: AuthToken) -> Result<CsrfToken, Error> {
        self.db
            .state()
            .sessions
            .get(&tok)
            .map(|s| s.csrf)
            .ok_or(Error::PermissionDenied)
    }

    pub async fn fetch_comments(
        &mut self,
        tok: Option<AuthToken>,
        page: PageId,
        action: &str,
    ) -> Result<Option<StreamParams>, Error> {
        let viewer = match tok {
            Some(tok) => Some(self.resolve(tok)?),
            None => None,
        };
        let (page, wikitext) = {
            let state = self.db.state();
            match state.pages.get(&page) {
                None => return Ok(None),
                Some(p) => (
                    p.page.clone(),
                    p.revisions
                        .last()
                        .map(|r| r.wikitext.clone())
                        .unwrap_or_default(),
                ),
            }
        };
        let ctx = PageContext::new(page, action, &wikitext);
        if !api::should_display(&ctx, &self.config) {
            return Ok(None);
        }
        let comments = self
            .db
            .get_associated_comments(ctx.page.id)
            .await
            .map_err(|e| Error::Unknown(format!("{e:?}")))?;
        Ok(Some(StreamParams::new(
            &ctx,
            &self.config,
            viewer.as_ref(),
            &comments,
        )))
    }

    pub async fn comment_permissions(
        &mut self,
        tok: AuthToken,
        comment: CommentId,
    ) -> Result<CommentPermissions, Error> {
        let actor = self.resolve(tok)?;
        if self.db.state().comment(comment).is_none() {
            return Err(Error::NotAComment);
        }
        api::comment_permissions(&mut self.db, &actor, comment)
            .await
            .map_err(|e| Error::Unknown(format!("{e:?}")))
    }

    pub fn comment_page(
        &self,
        comment: CommentId,
        action: &str,
    ) -> Result<CommentPageView, Error> {
        let (comment, associated_page) = {
            let state = self.db.state();
            let comment = state.comment(comment).ok_or(Error::NotAComment)?;
            let associated_page = comment
                .associated_page_id
                .and_then(|p| state.pages.get(&p))
                .map(|p| p.page.clone());
            (comment, associated_page)
        };
        api::comment_page_view(action, &comment, associated_page)
    }

    pub async fn post_reply(
        &mut self,
        tok: AuthToken,
        csrf: Option<CsrfToken>,
        reply: NewReply,
    ) -> Result<CommentId, Error> {
        let actor = self.resolve(tok)?;
        if csrf != Some(self.csrf_token(tok)?) {
            return Err(Error::InvalidCsrfToken);
        }
        api::post_reply(
            &mut self.db,
            &self.notifier,
            &self.config,
            &actor,
            reply,
        )
        .await
        .map_err(|e| Error::Unknown(format!("{e:?}")))?
        .map(|c| c.id)
    }

    pub fn notification_feed(
        &mut self,
        tok: AuthToken,
    ) -> Result<mpsc::UnboundedReceiver<FeedMessage>, Error> {
        let actor = self.resolve(tok)?;
        Ok(self.notifier.add_feed(actor.id))
    }
}
