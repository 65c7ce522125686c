use async_trait::async_trait;

use crate::{Actor, Comment, CommentId, Page, PageId, UserId};

#[async_trait]
pub trait CommentStore {
    async fn get_comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>>;
    async fn get_associated_comments(&mut self, page: PageId) -> anyhow::Result<Vec<Comment>>;

    /// Returns the page even if it was deleted, `None` only if no such page id was ever known
    async fn get_page(&mut self, page: PageId) -> anyhow::Result<Option<Page>>;

    /// Stores a reply under `parent`, returning `None` if the store refused it
    async fn insert_reply(
        &mut self,
        actor: &Actor,
        wikitext: &str,
        parent: &Comment,
    ) -> anyhow::Result<Option<Comment>>;
}

#[async_trait]
pub trait OriginalAuthor {
    /// Author of the oldest revision of `page`, `None` if the page has no revision
    async fn original_author(&mut self, page: PageId) -> anyhow::Result<Option<UserId>>;
}

#[async_trait]
pub trait Notifier {
    async fn send_reply_notifications(
        &self,
        reply: &Comment,
        page: &Page,
        actor: &Actor,
        parent: &Comment,
    ) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LogEntry {
    pub action: String,
    pub performer: UserId,
    pub target: PageId,

    /// Whether the entry also shows up in recent changes
    pub published: bool,
}

#[async_trait]
pub trait AuditLog {
    async fn record(&mut self, entry: LogEntry) -> anyhow::Result<()>;
}
