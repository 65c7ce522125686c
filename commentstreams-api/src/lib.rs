use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

mod auth;
pub use auth::{
    can_delete, can_edit, can_move, comment_permissions, Actor, AuthToken, CommentPermissions,
    CsrfToken,
};

mod comment;
pub use comment::{Comment, CommentId, DiscussionNode, NewReply};

mod config;
pub use config::{Config, DEFAULT_NAMESPACE_INDEX};

mod db;
pub use db::{AuditLog, CommentStore, LogEntry, Notifier, OriginalAuthor};

mod error;
pub use error::Error;

mod page;
pub use page::{
    comment_page_action, comment_page_view, initially_collapsed, should_display, CommentPageAction,
    CommentPageView, Namespace, Page, PageContext, PageId,
};

mod reply;
pub use reply::{discussion_participants, post_reply, REPLY_CREATE_ACTION};

mod tree;
pub use tree::{assemble, StreamParams};

mod user;
pub use user::{User, UserId};

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub enum FeedMessage {
    Pong,
    NewReply {
        reply: Comment,
        page: PageId,
        parent: CommentId,
        actor: UserId,
    },
}

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}
