use anyhow::Context;
use uuid::Uuid;

use crate::{CommentId, Namespace, OriginalAuthor, UserId, STUB_UUID};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

/// Per-session token that state-changing requests must echo back
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CsrfToken(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,

    /// Whether the actor holds the `cs-comment` right
    pub can_comment: bool,

    /// Url of the image shown next to the actor's new comments
    pub avatar: Option<String>,
}

/// `original_author` is the author of the oldest revision of the comment page, or `None` if
/// that page does not exist yet
pub fn can_edit(actor: &Actor, original_author: Option<UserId>) -> bool {
    match original_author {
        None => true,
        Some(author) => actor.id == author,
    }
}

pub fn can_delete(actor: &Actor, original_author: Option<UserId>) -> bool {
    can_edit(actor, original_author)
}

/// Comment pages never move, and nothing moves into the comment namespace
pub fn can_move(from: Namespace, to: Namespace, comment_namespace: Namespace) -> bool {
    from != comment_namespace && to != comment_namespace
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentPermissions {
    pub can_edit: bool,
    pub can_delete: bool,
}

pub async fn comment_permissions<D>(
    db: &mut D,
    actor: &Actor,
    comment: CommentId,
) -> anyhow::Result<CommentPermissions>
where
    D: OriginalAuthor + ?Sized + Send,
{
    let author = db
        .original_author(comment.page())
        .await
        .with_context(|| format!("fetching original author of comment {:?}", comment))?;
    Ok(CommentPermissions {
        can_edit: can_edit(actor, author),
        can_delete: can_delete(actor, author),
    })
}
