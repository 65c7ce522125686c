use crate::{PageId, Time, UserId};

/// Comments are pages of the comment namespace, so their id is that page's id
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub i64);

impl CommentId {
    pub fn page(&self) -> PageId {
        PageId(self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,

    /// Page this comment is attached to, only `None` before the comment got persisted
    pub associated_page_id: Option<PageId>,

    /// `None` for discussion roots
    pub parent_id: Option<CommentId>,

    /// Author of the first revision of the comment page
    pub author_id: UserId,
    pub author_name: String,

    pub creation_timestamp: Time,

    /// Only set on discussion roots
    pub title: Option<String>,

    pub body_wikitext: String,
    pub body_html: Option<String>,
}

impl Comment {
    pub fn is_discussion_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// One discussion as handed to the client-side renderer
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DiscussionNode {
    pub id: CommentId,
    pub title: Option<String>,
    pub body: String,
    pub author: String,
    pub timestamp: Time,
    pub children: Vec<DiscussionNode>,
}

impl DiscussionNode {
    pub fn leaf(c: &Comment) -> DiscussionNode {
        DiscussionNode {
            id: c.id,
            title: c.title.clone(),
            body: c.body_html.clone().unwrap_or_else(|| c.body_wikitext.clone()),
            author: c.author_name.clone(),
            timestamp: c.creation_timestamp,
            children: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewReply {
    pub wikitext: String,
    pub parentid: CommentId,
}

impl NewReply {
    pub fn validate(&self) -> Result<(), crate::Error> {
        crate::validate_string(&self.wikitext)
    }
}
