use std::{cmp::Reverse, collections::HashMap};

use crate::{initially_collapsed, Actor, Comment, CommentId, Config, DiscussionNode, PageContext};

/// Builds the discussions of a page out of all its comments.
///
/// Discussion roots are ordered by creation date, newest first if `newest_first` is set.
/// Replies are attached flat under their root, always oldest first. Replies whose parent is not
/// a root of `all_comments` are dropped.
pub fn assemble(all_comments: &[Comment], newest_first: bool) -> Vec<DiscussionNode> {
    let mut roots = all_comments
        .iter()
        .filter(|c| c.is_discussion_root())
        .collect::<Vec<_>>();
    // sort_by_key is stable, so same-date roots keep their input order in both directions
    if newest_first {
        roots.sort_by_key(|c| Reverse(c.creation_timestamp));
    } else {
        roots.sort_by_key(|c| c.creation_timestamp);
    }

    let mut replies = HashMap::<CommentId, Vec<&Comment>>::new();
    for c in all_comments {
        if let Some(parent) = c.parent_id {
            replies.entry(parent).or_insert_with(Vec::new).push(c);
        }
    }

    let res = roots
        .into_iter()
        .map(|root| {
            let mut node = DiscussionNode::leaf(root);
            if let Some(mut children) = replies.remove(&root.id) {
                children.sort_by_key(|c| c.creation_timestamp);
                node.children = children.into_iter().map(DiscussionNode::leaf).collect();
            }
            node
        })
        .collect();

    if !replies.is_empty() {
        tracing::debug!(
            num_orphans = replies.values().map(|v| v.len()).sum::<usize>(),
            "dropping replies whose discussion is not on this page"
        );
    }

    res
}

/// Everything the client-side renderer needs to display the comments of a page
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StreamParams {
    /// `None` for anonymous readers
    pub user_display_name: Option<String>,
    pub user_avatar: Option<String>,
    pub newest_streams_on_top: bool,
    pub initially_collapsed: bool,
    pub comments: Vec<DiscussionNode>,
}

impl StreamParams {
    pub fn new(
        ctx: &PageContext,
        config: &Config,
        viewer: Option<&Actor>,
        all_comments: &[Comment],
    ) -> StreamParams {
        StreamParams {
            user_display_name: viewer.map(|a| a.name.clone()),
            user_avatar: viewer.and_then(|a| a.avatar.clone()),
            newest_streams_on_top: config.newest_streams_on_top,
            initially_collapsed: initially_collapsed(ctx, config),
            comments: assemble(all_comments, config.newest_streams_on_top),
        }
    }
}
