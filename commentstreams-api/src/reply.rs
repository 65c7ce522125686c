use std::collections::BTreeSet;

use anyhow::Context;

use crate::{
    Actor, AuditLog, Comment, CommentStore, Config, Error, LogEntry, NewReply, Notifier, Page,
    UserId,
};

pub const REPLY_CREATE_ACTION: &str = "reply-create";

/// Posts `reply` as `actor`.
///
/// The outer error is an infrastructure failure while looking the parent up. The inner error is
/// what the requester should be told. Once the reply is stored, failing to log or notify does not
/// fail the request.
pub async fn post_reply<D, N>(
    db: &mut D,
    notifier: &N,
    config: &Config,
    actor: &Actor,
    reply: NewReply,
) -> anyhow::Result<Result<Comment, Error>>
where
    D: CommentStore + AuditLog + ?Sized + Send,
    N: Notifier + ?Sized + Sync,
{
    if !actor.can_comment {
        return Ok(Err(Error::PermissionDenied));
    }
    if let Err(e) = reply.validate() {
        return Ok(Err(e));
    }

    let (discussion, page) = match resolve_parent(db, &reply).await? {
        Some(res) => res,
        None => return Ok(Err(Error::ParentNotFound)),
    };

    let new = match db.insert_reply(actor, &reply.wikitext, &discussion).await {
        Ok(Some(new)) => new,
        Ok(None) => {
            tracing::warn!(parent = ?discussion.id, "comment store refused reply");
            return Ok(Err(Error::PersistFailure));
        }
        Err(err) => {
            tracing::error!(?err, parent = ?discussion.id, "failed inserting reply");
            return Ok(Err(Error::PersistFailure));
        }
    };
    tracing::info!(
        reply = ?new.id,
        parent = ?discussion.id,
        page = ?page.id,
        actor = ?actor.id,
        "reply created"
    );

    let entry = LogEntry {
        action: String::from(REPLY_CREATE_ACTION),
        performer: actor.id,
        target: new.associated_page_id.unwrap_or(page.id),
        published: !config.suppress_logs_from_rcs,
    };
    if let Err(err) = db.record(entry).await {
        tracing::error!(?err, reply = ?new.id, "failed recording reply-create log entry");
    }

    if let Err(err) = notifier
        .send_reply_notifications(&new, &page, actor, &discussion)
        .await
    {
        tracing::warn!(?err, reply = ?new.id, "failed sending reply notifications");
    }

    Ok(Ok(new))
}

/// Finds the discussion root a reply to `reply.parentid` belongs under, and its page.
///
/// Replies are flat, so replying to a reply lands under that reply's discussion root, however
/// deep the reply is. Any missing link, including a deleted associated page or a loop in the
/// parent chain, resolves to `None`.
async fn resolve_parent<S>(
    store: &mut S,
    reply: &NewReply,
) -> anyhow::Result<Option<(Comment, Page)>>
where
    S: CommentStore + ?Sized + Send,
{
    let parent = match store
        .get_comment(reply.parentid)
        .await
        .with_context(|| format!("fetching parent comment {:?}", reply.parentid))?
    {
        Some(parent) => parent,
        None => return Ok(None),
    };

    // replies nested deeper than one level may predate flattening, walk up to the real root
    let mut discussion = parent;
    let mut seen = BTreeSet::new();
    while let Some(up) = discussion.parent_id {
        if !seen.insert(discussion.id) {
            tracing::warn!(comment = ?discussion.id, "comment parent chain loops");
            return Ok(None);
        }
        discussion = match store
            .get_comment(up)
            .await
            .with_context(|| format!("fetching ancestor comment {:?}", up))?
        {
            Some(c) if c.associated_page_id == discussion.associated_page_id => c,
            _ => return Ok(None),
        };
    }

    let page_id = match discussion.associated_page_id {
        Some(page_id) => page_id,
        None => return Ok(None),
    };
    match store
        .get_page(page_id)
        .await
        .with_context(|| format!("fetching associated page {:?}", page_id))?
    {
        Some(page) if page.is_live() => Ok(Some((discussion, page))),
        _ => Ok(None),
    }
}

/// Users to notify about a new reply in `discussion`: whoever started it or replied to it,
/// except `actor`
pub fn discussion_participants(
    all_comments: &[Comment],
    discussion: &Comment,
    actor: UserId,
) -> BTreeSet<UserId> {
    all_comments
        .iter()
        .filter(|c| c.parent_id == Some(discussion.id))
        .map(|c| c.author_id)
        .chain(std::iter::once(discussion.author_id))
        .filter(|u| *u != actor)
        .collect()
}
