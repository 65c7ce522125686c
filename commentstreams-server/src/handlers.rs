use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{ws::Message, Path, Query, State, WebSocketUpgrade},
    Json,
};
use commentstreams_api::{
    self as api, AuthToken, CommentId, CommentPageView, CommentPermissions, CommentStore, Config,
    CsrfToken, NewReply, PageContext, PageId, StreamParams, UserId, Uuid,
};
use futures::{SinkExt, StreamExt};

use crate::{db, extractors::*, Error, ReplyNotifier, UserFeeds};

pub async fn whoami(Auth(actor): Auth) -> Json<UserId> {
    Json(actor.id)
}

pub async fn csrf_token(user: PreAuth, mut conn: PgConn) -> Result<Json<CsrfToken>, Error> {
    Ok(Json(db::recover_session(&mut *conn, user.0).await?.csrf))
}

#[derive(Debug, serde::Deserialize)]
pub struct RenderQuery {
    pub action: Option<String>,
}

pub async fn fetch_comments(
    MaybeAuth(viewer): MaybeAuth,
    State(config): State<Arc<Config>>,
    mut conn: PgConn,
    Path(page): Path<i64>,
    Query(q): Query<RenderQuery>,
) -> Result<Json<Option<StreamParams>>, Error> {
    let page = PageId(page);
    let (page, wikitext) = match db::fetch_page_with_text(&mut *conn, page)
        .await
        .with_context(|| format!("fetching page {:?} to render", page))?
    {
        Some(res) => res,
        None => return Ok(Json(None)),
    };
    let ctx = PageContext::new(page, q.action.as_deref().unwrap_or("view"), &wikitext);
    if !api::should_display(&ctx, &config) {
        tracing::debug!(page = ?ctx.page.id, action = ?ctx.action, "not displaying comments");
        return Ok(Json(None));
    }
    let comments = db::PostgresDb {
        conn: &mut *conn,
        config: &config,
    }
    .get_associated_comments(ctx.page.id)
    .await?;
    Ok(Json(Some(StreamParams::new(
        &ctx,
        &config,
        viewer.as_ref(),
        &comments,
    ))))
}

pub async fn comment_permissions(
    Auth(actor): Auth,
    State(config): State<Arc<Config>>,
    mut conn: PgConn,
    Path(comment): Path<i64>,
) -> Result<Json<CommentPermissions>, Error> {
    let comment = CommentId(comment);
    let mut db = db::PostgresDb {
        conn: &mut *conn,
        config: &config,
    };
    if db.get_comment(comment).await?.is_none() {
        return Err(Error::not_a_comment());
    }
    Ok(Json(
        api::comment_permissions(&mut db, &actor, comment)
            .await
            .with_context(|| format!("computing permissions of {:?} on {:?}", actor.id, comment))?,
    ))
}

pub async fn comment_page(
    State(config): State<Arc<Config>>,
    mut conn: PgConn,
    Path(comment): Path<i64>,
    Query(q): Query<RenderQuery>,
) -> Result<Json<CommentPageView>, Error> {
    let comment = CommentId(comment);
    let mut db = db::PostgresDb {
        conn: &mut *conn,
        config: &config,
    };
    let comment = db.get_comment(comment).await?.ok_or(Error::not_a_comment())?;
    let associated_page = match comment.associated_page_id {
        Some(page) => db.get_page(page).await?,
        None => None,
    };
    Ok(Json(api::comment_page_view(
        q.action.as_deref().unwrap_or("view"),
        &comment,
        associated_page,
    )?))
}

pub async fn post_reply(
    CsrfAuth(actor): CsrfAuth,
    State(config): State<Arc<Config>>,
    State(notifier): State<ReplyNotifier>,
    mut conn: PgConn,
    Json(reply): Json<NewReply>,
) -> Result<Json<CommentId>, Error> {
    let mut db = db::PostgresDb {
        conn: &mut *conn,
        config: &config,
    };
    let parent = reply.parentid;
    let reply = api::post_reply(&mut db, &notifier, &config, &actor, reply)
        .await
        .with_context(|| format!("posting reply to {:?} as {:?}", parent, actor.id))??;
    Ok(Json(reply.id))
}

pub async fn notification_feed(
    ws: WebSocketUpgrade,
    State(db): State<PgPool>,
    State(feeds): State<UserFeeds>,
) -> Result<axum::response::Response, Error> {
    Ok(ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        notification_feed_impl(write, read, db, feeds)
    }))
}

pub async fn notification_feed_impl<W, R>(mut write: W, mut read: R, db: PgPool, feeds: UserFeeds)
where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    tracing::debug!("notification feed websocket connected");
    if let Some(Ok(Message::Text(token))) = read.next().await {
        if let Ok(token) = Uuid::try_from(token.trim()) {
            if let Ok(mut conn) = db.acquire().await {
                if let Ok(session) = db::recover_session(&mut *conn, AuthToken(token)).await {
                    // release the connection, the feed can stay open for hours
                    std::mem::drop(conn);
                    if write.send(Message::Text(String::from("ok"))).await.is_ok() {
                        tracing::debug!(user = ?session.user, "notification feed auth success");
                        feeds.add_for_user(session.user, write, read).await;
                    }
                    return;
                }
            }
        }
        tracing::debug!(?token, "notification feed auth failure");
        let _ = write
            .send(Message::Text(String::from("permission denied")))
            .await;
    }
}
