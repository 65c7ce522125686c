use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::extract::ws::Message;
use commentstreams_api::{
    self as api, Actor, Comment, CommentStore, Config, FeedMessage, Notifier, Page, UserId, Uuid,
};
use futures::{channel::mpsc, select, SinkExt, StreamExt};
use tokio::sync::RwLock;

use crate::{db, PgPool};

#[derive(Clone, Debug)]
pub struct UserFeeds(
    Arc<RwLock<HashMap<UserId, HashMap<Uuid, mpsc::UnboundedSender<FeedMessage>>>>>,
);

impl UserFeeds {
    pub fn new() -> UserFeeds {
        UserFeeds(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn add_for_user<W, R>(self, user: UserId, mut write: W, read: R)
    where
        W: 'static + Send + Unpin + futures::Sink<Message>,
        <W as futures::Sink<Message>>::Error: Send,
        R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
    {
        // Unbounded, so that relaying never waits on a socket while holding the read lock
        let (sender, mut receiver) = mpsc::unbounded();
        let sender_id = Uuid::new_v4();

        self.0
            .write()
            .await
            .entry(user)
            .or_insert_with(HashMap::new)
            .insert(sender_id, sender);

        let this = self.clone();
        let mut read = read.fuse();
        tokio::spawn(async move {
            macro_rules! remove_self {
                () => {{
                    let mut feeds = this.0.write().await;
                    if let Some(socks) = feeds.get_mut(&user) {
                        socks.remove(&sender_id);
                        if socks.is_empty() {
                            feeds.remove(&user);
                        }
                    }
                    tracing::debug!(?user, "notification feed closed");
                    return;
                }};
            }
            macro_rules! send_message {
                ( $msg:expr ) => {{
                    let msg: FeedMessage = $msg;
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(?err, ?msg, "failed serializing message to json");
                            continue;
                        }
                    };
                    if write.send(Message::Text(json)).await.is_err() {
                        remove_self!();
                    }
                }};
            }
            loop {
                select! {
                    msg = receiver.next() => match msg {
                        None => remove_self!(),
                        Some(msg) => send_message!(msg),
                    },
                    msg = read.next() => match msg {
                        None => remove_self!(),
                        Some(Ok(Message::Close(_))) => remove_self!(),
                        Some(Ok(Message::Text(msg))) => {
                            if msg != "ping" {
                                tracing::warn!("received unexpected message from client: {msg:?}");
                                remove_self!();
                            }
                            send_message!(FeedMessage::Pong);
                        }
                        Some(msg) => {
                            tracing::warn!("received unexpected message from client: {msg:?}");
                            remove_self!();
                        }
                    },
                }
            }
        });
    }

    pub async fn relay(&self, users: impl IntoIterator<Item = UserId>, msg: FeedMessage) {
        let feeds = self.0.read().await;
        for u in users {
            if let Some(socks) = feeds.get(&u) {
                for s in socks.values() {
                    let _ = s.unbounded_send(msg.clone());
                }
            }
        }
    }
}

/// Tells everyone taking part in a discussion about new replies to it, through their feeds
#[derive(Clone, Debug)]
pub struct ReplyNotifier {
    pub db: PgPool,
    pub feeds: UserFeeds,
    pub config: Arc<Config>,
}

#[async_trait]
impl Notifier for ReplyNotifier {
    async fn send_reply_notifications(
        &self,
        reply: &Comment,
        page: &Page,
        actor: &Actor,
        parent: &Comment,
    ) -> anyhow::Result<()> {
        let this = self.clone();
        let msg = FeedMessage::NewReply {
            reply: reply.clone(),
            page: page.id,
            parent: parent.id,
            actor: actor.id,
        };
        let (page, actor, parent) = (page.id, actor.id, parent.clone());
        tokio::spawn(async move {
            let mut conn = match this.db.acquire().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::error!(?err, "failed acquiring connection to notify reply");
                    return;
                }
            };
            let mut db = db::PostgresDb {
                conn: &mut *conn,
                config: &this.config,
            };
            let all = match db.get_associated_comments(page).await {
                Ok(all) => all,
                Err(err) => {
                    tracing::error!(?err, ?page, "failed listing discussion participants");
                    return;
                }
            };
            let recipients = api::discussion_participants(&all, &parent, actor);
            tracing::debug!(?recipients, discussion = ?parent.id, "notifying reply");
            this.feeds.relay(recipients, msg).await;
        });
        Ok(())
    }
}
