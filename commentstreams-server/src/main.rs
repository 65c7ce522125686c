use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use commentstreams_api::{Config, Namespace, DEFAULT_NAMESPACE_INDEX};
use structopt::StructOpt;

mod db;
mod error;
mod extractors;
mod feeds;
mod fuzz;
mod handlers;

use error::Error;
use extractors::*;
use feeds::{ReplyNotifier, UserFeeds};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(
    name = "commentstreams-server",
    about = "Serve threaded comments for wiki pages"
)]
struct Opt {
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Only display comments in these namespaces, defaults to the content namespaces
    #[structopt(long = "allowed-namespace")]
    allowed_namespaces: Vec<i32>,

    #[structopt(long = "content-namespace", default_value = "0")]
    content_namespaces: Vec<i32>,

    /// Display comments on every talk page
    #[structopt(long)]
    enable_talk: bool,

    #[structopt(long)]
    newest_streams_on_top: bool,

    #[structopt(long = "initially-collapsed-namespace")]
    initially_collapsed_namespaces: Vec<i32>,

    /// Keep reply log entries out of recent changes
    #[structopt(long)]
    suppress_logs_from_rcs: bool,

    /// Namespace comment pages are stored in
    #[structopt(long, default_value = "844")]
    namespace_index: i32,
}

impl Opt {
    fn config(&self) -> Config {
        Config {
            allowed_namespaces: if self.allowed_namespaces.is_empty() {
                None
            } else {
                Some(namespaces(&self.allowed_namespaces))
            },
            content_namespaces: namespaces(&self.content_namespaces),
            enable_talk: self.enable_talk,
            newest_streams_on_top: self.newest_streams_on_top,
            initially_collapsed_namespaces: namespaces(&self.initially_collapsed_namespaces),
            suppress_logs_from_rcs: self.suppress_logs_from_rcs,
            namespace_index: self.namespace_index,
        }
    }
}

fn namespaces(ids: &[i32]) -> HashSet<Namespace> {
    ids.iter().copied().map(Namespace).collect()
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub fn app(db: sqlx::PgPool, config: Config) -> Router {
    let db = PgPool::new(db);
    let feeds = UserFeeds::new();
    let config = Arc::new(config);
    let state = AppState {
        notifier: ReplyNotifier {
            db: db.clone(),
            feeds: feeds.clone(),
            config: config.clone(),
        },
        db,
        feeds,
        config,
    };
    Router::new()
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/csrf-token", get(handlers::csrf_token))
        .route("/api/page/:page_id/comments", get(handlers::fetch_comments))
        .route(
            "/api/comment/:comment_id/permissions",
            get(handlers::comment_permissions),
        )
        .route("/api/comment/:comment_id/page", get(handlers::comment_page))
        .route("/api/post-reply", post(handlers::post_reply))
        .route("/ws/notification-feed", get(handlers::notification_feed))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();
    let config = opt.config();
    if config.namespace_index != DEFAULT_NAMESPACE_INDEX {
        tracing::info!(namespace = config.namespace_index, "using custom comment namespace");
    }

    let db = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&db)
        .await
        .context("applying database migrations")?;

    let app = app(db, config);
    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
