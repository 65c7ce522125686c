use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{NaiveDateTime, SubsecRound, TimeZone, Utc};
use commentstreams_api::{
    Actor, AuditLog, AuthToken, Comment, CommentId, CommentStore, Config, CsrfToken, LogEntry,
    Namespace, OriginalAuthor, Page, PageId, User, UserId, Uuid,
};
use futures::TryStreamExt;
use sqlx::{postgres::PgRow, Connection, Row};

use crate::Error;

const LOG_TYPE: &str = "commentstreams";

pub struct Session {
    pub user: UserId,
    pub csrf: CsrfToken,
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<Session, Error> {
    let row = sqlx::query(
        "UPDATE sessions SET last_active = NOW() WHERE id = $1 RETURNING user_id, csrf_token",
    )
    .bind(token.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("recovering session {:?}", token))?
    .ok_or(Error::permission_denied())?;
    Ok(Session {
        user: UserId(row.try_get("user_id").context("retrieving the user_id field")?),
        csrf: CsrfToken(
            row.try_get::<Uuid, _>("csrf_token")
                .context("retrieving the csrf_token field")?,
        ),
    })
}

pub async fn fetch_actor(conn: &mut sqlx::PgConnection, user: UserId) -> anyhow::Result<Actor> {
    let row = sqlx::query("SELECT name, real_name, can_comment, avatar FROM users WHERE id = $1")
        .bind(user.0)
        .fetch_one(conn)
        .await
        .with_context(|| format!("fetching user {:?}", user))?;
    let user = User {
        id: user,
        name: row.try_get("name").context("retrieving the name field")?,
        real_name: row
            .try_get("real_name")
            .context("retrieving the real_name field")?,
    };
    Ok(Actor {
        id: user.id,
        name: String::from(user.display_name()),
        can_comment: row
            .try_get("can_comment")
            .context("retrieving the can_comment field")?,
        avatar: row.try_get("avatar").context("retrieving the avatar field")?,
    })
}

/// Returns the page along with the wikitext of its latest revision
pub async fn fetch_page_with_text(
    conn: &mut sqlx::PgConnection,
    page: PageId,
) -> anyhow::Result<Option<(Page, String)>> {
    let row = sqlx::query(
        "
            SELECT p.id, p.namespace, p.title, p.deleted, r.wikitext
                FROM pages p
            LEFT JOIN LATERAL (
                SELECT wikitext
                    FROM revisions
                WHERE page_id = p.id
                ORDER BY date DESC, id DESC
                LIMIT 1
            ) r ON TRUE
            WHERE p.id = $1
        ",
    )
    .bind(page.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("fetching page {:?}", page))?;
    let row = match row {
        Some(row) => row,
        None => return Ok(None),
    };
    let wikitext: Option<String> = row
        .try_get("wikitext")
        .context("retrieving the wikitext field")?;
    Ok(Some((
        Page {
            id: PageId(row.try_get("id").context("retrieving the id field")?),
            namespace: Namespace(
                row.try_get("namespace")
                    .context("retrieving the namespace field")?,
            ),
            title: row.try_get("title").context("retrieving the title field")?,
            exists: wikitext.is_some(),
            deleted: row
                .try_get("deleted")
                .context("retrieving the deleted field")?,
        },
        wikitext.unwrap_or_default(),
    )))
}

// author and date come from the oldest revision, contents from the latest one
const COMMENT_QUERY: &str = "
    SELECT
        c.page_id,
        c.assoc_page_id,
        c.parent_page_id,
        c.comment_title,
        first_rev.author_id,
        first_rev.date AS creation_date,
        u.name AS author_name,
        u.real_name AS author_real_name,
        last_rev.wikitext,
        last_rev.html
    FROM cs_comments c
    INNER JOIN pages p
        ON p.id = c.page_id
    INNER JOIN LATERAL (
        SELECT author_id, date
            FROM revisions
        WHERE page_id = c.page_id
        ORDER BY date, id
        LIMIT 1
    ) first_rev ON TRUE
    INNER JOIN LATERAL (
        SELECT wikitext, html
            FROM revisions
        WHERE page_id = c.page_id
        ORDER BY date DESC, id DESC
        LIMIT 1
    ) last_rev ON TRUE
    INNER JOIN users u
        ON u.id = first_rev.author_id
    WHERE p.deleted = FALSE
";

fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    let author = User {
        id: UserId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        name: row
            .try_get("author_name")
            .context("retrieving the author_name field")?,
        real_name: row
            .try_get("author_real_name")
            .context("retrieving the author_real_name field")?,
    };
    Ok(Comment {
        id: CommentId(row.try_get("page_id").context("retrieving the page_id field")?),
        associated_page_id: row
            .try_get::<Option<i64>, _>("assoc_page_id")
            .context("retrieving the assoc_page_id field")?
            .map(PageId),
        parent_id: row
            .try_get::<Option<i64>, _>("parent_page_id")
            .context("retrieving the parent_page_id field")?
            .map(CommentId),
        author_id: author.id,
        author_name: String::from(author.display_name()),
        creation_timestamp: Utc.from_utc_datetime(
            &row.try_get::<NaiveDateTime, _>("creation_date")
                .context("retrieving the creation_date field")?,
        ),
        title: row
            .try_get("comment_title")
            .context("retrieving the comment_title field")?,
        body_wikitext: row
            .try_get("wikitext")
            .context("retrieving the wikitext field")?,
        body_html: row.try_get("html").context("retrieving the html field")?,
    })
}

pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
    pub config: &'a Config,
}

#[async_trait]
impl<'a> CommentStore for PostgresDb<'a> {
    async fn get_comment(&mut self, id: CommentId) -> anyhow::Result<Option<Comment>> {
        let row = sqlx::query(&format!("{COMMENT_QUERY} AND c.page_id = $1"))
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("querying comment {:?}", id))?;
        row.as_ref().map(comment_from_row).transpose()
    }

    async fn get_associated_comments(&mut self, page: PageId) -> anyhow::Result<Vec<Comment>> {
        let query = format!("{COMMENT_QUERY} AND c.assoc_page_id = $1 ORDER BY c.page_id");
        let mut rows = sqlx::query(&query).bind(page.0).fetch(&mut *self.conn);
        let mut res = Vec::new();
        while let Some(row) = rows
            .try_next()
            .await
            .with_context(|| format!("querying comments of page {:?}", page))?
        {
            res.push(comment_from_row(&row)?);
        }
        Ok(res)
    }

    async fn get_page(&mut self, page: PageId) -> anyhow::Result<Option<Page>> {
        Ok(fetch_page_with_text(&mut *self.conn, page)
            .await?
            .map(|(page, _)| page))
    }

    async fn insert_reply(
        &mut self,
        actor: &Actor,
        wikitext: &str,
        parent: &Comment,
    ) -> anyhow::Result<Option<Comment>> {
        let assoc_page = match parent.associated_page_id {
            Some(p) => p,
            None => return Ok(None),
        };
        // postgres keeps microseconds
        let now = Utc::now().trunc_subsecs(6);
        let mut transaction = self
            .conn
            .begin()
            .await
            .context("opening reply transaction")?;
        let id: i64 = sqlx::query(
            "INSERT INTO pages (namespace, title, deleted) VALUES ($1, $2, FALSE) RETURNING id",
        )
        .bind(self.config.comment_namespace().0)
        .bind(Uuid::new_v4().to_string())
        .fetch_one(&mut transaction)
        .await
        .context("creating comment page")?
        .try_get("id")
        .context("retrieving the id field")?;
        sqlx::query(
            "
                INSERT INTO revisions (page_id, author_id, date, wikitext, html)
                VALUES ($1, $2, $3, $4, NULL)
            ",
        )
        .bind(id)
        .bind(actor.id.0)
        .bind(now.naive_utc())
        .bind(wikitext)
        .execute(&mut transaction)
        .await
        .with_context(|| format!("creating first revision of comment {id}"))?;
        sqlx::query(
            "
                INSERT INTO cs_comments (page_id, assoc_page_id, parent_page_id, comment_title)
                VALUES ($1, $2, $3, NULL)
            ",
        )
        .bind(id)
        .bind(assoc_page.0)
        .bind(parent.id.0)
        .execute(&mut transaction)
        .await
        .with_context(|| format!("registering comment {id}"))?;
        transaction
            .commit()
            .await
            .with_context(|| format!("committing comment {id}"))?;
        Ok(Some(Comment {
            id: CommentId(id),
            associated_page_id: Some(assoc_page),
            parent_id: Some(parent.id),
            author_id: actor.id,
            author_name: actor.name.clone(),
            creation_timestamp: now,
            title: None,
            body_wikitext: String::from(wikitext),
            body_html: None,
        }))
    }
}

#[async_trait]
impl<'a> OriginalAuthor for PostgresDb<'a> {
    async fn original_author(&mut self, page: PageId) -> anyhow::Result<Option<UserId>> {
        let row = sqlx::query(
            "
                SELECT r.author_id
                    FROM revisions r
                INNER JOIN pages p
                    ON p.id = r.page_id
                WHERE r.page_id = $1
                    AND p.deleted = FALSE
                ORDER BY r.date, r.id
                LIMIT 1
            ",
        )
        .bind(page.0)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("fetching oldest revision of page {:?}", page))?;
        row.map(|r| -> anyhow::Result<UserId> {
            Ok(UserId(
                r.try_get("author_id")
                    .context("retrieving the author_id field")?,
            ))
        })
        .transpose()
    }
}

#[async_trait]
impl<'a> AuditLog for PostgresDb<'a> {
    async fn record(&mut self, entry: LogEntry) -> anyhow::Result<()> {
        let res = sqlx::query(
            "
                INSERT INTO logging
                    (log_type, log_action, performer_id, target_page_id, date, in_recent_changes)
                VALUES ($1, $2, $3, $4, NOW(), $5)
            ",
        )
        .bind(LOG_TYPE)
        .bind(entry.action.as_str())
        .bind(entry.performer.0)
        .bind(entry.target.0)
        .bind(entry.published)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("recording log entry {:?}", entry))?;
        if res.rows_affected() != 1 {
            return Err(anyhow!(
                "log entry insertion affected {} rows",
                res.rows_affected()
            ));
        }
        Ok(())
    }
}
