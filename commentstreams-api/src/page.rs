use crate::{Comment, Config, Error};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PageId(pub i64);

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct Namespace(pub i32);

impl Namespace {
    pub const MAIN: Namespace = Namespace(0);

    /// Talk namespaces are the odd ones, special namespaces (negative) have none
    pub fn is_talk(&self) -> bool {
        self.0 >= 0 && self.0 % 2 == 1
    }

    pub fn subject(&self) -> Namespace {
        if self.is_talk() {
            Namespace(self.0 - 1)
        } else {
            *self
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Page {
    pub id: PageId,
    pub namespace: Namespace,
    pub title: String,
    pub exists: bool,
    pub deleted: bool,
}

impl Page {
    pub fn is_live(&self) -> bool {
        self.exists && !self.deleted
    }
}

pub const NO_COMMENT_STREAMS_TAG: &str = "<no-comment-streams";
const NOWIKI_OPEN: &str = "<nowiki>";
const NOWIKI_CLOSE: &str = "</nowiki>";

/// Everything a single page render knows about whether to show comments
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageContext {
    pub page: Page,
    pub action: String,

    /// Set when the page content opted out with `<no-comment-streams/>`
    pub comments_disabled: bool,
}

impl PageContext {
    pub fn new(page: Page, action: &str, wikitext: &str) -> PageContext {
        PageContext {
            page,
            action: String::from(action),
            comments_disabled: PageContext::disabled_by_directive(wikitext),
        }
    }

    /// Whether `wikitext` holds a `<no-comment-streams>` tag outside of `<nowiki>` sections
    pub fn disabled_by_directive(wikitext: &str) -> bool {
        let mut rest = wikitext;
        loop {
            let tag = match rest.find(NO_COMMENT_STREAMS_TAG) {
                Some(tag) => tag,
                None => return false,
            };
            if let Some(nowiki) = rest.find(NOWIKI_OPEN).filter(|n| *n < tag) {
                // an unclosed nowiki escapes the rest of the page
                match rest[nowiki..].find(NOWIKI_CLOSE) {
                    Some(end) => rest = &rest[nowiki + end + NOWIKI_CLOSE.len()..],
                    None => return false,
                }
                continue;
            }
            rest = &rest[tag + NO_COMMENT_STREAMS_TAG.len()..];
            let ends_tag_name = rest
                .chars()
                .next()
                .map_or(false, |c| c == '/' || c == '>' || c.is_whitespace());
            if ends_tag_name {
                return true;
            }
        }
    }
}

pub fn should_display(ctx: &PageContext, config: &Config) -> bool {
    if ctx.comments_disabled {
        return false;
    }

    if ctx.action != "view" {
        return false;
    }

    let ns = ctx.page.namespace;
    if ns.is_talk() {
        if !config.enable_talk && !config.is_allowed(ns.subject()) {
            return false;
        }
    } else if !config.is_allowed(ns) {
        return false;
    }

    // comments cannot have comments
    if ns == config.comment_namespace() {
        return false;
    }

    ctx.page.is_live()
}

pub fn initially_collapsed(ctx: &PageContext, config: &Config) -> bool {
    config
        .initially_collapsed_namespaces
        .contains(&ctx.page.namespace.subject())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommentPageAction {
    /// Let the host handle the action as for any page
    PassThrough,

    /// Show the comment body under its title, linking back to the associated page
    RenderComment,

    Blocked,
}

/// What happens when `action` is requested on a page of the comment namespace
pub fn comment_page_action(action: &str) -> CommentPageAction {
    match action {
        "info" | "history" => CommentPageAction::PassThrough,
        "view" => CommentPageAction::RenderComment,
        _ => CommentPageAction::Blocked,
    }
}

/// What a request on a comment page shows
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CommentPageView {
    PassThrough,
    Comment {
        /// Replaces the comment page's own title when set
        title: Option<String>,
        body: String,

        /// Page to link back to, `None` once it is gone
        associated_page: Option<Page>,
    },
}

pub fn comment_page_view(
    action: &str,
    comment: &Comment,
    associated_page: Option<Page>,
) -> Result<CommentPageView, Error> {
    Ok(match comment_page_action(action) {
        CommentPageAction::PassThrough => CommentPageView::PassThrough,
        CommentPageAction::RenderComment => CommentPageView::Comment {
            title: comment.title.clone(),
            body: comment
                .body_html
                .clone()
                .unwrap_or_else(|| comment.body_wikitext.clone()),
            associated_page: associated_page.filter(Page::is_live),
        },
        CommentPageAction::Blocked => return Err(Error::PermissionDenied),
    })
}
