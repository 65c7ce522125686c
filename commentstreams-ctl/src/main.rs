use anyhow::{anyhow, Context};
use commentstreams_api::{
    AuthToken, CommentId, CommentPageView, CommentPermissions, CsrfToken, DiscussionNode,
    Error as ApiError,
    NewReply, StreamParams, UserId, Uuid,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Display the user the session belongs to
    Whoami,

    /// Display the discussions of a page
    ShowComments {
        page: i64,

        /// Page action the comments would be rendered for
        #[structopt(long, default_value = "view")]
        action: String,
    },

    /// Display the page of a comment, as the wiki would for `action`
    ShowCommentPage {
        comment: i64,

        #[structopt(long, default_value = "view")]
        action: String,
    },

    /// Display whether the session user may edit or delete a comment
    Permissions { comment: i64 },

    /// Reply to a comment
    PostReply {
        /// Comment to reply to, replies to a reply land in its discussion
        parent: i64,

        wikitext: String,
    },
}

fn session_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("SESSION_TOKEN").context("retrieving SESSION_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing SESSION_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

async fn parse_response<T>(resp: reqwest::Response) -> anyhow::Result<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    if resp.status().is_success() {
        return resp.json().await.context("parsing server response");
    }
    let status = resp.status();
    let body = resp.bytes().await.context("reading error response")?;
    match ApiError::parse(&body) {
        Ok(err) => Err(anyhow!(
            "server refused request ({status}, {}): {err}",
            err.message_key()
        )),
        Err(_) => Err(anyhow!("server returned {status}: {body:?}")),
    }
}

fn print_node(node: &DiscussionNode, depth: usize) {
    let indent = "    ".repeat(depth);
    match &node.title {
        Some(title) => println!("{indent}[{}] {title}", node.id.0),
        None => println!("{indent}[{}]", node.id.0),
    }
    println!("{indent}  by {} on {}", node.author, node.timestamp);
    for line in node.body.lines() {
        println!("{indent}  | {line}");
    }
    for c in &node.children {
        print_node(c, depth + 1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();

    match opt.cmd {
        Command::Whoami => {
            let user: UserId = parse_response(
                client
                    .get(format!("{}/api/whoami", opt.host))
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("{}", user.0);
        }
        Command::ShowComments { page, action } => {
            let req = client
                .get(format!("{}/api/page/{page}/comments", opt.host))
                .query(&[("action", &action)]);
            // anonymous readers are fine here
            let req = match session_token() {
                Ok(tok) => req.bearer_auth(tok.0),
                Err(err) => {
                    tracing::debug!(?err, "fetching comments anonymously");
                    req
                }
            };
            let params: Option<StreamParams> = parse_response(req.send().await?).await?;
            match params {
                None => println!("comments are not displayed on this page"),
                Some(params) => {
                    if params.comments.is_empty() {
                        println!("no comments yet");
                    }
                    for d in &params.comments {
                        print_node(d, 0);
                    }
                }
            }
        }
        Command::ShowCommentPage { comment, action } => {
            let view: CommentPageView = parse_response(
                client
                    .get(format!("{}/api/comment/{comment}/page", opt.host))
                    .query(&[("action", &action)])
                    .send()
                    .await?,
            )
            .await?;
            match view {
                CommentPageView::PassThrough => println!("handled by the wiki like any page"),
                CommentPageView::Comment {
                    title,
                    body,
                    associated_page,
                } => {
                    if let Some(page) = associated_page {
                        println!("< {}", page.title);
                    }
                    if let Some(title) = title {
                        println!("{title}");
                    }
                    println!("{body}");
                }
            }
        }
        Command::Permissions { comment } => {
            let perms: CommentPermissions = parse_response(
                client
                    .get(format!("{}/api/comment/{comment}/permissions", opt.host))
                    .bearer_auth(session_token()?.0)
                    .send()
                    .await?,
            )
            .await?;
            println!("edit: {}, delete: {}", perms.can_edit, perms.can_delete);
        }
        Command::PostReply { parent, wikitext } => {
            let tok = session_token()?;
            let csrf: CsrfToken = parse_response(
                client
                    .get(format!("{}/api/csrf-token", opt.host))
                    .bearer_auth(tok.0)
                    .send()
                    .await?,
            )
            .await
            .context("fetching csrf token")?;
            let reply = NewReply {
                wikitext,
                parentid: CommentId(parent),
            };
            reply.validate()?;
            let id: CommentId = parse_response(
                client
                    .post(format!("{}/api/post-reply", opt.host))
                    .bearer_auth(tok.0)
                    .header("X-CSRF-Token", csrf.0.to_string())
                    .json(&reply)
                    .send()
                    .await?,
            )
            .await?;
            tracing::info!(reply = ?id, "reply posted");
            println!("{}", id.0);
        }
    }

    Ok(())
}
