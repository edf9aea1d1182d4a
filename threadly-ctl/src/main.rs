use std::{collections::VecDeque, sync::Arc};

use anyhow::Context;
use threadly_client::{
    api::{CommentId, CurrentUser, PostId, SortBy, SortOrder, UserId},
    Config, Engine, MergeOutcome, NodeView, ReactionState, ThreadController, ThreadView,
};

mod http;
use http::HttpTransport;

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, env = "THREADLY_HOST")]
    host: String,

    /// Post whose comment thread to work on
    #[structopt(short, long, env = "THREADLY_POST")]
    post: String,

    /// Bearer token, required for anything but reading
    #[structopt(long, env = "THREADLY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Id of the logged-in user, used to know which comments are theirs
    #[structopt(long, env = "THREADLY_USER_ID")]
    user_id: Option<String>,

    #[structopt(long, env = "THREADLY_USERNAME", default_value = "me")]
    username: String,

    /// Root comments per page
    #[structopt(long, default_value = "10")]
    take: u64,

    /// Replies per page
    #[structopt(long, default_value = "5")]
    reply_take: u64,

    /// Sort roots by likes instead of creation date
    #[structopt(long)]
    by_likes: bool,

    /// Oldest (or least liked) first
    #[structopt(long)]
    asc: bool,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Show the thread
    List {
        /// Number of root pages to fetch
        #[structopt(long, default_value = "1")]
        pages: usize,
    },

    /// Show all the replies of a comment
    Replies { id: String },

    /// Post a new root comment
    Comment { text: String },

    /// Reply to a comment
    Reply { parent: String, text: String },

    /// Change the text of one of your comments
    Edit { id: String, text: String },

    /// Delete one of your comments along with its replies
    Delete {
        id: String,

        /// Actually delete, without this only the confirmation is shown
        #[structopt(long)]
        yes: bool,
    },

    /// Like a comment, or withdraw your like
    Like { id: String },

    /// Dislike a comment, or withdraw your dislike
    Dislike { id: String },
}

impl Opt {
    fn config(&self) -> Config {
        Config {
            top_level_page_size: self.take,
            reply_page_size: self.reply_take,
            sort_by: match self.by_likes {
                true => SortBy::Likes,
                false => SortBy::CreatedAt,
            },
            order: match self.asc {
                true => SortOrder::Asc,
                false => SortOrder::Desc,
            },
            ..Config::default()
        }
    }

    fn current_user(&self) -> Option<CurrentUser> {
        self.user_id.as_ref().map(|id| CurrentUser {
            id: UserId(id.clone()),
            username: self.username.clone(),
            avatar_url: None,
        })
    }
}

type Controller = ThreadController<HttpTransport>;

/// Loads pages and reply windows until `id` is in the cache
async fn locate(ctl: &Controller, id: &CommentId) -> anyhow::Result<()> {
    ctl.load().await.context("loading the thread")?;
    while !ctl.engine().store().contains(id) && ctl.engine().summary().has_more {
        ctl.load_more().await.context("loading more comments")?;
    }
    let mut queue = ctl
        .engine()
        .store()
        .roots()
        .into_iter()
        .map(|c| c.id.clone())
        .collect::<VecDeque<_>>();
    while let Some(next) = queue.pop_front() {
        if ctl.engine().store().contains(id) {
            return Ok(());
        }
        let has_replies = ctl
            .engine()
            .get(&next)
            .map(|c| c.direct_replies_count > 0)
            .unwrap_or(false);
        if !has_replies {
            continue;
        }
        load_all_replies(ctl, &next).await?;
        queue.extend(
            ctl.engine()
                .store()
                .loaded_replies(&next)
                .into_iter()
                .map(|c| c.id.clone()),
        );
    }
    anyhow::ensure!(ctl.engine().store().contains(id), "comment {id} not found");
    Ok(())
}

async fn load_all_replies(ctl: &Controller, id: &CommentId) -> anyhow::Result<()> {
    ctl.expand_replies(id)
        .await
        .with_context(|| format!("loading replies of {id}"))?;
    while ctl
        .engine()
        .store()
        .reply_window(id)
        .map(|w| w.has_more)
        .unwrap_or(false)
    {
        let before = ctl.engine().store().loaded_replies(id).len();
        ctl.load_more_replies(id)
            .await
            .with_context(|| format!("loading more replies of {id}"))?;
        if ctl.engine().store().loaded_replies(id).len() == before {
            break;
        }
    }
    Ok(())
}

fn render_node(out: &mut String, node: &NodeView, depth: usize) {
    let indent = "  ".repeat(depth);
    let c = &node.comment;
    let author = c
        .author
        .as_ref()
        .map(|a| a.username.as_str())
        .unwrap_or("[deleted]");
    let marker = match node.reaction {
        ReactionState::Liked => " (you liked)",
        ReactionState::Disliked => " (you disliked)",
        ReactionState::Neutral => "",
    };
    out.push_str(&format!(
        "{indent}[{}] {author}, {}{} +{} -{}{marker}\n",
        c.id,
        c.created_at.format("%Y-%m-%d %H:%M"),
        if c.is_edited() { " (edited)" } else { "" },
        c.reactions.likes,
        c.reactions.dislikes,
    ));
    for line in c.text.lines() {
        out.push_str(&format!("{indent}  {line}\n"));
    }
    for child in node.children.iter() {
        render_node(out, child, depth + 1);
    }
    if let Some(n) = node.controls.view_more {
        out.push_str(&format!("{indent}  ... {n} more replies\n"));
    }
    if node.controls.load_more {
        out.push_str(&format!("{indent}  ... more replies available\n"));
    }
}

fn render(view: &ThreadView) -> String {
    let mut out = format!(
        "{} comments, {} of {} threads shown\n",
        view.summary.total_comments, view.summary.loaded_roots, view.summary.root_comments,
    );
    for root in view.roots.iter() {
        out.push('\n');
        render_node(&mut out, root, 0);
    }
    if view.can_load_more {
        out.push_str("\n... more comments available\n");
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();

    let engine = Engine::new(
        PostId(opt.post.clone()),
        HttpTransport::new(opt.host.clone(), opt.token.clone()),
        Arc::new(opt.current_user()),
        opt.config(),
    );
    let ctl = ThreadController::new(Arc::new(engine));

    match opt.cmd {
        Command::List { pages } => {
            ctl.load().await.context("loading the thread")?;
            for _ in 1..pages {
                if let MergeOutcome::Applied {
                    has_more: false, ..
                } = ctl.load_more().await.context("loading more comments")?
                {
                    break;
                }
            }
            print!("{}", render(&ctl.view()));
        }
        Command::Replies { id } => {
            let id = CommentId(id);
            locate(&ctl, &id).await?;
            load_all_replies(&ctl, &id).await?;
            for reply in ctl.engine().store().loaded_replies(&id) {
                println!("[{}] {}", reply.id, reply.text);
            }
        }
        Command::Comment { text } => {
            ctl.load().await.context("loading the thread")?;
            let id = ctl.create_comment(text).await.context("posting comment")?;
            println!("{id}");
        }
        Command::Reply { parent, text } => {
            let parent = CommentId(parent);
            locate(&ctl, &parent).await?;
            ctl.open_reply_form(&parent)?;
            ctl.set_reply_draft(&parent, text);
            let id = ctl.submit_reply(&parent).await.context("posting reply")?;
            println!("{id}");
        }
        Command::Edit { id, text } => {
            let id = CommentId(id);
            locate(&ctl, &id).await?;
            ctl.start_edit(&id)?;
            ctl.set_edit_buffer(&id, text);
            ctl.save_edit(&id).await.context("saving edit")?;
        }
        Command::Delete { id, yes } => {
            let id = CommentId(id);
            locate(&ctl, &id).await?;
            ctl.request_delete(&id)?;
            let replies = ctl.engine().store().loaded_descendants(&id).len();
            if !yes {
                ctl.cancel_delete(&id);
                anyhow::bail!(
                    "this would delete {id} and {replies} loaded replies, pass --yes to confirm"
                );
            }
            ctl.confirm_delete(&id).await.context("deleting comment")?;
        }
        Command::Like { id } => {
            let id = CommentId(id);
            locate(&ctl, &id).await?;
            if let Some(counts) = ctl.like(&id).await.context("liking")? {
                println!("+{} -{}", counts.likes, counts.dislikes);
            }
        }
        Command::Dislike { id } => {
            let id = CommentId(id);
            locate(&ctl, &id).await?;
            if let Some(counts) = ctl.dislike(&id).await.context("disliking")? {
                println!("+{} -{}", counts.likes, counts.dislikes);
            }
        }
    }

    Ok(())
}
