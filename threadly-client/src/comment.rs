use crate::{
    api::{self, Author, CommentId, CurrentUser, PostId, ReactionCounts, Time, UserId},
    ReactionExt, ReactionState,
};

/// A node of the comment arena
///
/// Replies are referenced by id, the nodes themselves live in the
/// [`CommentStore`](crate::CommentStore) exactly once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub post_id: PostId,
    pub author_id: Option<UserId>,
    pub author: Option<Author>,
    pub parent_id: Option<CommentId>,
    pub level: u32,
    pub created_at: Time,
    pub updated_at: Time,

    pub reactions: ReactionCounts,

    /// Replies one level below, as counted by the server
    pub direct_replies_count: u64,

    /// Replies anywhere below, only tracked on root comments
    pub total_descendant_replies_count: Option<u64>,

    /// Replies that came inline with this comment, in display order
    pub children: im::Vector<CommentId>,
}

impl Comment {
    /// Splits a server comment into its node and its still-nested inline replies
    pub fn from_api(c: api::Comment) -> (Comment, Vec<api::Comment>) {
        let reactions = c.reactions();
        if reactions.is_liked_by_current_user && reactions.is_disliked_by_current_user {
            tracing::warn!(id = %c.id, "server reported both reactions for the viewer");
        }
        let author_id = c.author_id.or_else(|| c.author.as_ref().map(|a| a.id.clone()));
        let comment = Comment {
            id: c.id,
            text: c.text,
            post_id: c.post_id,
            author_id,
            author: c.author,
            parent_id: c.parent_id,
            level: c.level,
            created_at: c.created_at,
            updated_at: c.updated_at,
            reactions: reactions.normalized(),
            direct_replies_count: c.direct_replies_count,
            total_descendant_replies_count: c.total_descendant_replies_count,
            children: im::Vector::new(),
        };
        (comment, c.children)
    }

    /// The local stand-in for a comment the server has not confirmed yet
    pub fn optimistic(
        id: CommentId,
        post_id: PostId,
        parent: Option<&Comment>,
        text: String,
        author: &CurrentUser,
        now: Time,
    ) -> Comment {
        Comment {
            id,
            text,
            post_id,
            author_id: Some(author.id.clone()),
            author: Some(Author::from(author)),
            parent_id: parent.map(|p| p.id.clone()),
            level: parent.map(|p| p.level + 1).unwrap_or(0),
            created_at: now,
            updated_at: now,
            reactions: ReactionCounts::default(),
            direct_replies_count: 0,
            total_descendant_replies_count: parent.is_none().then_some(0),
            children: im::Vector::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_edited(&self) -> bool {
        self.updated_at != self.created_at
    }

    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    pub fn is_authored_by(&self, user: &UserId) -> bool {
        self.author_id.as_ref() == Some(user)
    }

    pub fn reaction_state(&self) -> ReactionState {
        self.reactions.state()
    }
}
