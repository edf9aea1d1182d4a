use crate::api::{self, CommentId};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] api::Error),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Only the author of comment {0} can do this")]
    NotAuthor(CommentId),

    #[error("Comment {0} is not loaded")]
    NotInCache(CommentId),

    #[error("Comment {0} is still waiting for server confirmation")]
    Unconfirmed(CommentId),

    #[error("Replies are not allowed past level {max_level}")]
    DepthExceeded { max_level: u32 },

    #[error("Deletion of comment {0} was not confirmed")]
    DeleteNotConfirmed(CommentId),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Api(e) if e.is_retryable())
    }
}
