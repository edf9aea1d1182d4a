mod comment;
pub use comment::{Author, Comment, CommentId, EditComment, NewComment, PostId};

mod error;
pub use error::{Error, ErrorKind};

mod page;
pub use page::{
    ReplyPage, ReplyPagination, ReplyQuery, SortBy, SortOrder, TopLevelPage, TopLevelPagination,
    TopLevelQuery,
};

mod reaction;
pub use reaction::{Reaction, ReactionCounts, ReactionRequest};

mod user;
pub use user::{CurrentUser, UserId};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<chrono::Utc>;

/// Ids handed out by clients before the server assigned the real one
pub const TEMPORARY_ID_PREFIX: &str = "temp-";

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}
