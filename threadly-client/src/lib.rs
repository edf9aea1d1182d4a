mod comment;
pub use comment::Comment;

mod config;
pub use config::Config;

mod engine;
pub use engine::Engine;

mod error;
pub use error::Error;

mod merge;
pub use merge::{MergeOutcome, PageTicket};

mod reaction;
pub use reaction::{ReactionExt, ReactionState};

mod store;
pub use store::{CommentStore, ReplyWindow, ThreadSummary, TopLevelWindow};

mod transport;
pub use transport::{Identity, Transport};

mod tree;
pub use tree::{Expansion, NodeUi, NodeView, ReplyControls, ThreadController, ThreadView};

mod txn;
pub use txn::{Counter, ListRef, Patch, Position, Transaction};

pub mod api {
    pub use threadly_api::*;
}

pub mod prelude {
    pub use crate::ReactionExt;
}
