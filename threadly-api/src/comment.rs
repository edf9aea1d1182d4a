use std::fmt;

use crate::{CurrentUser, Error, ReactionCounts, Time, UserId, Uuid, TEMPORARY_ID_PREFIX};

#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct PostId(pub String);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct CommentId(pub String);

impl CommentId {
    pub fn temporary() -> CommentId {
        CommentId(format!("{TEMPORARY_ID_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_ID_PREFIX)
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommentId {
    fn from(s: &str) -> CommentId {
        CommentId(String::from(s))
    }
}

/// Denormalized author snapshot, absent for deleted or anonymized authors
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<&CurrentUser> for Author {
    fn from(u: &CurrentUser) -> Author {
        Author {
            id: u.id.clone(),
            username: u.username.clone(),
            avatar_url: u.avatar_url.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub post_id: PostId,
    #[serde(default)]
    pub author_id: Option<UserId>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    #[serde(default)]
    pub level: u32,
    pub created_at: Time,
    pub updated_at: Time,

    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub dislikes: u64,
    #[serde(default)]
    pub is_liked_by_current_user: bool,
    #[serde(default)]
    pub is_disliked_by_current_user: bool,

    /// Replies one level below, as counted by the server
    #[serde(default)]
    pub direct_replies_count: u64,

    /// Directly loaded replies, not necessarily all of them
    #[serde(default)]
    pub children: Vec<Comment>,

    /// Only set on root comments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_descendant_replies_count: Option<u64>,
}

impl Comment {
    pub fn reactions(&self) -> ReactionCounts {
        ReactionCounts {
            likes: self.likes,
            dislikes: self.dislikes,
            is_liked_by_current_user: self.is_liked_by_current_user,
            is_disliked_by_current_user: self.is_disliked_by_current_user,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub text: String,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        validate_text(&self.text)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub text: String,
}

impl EditComment {
    pub fn validate(&self) -> Result<(), Error> {
        validate_text(&self.text)
    }
}

fn validate_text(text: &str) -> Result<(), Error> {
    crate::validate_string(text)?;
    if text.trim().is_empty() {
        return Err(Error::Validation {
            field: String::from("text"),
            message: String::from("comment text cannot be empty"),
        });
    }
    Ok(())
}
