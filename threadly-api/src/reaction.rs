#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reaction {
    Liked,
    Disliked,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ReactionRequest {
    pub reaction: Reaction,
}

/// The four fields the server is authoritative for after a reaction
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCounts {
    pub likes: u64,
    pub dislikes: u64,
    pub is_liked_by_current_user: bool,
    pub is_disliked_by_current_user: bool,
}
