use crate::Comment;

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    CreatedAt,
    Likes,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLevelQuery {
    pub skip: u64,
    pub take: u64,
    pub sort_by: SortBy,
    pub order: SortOrder,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ReplyQuery {
    pub skip: u64,
    pub take: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLevelPagination {
    pub skip: u64,
    pub take: u64,
    pub total_top_level_items: u64,
    pub grand_total_all_items: u64,
    pub has_more: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TopLevelPage {
    pub comments: Vec<Comment>,
    pub pagination: TopLevelPagination,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPagination {
    pub skip: u64,
    pub take: u64,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ReplyPage {
    pub replies: Vec<Comment>,
    pub pagination: ReplyPagination,
}
