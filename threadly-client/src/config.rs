use crate::api::{SortBy, SortOrder};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub top_level_page_size: u64,
    pub reply_page_size: u64,

    /// Comments at this level or deeper do not accept replies
    pub max_level: u32,

    pub sort_by: SortBy,
    pub order: SortOrder,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            top_level_page_size: 10,
            reply_page_size: 5,
            max_level: 3,
            sort_by: SortBy::CreatedAt,
            order: SortOrder::Desc,
        }
    }
}

impl Config {
    pub fn accepts_replies_at(&self, level: u32) -> bool {
        level < self.max_level
    }
}
