use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{
    Comment, CommentId, CurrentUser, EditComment, Error, NewComment, PostId, ReactionCounts,
    ReactionRequest, ReplyPage, ReplyQuery, TopLevelPage, TopLevelQuery,
};

/// The remote comment API, with credentials already attached
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_top_level(
        &self,
        post: &PostId,
        q: &TopLevelQuery,
    ) -> Result<TopLevelPage, Error>;

    async fn fetch_replies(&self, parent: &CommentId, q: &ReplyQuery) -> Result<ReplyPage, Error>;

    async fn create_comment(&self, post: &PostId, c: &NewComment) -> Result<Comment, Error>;

    async fn reply(&self, parent: &CommentId, c: &NewComment) -> Result<Comment, Error>;

    async fn edit(&self, id: &CommentId, c: &EditComment) -> Result<Comment, Error>;

    async fn delete(&self, id: &CommentId) -> Result<(), Error>;

    async fn react(&self, id: &CommentId, r: &ReactionRequest) -> Result<ReactionCounts, Error>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch_top_level(
        &self,
        post: &PostId,
        q: &TopLevelQuery,
    ) -> Result<TopLevelPage, Error> {
        (**self).fetch_top_level(post, q).await
    }

    async fn fetch_replies(&self, parent: &CommentId, q: &ReplyQuery) -> Result<ReplyPage, Error> {
        (**self).fetch_replies(parent, q).await
    }

    async fn create_comment(&self, post: &PostId, c: &NewComment) -> Result<Comment, Error> {
        (**self).create_comment(post, c).await
    }

    async fn reply(&self, parent: &CommentId, c: &NewComment) -> Result<Comment, Error> {
        (**self).reply(parent, c).await
    }

    async fn edit(&self, id: &CommentId, c: &EditComment) -> Result<Comment, Error> {
        (**self).edit(id, c).await
    }

    async fn delete(&self, id: &CommentId) -> Result<(), Error> {
        (**self).delete(id).await
    }

    async fn react(&self, id: &CommentId, r: &ReactionRequest) -> Result<ReactionCounts, Error> {
        (**self).react(id, r).await
    }
}

/// Who is looking at the thread, if anyone is logged in
pub trait Identity: Send + Sync {
    fn current_user(&self) -> Option<CurrentUser>;
}

impl Identity for Option<CurrentUser> {
    fn current_user(&self) -> Option<CurrentUser> {
        self.clone()
    }
}
