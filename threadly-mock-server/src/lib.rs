use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use threadly_client::{
    api::{
        self, Author, CommentId, CurrentUser, EditComment, NewComment, PostId, Reaction,
        ReactionCounts, ReactionRequest, ReplyPage, ReplyPagination, ReplyQuery, SortBy,
        SortOrder, Time, TopLevelPage, TopLevelPagination, TopLevelQuery, UserId,
    },
    ReactionState, Transport,
};
use tokio::sync::Semaphore;

#[cfg(test)]
mod fuzz;
#[cfg(test)]
mod tests;

/// In-memory stand-in for the comment API, shared by every simulated viewer
pub struct MockServer {
    users: BTreeMap<UserId, CurrentUser>,
    comments: BTreeMap<CommentId, DbComment>,
    next_seq: u64,
    clock: Time,
    inline_replies: usize,
}

#[derive(Debug)]
struct DbComment {
    seq: u64,
    id: CommentId,
    post_id: PostId,
    author_id: UserId,
    parent_id: Option<CommentId>,
    level: u32,
    text: String,
    created_at: Time,
    updated_at: Time,
    reactions: HashMap<UserId, ReactionState>,
}

impl DbComment {
    fn likes(&self) -> u64 {
        self.count(ReactionState::Liked)
    }

    fn count(&self, s: ReactionState) -> u64 {
        self.reactions.values().filter(|r| **r == s).count() as u64
    }

    fn counts_for(&self, viewer: Option<&UserId>) -> ReactionCounts {
        let state = viewer
            .and_then(|v| self.reactions.get(v))
            .copied()
            .unwrap_or(ReactionState::Neutral);
        ReactionCounts {
            likes: self.likes(),
            dislikes: self.count(ReactionState::Disliked),
            is_liked_by_current_user: state == ReactionState::Liked,
            is_disliked_by_current_user: state == ReactionState::Disliked,
        }
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            users: BTreeMap::new(),
            comments: BTreeMap::new(),
            next_seq: 0,
            clock: Utc
                .with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            inline_replies: 2,
        }
    }

    /// Number of direct replies embedded in each root comment of a top-level page
    pub fn set_inline_replies(&mut self, n: usize) {
        self.inline_replies = n;
    }

    pub fn add_user(&mut self, u: CurrentUser) {
        self.users.insert(u.id.clone(), u);
    }

    /// Return the current number of comments, all posts included
    pub fn test_num_comments(&self) -> usize {
        self.comments.len()
    }

    /// Return the comment as `viewer` would see it, without inline replies
    pub fn test_comment(&self, id: &CommentId, viewer: Option<&UserId>) -> Option<api::Comment> {
        self.comments.get(id).map(|c| self.render(c, viewer, 0))
    }

    /// Insert a comment bypassing all checks, for building fixtures
    pub fn test_insert(
        &mut self,
        post: &PostId,
        parent: Option<&CommentId>,
        author: &UserId,
        text: &str,
    ) -> CommentId {
        let level = parent
            .and_then(|p| self.comments.get(p))
            .map(|p| p.level + 1)
            .unwrap_or(0);
        self.insert(post.clone(), parent.cloned(), level, author.clone(), text)
    }

    /// Set `user`'s reaction to `id` bypassing all checks, for building fixtures
    pub fn test_react(&mut self, id: &CommentId, user: &UserId, state: ReactionState) {
        if let Some(c) = self.comments.get_mut(id) {
            match state {
                ReactionState::Neutral => c.reactions.remove(user),
                s => c.reactions.insert(user.clone(), s),
            };
        }
    }

    fn tick(&mut self) -> Time {
        self.clock = self.clock + Duration::minutes(1);
        self.clock
    }

    fn insert(
        &mut self,
        post_id: PostId,
        parent_id: Option<CommentId>,
        level: u32,
        author_id: UserId,
        text: &str,
    ) -> CommentId {
        self.next_seq += 1;
        let seq = self.next_seq;
        let id = CommentId(format!("c{seq}"));
        let now = self.tick();
        self.comments.insert(
            id.clone(),
            DbComment {
                seq,
                id: id.clone(),
                post_id,
                author_id,
                parent_id,
                level,
                text: String::from(text),
                created_at: now,
                updated_at: now,
                reactions: HashMap::new(),
            },
        );
        id
    }

    fn replies_of(&self, parent: &CommentId) -> Vec<&DbComment> {
        let mut res = self
            .comments
            .values()
            .filter(|c| c.parent_id.as_ref() == Some(parent))
            .collect::<Vec<_>>();
        res.sort_by_key(|c| (c.created_at, c.seq));
        res
    }

    fn subtree(&self, id: &CommentId) -> Vec<CommentId> {
        let mut res = vec![id.clone()];
        let mut i = 0;
        while i < res.len() {
            let next = res[i].clone();
            res.extend(self.replies_of(&next).into_iter().map(|c| c.id.clone()));
            i += 1;
        }
        res
    }

    fn render(&self, c: &DbComment, viewer: Option<&UserId>, inline: usize) -> api::Comment {
        let counts = c.counts_for(viewer);
        let replies = self.replies_of(&c.id);
        let author = self.users.get(&c.author_id).map(Author::from);
        api::Comment {
            id: c.id.clone(),
            text: c.text.clone(),
            post_id: c.post_id.clone(),
            author_id: Some(c.author_id.clone()),
            author,
            parent_id: c.parent_id.clone(),
            level: c.level,
            created_at: c.created_at,
            updated_at: c.updated_at,
            likes: counts.likes,
            dislikes: counts.dislikes,
            is_liked_by_current_user: counts.is_liked_by_current_user,
            is_disliked_by_current_user: counts.is_disliked_by_current_user,
            direct_replies_count: replies.len() as u64,
            children: replies
                .iter()
                .take(inline)
                .map(|r| self.render(r, viewer, 0))
                .collect(),
            total_descendant_replies_count: c
                .parent_id
                .is_none()
                .then(|| self.subtree(&c.id).len() as u64 - 1),
        }
    }

    fn get(&self, id: &CommentId) -> Result<&DbComment, api::Error> {
        self.comments
            .get(id)
            .ok_or_else(|| api::Error::NotFound(id.0.clone()))
    }

    fn owned(&self, user: Option<&UserId>, id: &CommentId) -> Result<&DbComment, api::Error> {
        let user = user.ok_or(api::Error::PermissionDenied)?;
        let c = self.get(id)?;
        if &c.author_id != user {
            return Err(api::Error::PermissionDenied);
        }
        Ok(c)
    }

    pub fn top_level(
        &self,
        viewer: Option<&UserId>,
        post: &PostId,
        q: &TopLevelQuery,
    ) -> Result<TopLevelPage, api::Error> {
        let mut roots = self
            .comments
            .values()
            .filter(|c| &c.post_id == post && c.parent_id.is_none())
            .collect::<Vec<_>>();
        roots.sort_by(|a, b| {
            let ord = match q.sort_by {
                SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
                SortBy::Likes => a.likes().cmp(&b.likes()),
            }
            .then(a.seq.cmp(&b.seq));
            match q.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        let total = roots.len() as u64;
        let comments = roots
            .into_iter()
            .skip(q.skip as usize)
            .take(q.take as usize)
            .map(|c| self.render(c, viewer, self.inline_replies))
            .collect::<Vec<_>>();
        Ok(TopLevelPage {
            pagination: TopLevelPagination {
                skip: q.skip,
                take: q.take,
                total_top_level_items: total,
                grand_total_all_items: self
                    .comments
                    .values()
                    .filter(|c| &c.post_id == post)
                    .count() as u64,
                has_more: q.skip + (comments.len() as u64) < total,
            },
            comments,
        })
    }

    pub fn replies(
        &self,
        viewer: Option<&UserId>,
        parent: &CommentId,
        q: &ReplyQuery,
    ) -> Result<ReplyPage, api::Error> {
        self.get(parent)?;
        let all = self.replies_of(parent);
        let total = all.len() as u64;
        let replies = all
            .into_iter()
            .skip(q.skip as usize)
            .take(q.take as usize)
            .map(|c| self.render(c, viewer, 0))
            .collect::<Vec<_>>();
        Ok(ReplyPage {
            pagination: ReplyPagination {
                skip: q.skip,
                take: q.take,
                total,
                has_more: q.skip + (replies.len() as u64) < total,
            },
            replies,
        })
    }

    pub fn create(
        &mut self,
        user: Option<&UserId>,
        post: &PostId,
        body: &NewComment,
    ) -> Result<api::Comment, api::Error> {
        let user = user.ok_or(api::Error::PermissionDenied)?;
        body.validate()?;
        let id = self.insert(post.clone(), None, 0, user.clone(), &body.text);
        tracing::debug!(%id, %post, "created comment");
        self.rendered(&id, Some(user))
    }

    pub fn reply(
        &mut self,
        user: Option<&UserId>,
        parent: &CommentId,
        body: &NewComment,
    ) -> Result<api::Comment, api::Error> {
        let user = user.ok_or(api::Error::PermissionDenied)?;
        body.validate()?;
        let p = self.get(parent)?;
        let (post, level) = (p.post_id.clone(), p.level + 1);
        let id = self.insert(post, Some(parent.clone()), level, user.clone(), &body.text);
        tracing::debug!(%id, %parent, "created reply");
        self.rendered(&id, Some(user))
    }

    pub fn edit(
        &mut self,
        user: Option<&UserId>,
        id: &CommentId,
        body: &EditComment,
    ) -> Result<api::Comment, api::Error> {
        body.validate()?;
        self.owned(user, id)?;
        let now = self.tick();
        if let Some(c) = self.comments.get_mut(id) {
            c.text = body.text.clone();
            c.updated_at = now;
        }
        self.rendered(id, user)
    }

    /// Deletes the comment along with all the replies below it
    pub fn delete(&mut self, user: Option<&UserId>, id: &CommentId) -> Result<(), api::Error> {
        self.owned(user, id)?;
        let removed = self.subtree(id);
        for c in removed.iter() {
            self.comments.remove(c);
        }
        tracing::debug!(%id, removed = removed.len(), "deleted comment");
        Ok(())
    }

    pub fn react(
        &mut self,
        user: Option<&UserId>,
        id: &CommentId,
        req: &ReactionRequest,
    ) -> Result<ReactionCounts, api::Error> {
        let user = user.ok_or(api::Error::PermissionDenied)?;
        let c = self
            .comments
            .get_mut(id)
            .ok_or_else(|| api::Error::NotFound(id.0.clone()))?;
        let before = c
            .reactions
            .get(user)
            .copied()
            .unwrap_or(ReactionState::Neutral);
        match before.next(req.reaction) {
            ReactionState::Neutral => c.reactions.remove(user),
            s => c.reactions.insert(user.clone(), s),
        };
        Ok(c.counts_for(Some(user)))
    }

    fn rendered(&self, id: &CommentId, viewer: Option<&UserId>) -> Result<api::Comment, api::Error> {
        Ok(self.render(self.get(id)?, viewer, 0))
    }
}

/// A request as received by a [`MockTransport`], in arrival order
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    TopLevel(TopLevelQuery),
    Replies(CommentId, ReplyQuery),
    Create,
    Reply(CommentId),
    Edit(CommentId),
    Delete(CommentId),
    React(CommentId, Reaction),
}

/// The view of a [`MockServer`] from one viewer's client
///
/// When gated, every request waits for a permit on the gate before reaching
/// the server, which lets tests look at the optimistic state in between.
pub struct MockTransport {
    server: Arc<Mutex<MockServer>>,
    user: Option<UserId>,
    gate: Option<Arc<Semaphore>>,
    failures: Mutex<VecDeque<api::Error>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new(server: Arc<Mutex<MockServer>>, user: Option<UserId>) -> MockTransport {
        MockTransport {
            server,
            user,
            gate: None,
            failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Holds every request until a permit is added to the returned gate
    pub fn gated(mut self) -> (MockTransport, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Makes the next request fail with `e` without reaching the server
    pub fn fail_next(&self, e: api::Error) {
        self.failures.lock().push_back(e);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    async fn call<R>(
        &self,
        req: Request,
        f: impl Send + FnOnce(&mut MockServer, Option<&UserId>) -> Result<R, api::Error>,
    ) -> Result<R, api::Error> {
        self.requests.lock().push(req);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| api::Error::Network(String::from("mock server gate closed")))?
                .forget();
        }
        if let Some(e) = self.failures.lock().pop_front() {
            return Err(e);
        }
        f(&mut self.server.lock(), self.user.as_ref())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_top_level(
        &self,
        post: &PostId,
        q: &TopLevelQuery,
    ) -> Result<TopLevelPage, api::Error> {
        self.call(Request::TopLevel(q.clone()), |s, u| s.top_level(u, post, q))
            .await
    }

    async fn fetch_replies(
        &self,
        parent: &CommentId,
        q: &ReplyQuery,
    ) -> Result<ReplyPage, api::Error> {
        self.call(Request::Replies(parent.clone(), q.clone()), |s, u| {
            s.replies(u, parent, q)
        })
        .await
    }

    async fn create_comment(
        &self,
        post: &PostId,
        body: &NewComment,
    ) -> Result<api::Comment, api::Error> {
        self.call(Request::Create, |s, u| s.create(u, post, body))
            .await
    }

    async fn reply(
        &self,
        parent: &CommentId,
        body: &NewComment,
    ) -> Result<api::Comment, api::Error> {
        self.call(Request::Reply(parent.clone()), |s, u| {
            s.reply(u, parent, body)
        })
        .await
    }

    async fn edit(&self, id: &CommentId, body: &EditComment) -> Result<api::Comment, api::Error> {
        self.call(Request::Edit(id.clone()), |s, u| s.edit(u, id, body))
            .await
    }

    async fn delete(&self, id: &CommentId) -> Result<(), api::Error> {
        self.call(Request::Delete(id.clone()), |s, u| s.delete(u, id))
            .await
    }

    async fn react(
        &self,
        id: &CommentId,
        req: &ReactionRequest,
    ) -> Result<ReactionCounts, api::Error> {
        self.call(Request::React(id.clone(), req.reaction), |s, u| {
            s.react(u, id, req)
        })
        .await
    }
}

