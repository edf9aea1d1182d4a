use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;

use crate::{
    api::{
        self, CommentId, CurrentUser, EditComment, NewComment, PostId, Reaction, ReactionCounts,
        ReactionRequest, ReplyQuery, TopLevelQuery,
    },
    Comment, CommentStore, Config, Counter, Error, Identity, ListRef, MergeOutcome, Patch,
    Position, ReactionExt, ThreadSummary, Transaction, Transport,
};

/// Keeps the comment store of one thread in sync with the server
///
/// Reads populate the store. Mutations patch it right away, then confirm or
/// roll the patch back depending on the server's answer. The store lock is
/// never held across a network call, so several mutations can be in flight.
pub struct Engine<T> {
    post_id: PostId,
    transport: T,
    identity: Arc<dyn Identity>,
    config: Config,
    store: Mutex<CommentStore>,
    reactions_in_flight: Mutex<HashSet<CommentId>>,
}

struct ReactionGuard<'a> {
    in_flight: &'a Mutex<HashSet<CommentId>>,
    id: CommentId,
}

impl Drop for ReactionGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.id);
    }
}

impl<T: Transport> Engine<T> {
    pub fn new(
        post_id: PostId,
        transport: T,
        identity: Arc<dyn Identity>,
        config: Config,
    ) -> Engine<T> {
        Engine {
            store: Mutex::new(CommentStore::new(post_id.clone())),
            post_id,
            transport,
            identity,
            config,
            reactions_in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.identity.current_user()
    }

    /// Cheap copy of the current state, optimistic changes included
    pub fn store(&self) -> CommentStore {
        self.store.lock().clone()
    }

    pub fn get(&self, id: &CommentId) -> Option<Arc<Comment>> {
        self.store.lock().get(id).cloned()
    }

    pub fn summary(&self) -> ThreadSummary {
        self.store.lock().summary()
    }

    pub fn is_reaction_pending(&self, id: &CommentId) -> bool {
        self.reactions_in_flight.lock().contains(id)
    }

    pub async fn load_top_level(&self) -> Result<MergeOutcome, Error> {
        self.fetch_top_level(0).await
    }

    pub async fn load_more_top_level(&self) -> Result<MergeOutcome, Error> {
        let skip = self.store.lock().top_level().next_skip;
        self.fetch_top_level(skip).await
    }

    async fn fetch_top_level(&self, skip: u64) -> Result<MergeOutcome, Error> {
        let ticket = {
            let mut store = self.store.lock();
            match skip {
                0 => store.begin_top_level_reload(),
                _ => store.next_top_level_ticket(),
            }
        };
        let query = TopLevelQuery {
            skip,
            take: self.config.top_level_page_size,
            sort_by: self.config.sort_by,
            order: self.config.order,
        };
        let page = self
            .transport
            .fetch_top_level(&self.post_id, &query)
            .await
            .map_err(|e| {
                tracing::warn!(post = %self.post_id, skip, err = %e, "fetching comments failed");
                e
            })?;
        Ok(self.store.lock().merge_top_level_page(page, ticket))
    }

    /// Reloads the reply window of `parent` from its first page
    pub async fn load_replies(&self, parent: &CommentId) -> Result<MergeOutcome, Error> {
        self.fetch_replies(parent, 0).await
    }

    pub async fn load_more_replies(&self, parent: &CommentId) -> Result<MergeOutcome, Error> {
        let skip = self
            .store
            .lock()
            .reply_window(parent)
            .filter(|w| w.loaded)
            .map(|w| w.next_skip)
            .unwrap_or(0);
        self.fetch_replies(parent, skip).await
    }

    async fn fetch_replies(&self, parent: &CommentId, skip: u64) -> Result<MergeOutcome, Error> {
        if parent.is_temporary() {
            return Err(Error::Unconfirmed(parent.clone()));
        }
        let ticket = {
            let mut store = self.store.lock();
            match skip {
                0 => store.begin_reply_reload(parent),
                _ => store.next_reply_ticket(parent),
            }
        };
        let query = ReplyQuery {
            skip,
            take: self.config.reply_page_size,
        };
        let page = self
            .transport
            .fetch_replies(parent, &query)
            .await
            .map_err(|e| {
                tracing::warn!(%parent, skip, err = %e, "fetching replies failed");
                e
            })?;
        Ok(self.store.lock().merge_reply_page(parent, page, ticket))
    }

    pub fn reset_replies(&self, parent: &CommentId) {
        self.store.lock().reset_replies(parent)
    }

    pub async fn create_comment(&self, text: String) -> Result<CommentId, Error> {
        let user = self.current_user().ok_or(Error::NotLoggedIn)?;
        let body = NewComment { text };
        body.validate()?;
        let temp = CommentId::temporary();
        let txn = self.speculate("create", |p| {
            p.insert(Comment::optimistic(
                temp.clone(),
                self.post_id.clone(),
                None,
                body.text.clone(),
                &user,
                Utc::now(),
            ));
            p.attach(ListRef::TopLevel, &temp, Position::Front);
            p.adjust(Counter::TopLevelItems, 1);
            p.adjust(Counter::GrandTotal, 1);
            Ok(())
        })?;
        let res = self.transport.create_comment(&self.post_id, &body).await;
        self.settle(txn, res, |store, c| store.confirm_created(&temp, c))
    }

    pub async fn reply(&self, parent: &CommentId, text: String) -> Result<CommentId, Error> {
        let user = self.current_user().ok_or(Error::NotLoggedIn)?;
        let body = NewComment { text };
        body.validate()?;
        let temp = CommentId::temporary();
        let txn = self.speculate("reply", |p| {
            let parent = p.get(parent)?;
            if parent.is_temporary() {
                return Err(Error::Unconfirmed(parent.id.clone()));
            }
            if !self.config.accepts_replies_at(parent.level) {
                return Err(Error::DepthExceeded {
                    max_level: self.config.max_level,
                });
            }
            p.insert(Comment::optimistic(
                temp.clone(),
                self.post_id.clone(),
                Some(&parent),
                body.text.clone(),
                &user,
                Utc::now(),
            ));
            p.attach(ListRef::Children(parent.id.clone()), &temp, Position::Back);
            p.attach(ListRef::Replies(parent.id.clone()), &temp, Position::Back);
            p.adjust(Counter::DirectReplies(parent.id.clone()), 1);
            if let Some(root) = p.store().root_of(&parent.id) {
                p.adjust(Counter::Descendants(root), 1);
            }
            p.adjust(Counter::GrandTotal, 1);
            Ok(())
        })?;
        let res = self.transport.reply(parent, &body).await;
        self.settle(txn, res, |store, c| store.confirm_created(&temp, c))
    }

    pub async fn edit(&self, id: &CommentId, text: String) -> Result<(), Error> {
        let body = EditComment { text };
        body.validate()?;
        let txn = self.speculate("edit", |p| {
            let node = p.get(id)?;
            self.check_owned(&node)?;
            p.set_text(id, body.text.clone(), Utc::now())
        })?;
        let res = self.transport.edit(id, &body).await;
        self.settle(txn, res, |store, c| store.confirm_edited(c))
    }

    /// Removes the comment and every loaded reply below it
    pub async fn delete(&self, id: &CommentId) -> Result<(), Error> {
        let txn = self.speculate("delete", |p| {
            let node = p.get(id)?;
            self.check_owned(&node)?;
            let root = p.store().root_of(id);
            // the server's offsets past this comment move down by one
            let cursor = p.store().cursor_of(id, node.parent_id.as_ref());
            let loaded = p.remove_subtree(id)?.saturating_sub(1) as u64;
            let known = node
                .total_descendant_replies_count
                .unwrap_or(node.direct_replies_count);
            let removed = 1 + loaded.max(known) as i64;
            match &node.parent_id {
                None => p.adjust(Counter::TopLevelItems, -1),
                Some(parent) => {
                    p.adjust(Counter::DirectReplies(parent.clone()), -1);
                    if let Some(root) = root {
                        p.adjust(Counter::Descendants(root), -removed);
                    }
                }
            }
            p.adjust(Counter::GrandTotal, -removed);
            if let Some(cursor) = cursor {
                p.adjust(cursor, -1);
            }
            Ok(())
        })?;
        let res = self.transport.delete(id).await;
        self.settle(txn, res, |_, ()| ())
    }

    /// Toggles the viewer's reaction, see [`ReactionState::next`](crate::ReactionState::next)
    ///
    /// Returns `Ok(None)` without doing anything if a reaction on this comment
    /// is already in flight. Otherwise returns the counts confirmed by the
    /// server, which replace the optimistic ones.
    pub async fn react(
        &self,
        id: &CommentId,
        reaction: Reaction,
    ) -> Result<Option<ReactionCounts>, Error> {
        let _guard = match self.claim_reaction(id) {
            Some(g) => g,
            None => {
                tracing::debug!(%id, ?reaction, "reaction already in flight, ignoring");
                return Ok(None);
            }
        };
        if self.current_user().is_none() {
            return Err(Error::NotLoggedIn);
        }
        let txn = self.speculate("react", |p| {
            let node = p.get(id)?;
            if node.is_temporary() {
                return Err(Error::Unconfirmed(id.clone()));
            }
            p.set_reactions(id, node.reactions.toggled(reaction))
        })?;
        let res = self.transport.react(id, &ReactionRequest { reaction }).await;
        self.settle(txn, res, |store, counts| {
            store.confirm_reactions(id, counts);
            Some(counts.normalized())
        })
    }

    fn claim_reaction(&self, id: &CommentId) -> Option<ReactionGuard<'_>> {
        self.reactions_in_flight
            .lock()
            .insert(id.clone())
            .then(|| ReactionGuard {
                in_flight: &self.reactions_in_flight,
                id: id.clone(),
            })
    }

    fn check_owned(&self, node: &Comment) -> Result<(), Error> {
        let user = self.current_user().ok_or(Error::NotLoggedIn)?;
        if node.is_temporary() {
            return Err(Error::Unconfirmed(node.id.clone()));
        }
        if !node.is_authored_by(&user.id) {
            return Err(Error::NotAuthor(node.id.clone()));
        }
        Ok(())
    }

    /// Applies `f` to the store, all of it or nothing
    fn speculate(
        &self,
        label: &'static str,
        f: impl FnOnce(&mut Patch<'_>) -> Result<(), Error>,
    ) -> Result<Transaction, Error> {
        let mut store = self.store.lock();
        let mut patch = store.begin(label);
        match f(&mut patch) {
            Ok(()) => Ok(patch.finish()),
            Err(e) => {
                patch.abort();
                Err(e)
            }
        }
    }

    /// Keeps the patch and reconciles on success, undoes it on failure
    fn settle<R, O>(
        &self,
        txn: Transaction,
        res: Result<R, api::Error>,
        reconcile: impl FnOnce(&mut CommentStore, R) -> O,
    ) -> Result<O, Error> {
        let mut store = self.store.lock();
        match res {
            Ok(r) => {
                txn.commit();
                Ok(reconcile(&mut store, r))
            }
            Err(e) => {
                tracing::warn!(label = txn.label(), err = %e, retryable = e.is_retryable(), "mutation failed");
                txn.rollback(&mut store);
                Err(Error::Api(e))
            }
        }
    }
}
