use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    api::{self, CommentId, PostId, ReactionCounts},
    merge::PageClock,
    Comment, Counter, ListRef, ReactionExt,
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TopLevelWindow {
    /// Root comments in display order
    pub ids: im::Vector<CommentId>,
    pub next_skip: u64,
    pub total_top_level_items: u64,
    pub grand_total_all_items: u64,
    pub has_more: bool,
    pub loaded: bool,
    pub(crate) clock: PageClock,
}

/// The separately paginated replies of one comment
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReplyWindow {
    /// Ascending by creation date, no duplicates
    pub ids: im::Vector<CommentId>,
    pub next_skip: u64,
    pub has_more: bool,
    pub loaded: bool,
    pub(crate) clock: PageClock,
}

/// What the hosting page shows next to the thread
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ThreadSummary {
    pub root_comments: u64,
    pub total_comments: u64,
    pub loaded_roots: usize,
    pub has_more: bool,
}

/// Single source of truth for every comment of one thread
///
/// Each node is stored once, keyed by id. The top-level page, the inline
/// children of a node and the reply windows are ordered id lists over it, so
/// patching a node is visible in every collection that references it.
#[derive(Clone, Debug)]
pub struct CommentStore {
    post_id: PostId,
    nodes: im::HashMap<CommentId, Arc<Comment>>,
    pub(crate) top_level: TopLevelWindow,
    pub(crate) reply_windows: im::HashMap<CommentId, ReplyWindow>,
}

impl CommentStore {
    pub fn new(post_id: PostId) -> CommentStore {
        CommentStore {
            post_id,
            nodes: im::HashMap::new(),
            top_level: TopLevelWindow::default(),
            reply_windows: im::HashMap::new(),
        }
    }

    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    pub fn get(&self, id: &CommentId) -> Option<&Arc<Comment>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &CommentId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn comments(&self) -> impl Iterator<Item = &Arc<Comment>> + '_ {
        self.nodes.values()
    }

    pub fn top_level(&self) -> &TopLevelWindow {
        &self.top_level
    }

    pub fn roots(&self) -> Vec<Arc<Comment>> {
        self.resolve(self.top_level.ids.iter())
    }

    pub fn reply_window(&self, parent: &CommentId) -> Option<&ReplyWindow> {
        self.reply_windows.get(parent)
    }

    pub fn inline_replies(&self, parent: &CommentId) -> Vec<Arc<Comment>> {
        match self.nodes.get(parent) {
            Some(p) => self.resolve(p.children.iter()),
            None => Vec::new(),
        }
    }

    pub fn loaded_replies(&self, parent: &CommentId) -> Vec<Arc<Comment>> {
        match self.reply_windows.get(parent) {
            Some(w) => self.resolve(w.ids.iter()),
            None => Vec::new(),
        }
    }

    fn resolve<'a>(&self, ids: impl Iterator<Item = &'a CommentId>) -> Vec<Arc<Comment>> {
        ids.filter_map(|id| self.nodes.get(id).cloned()).collect()
    }

    /// Paging cursor of the list `id` was loaded through, if it is listed there
    pub(crate) fn cursor_of(
        &self,
        id: &CommentId,
        parent: Option<&CommentId>,
    ) -> Option<Counter> {
        match parent {
            None => Some(&self.top_level)
                .filter(|w| w.ids.contains(id))
                .map(|w| Counter::TopLevelSkip {
                    version: w.clock.cursor_version(),
                }),
            Some(parent) => self
                .reply_windows
                .get(parent)
                .filter(|w| w.ids.contains(id))
                .map(|w| Counter::ReplySkip {
                    parent: parent.clone(),
                    version: w.clock.cursor_version(),
                }),
        }
    }

    /// Walks up the parent links, `None` if an ancestor is not loaded
    pub fn root_of(&self, id: &CommentId) -> Option<CommentId> {
        let mut current = self.nodes.get(id)?;
        for _ in 0..=self.nodes.len() {
            match &current.parent_id {
                None => return Some(current.id.clone()),
                Some(p) => current = self.nodes.get(p)?,
            }
        }
        tracing::warn!(%id, "parent links form a cycle");
        None
    }

    /// Every loaded node below `id`, through both inline children and reply windows
    pub fn loaded_descendants(&self, id: &CommentId) -> Vec<CommentId> {
        let mut seen = HashSet::new();
        seen.insert(id.clone());
        let mut res = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(id.clone());
        while let Some(next) = queue.pop_front() {
            let inline = self.nodes.get(&next).map(|n| n.children.clone());
            let window = self.reply_windows.get(&next).map(|w| w.ids.clone());
            for child in inline.into_iter().chain(window).flatten() {
                if self.nodes.contains_key(&child) && seen.insert(child.clone()) {
                    res.push(child.clone());
                    queue.push_back(child);
                }
            }
        }
        res
    }

    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            root_comments: self.top_level.total_top_level_items,
            total_comments: self.top_level.grand_total_all_items,
            loaded_roots: self.top_level.ids.len(),
            has_more: self.top_level.has_more,
        }
    }
}

// Raw access for transactions, merges and reconciliation
impl CommentStore {
    pub(crate) fn node_mut(&mut self, id: &CommentId) -> Option<&mut Comment> {
        self.nodes.get_mut(id).map(Arc::make_mut)
    }

    /// Replaces the node slot, returning what was there before
    pub(crate) fn set_slot(
        &mut self,
        id: &CommentId,
        node: Option<Arc<Comment>>,
    ) -> Option<Arc<Comment>> {
        match node {
            Some(n) => self.nodes.insert(id.clone(), n),
            None => self.nodes.remove(id),
        }
    }

    pub(crate) fn set_window(
        &mut self,
        parent: &CommentId,
        window: Option<ReplyWindow>,
    ) -> Option<ReplyWindow> {
        match window {
            Some(w) => self.reply_windows.insert(parent.clone(), w),
            None => self.reply_windows.remove(parent),
        }
    }

    pub(crate) fn list_mut(&mut self, list: &ListRef) -> Option<&mut im::Vector<CommentId>> {
        match list {
            ListRef::TopLevel => Some(&mut self.top_level.ids),
            ListRef::Children(id) => self.node_mut(id).map(|n| &mut n.children),
            ListRef::Replies(id) => self
                .reply_windows
                .get_mut(id)
                .filter(|w| w.loaded)
                .map(|w| &mut w.ids),
        }
    }

    pub(crate) fn counter_mut(&mut self, counter: &Counter) -> Option<&mut u64> {
        match counter {
            Counter::TopLevelItems => Some(&mut self.top_level.total_top_level_items),
            Counter::GrandTotal => Some(&mut self.top_level.grand_total_all_items),
            Counter::DirectReplies(id) => self.node_mut(id).map(|n| &mut n.direct_replies_count),
            Counter::Descendants(id) => self
                .node_mut(id)
                .and_then(|n| n.total_descendant_replies_count.as_mut()),
            Counter::TopLevelSkip { version } => Some(&mut self.top_level)
                .filter(|w| w.loaded && w.clock.cursor_version() == *version)
                .map(|w| &mut w.next_skip),
            Counter::ReplySkip { parent, version } => self
                .reply_windows
                .get_mut(parent)
                .filter(|w| w.loaded && w.clock.cursor_version() == *version)
                .map(|w| &mut w.next_skip),
        }
    }

    /// Stores a server comment and its inline replies, returning its id
    ///
    /// Levels and parent links that disagree with `parent` are repaired. An
    /// already-known node keeps its loaded children if the fresh copy came
    /// without any.
    pub(crate) fn upsert_tree(&mut self, c: api::Comment, parent: Option<&Comment>) -> CommentId {
        let (mut node, children) = Comment::from_api(c);
        if node.post_id != self.post_id {
            tracing::warn!(id = %node.id, post = %node.post_id, "comment belongs to another thread");
        }
        if let Some(parent) = parent {
            if node.parent_id.as_ref() != Some(&parent.id) {
                tracing::warn!(id = %node.id, parent = %parent.id, "reply listed under the wrong parent");
                node.parent_id = Some(parent.id.clone());
            }
        }
        let expected_level = match (parent, &node.parent_id) {
            (Some(p), _) => Some(p.level + 1),
            (None, None) => Some(0),
            (None, Some(p)) => self.nodes.get(p).map(|p| p.level + 1),
        };
        if let Some(level) = expected_level {
            if node.level != level {
                tracing::warn!(id = %node.id, got = node.level, level, "repairing comment level");
                node.level = level;
            }
        }
        let child_ids = children
            .into_iter()
            .map(|child| self.upsert_tree(child, Some(&node)))
            .collect::<im::Vector<_>>();
        node.children = child_ids;
        if let Some(existing) = self.nodes.get(&node.id) {
            if node.children.is_empty() {
                node.children = existing.children.clone();
            }
        }
        let id = node.id.clone();
        self.nodes.insert(id.clone(), Arc::new(node));
        id
    }

    /// Swaps a temporary node for the one the server created
    pub(crate) fn confirm_created(&mut self, temp: &CommentId, c: api::Comment) -> CommentId {
        let real = c.id.clone();
        if self.nodes.remove(temp).is_none() {
            tracing::debug!(%temp, %real, "confirmed comment is no longer displayed");
            return real;
        }
        let parent_id = c.parent_id.clone();
        let parent = parent_id.as_ref().and_then(|p| self.nodes.get(p)).cloned();
        self.upsert_tree(c, parent.as_deref());
        replace_id(&mut self.top_level.ids, temp, &real);
        if let Some(p) = &parent_id {
            if let Some(node) = self.node_mut(p) {
                replace_id(&mut node.children, temp, &real);
            }
            if let Some(w) = self.reply_windows.get_mut(p) {
                replace_id(&mut w.ids, temp, &real);
            }
        }
        real
    }

    pub(crate) fn confirm_edited(&mut self, c: api::Comment) {
        match self.node_mut(&c.id) {
            Some(node) => {
                node.text = c.text;
                node.updated_at = c.updated_at;
            }
            None => tracing::debug!(id = %c.id, "edited comment is no longer displayed"),
        }
    }

    pub(crate) fn confirm_reactions(&mut self, id: &CommentId, counts: ReactionCounts) {
        if let Some(node) = self.node_mut(id) {
            node.reactions = counts.normalized();
        }
    }

    /// Drops every node that no collection reaches anymore
    pub(crate) fn prune_unreachable(&mut self) {
        let mut reachable = HashSet::new();
        for root in self.top_level.ids.iter() {
            if self.nodes.contains_key(root) {
                reachable.insert(root.clone());
                reachable.extend(self.loaded_descendants(root));
            }
        }
        let before = self.nodes.len();
        self.nodes.retain(|id, _| reachable.contains(id));
        self.reply_windows.retain(|id, _| reachable.contains(id));
        if before != self.nodes.len() {
            tracing::debug!(dropped = before - self.nodes.len(), "pruned unreachable comments");
        }
    }
}

fn replace_id(list: &mut im::Vector<CommentId>, old: &CommentId, new: &CommentId) {
    if let Some(i) = list.index_of(old) {
        if list.contains(new) {
            list.remove(i);
        } else {
            list.set(i, new.clone());
        }
    }
}
