//! Speculative transactions over the comment store
//!
//! A mutation opens a [`Patch`], applies its optimistic changes through it and
//! turns it into a [`Transaction`] before going to the network. Once the
//! server answered, the transaction is either committed (the changes stay) or
//! rolled back (every change is undone, last one first). Each change records
//! only what it touched, so rolling back one mutation leaves the changes of
//! other in-flight mutations in place.

use std::sync::Arc;

use crate::{
    api::{CommentId, ReactionCounts, Time},
    Comment, CommentStore, Error, ReplyWindow,
};

/// One of the ordered id lists of the store
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ListRef {
    TopLevel,
    Children(CommentId),
    Replies(CommentId),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Counter {
    TopLevelItems,
    GrandTotal,
    DirectReplies(CommentId),
    Descendants(CommentId),

    /// Paging cursor of the top level, left alone once a later merge moved it
    TopLevelSkip { version: u64 },

    /// Paging cursor of a reply window, left alone once a later merge moved it
    ReplySkip { parent: CommentId, version: u64 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Position {
    Front,
    Back,
}

#[derive(Debug)]
enum Undo {
    Slot {
        id: CommentId,
        before: Option<Arc<Comment>>,
    },
    Text {
        id: CommentId,
        text: String,
        updated_at: Time,
    },
    Reactions {
        id: CommentId,
        before: ReactionCounts,
    },
    Counter {
        counter: Counter,
        applied: i64,
    },
    Attached {
        list: ListRef,
        id: CommentId,
    },
    Detached {
        list: ListRef,
        id: CommentId,
        index: usize,
    },
    Window {
        parent: CommentId,
        before: Option<ReplyWindow>,
    },
}

#[must_use = "a transaction must be committed or rolled back"]
#[derive(Debug)]
pub struct Transaction {
    label: &'static str,
    undo: Vec<Undo>,
}

impl Transaction {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn commit(self) {
        tracing::debug!(label = self.label, changes = self.undo.len(), "committed");
    }

    pub fn rollback(self, store: &mut CommentStore) {
        tracing::debug!(label = self.label, changes = self.undo.len(), "rolling back");
        for u in self.undo.into_iter().rev() {
            match u {
                Undo::Slot { id, before } => {
                    store.set_slot(&id, before);
                }
                Undo::Text {
                    id,
                    text,
                    updated_at,
                } => {
                    if let Some(node) = store.node_mut(&id) {
                        node.text = text;
                        node.updated_at = updated_at;
                    }
                }
                Undo::Reactions { id, before } => {
                    if let Some(node) = store.node_mut(&id) {
                        node.reactions = before;
                    }
                }
                Undo::Counter { counter, applied } => {
                    if let Some(c) = store.counter_mut(&counter) {
                        *c = shift(*c, -applied).0;
                    }
                }
                Undo::Attached { list, id } => {
                    if let Some(l) = store.list_mut(&list) {
                        if let Some(i) = l.index_of(&id) {
                            l.remove(i);
                        }
                    }
                }
                Undo::Detached { list, id, index } => {
                    if let Some(l) = store.list_mut(&list) {
                        if !l.contains(&id) {
                            let index = index.min(l.len());
                            l.insert(index, id);
                        }
                    }
                }
                Undo::Window { parent, before } => {
                    store.set_window(&parent, before);
                }
            }
        }
    }
}

/// Adds `delta` without leaving the u64 range, returning the delta actually applied
fn shift(value: u64, delta: i64) -> (u64, i64) {
    let res = if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    };
    (res, res as i64 - value as i64)
}

/// A transaction being built, with exclusive access to the store
pub struct Patch<'a> {
    store: &'a mut CommentStore,
    txn: Transaction,
}

impl CommentStore {
    pub fn begin(&mut self, label: &'static str) -> Patch<'_> {
        Patch {
            store: self,
            txn: Transaction {
                label,
                undo: Vec::new(),
            },
        }
    }
}

impl<'a> Patch<'a> {
    pub fn store(&self) -> &CommentStore {
        self.store
    }

    pub fn get(&self, id: &CommentId) -> Result<Arc<Comment>, Error> {
        self.store
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotInCache(id.clone()))
    }

    pub fn insert(&mut self, node: Comment) {
        let id = node.id.clone();
        let before = self.store.set_slot(&id, Some(Arc::new(node)));
        self.txn.undo.push(Undo::Slot { id, before });
    }

    pub fn set_text(&mut self, id: &CommentId, text: String, at: Time) -> Result<(), Error> {
        let node = self
            .store
            .node_mut(id)
            .ok_or_else(|| Error::NotInCache(id.clone()))?;
        let old_text = std::mem::replace(&mut node.text, text);
        let old_date = std::mem::replace(&mut node.updated_at, at);
        self.txn.undo.push(Undo::Text {
            id: id.clone(),
            text: old_text,
            updated_at: old_date,
        });
        Ok(())
    }

    pub fn set_reactions(&mut self, id: &CommentId, counts: ReactionCounts) -> Result<(), Error> {
        let node = self
            .store
            .node_mut(id)
            .ok_or_else(|| Error::NotInCache(id.clone()))?;
        let before = std::mem::replace(&mut node.reactions, counts);
        self.txn.undo.push(Undo::Reactions {
            id: id.clone(),
            before,
        });
        Ok(())
    }

    /// Counters the store does not track (eg. descendants of a reply) are left alone
    pub fn adjust(&mut self, counter: Counter, delta: i64) {
        if let Some(c) = self.store.counter_mut(&counter) {
            let (value, applied) = shift(*c, delta);
            *c = value;
            if applied != 0 {
                self.txn.undo.push(Undo::Counter { counter, applied });
            }
        }
    }

    /// Returns whether the list exists, reply windows only count once loaded
    pub fn attach(&mut self, list: ListRef, id: &CommentId, at: Position) -> bool {
        let l = match self.store.list_mut(&list) {
            Some(l) => l,
            None => return false,
        };
        if l.contains(id) {
            return true;
        }
        match at {
            Position::Front => l.push_front(id.clone()),
            Position::Back => l.push_back(id.clone()),
        }
        self.txn.undo.push(Undo::Attached {
            list,
            id: id.clone(),
        });
        true
    }

    pub fn detach(&mut self, list: ListRef, id: &CommentId) {
        if let Some(l) = self.store.list_mut(&list) {
            if let Some(index) = l.index_of(id) {
                l.remove(index);
                self.txn.undo.push(Undo::Detached {
                    list,
                    id: id.clone(),
                    index,
                });
            }
        }
    }

    /// Removes `id` and all of its loaded descendants, returning how many nodes went away
    pub fn remove_subtree(&mut self, id: &CommentId) -> Result<usize, Error> {
        let node = self.get(id)?;
        self.detach(ListRef::TopLevel, id);
        if let Some(parent) = &node.parent_id {
            self.detach(ListRef::Children(parent.clone()), id);
            self.detach(ListRef::Replies(parent.clone()), id);
        }
        let mut removed = 0;
        for n in std::iter::once(id.clone()).chain(self.store.loaded_descendants(id)) {
            let before = self.store.set_window(&n, None);
            if before.is_some() {
                self.txn.undo.push(Undo::Window {
                    parent: n.clone(),
                    before,
                });
            }
            let before = self.store.set_slot(&n, None);
            if before.is_some() {
                removed += 1;
            }
            self.txn.undo.push(Undo::Slot { id: n, before });
        }
        Ok(removed)
    }

    pub fn finish(self) -> Transaction {
        tracing::debug!(
            label = self.txn.label,
            changes = self.txn.undo.len(),
            "applied optimistic patch"
        );
        self.txn
    }

    /// Undoes everything applied so far
    pub fn abort(self) {
        self.txn.rollback(self.store)
    }
}
