use std::collections::HashSet;

use crate::{
    api::{CommentId, ReplyPage, TopLevelPage},
    CommentStore, ReplyWindow,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    Applied { loaded: usize, has_more: bool },

    /// The collection was reloaded or reset while this page was in flight
    Stale,
}

/// Names the request a page answers, to tell stale pages apart
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageTicket {
    /// A skip=0 reload, numbered in request order
    Reload(u64),

    /// A later page, requested while the collection was at this generation
    Next(u64),
}

/// Staleness bookkeeping of one paginated collection
///
/// The generation moves whenever the collection is replaced (a reload got
/// applied) or emptied (a reset). Reloads are numbered when they start, and
/// only a reload newer than the one shown, and started after the last reset,
/// may replace the collection. A reload that fails thus invalidates nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct PageClock {
    generation: u64,
    reloads_started: u64,
    reload_shown: u64,
    cursor_moves: u64,
}

impl PageClock {
    pub(crate) fn start_reload(&mut self) -> PageTicket {
        self.reloads_started += 1;
        PageTicket::Reload(self.reloads_started)
    }

    pub(crate) fn next_page(&self) -> PageTicket {
        PageTicket::Next(self.generation)
    }

    pub(crate) fn is_current(&self, ticket: PageTicket) -> bool {
        match ticket {
            PageTicket::Reload(n) => n > self.reload_shown,
            PageTicket::Next(g) => g == self.generation,
        }
    }

    /// Changes every time a merge or a reset sets the paging cursor
    pub(crate) fn cursor_version(&self) -> u64 {
        self.cursor_moves
    }

    pub(crate) fn applied(&mut self, ticket: PageTicket) {
        self.cursor_moves += 1;
        if let PageTicket::Reload(n) = ticket {
            self.reload_shown = n;
            self.generation += 1;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cursor_moves += 1;
        self.reload_shown = self.reloads_started;
        self.generation += 1;
    }
}

impl CommentStore {
    /// Numbers a skip=0 reload of the top level, before sending it
    pub fn begin_top_level_reload(&mut self) -> PageTicket {
        self.top_level.clock.start_reload()
    }

    pub fn next_top_level_ticket(&self) -> PageTicket {
        self.top_level.clock.next_page()
    }

    pub fn begin_reply_reload(&mut self, parent: &CommentId) -> PageTicket {
        self.reply_windows
            .entry(parent.clone())
            .or_insert_with(ReplyWindow::default)
            .clock
            .start_reload()
    }

    pub fn next_reply_ticket(&self, parent: &CommentId) -> PageTicket {
        self.reply_windows
            .get(parent)
            .map(|w| w.clock.next_page())
            .unwrap_or_else(|| PageClock::default().next_page())
    }

    /// Empties the reply window of `parent` and invalidates pages in flight for it
    pub fn reset_replies(&mut self, parent: &CommentId) {
        let w = self
            .reply_windows
            .entry(parent.clone())
            .or_insert_with(ReplyWindow::default);
        let mut clock = w.clock.clone();
        clock.reset();
        *w = ReplyWindow {
            clock,
            ..ReplyWindow::default()
        };
    }

    /// A skip=0 page replaces the list, later pages are appended in server order
    pub fn merge_top_level_page(
        &mut self,
        page: TopLevelPage,
        ticket: PageTicket,
    ) -> MergeOutcome {
        if !self.top_level.clock.is_current(ticket) {
            tracing::debug!(skip = page.pagination.skip, "dropping stale top-level page");
            return MergeOutcome::Stale;
        }
        let TopLevelPage {
            comments,
            pagination,
        } = page;
        let fetched = comments
            .into_iter()
            .map(|c| self.upsert_tree(c, None))
            .collect::<Vec<_>>();
        let mut ids = match pagination.skip {
            // roots still waiting for confirmation stay on top
            0 => self
                .top_level
                .ids
                .iter()
                .filter(|id| id.is_temporary())
                .cloned()
                .collect::<im::Vector<_>>(),
            _ => self.top_level.ids.clone(),
        };
        for id in fetched.iter() {
            if !ids.contains(id) {
                ids.push_back(id.clone());
            }
        }
        let w = &mut self.top_level;
        w.clock.applied(ticket);
        w.ids = ids;
        w.next_skip = pagination.skip + fetched.len() as u64;
        w.total_top_level_items = pagination.total_top_level_items;
        w.grand_total_all_items = pagination.grand_total_all_items;
        w.has_more = pagination.has_more;
        w.loaded = true;
        let outcome = MergeOutcome::Applied {
            loaded: w.ids.len(),
            has_more: w.has_more,
        };
        if pagination.skip == 0 {
            self.prune_unreachable();
        }
        outcome
    }

    /// Merges one page of direct replies of `parent` into its reply window
    ///
    /// A skip=0 page is authoritative: the window becomes that page plus the
    /// inline children of `parent`. Later pages are unioned with the window.
    /// Either way the result is deduplicated by id and ascending by creation
    /// date.
    pub fn merge_reply_page(
        &mut self,
        parent: &CommentId,
        page: ReplyPage,
        ticket: PageTicket,
    ) -> MergeOutcome {
        let current = self
            .reply_windows
            .get(parent)
            .map(|w| w.clock.is_current(ticket))
            .unwrap_or(false);
        if !current {
            tracing::debug!(%parent, skip = page.pagination.skip, "dropping stale reply page");
            return MergeOutcome::Stale;
        }
        let parent_node = match self.get(parent) {
            Some(p) => p.clone(),
            None => {
                tracing::debug!(%parent, "dropping replies of a comment no longer displayed");
                return MergeOutcome::Stale;
            }
        };
        let ReplyPage {
            replies,
            pagination,
        } = page;
        let fetched = replies
            .into_iter()
            .map(|c| self.upsert_tree(c, Some(&parent_node)))
            .collect::<Vec<_>>();
        let base = match pagination.skip {
            0 => parent_node.children.clone(),
            _ => self
                .reply_windows
                .get(parent)
                .map(|w| w.ids.clone())
                .unwrap_or_default(),
        };
        let ids = self.sorted_unique(base.into_iter().chain(fetched.iter().cloned()));
        let w = self
            .reply_windows
            .entry(parent.clone())
            .or_insert_with(ReplyWindow::default);
        w.clock.applied(ticket);
        w.ids = ids;
        w.next_skip = pagination.skip + fetched.len() as u64;
        w.has_more = pagination.has_more;
        w.loaded = true;
        MergeOutcome::Applied {
            loaded: w.ids.len(),
            has_more: w.has_more,
        }
    }

    fn sorted_unique(&self, ids: impl Iterator<Item = CommentId>) -> im::Vector<CommentId> {
        let mut seen = HashSet::new();
        let mut res = ids
            .filter(|id| seen.insert(id.clone()))
            .filter_map(|id| self.get(&id).map(|c| (c.created_at, id)))
            .collect::<Vec<_>>();
        res.sort();
        res.into_iter().map(|(_, id)| id).collect()
    }
}
