use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    api::{CommentId, CurrentUser, Reaction, ReactionCounts},
    Comment, CommentStore, Config, Engine, Error, MergeOutcome, ReactionState, ThreadSummary,
    Transport,
};

/// Reply expansion of one comment
///
/// `Collapsed` shows the inline replies only. Expanding requests the first
/// page of the reply window, after which further pages can be loaded. Hiding
/// empties the window, so the next expansion starts over at skip=0.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Expansion {
    #[default]
    Collapsed,
    Expanding,
    Expanded {
        loading_more: bool,
    },
}

/// Presentation-only state of one comment
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeUi {
    pub expansion: Expansion,

    /// Set while the reply form is open
    pub reply_draft: Option<String>,

    /// Set while editing, distinct from the cached text until saved
    pub edit_buffer: Option<String>,

    pub confirming_delete: bool,
}

/// The reply-related controls to show under a comment
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReplyControls {
    /// "View N more replies"
    pub view_more: Option<u64>,
    pub loading: bool,
    pub load_more: bool,
    pub hide: bool,
}

#[derive(Clone, Debug)]
pub struct NodeView {
    pub comment: Arc<Comment>,
    pub reaction: ReactionState,
    pub reaction_pending: bool,
    pub can_reply: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    pub ui: NodeUi,
    pub controls: ReplyControls,
    pub children: Vec<NodeView>,
}

#[derive(Clone, Debug)]
pub struct ThreadView {
    pub summary: ThreadSummary,
    pub roots: Vec<NodeView>,
    pub can_load_more: bool,
}

/// Drives user interaction with a thread on top of an [`Engine`]
pub struct ThreadController<T> {
    engine: Arc<Engine<T>>,
    ui: Mutex<HashMap<CommentId, NodeUi>>,
}

impl<T: Transport> ThreadController<T> {
    pub fn new(engine: Arc<Engine<T>>) -> ThreadController<T> {
        ThreadController {
            engine,
            ui: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<Engine<T>> {
        &self.engine
    }

    pub fn ui(&self, id: &CommentId) -> NodeUi {
        self.ui.lock().get(id).cloned().unwrap_or_default()
    }

    fn update_ui<R>(&self, id: &CommentId, f: impl FnOnce(&mut NodeUi) -> R) -> R {
        f(self.ui.lock().entry(id.clone()).or_default())
    }

    fn comment(&self, id: &CommentId) -> Result<Arc<Comment>, Error> {
        self.engine
            .get(id)
            .ok_or_else(|| Error::NotInCache(id.clone()))
    }

    pub async fn load(&self) -> Result<MergeOutcome, Error> {
        self.engine.load_top_level().await
    }

    pub async fn load_more(&self) -> Result<MergeOutcome, Error> {
        self.engine.load_more_top_level().await
    }

    pub async fn create_comment(&self, text: String) -> Result<CommentId, Error> {
        self.engine.create_comment(text).await
    }

    pub fn open_reply_form(&self, id: &CommentId) -> Result<(), Error> {
        let c = self.comment(id)?;
        let user = self.engine.current_user().ok_or(Error::NotLoggedIn)?;
        if !can_reply(self.engine.config(), Some(&user), &c) {
            if c.is_temporary() {
                return Err(Error::Unconfirmed(id.clone()));
            }
            return Err(Error::DepthExceeded {
                max_level: self.engine.config().max_level,
            });
        }
        self.update_ui(id, |ui| {
            ui.reply_draft.get_or_insert_with(String::new);
        });
        Ok(())
    }

    pub fn set_reply_draft(&self, id: &CommentId, text: String) {
        self.update_ui(id, |ui| {
            if ui.reply_draft.is_some() {
                ui.reply_draft = Some(text);
            }
        })
    }

    pub fn cancel_reply(&self, id: &CommentId) {
        self.update_ui(id, |ui| ui.reply_draft = None)
    }

    /// Sends the draft; the form stays open with its text if that fails
    pub async fn submit_reply(&self, id: &CommentId) -> Result<CommentId, Error> {
        let text = self.ui(id).reply_draft.unwrap_or_default();
        let created = self.engine.reply(id, text).await?;
        self.update_ui(id, |ui| ui.reply_draft = None);
        Ok(created)
    }

    pub fn start_edit(&self, id: &CommentId) -> Result<(), Error> {
        let c = self.comment(id)?;
        self.check_author(&c)?;
        self.update_ui(id, |ui| ui.edit_buffer = Some(c.text.clone()));
        Ok(())
    }

    pub fn set_edit_buffer(&self, id: &CommentId, text: String) {
        self.update_ui(id, |ui| {
            if ui.edit_buffer.is_some() {
                ui.edit_buffer = Some(text);
            }
        })
    }

    pub fn cancel_edit(&self, id: &CommentId) {
        self.update_ui(id, |ui| ui.edit_buffer = None)
    }

    pub async fn save_edit(&self, id: &CommentId) -> Result<(), Error> {
        let text = match self.ui(id).edit_buffer {
            Some(t) => t,
            None => return Ok(()),
        };
        self.engine.edit(id, text).await?;
        self.update_ui(id, |ui| ui.edit_buffer = None);
        Ok(())
    }

    /// Opens the confirmation step, nothing is deleted yet
    pub fn request_delete(&self, id: &CommentId) -> Result<(), Error> {
        let c = self.comment(id)?;
        self.check_author(&c)?;
        self.update_ui(id, |ui| ui.confirming_delete = true);
        Ok(())
    }

    pub fn cancel_delete(&self, id: &CommentId) {
        self.update_ui(id, |ui| ui.confirming_delete = false)
    }

    pub async fn confirm_delete(&self, id: &CommentId) -> Result<(), Error> {
        let confirming = self.update_ui(id, |ui| std::mem::take(&mut ui.confirming_delete));
        if !confirming {
            return Err(Error::DeleteNotConfirmed(id.clone()));
        }
        self.engine.delete(id).await?;
        let store = self.engine.store();
        self.ui.lock().retain(|id, _| store.contains(id));
        Ok(())
    }

    pub async fn like(&self, id: &CommentId) -> Result<Option<ReactionCounts>, Error> {
        self.engine.react(id, Reaction::Liked).await
    }

    pub async fn dislike(&self, id: &CommentId) -> Result<Option<ReactionCounts>, Error> {
        self.engine.react(id, Reaction::Disliked).await
    }

    /// Shows the reply window, fetching its first page; no-op unless collapsed
    pub async fn expand_replies(&self, id: &CommentId) -> Result<(), Error> {
        let started = self.update_ui(id, |ui| match ui.expansion {
            Expansion::Collapsed => {
                ui.expansion = Expansion::Expanding;
                true
            }
            _ => false,
        });
        if !started {
            return Ok(());
        }
        let res = self.engine.load_replies(id).await;
        let settled = match &res {
            Ok(MergeOutcome::Applied { .. }) => Expansion::Expanded {
                loading_more: false,
            },
            // a newer expansion got there first and settled the state
            Ok(MergeOutcome::Stale) => Expansion::Expanding,
            Err(_) => Expansion::Collapsed,
        };
        self.update_ui(id, |ui| {
            if ui.expansion == Expansion::Expanding {
                ui.expansion = settled;
            }
        });
        res.map(|_| ())
    }

    /// Fetches the next page of replies; no-op unless expanded with more to load
    pub async fn load_more_replies(&self, id: &CommentId) -> Result<(), Error> {
        let has_more = self
            .engine
            .store()
            .reply_window(id)
            .map(|w| w.has_more)
            .unwrap_or(false);
        let started = self.update_ui(id, |ui| match ui.expansion {
            Expansion::Expanded {
                loading_more: false,
            } if has_more => {
                ui.expansion = Expansion::Expanded { loading_more: true };
                true
            }
            _ => false,
        });
        if !started {
            return Ok(());
        }
        let res = self.engine.load_more_replies(id).await;
        self.update_ui(id, |ui| {
            if ui.expansion == (Expansion::Expanded { loading_more: true }) {
                ui.expansion = Expansion::Expanded {
                    loading_more: false,
                };
            }
        });
        res.map(|_| ())
    }

    pub fn hide_replies(&self, id: &CommentId) {
        self.update_ui(id, |ui| ui.expansion = Expansion::Collapsed);
        self.engine.reset_replies(id);
    }

    fn check_author(&self, c: &Comment) -> Result<(), Error> {
        let user = self.engine.current_user().ok_or(Error::NotLoggedIn)?;
        if c.is_temporary() {
            return Err(Error::Unconfirmed(c.id.clone()));
        }
        if !c.is_authored_by(&user.id) {
            return Err(Error::NotAuthor(c.id.clone()));
        }
        Ok(())
    }

    pub fn view(&self) -> ThreadView {
        let store = self.engine.store();
        let ui = self.ui.lock().clone();
        let builder = ViewBuilder {
            store: &store,
            ui: &ui,
            config: self.engine.config(),
            user: self.engine.current_user(),
            pending: |id: &CommentId| self.engine.is_reaction_pending(id),
        };
        let mut seen = HashSet::new();
        let roots = store
            .roots()
            .into_iter()
            .filter_map(|c| builder.build(c, &mut seen))
            .collect();
        ThreadView {
            summary: store.summary(),
            roots,
            can_load_more: store.top_level().has_more,
        }
    }
}

fn can_reply(config: &Config, user: Option<&CurrentUser>, c: &Comment) -> bool {
    user.is_some() && !c.is_temporary() && config.accepts_replies_at(c.level)
}

struct ViewBuilder<'a, P> {
    store: &'a CommentStore,
    ui: &'a HashMap<CommentId, NodeUi>,
    config: &'a Config,
    user: Option<CurrentUser>,
    pending: P,
}

impl<P: Fn(&CommentId) -> bool> ViewBuilder<'_, P> {
    fn build(&self, c: Arc<Comment>, seen: &mut HashSet<CommentId>) -> Option<NodeView> {
        if !seen.insert(c.id.clone()) {
            tracing::warn!(id = %c.id, "comment reachable twice in the tree");
            return None;
        }
        let ui = self.ui.get(&c.id).cloned().unwrap_or_default();
        let window = self.store.reply_window(&c.id);
        let (children, controls) = match ui.expansion {
            Expansion::Expanded { loading_more } => (
                match window {
                    Some(w) if w.loaded => self.store.loaded_replies(&c.id),
                    _ => self.store.inline_replies(&c.id),
                },
                ReplyControls {
                    view_more: None,
                    loading: loading_more,
                    load_more: !loading_more && window.map(|w| w.has_more).unwrap_or(false),
                    hide: true,
                },
            ),
            Expansion::Expanding => (
                self.store.inline_replies(&c.id),
                ReplyControls {
                    loading: true,
                    ..ReplyControls::default()
                },
            ),
            Expansion::Collapsed => {
                let inline = self.store.inline_replies(&c.id);
                let hidden = c.direct_replies_count.saturating_sub(inline.len() as u64);
                (
                    inline,
                    ReplyControls {
                        view_more: (hidden > 0 && !c.is_temporary()).then_some(hidden),
                        ..ReplyControls::default()
                    },
                )
            }
        };
        let is_author = match &self.user {
            Some(u) => c.is_authored_by(&u.id) && !c.is_temporary(),
            None => false,
        };
        Some(NodeView {
            reaction: c.reaction_state(),
            reaction_pending: (self.pending)(&c.id),
            can_reply: can_reply(self.config, self.user.as_ref(), &c),
            can_edit: is_author,
            can_delete: is_author,
            ui,
            controls,
            children: children
                .into_iter()
                .filter_map(|child| self.build(child, seen))
                .collect(),
            comment: c,
        })
    }
}
