use crate::api::{Reaction, ReactionCounts};

/// What a single viewer currently thinks of a comment
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReactionState {
    Neutral,
    Liked,
    Disliked,
}

impl ReactionState {
    /// Invoking the current reaction again withdraws it, the other one switches
    pub fn next(self, r: Reaction) -> ReactionState {
        match (self, r) {
            (ReactionState::Liked, Reaction::Liked) => ReactionState::Neutral,
            (ReactionState::Disliked, Reaction::Disliked) => ReactionState::Neutral,
            (_, Reaction::Liked) => ReactionState::Liked,
            (_, Reaction::Disliked) => ReactionState::Disliked,
        }
    }
}

pub trait ReactionExt {
    fn state(&self) -> ReactionState;

    /// Counters after the viewer invoked `r`, never going below zero
    fn toggled(&self, r: Reaction) -> Self;

    /// Enforces that at most one of the viewer flags is set, like wins
    fn normalized(&self) -> Self;
}

impl ReactionExt for ReactionCounts {
    fn state(&self) -> ReactionState {
        match (self.is_liked_by_current_user, self.is_disliked_by_current_user) {
            (true, _) => ReactionState::Liked,
            (false, true) => ReactionState::Disliked,
            (false, false) => ReactionState::Neutral,
        }
    }

    fn toggled(&self, r: Reaction) -> ReactionCounts {
        let before = self.state();
        let after = before.next(r);
        let mut res = *self;
        match before {
            ReactionState::Liked => res.likes = res.likes.saturating_sub(1),
            ReactionState::Disliked => res.dislikes = res.dislikes.saturating_sub(1),
            ReactionState::Neutral => (),
        }
        match after {
            ReactionState::Liked => res.likes += 1,
            ReactionState::Disliked => res.dislikes += 1,
            ReactionState::Neutral => (),
        }
        res.is_liked_by_current_user = after == ReactionState::Liked;
        res.is_disliked_by_current_user = after == ReactionState::Disliked;
        res
    }

    fn normalized(&self) -> ReactionCounts {
        let mut res = *self;
        if res.is_liked_by_current_user {
            res.is_disliked_by_current_user = false;
        }
        res
    }
}
