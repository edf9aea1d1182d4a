use std::{cmp, collections::HashSet, ops::RangeTo, panic::AssertUnwindSafe, sync::Arc};

use parking_lot::Mutex;
use threadly_client::{
    api::{self, CommentId, CurrentUser, PostId, Reaction, UserId},
    CommentStore, Config, Engine,
};

use crate::{MockServer, MockTransport};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    Load,
    LoadMore,
    Expand {
        target: usize,
    },
    LoadMoreReplies {
        target: usize,
    },
    Hide {
        target: usize,
    },
    Create {
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        text: String,
    },
    Reply {
        target: usize,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        text: String,
    },
    Edit {
        target: usize,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        text: String,
    },
    Delete {
        target: usize,
    },
    React {
        target: usize,
        like: bool,
    },
    FailNext,
}

impl FuzzOp {
    fn is_mutation(&self) -> bool {
        matches!(
            self,
            FuzzOp::Create { .. }
                | FuzzOp::Reply { .. }
                | FuzzOp::Edit { .. }
                | FuzzOp::Delete { .. }
                | FuzzOp::React { .. }
        )
    }
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

struct Fuzzer {
    server: Arc<Mutex<MockServer>>,
    engine: Engine<MockTransport>,
}

impl Fuzzer {
    fn new() -> Fuzzer {
        let post = PostId(String::from("post"));
        let mut server = MockServer::new();
        let users = ["alice", "bob"].map(|name| CurrentUser {
            id: UserId(String::from(name)),
            username: String::from(name),
            avatar_url: None,
        });
        for u in users.iter() {
            server.add_user(u.clone());
        }
        // a few threads of mixed authorship, some deeper than inline replies go
        for r in 0..4 {
            let author = &users[r % 2].id;
            let root = server.test_insert(&post, None, author, "root");
            for i in 0..r {
                let reply = server.test_insert(&post, Some(&root), &users[i % 2].id, "reply");
                if i % 2 == 1 {
                    server.test_insert(&post, Some(&reply), author, "nested");
                }
            }
        }
        let server = Arc::new(Mutex::new(server));
        let transport = MockTransport::new(server.clone(), Some(users[0].id.clone()));
        let config = Config {
            top_level_page_size: 2,
            reply_page_size: 2,
            ..Config::default()
        };
        let engine = Engine::new(post, transport, Arc::new(Some(users[0].clone())), config);
        Fuzzer { server, engine }
    }

    fn pick(&self, target: usize) -> Option<CommentId> {
        let mut ids = self
            .engine
            .store()
            .comments()
            .map(|c| c.id.clone())
            .collect::<Vec<_>>();
        ids.sort();
        resize_int(target, ..ids.len()).map(|i| ids.swap_remove(i))
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        let before = self.engine.store();
        let mutation = op.is_mutation();
        let res = match op {
            FuzzOp::Load => self.engine.load_top_level().await.map(|_| ()),
            FuzzOp::LoadMore => self.engine.load_more_top_level().await.map(|_| ()),
            FuzzOp::Expand { target } => match self.pick(target) {
                Some(id) => self.engine.load_replies(&id).await.map(|_| ()),
                None => Ok(()),
            },
            FuzzOp::LoadMoreReplies { target } => match self.pick(target) {
                Some(id) => self.engine.load_more_replies(&id).await.map(|_| ()),
                None => Ok(()),
            },
            FuzzOp::Hide { target } => {
                if let Some(id) = self.pick(target) {
                    self.engine.reset_replies(&id);
                }
                Ok(())
            }
            FuzzOp::Create { text } => self.engine.create_comment(text).await.map(|_| ()),
            FuzzOp::Reply { target, text } => match self.pick(target) {
                Some(id) => self.engine.reply(&id, text).await.map(|_| ()),
                None => Ok(()),
            },
            FuzzOp::Edit { target, text } => match self.pick(target) {
                Some(id) => self.engine.edit(&id, text).await,
                None => Ok(()),
            },
            FuzzOp::Delete { target } => match self.pick(target) {
                Some(id) => self.engine.delete(&id).await,
                None => Ok(()),
            },
            FuzzOp::React { target, like } => match self.pick(target) {
                Some(id) => {
                    let r = if like {
                        Reaction::Liked
                    } else {
                        Reaction::Disliked
                    };
                    self.engine.react(&id, r).await.map(|_| ())
                }
                None => Ok(()),
            },
            FuzzOp::FailNext => {
                self.engine
                    .transport()
                    .fail_next(api::Error::Network(String::from("fuzzed failure")));
                Ok(())
            }
        };
        let after = self.engine.store();
        check_invariants(&after, self.engine.config());
        if let (true, Err(e)) = (mutation, res) {
            tracing::debug!(err = %e, "fuzzed mutation failed");
            assert_same_content(&before, &after);
        }
    }

    /// Reloads, then pages through every list until the whole server side is loaded
    async fn reconcile(&self) {
        self.engine.transport().clear_failures();
        self.engine
            .load_top_level()
            .await
            .expect("reloading after the fuzzed operations");
        let num_comments = self.server.lock().test_num_comments();
        for _ in 0..=num_comments {
            if !self.engine.summary().has_more {
                break;
            }
            self.engine
                .load_more_top_level()
                .await
                .expect("loading more roots");
        }
        let summary = self.engine.summary();
        assert!(!summary.has_more, "top level never ends");
        assert_eq!(summary.loaded_roots as u64, summary.root_comments);
        assert_eq!(summary.total_comments as usize, num_comments);

        let mut queue = self
            .engine
            .store()
            .roots()
            .into_iter()
            .map(|c| c.id.clone())
            .collect::<Vec<_>>();
        while let Some(id) = queue.pop() {
            let expected = self.engine.get(&id).map(|c| c.direct_replies_count);
            self.engine
                .load_replies(&id)
                .await
                .expect("loading replies");
            for _ in 0..=num_comments {
                match self.engine.store().reply_window(&id) {
                    Some(w) if w.has_more => (),
                    _ => break,
                }
                self.engine
                    .load_more_replies(&id)
                    .await
                    .expect("loading more replies");
            }
            let replies = self.engine.store().loaded_replies(&id);
            assert_eq!(Some(replies.len() as u64), expected, "replies of {id}");
            queue.extend(replies.iter().map(|c| c.id.clone()));
        }

        let store = self.engine.store();
        assert_eq!(store.len(), num_comments, "some comments never got loaded");
        let server = self.server.lock();
        assert!(store.comments().all(|c| server
            .test_comment(&c.id, None)
            .map(|s| s.text == c.text)
            .unwrap_or(false)));
    }
}

fn assert_same_content(before: &CommentStore, after: &CommentStore) {
    assert_eq!(before.len(), after.len(), "node count changed");
    assert_eq!(before.top_level().ids, after.top_level().ids);
    assert_eq!(
        before.summary().total_comments,
        after.summary().total_comments
    );
    for c in before.comments() {
        assert_eq!(Some(c), after.get(&c.id), "node {} changed", c.id);
        assert_eq!(
            before.reply_window(&c.id).map(|w| &w.ids),
            after.reply_window(&c.id).map(|w| &w.ids),
            "reply window of {} changed",
            c.id
        );
    }
}

fn check_invariants(store: &CommentStore, config: &Config) {
    assert_unique_present(store, store.top_level().ids.iter(), "top level");
    for c in store.comments() {
        assert!(
            !(c.reactions.is_liked_by_current_user && c.reactions.is_disliked_by_current_user),
            "{} is both liked and disliked",
            c.id
        );
        assert!(!c.is_temporary(), "{} left unconfirmed", c.id);
        assert_unique_present(store, c.children.iter(), "inline replies");
        if let Some(w) = store.reply_window(&c.id) {
            assert_unique_present(store, w.ids.iter(), "reply window");
            let dates = store
                .loaded_replies(&c.id)
                .iter()
                .map(|r| r.created_at)
                .collect::<Vec<_>>();
            assert!(dates.windows(2).all(|d| d[0] <= d[1]), "replies out of order");
        }
        match c.parent_id.as_ref().and_then(|p| store.get(p)) {
            Some(p) => assert_eq!(c.level, p.level + 1, "level of {}", c.id),
            None if c.parent_id.is_none() => assert_eq!(c.level, 0),
            None => (),
        }
        for child in store.inline_replies(&c.id) {
            assert_eq!(child.parent_id.as_ref(), Some(&c.id));
            assert!(child.level <= config.max_level + 1);
        }
    }
}

fn assert_unique_present<'a>(
    store: &CommentStore,
    ids: impl Iterator<Item = &'a CommentId>,
    what: &str,
) {
    let mut seen = HashSet::new();
    for id in ids {
        assert!(seen.insert(id), "{id} listed twice in {what}");
        assert!(store.contains(id), "{id} in {what} is not stored");
    }
}

do_tokio_test!(fuzz_thread_operations, Vec<FuzzOp>, |ops: Vec<FuzzOp>| async move {
    let mut fuzzer = Fuzzer::new();
    for op in ops {
        fuzzer.execute_fuzz_op(op).await;
    }
    fuzzer.reconcile().await;
});
