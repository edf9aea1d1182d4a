use std::sync::Arc;

use futures::{pin_mut, poll};
use parking_lot::Mutex;
use threadly_client::{
    api::{self, CommentId, CurrentUser, PostId, Reaction, ReplyQuery, TopLevelQuery, UserId},
    Config, Engine, Error, MergeOutcome, ReactionState, ThreadController,
};
use tokio::sync::Semaphore;

use crate::{MockServer, MockTransport, Request};

fn user(name: &str) -> CurrentUser {
    CurrentUser {
        id: UserId(String::from(name)),
        username: name.to_uppercase(),
        avatar_url: None,
    }
}

fn post() -> PostId {
    PostId(String::from("post"))
}

fn server() -> Arc<Mutex<MockServer>> {
    let mut s = MockServer::new();
    for name in ["alice", "bob", "carol"] {
        s.add_user(user(name));
    }
    Arc::new(Mutex::new(s))
}

fn engine(server: &Arc<Mutex<MockServer>>, viewer: Option<&str>) -> Engine<MockTransport> {
    engine_with(server, viewer, Config::default())
}

fn engine_with(
    server: &Arc<Mutex<MockServer>>,
    viewer: Option<&str>,
    config: Config,
) -> Engine<MockTransport> {
    let transport = MockTransport::new(server.clone(), viewer.map(|v| user(v).id));
    Engine::new(post(), transport, Arc::new(viewer.map(user)), config)
}

fn gated_engine(
    server: &Arc<Mutex<MockServer>>,
    viewer: &str,
) -> (Engine<MockTransport>, Arc<Semaphore>) {
    let (transport, gate) = MockTransport::new(server.clone(), Some(user(viewer).id)).gated();
    let engine = Engine::new(post(), transport, Arc::new(Some(user(viewer))), Config::default());
    (engine, gate)
}

fn seed(server: &Arc<Mutex<MockServer>>, parent: Option<&CommentId>, author: &str) -> CommentId {
    server
        .lock()
        .test_insert(&post(), parent, &user(author).id, "seeded")
}

fn uid(name: &str) -> UserId {
    user(name).id
}

#[tokio::test]
async fn first_page_shows_everything_when_no_more() {
    let s = server();
    for _ in 0..3 {
        seed(&s, None, "bob");
    }
    let engine = Arc::new(engine(&s, Some("alice")));
    let ctl = ThreadController::new(engine.clone());
    assert_eq!(
        ctl.load().await,
        Ok(MergeOutcome::Applied {
            loaded: 3,
            has_more: false
        })
    );
    let view = ctl.view();
    assert_eq!(view.roots.len(), 3);
    assert_eq!(view.summary.root_comments, 3);
    assert!(!view.can_load_more);
    assert_eq!(
        engine.transport().requests(),
        vec![Request::TopLevel(TopLevelQuery {
            skip: 0,
            take: 10,
            sort_by: api::SortBy::CreatedAt,
            order: api::SortOrder::Desc,
        })]
    );
}

#[tokio::test]
async fn top_level_paging_appends() {
    let s = server();
    for _ in 0..13 {
        seed(&s, None, "bob");
    }
    let engine = engine(&s, None);
    engine.load_top_level().await.unwrap();
    assert_eq!(engine.summary().loaded_roots, 10);
    assert!(engine.summary().has_more);
    assert_eq!(
        engine.load_more_top_level().await,
        Ok(MergeOutcome::Applied {
            loaded: 13,
            has_more: false
        })
    );
    let roots = engine.store().roots();
    // newest first
    assert_eq!(roots[0].id, CommentId::from("c13"));
    assert_eq!(roots[12].id, CommentId::from("c1"));
}

#[tokio::test]
async fn like_is_shown_before_confirmation() {
    let s = server();
    let c = seed(&s, None, "bob");
    for i in 0..5 {
        s.lock()
            .test_react(&c, &uid(&format!("fan{i}")), ReactionState::Liked);
    }
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();

    let fut = engine.react(&c, Reaction::Liked);
    pin_mut!(fut);
    assert!(poll!(&mut fut).is_pending());
    let node = engine.get(&c).unwrap();
    assert_eq!(node.reactions.likes, 6);
    assert!(node.reactions.is_liked_by_current_user);
    assert!(engine.is_reaction_pending(&c));

    gate.add_permits(1);
    let confirmed = fut.await.unwrap().unwrap();
    assert_eq!(confirmed.likes, 6);
    assert_eq!(engine.get(&c).unwrap().reactions, confirmed);
    assert!(!engine.is_reaction_pending(&c));
}

#[tokio::test]
async fn failed_like_reverts() {
    let s = server();
    let c = seed(&s, None, "bob");
    for i in 0..5 {
        s.lock()
            .test_react(&c, &uid(&format!("fan{i}")), ReactionState::Liked);
    }
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();
    let before = engine.get(&c).unwrap().reactions;

    engine
        .transport()
        .fail_next(api::Error::Network(String::from("offline")));
    let fut = engine.react(&c, Reaction::Liked);
    pin_mut!(fut);
    assert!(poll!(&mut fut).is_pending());
    assert_eq!(engine.get(&c).unwrap().reactions.likes, 6);

    gate.add_permits(1);
    assert_eq!(
        fut.await,
        Err(Error::Api(api::Error::Network(String::from("offline"))))
    );
    let after = engine.get(&c).unwrap().reactions;
    assert_eq!(after, before);
    assert_eq!(after.likes, 5);
    assert!(!after.is_liked_by_current_user);
}

#[tokio::test]
async fn like_replaces_dislike() {
    let s = server();
    let c = seed(&s, None, "bob");
    s.lock().test_react(&c, &uid("alice"), ReactionState::Disliked);
    s.lock().test_react(&c, &uid("carol"), ReactionState::Disliked);
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();
    assert_eq!(engine.get(&c).unwrap().reaction_state(), ReactionState::Disliked);

    let fut = engine.react(&c, Reaction::Liked);
    pin_mut!(fut);
    assert!(poll!(&mut fut).is_pending());
    let r = engine.get(&c).unwrap().reactions;
    assert_eq!((r.likes, r.dislikes), (1, 1));
    assert!(r.is_liked_by_current_user && !r.is_disliked_by_current_user);

    gate.add_permits(1);
    fut.await.unwrap();
    assert_eq!(engine.get(&c).unwrap().reactions, r);
}

#[tokio::test]
async fn second_reaction_while_pending_is_ignored() {
    let s = server();
    let c = seed(&s, None, "bob");
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();

    let first = engine.react(&c, Reaction::Liked);
    pin_mut!(first);
    assert!(poll!(&mut first).is_pending());
    assert_eq!(engine.react(&c, Reaction::Disliked).await, Ok(None));
    assert_eq!(engine.get(&c).unwrap().reaction_state(), ReactionState::Liked);

    gate.add_permits(1);
    assert!(first.await.unwrap().is_some());
    let reacts = engine
        .transport()
        .requests()
        .into_iter()
        .filter(|r| matches!(r, Request::React(..)))
        .count();
    assert_eq!(reacts, 1);
}

#[tokio::test]
async fn delete_removes_loaded_subtree() {
    let s = server();
    let other = seed(&s, None, "bob");
    let root = seed(&s, None, "alice");
    seed(&s, Some(&root), "bob");
    seed(&s, Some(&root), "carol");
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();
    assert_eq!(engine.store().len(), 4);
    let replies = engine.store().inline_replies(&root);
    assert_eq!(replies.len(), 2);

    let fut = engine.delete(&root);
    pin_mut!(fut);
    assert!(poll!(&mut fut).is_pending());
    let check = |engine: &Engine<MockTransport>| {
        let store = engine.store();
        assert!(!store.contains(&root));
        assert!(replies.iter().all(|r| !store.contains(&r.id)));
        assert_eq!(to_vec(&store.top_level().ids), vec![other.clone()]);
        assert_eq!(store.top_level().total_top_level_items, 1);
        assert_eq!(store.top_level().grand_total_all_items, 1);
    };
    check(&engine);

    gate.add_permits(1);
    fut.await.unwrap();
    check(&engine);
    assert_eq!(s.lock().test_num_comments(), 1);
}

fn to_vec<'a>(ids: impl IntoIterator<Item = &'a CommentId>) -> Vec<CommentId> {
    ids.into_iter().cloned().collect()
}

#[tokio::test]
async fn failed_delete_restores_everything() {
    let s = server();
    let root = seed(&s, None, "alice");
    let reply = seed(&s, Some(&root), "alice");
    seed(&s, Some(&reply), "bob");
    let engine = engine(&s, Some("alice"));
    engine.load_top_level().await.unwrap();
    engine.load_replies(&reply).await.unwrap();
    let before = engine.store();

    engine
        .transport()
        .fail_next(api::Error::Conflict(String::from("locked")));
    assert!(engine.delete(&reply).await.is_err());
    let after = engine.store();
    assert_eq!(after.len(), before.len());
    assert_eq!(after.top_level(), before.top_level());
    assert_eq!(after.get(&root), before.get(&root));
    assert_eq!(after.reply_window(&reply), before.reply_window(&reply));
    assert_eq!(after.loaded_descendants(&root), before.loaded_descendants(&root));
}

fn small_pages() -> Config {
    Config {
        top_level_page_size: 2,
        reply_page_size: 2,
        ..Config::default()
    }
}

#[tokio::test]
async fn deleted_root_does_not_hide_the_next_page() {
    let s = server();
    let roots = (0..3).map(|_| seed(&s, None, "alice")).collect::<Vec<_>>();
    let engine = engine_with(&s, Some("alice"), small_pages());
    engine.load_top_level().await.unwrap();
    assert_eq!(engine.store().top_level().next_skip, 2);

    engine.delete(&roots[2]).await.unwrap();
    assert_eq!(engine.store().top_level().next_skip, 1);
    assert_eq!(
        engine.load_more_top_level().await,
        Ok(MergeOutcome::Applied {
            loaded: 2,
            has_more: false
        })
    );
    assert_eq!(
        to_vec(&engine.store().top_level().ids),
        vec![roots[1].clone(), roots[0].clone()]
    );
    let summary = engine.summary();
    assert_eq!(summary.loaded_roots as u64, summary.root_comments);
}

#[tokio::test]
async fn deleted_reply_does_not_hide_the_next_page() {
    let s = server();
    let root = seed(&s, None, "bob");
    let replies = (0..4).map(|_| seed(&s, Some(&root), "alice")).collect::<Vec<_>>();
    let engine = engine_with(&s, Some("alice"), small_pages());
    engine.load_top_level().await.unwrap();
    engine.load_replies(&root).await.unwrap();
    assert_eq!(engine.store().reply_window(&root).unwrap().next_skip, 2);

    engine.delete(&replies[0]).await.unwrap();
    engine.load_more_replies(&root).await.unwrap();
    let w = engine.store().reply_window(&root).unwrap().clone();
    assert_eq!(to_vec(&w.ids), replies[1..]);
    assert!(!w.has_more);
}

#[tokio::test]
async fn failed_delete_restores_paging_cursor() {
    let s = server();
    let roots = (0..3).map(|_| seed(&s, None, "alice")).collect::<Vec<_>>();
    let engine = engine_with(&s, Some("alice"), small_pages());
    engine.load_top_level().await.unwrap();

    engine
        .transport()
        .fail_next(api::Error::Network(String::from("offline")));
    assert!(engine.delete(&roots[2]).await.is_err());
    assert_eq!(engine.store().top_level().next_skip, 2);
    engine.load_more_top_level().await.unwrap();
    assert_eq!(
        to_vec(&engine.store().top_level().ids),
        roots.iter().rev().cloned().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn expanding_replaces_inline_replies() {
    let s = server();
    let root = seed(&s, None, "bob");
    let replies = (0..7).map(|_| seed(&s, Some(&root), "carol")).collect::<Vec<_>>();
    let engine = Arc::new(engine(&s, Some("alice")));
    let ctl = ThreadController::new(engine.clone());
    ctl.load().await.unwrap();
    assert_eq!(engine.get(&root).unwrap().direct_replies_count, 7);
    assert_eq!(engine.store().inline_replies(&root).len(), 2);

    ctl.expand_replies(&root).await.unwrap();
    assert!(engine
        .transport()
        .requests()
        .contains(&Request::Replies(root.clone(), ReplyQuery { skip: 0, take: 5 })));
    let loaded = engine
        .store()
        .loaded_replies(&root)
        .iter()
        .map(|c| c.id.clone())
        .collect::<Vec<_>>();
    assert_eq!(loaded, replies[..5]);

    ctl.load_more_replies(&root).await.unwrap();
    assert_eq!(engine.store().loaded_replies(&root).len(), 7);
    assert!(!engine.store().reply_window(&root).unwrap().has_more);
}

#[tokio::test]
async fn created_comment_gets_its_real_id() {
    let s = server();
    seed(&s, None, "bob");
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();

    let fut = engine.create_comment(String::from("first!"));
    pin_mut!(fut);
    assert!(poll!(&mut fut).is_pending());
    let temp = engine.store().top_level().ids[0].clone();
    assert!(temp.is_temporary());
    assert_eq!(engine.summary().root_comments, 2);
    assert_eq!(engine.summary().total_comments, 2);

    // a temporary comment cannot be acted upon yet
    assert_eq!(
        engine.reply(&temp, String::from("hi")).await,
        Err(Error::Unconfirmed(temp.clone()))
    );
    assert_eq!(
        engine.edit(&temp, String::from("hi")).await,
        Err(Error::Unconfirmed(temp.clone()))
    );

    gate.add_permits(1);
    let real = fut.await.unwrap();
    let store = engine.store();
    assert!(!store.contains(&temp));
    assert_eq!(store.top_level().ids[0], real);
    assert_eq!(store.get(&real).unwrap().text, "first!");
    assert_eq!(store.top_level().total_top_level_items, 2);
}

#[tokio::test]
async fn failed_create_leaves_no_trace() {
    let s = server();
    seed(&s, None, "bob");
    let engine = engine(&s, Some("alice"));
    engine.load_top_level().await.unwrap();
    let before = engine.store();
    engine
        .transport()
        .fail_next(api::Error::Unknown(String::from("boom")));
    assert!(engine.create_comment(String::from("hello")).await.is_err());
    let after = engine.store();
    assert_eq!(after.top_level(), before.top_level());
    assert_eq!(after.len(), 1);
}

#[tokio::test]
async fn reply_updates_counters_then_confirms() {
    let s = server();
    let root = seed(&s, None, "bob");
    let reply = seed(&s, Some(&root), "bob");
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(2);
    engine.load_top_level().await.unwrap();
    engine.load_replies(&root).await.unwrap();

    let fut = engine.reply(&reply, String::from("agreed"));
    pin_mut!(fut);
    assert!(poll!(&mut fut).is_pending());
    let store = engine.store();
    let parent = store.get(&reply).unwrap();
    assert_eq!(parent.direct_replies_count, 1);
    let temp = parent.children[0].clone();
    assert_eq!(store.get(&temp).unwrap().level, 2);
    assert_eq!(store.get(&root).unwrap().total_descendant_replies_count, Some(2));
    assert_eq!(store.top_level().grand_total_all_items, 3);

    gate.add_permits(1);
    let real = fut.await.unwrap();
    let store = engine.store();
    assert_eq!(to_vec(&store.get(&reply).unwrap().children), vec![real.clone()]);
    assert_eq!(store.get(&real).unwrap().parent_id.as_ref(), Some(&reply));
    assert!(!store.contains(&temp));
}

#[tokio::test]
async fn failed_edit_restores_text() {
    let s = server();
    let c = seed(&s, None, "alice");
    let engine = engine(&s, Some("alice"));
    engine.load_top_level().await.unwrap();
    engine
        .transport()
        .fail_next(api::Error::Conflict(String::from("stale")));
    assert!(engine.edit(&c, String::from("changed")).await.is_err());
    let node = engine.get(&c).unwrap();
    assert_eq!(node.text, "seeded");
    assert!(!node.is_edited());

    engine.edit(&c, String::from("changed")).await.unwrap();
    let node = engine.get(&c).unwrap();
    assert_eq!(node.text, "changed");
    assert!(node.is_edited());
}

#[tokio::test]
async fn overlapping_mutations_settle_independently() {
    let s = server();
    let a = seed(&s, None, "alice");
    let b = seed(&s, None, "alice");
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();

    let edit_a = engine.edit(&a, String::from("new a"));
    let edit_b = engine.edit(&b, String::from("new b"));
    pin_mut!(edit_a);
    pin_mut!(edit_b);
    assert!(poll!(&mut edit_a).is_pending());
    assert!(poll!(&mut edit_b).is_pending());

    engine
        .transport()
        .fail_next(api::Error::Network(String::from("reset")));
    gate.add_permits(1);
    assert!(edit_a.await.is_err());
    assert_eq!(engine.get(&a).unwrap().text, "seeded");
    assert_eq!(engine.get(&b).unwrap().text, "new b");

    gate.add_permits(1);
    edit_b.await.unwrap();
    assert_eq!(engine.get(&b).unwrap().text, "new b");
}

#[tokio::test]
async fn mutations_are_gated() {
    let s = server();
    let root = seed(&s, None, "bob");
    let reply = seed(&s, Some(&root), "bob");

    let anonymous = engine(&s, None);
    anonymous.load_top_level().await.unwrap();
    assert_eq!(
        anonymous.create_comment(String::from("hi")).await,
        Err(Error::NotLoggedIn)
    );
    assert_eq!(
        anonymous.react(&root, Reaction::Liked).await,
        Err(Error::NotLoggedIn)
    );

    let config = Config {
        max_level: 1,
        ..Config::default()
    };
    let alice = engine_with(&s, Some("alice"), config);
    alice.load_top_level().await.unwrap();
    assert_eq!(
        alice.edit(&root, String::from("mine now")).await,
        Err(Error::NotAuthor(root.clone()))
    );
    assert_eq!(alice.delete(&reply).await, Err(Error::NotAuthor(reply.clone())));
    assert_eq!(
        alice.reply(&reply, String::from("deeper")).await,
        Err(Error::DepthExceeded { max_level: 1 })
    );
    assert!(matches!(
        alice.create_comment(String::from("  ")).await,
        Err(Error::Api(api::Error::Validation { .. }))
    ));
    // none of these reached the server
    assert_eq!(alice.transport().requests().len(), 1);
    assert_eq!(s.lock().test_num_comments(), 2);
}

#[tokio::test]
async fn hidden_replies_ignore_late_pages() {
    let s = server();
    let root = seed(&s, None, "bob");
    for _ in 0..3 {
        seed(&s, Some(&root), "carol");
    }
    let (engine, gate) = gated_engine(&s, "alice");
    gate.add_permits(1);
    engine.load_top_level().await.unwrap();

    let fut = engine.load_replies(&root);
    pin_mut!(fut);
    assert!(poll!(&mut fut).is_pending());
    engine.reset_replies(&root);
    gate.add_permits(1);
    assert_eq!(fut.await, Ok(MergeOutcome::Stale));
    assert!(engine.store().reply_window(&root).unwrap().ids.is_empty());
}

#[tokio::test]
async fn failed_reply_keeps_draft() {
    let s = server();
    let root = seed(&s, None, "bob");
    let engine = Arc::new(engine(&s, Some("alice")));
    let ctl = ThreadController::new(engine.clone());
    ctl.load().await.unwrap();

    ctl.open_reply_form(&root).unwrap();
    ctl.set_reply_draft(&root, String::from("so true"));
    engine
        .transport()
        .fail_next(api::Error::Network(String::from("offline")));
    assert!(ctl.submit_reply(&root).await.is_err());
    assert_eq!(ctl.ui(&root).reply_draft.as_deref(), Some("so true"));
    assert!(engine.store().inline_replies(&root).is_empty());

    let created = ctl.submit_reply(&root).await.unwrap();
    assert_eq!(ctl.ui(&root).reply_draft, None);
    let view = ctl.view();
    assert_eq!(view.roots[0].children[0].comment.id, created);
    assert!(view.roots[0].children[0].can_edit);
}
