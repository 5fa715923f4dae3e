// tests/session_flow.rs
// Full turns through the page controller with scripted models.

mod common;

use common::{controller, ScriptedModel, RULEBOOK};
use std::sync::Arc;
use tempfile::tempdir;
use trpg::chat::NullDisplay;
use trpg::controller::GREETING;
use trpg::loader::Document;
use trpg::{ChatMessage, PageError, Role};

fn rulebook() -> Document {
    Document::new("Rule_Book.txt", RULEBOOK.as_bytes().to_vec()).expect("document")
}

#[tokio::test]
async fn test_history_alternates_after_n_turns() {
    let dir = tempdir().unwrap();
    let page = controller(dir.path(), Arc::new(ScriptedModel::new(&["Sure", "."])));
    page.upload_rulebook(rulebook()).await.unwrap();
    let session = page.sessions().create();

    let questions = ["How much gold?", "How do I fight?", "What is mental strain?"];
    for q in questions {
        page.submit(&session, q, NullDisplay).await.unwrap();
    }

    let history = session.read_all();
    assert_eq!(history.len(), 2 * questions.len());
    for (i, message) in history.iter().enumerate() {
        let expected = if i % 2 == 0 { Role::Human } else { Role::Ai };
        assert_eq!(message.role, expected, "message {} has wrong role", i);
    }
    let humans: Vec<&str> = history
        .iter()
        .filter(|m| m.role == Role::Human)
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(humans, questions);
    assert!(history
        .iter()
        .filter(|m| m.role == Role::Ai)
        .all(|m| m.text == "Sure."));
}

#[tokio::test]
async fn test_stream_renders_growing_text_and_saves_once() {
    let dir = tempdir().unwrap();
    let page = controller(dir.path(), Arc::new(ScriptedModel::new(&["Hello", " world"])));
    page.upload_rulebook(rulebook()).await.unwrap();
    let session = page.sessions().create();

    let mut renders: Vec<String> = Vec::new();
    let reply = page
        .start_turn(&session, "Say hello")
        .await
        .unwrap()
        .run(&mut renders)
        .await
        .unwrap();

    assert_eq!(renders, vec!["Hello".to_string(), "Hello world".to_string()]);
    assert_eq!(reply, ChatMessage::ai("Hello world"));
    let saved: Vec<_> = session
        .read_all()
        .into_iter()
        .filter(|m| m.text == "Hello world")
        .collect();
    assert_eq!(saved.len(), 1);
}

#[tokio::test]
async fn test_render_does_not_touch_history() {
    let dir = tempdir().unwrap();
    let page = controller(dir.path(), Arc::new(ScriptedModel::new(&["ok"])));
    page.upload_rulebook(rulebook()).await.unwrap();
    let session = page.sessions().create();

    let empty = page.render(&session);
    assert_eq!(empty.messages, vec![ChatMessage::ai(GREETING)]);
    assert_eq!(page.render(&session), empty);
    assert!(session.is_empty());

    page.submit(&session, "Anything?", NullDisplay).await.unwrap();
    let before = session.read_all();
    for _ in 0..5 {
        let view = page.render(&session);
        assert_eq!(view.messages, before);
    }
    assert_eq!(session.read_all(), before);
}

#[tokio::test]
async fn test_failed_stream_keeps_human_message_only() {
    let dir = tempdir().unwrap();
    let page = controller(dir.path(), Arc::new(ScriptedModel::failing(&["par", "tial"])));
    page.upload_rulebook(rulebook()).await.unwrap();
    let session = page.sessions().create();

    let err = page.submit(&session, "Will this work?", NullDisplay).await.unwrap_err();
    assert!(matches!(err, PageError::Chat(_)));
    assert_eq!(session.read_all(), vec![ChatMessage::human("Will this work?")]);
    assert!(!session.is_generating());
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let dir = tempdir().unwrap();
    let page = controller(dir.path(), Arc::new(ScriptedModel::new(&["yes"])));
    page.upload_rulebook(rulebook()).await.unwrap();

    let a = page.sessions().get_or_init("a");
    let b = page.sessions().get_or_init("b");
    page.submit(&a, "question for a", NullDisplay).await.unwrap();

    assert_eq!(a.len(), 2);
    assert!(b.is_empty());
    assert_eq!(page.render(&b).messages, vec![ChatMessage::ai(GREETING)]);
}

#[tokio::test]
async fn test_stat_tracks_render_four_slots() {
    use trpg::session::{StatKind, StatTrack};

    let dir = tempdir().unwrap();
    let page = controller(dir.path(), Arc::new(ScriptedModel::new(&["ok"])));
    let session = page.sessions().create();

    for _ in 0..3 {
        let stats = page.render(&session).stats;
        for kind in [StatKind::Health, StatKind::Mental, StatKind::Money] {
            assert_eq!(stats.get(kind).len(), 4);
            assert!(stats.get(kind).iter().all(|slot| slot.is_empty()));
        }
    }

    let money: StatTrack = [
        "coin.png".to_string(),
        "coin.png".to_string(),
        String::new(),
        String::new(),
    ];
    session.set_stat_track(StatKind::Money, money.clone());
    let stats = page.render(&session).stats;
    assert_eq!(stats.money, money);
    assert_eq!(stats.health.len(), 4);
}
