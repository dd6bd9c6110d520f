use super::*;

fn unbounded() -> ConversationMemory {
    ConversationMemory::new(MemoryPolicy::default())
}

#[tokio::test]
async fn get_or_create_returns_same_conversation() {
    let memory = unbounded();

    let first = memory.get_or_create("thread-1").await;
    let second = memory.get_or_create("thread-1").await;
    let other = memory.get_or_create("thread-2").await;

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
    assert!(first.lock().await.is_empty());
    assert_eq!(first.lock().await.id(), "thread-1");
    assert_eq!(memory.len().await, 2);
}

#[tokio::test]
async fn turns_are_kept_in_order() {
    let memory = unbounded();

    memory.append_turn("t", "first question", "first answer").await;
    memory.append_turn("t", "second question", "second answer").await;

    let history = memory.history("t").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].user, "first question");
    assert_eq!(history[0].assistant, "first answer");
    assert_eq!(history[1].user, "second question");
    assert!(history[0].created_at <= history[1].created_at);
}

#[tokio::test]
async fn unknown_conversation_has_no_history() {
    let memory = unbounded();
    assert!(memory.history("never-seen").await.is_empty());
    assert!(!memory.contains("never-seen").await);
}

#[tokio::test]
async fn clear_is_idempotent_and_resets() {
    let memory = unbounded();
    memory.append_turn("t", "q", "a").await;
    let before = memory.get_or_create("t").await;

    memory.clear("t").await;
    memory.clear("t").await;
    memory.clear("missing").await;
    assert!(!memory.contains("t").await);

    let after = memory.get_or_create("t").await;
    assert!(after.lock().await.is_empty());
    assert!(!Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn window_drops_oldest_turns() {
    let memory = ConversationMemory::new(MemoryPolicy {
        max_turns: Some(2),
        idle_timeout: None,
    });

    for i in 0..5 {
        memory
            .append_turn("t", &format!("q{i}"), &format!("a{i}"))
            .await;
    }

    let users: Vec<String> = memory
        .history("t")
        .await
        .into_iter()
        .map(|turn| turn.user)
        .collect();
    assert_eq!(users, vec!["q3", "q4"]);
}

#[tokio::test]
async fn idle_conversations_expire() {
    let memory = ConversationMemory::new(MemoryPolicy {
        max_turns: None,
        idle_timeout: Some(Duration::from_millis(20)),
    });

    memory.append_turn("stale", "q", "a").await;
    let stale = memory.get_or_create("stale").await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(memory.history("stale").await.is_empty());

    let fresh = memory.get_or_create("stale").await;
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert!(fresh.lock().await.is_empty());
}

#[tokio::test]
async fn evict_idle_removes_only_stale_conversations() {
    let memory = ConversationMemory::new(MemoryPolicy {
        max_turns: None,
        idle_timeout: Some(Duration::from_millis(40)),
    });

    memory.append_turn("old", "q", "a").await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    memory.append_turn("new", "q", "a").await;

    assert_eq!(memory.evict_idle().await, 1);
    assert!(!memory.contains("old").await);
    assert!(memory.contains("new").await);
}

#[tokio::test]
async fn pending_turn_keeps_conversation_through_eviction() {
    let memory = ConversationMemory::new(MemoryPolicy {
        max_turns: None,
        idle_timeout: Some(Duration::from_millis(40)),
    });

    memory.append_turn("slow", "first question", "first answer").await;
    let pending = memory.begin_turn("slow").await;
    assert_eq!(pending.conversation_id(), "slow");
    assert_eq!(pending.history().len(), 1);

    // Longer than the idle timeout, as a slow answer would take
    tokio::time::sleep(Duration::from_millis(100)).await;
    memory.append_turn("other", "q", "a").await;

    assert_eq!(memory.evict_idle().await, 0);
    assert!(memory.contains("slow").await);
    assert_eq!(memory.history("slow").await.len(), 1);

    memory
        .complete_turn(pending, "second question", "second answer")
        .await;

    let history = memory.history("slow").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].user, "first question");
    assert_eq!(history[1].user, "second question");
    assert_eq!(history[1].assistant, "second answer");
}

#[tokio::test]
async fn dropped_pending_turn_releases_conversation() {
    let memory = ConversationMemory::new(MemoryPolicy {
        max_turns: None,
        idle_timeout: Some(Duration::from_millis(40)),
    });

    let pending = memory.begin_turn("abandoned").await;
    drop(pending);
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(memory.evict_idle().await, 1);
    assert!(!memory.contains("abandoned").await);
}

#[tokio::test]
async fn cleared_conversation_stays_cleared_after_pending_turn() {
    let memory = unbounded();

    memory.append_turn("t", "q", "a").await;
    let pending = memory.begin_turn("t").await;
    memory.clear("t").await;
    memory.complete_turn(pending, "late question", "late answer").await;

    assert!(!memory.contains("t").await);
    assert!(memory.history("t").await.is_empty());
}

#[tokio::test]
async fn evict_idle_without_timeout_keeps_everything() {
    let memory = unbounded();
    memory.append_turn("t", "q", "a").await;
    assert_eq!(memory.evict_idle().await, 0);
    assert_eq!(memory.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_keep_pairs_together() {
    let memory = Arc::new(unbounded());

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let memory = Arc::clone(&memory);
            tokio::spawn(async move {
                memory
                    .append_turn("shared", &format!("question {i}"), &format!("answer {i}"))
                    .await;
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("append task should finish");
    }

    let history = memory.history("shared").await;
    assert_eq!(history.len(), 50);
    for turn in &history {
        let suffix = turn.user.trim_start_matches("question ");
        assert_eq!(turn.assistant, format!("answer {suffix}"));
    }
}

#[test]
fn policy_from_config() {
    let policy = MemoryPolicy::from(&MemoryConfig::default());
    assert_eq!(policy.max_turns, Some(50));
    assert_eq!(policy.idle_timeout, Some(Duration::from_secs(3600)));
}
