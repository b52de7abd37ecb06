//! End-to-end tests driving the manager facade the way the chat collaborator
//! does: create a session, feed turns through it, reconstruct context for the
//! LLM, search, export, and sweep.

use conversation_memory::{
    ContextOptions, MemoryConfig, MemoryError, MemoryManager, Role, SearchSource,
};
use tempfile::TempDir;

fn small_budget_config() -> MemoryConfig {
    MemoryConfig {
        max_session_tokens: 150,
        protected_recent_count: 3,
        summary_threshold_tokens: 100,
        ..MemoryConfig::default()
    }
}

#[tokio::test]
async fn token_pressure_scenario_evicts_and_summarizes() {
    // Three user turns and three assistant turns of 40 tokens each against a
    // 150-token budget: the total must come back under budget, the summary
    // must be set, and the two oldest turns must be gone from the context.
    let manager = MemoryManager::new_in_memory(small_budget_config()).unwrap();
    let session = manager.create_session("user-a", None).await.unwrap();

    let mut contents = Vec::new();
    for i in 0..3 {
        let user_turn = format!("user turn {} about sqlite vacuuming", i);
        let assistant_turn = format!("assistant turn {} about sqlite vacuuming", i);
        manager
            .add_message(&session, Role::User, &user_turn, Some(40), None)
            .await
            .unwrap();
        manager
            .add_message(&session, Role::Assistant, &assistant_turn, Some(40), None)
            .await
            .unwrap();
        contents.push(user_turn);
        contents.push(assistant_turn);
    }

    let info = manager.get_session_info(&session).await.unwrap();
    assert!(info.total_tokens <= 150);
    assert_eq!(
        info.message_count,
        info.total_tokens / 40,
        "aggregates must agree with retained messages"
    );
    assert!(info.summary.is_some());

    let context = manager
        .get_context(&session, &ContextOptions::default())
        .await
        .unwrap();
    let context_contents: Vec<&str> = context.iter().map(|m| m.content.as_str()).collect();
    assert!(!context_contents.contains(&contents[0].as_str()));
    assert!(!context_contents.contains(&contents[1].as_str()));
    assert!(context_contents[0].starts_with("[Summary of earlier conversation:"));
}

#[tokio::test]
async fn search_scenario_ranks_semantically() {
    let manager = MemoryManager::new_in_memory(MemoryConfig::default()).unwrap();
    let session = manager.create_session("user-a", None).await.unwrap();

    manager
        .add_message(&session, Role::User, "machine learning basics", None, None)
        .await
        .unwrap();
    manager
        .add_message(&session, Role::User, "cooking pasta tonight", None, None)
        .await
        .unwrap();

    let results = manager
        .search_messages(&session, "machine learning", 2)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].message.content, "machine learning basics");
    assert_eq!(results[0].source, SearchSource::Semantic);
    for later in &results[1..] {
        assert!(later.similarity < results[0].similarity);
    }
}

#[tokio::test]
async fn export_then_import_roundtrips_exactly() {
    let dir = TempDir::new().unwrap();
    let manager = MemoryManager::new_in_memory(MemoryConfig::default()).unwrap();
    let session = manager
        .create_session("user-a", Some("roundtrip".to_string()))
        .await
        .unwrap();

    for (role, content) in [
        (Role::User, "first question about lifetimes"),
        (Role::Assistant, "lifetimes tie borrows to scopes"),
        (Role::User, "second question about traits"),
    ] {
        manager
            .add_message(&session, role, content, None, None)
            .await
            .unwrap();
    }
    let before = manager.get_session_info(&session).await.unwrap();

    let artifact = dir.path().join("roundtrip.json");
    manager
        .export_session(&session, Some(artifact.clone()))
        .await
        .unwrap();

    manager.delete_session(&session).await.unwrap();
    assert!(matches!(
        manager.get_session_info(&session).await,
        Err(MemoryError::SessionNotFound { .. })
    ));

    let restored = manager.import_session(&artifact).await.unwrap();
    assert_eq!(restored, "roundtrip");

    let after = manager.get_session_info(&session).await.unwrap();
    assert_eq!(after.message_count, before.message_count);
    assert_eq!(after.total_tokens, before.total_tokens);
    assert_eq!(after.summary, before.summary);

    let context = manager
        .get_context(&session, &ContextOptions::default())
        .await
        .unwrap();
    let ordered: Vec<&str> = context.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        ordered,
        vec![
            "first question about lifetimes",
            "lifetimes tie borrows to scopes",
            "second question about traits",
        ]
    );
}

#[tokio::test]
async fn export_of_unknown_session_fails_cleanly() {
    let manager = MemoryManager::new_in_memory(MemoryConfig::default()).unwrap();
    let result = manager.export_session("missing", None).await;
    assert!(matches!(result, Err(MemoryError::SessionNotFound { .. })));
}

#[tokio::test]
async fn backup_restores_every_session() {
    let dir = TempDir::new().unwrap();
    let manager = MemoryManager::new_in_memory(MemoryConfig::default()).unwrap();

    for user in ["user-a", "user-b"] {
        let session = manager.create_session(user, None).await.unwrap();
        manager
            .add_message(&session, Role::User, "some conversation content", None, None)
            .await
            .unwrap();
    }

    let artifact = dir.path().join("full-backup.json");
    manager.backup(Some(artifact.clone())).await.unwrap();

    // Wipe everything, then restore from the artifact.
    for record in manager.list_sessions(None).await {
        manager.delete_session(&record.session_id).await.unwrap();
    }
    assert_eq!(manager.get_memory_stats().await.session_count, 0);

    let restored = manager.restore_backup(&artifact).await.unwrap();
    assert_eq!(restored, 2);
    let stats = manager.get_memory_stats().await;
    assert_eq!(stats.session_count, 2);
    assert_eq!(stats.message_count, 2);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let config = MemoryConfig {
        session_ttl_seconds: 0,
        ..MemoryConfig::default()
    };
    let manager = MemoryManager::new_in_memory(config).unwrap();

    manager.create_session("user-a", None).await.unwrap();
    manager.create_session("user-b", None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    assert_eq!(manager.cleanup_old_sessions().await, 2);
    assert_eq!(manager.cleanup_old_sessions().await, 0);
}

#[tokio::test]
async fn persistence_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = MemoryConfig {
        db_path: dir.path().join("conversations.db"),
        ..MemoryConfig::default()
    };

    {
        let manager = MemoryManager::new(config.clone()).unwrap();
        let session = manager
            .create_session("user-a", Some("durable".to_string()))
            .await
            .unwrap();
        manager
            .add_message(&session, Role::User, "please survive a restart", None, None)
            .await
            .unwrap();
        manager
            .add_message(&session, Role::Assistant, "writes are synchronous", None, None)
            .await
            .unwrap();
    }

    // A fresh manager over the same file cold-loads the previous state.
    let manager = MemoryManager::new(config).unwrap();
    let info = manager.get_session_info("durable").await.unwrap();
    assert_eq!(info.message_count, 2);

    let context = manager
        .get_context("durable", &ContextOptions::default())
        .await
        .unwrap();
    assert_eq!(context.len(), 2);
    assert_eq!(context[0].content, "please survive a restart");

    // Ids keep climbing from where the previous process stopped.
    let next_id = manager
        .add_message("durable", Role::User, "and keep counting", None, None)
        .await
        .unwrap();
    assert_eq!(next_id, 3);
}

#[tokio::test]
async fn include_system_false_hides_summary_and_system_turns() {
    let manager = MemoryManager::new_in_memory(small_budget_config()).unwrap();
    let session = manager.create_session("user-a", None).await.unwrap();

    manager
        .add_message(&session, Role::System, "you are a helpful assistant", Some(10), None)
        .await
        .unwrap();
    // Force eviction + summary.
    for i in 0..6 {
        manager
            .add_message(&session, Role::User, &format!("filler turn number {}", i), Some(40), None)
            .await
            .unwrap();
    }
    let info = manager.get_session_info(&session).await.unwrap();
    assert!(info.summary.is_some());

    let without_system = manager
        .get_context(
            &session,
            &ContextOptions {
                include_system: false,
                ..ContextOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(without_system.iter().all(|m| m.role != Role::System));
    assert!(!without_system
        .iter()
        .any(|m| m.content.starts_with("[Summary")));
}

#[tokio::test]
async fn capacity_misconfiguration_is_signalled_not_looped() {
    let manager = MemoryManager::new_in_memory(small_budget_config()).unwrap();
    let session = manager.create_session("user-a", None).await.unwrap();

    let result = manager
        .add_message(&session, Role::User, "too big to ever fit", Some(1000), None)
        .await;
    assert!(matches!(result, Err(MemoryError::CapacityExceeded { .. })));

    // The failed call left no partial state behind.
    let info = manager.get_session_info(&session).await.unwrap();
    assert_eq!(info.message_count, 0);
    assert_eq!(info.total_tokens, 0);
}
