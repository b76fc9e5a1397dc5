use domain::{Command, CommandAction, CommandStatus, EXPIRED_REASON, TargetRef};
use fleet_storage::{CommandFilter, CommandStore, InMemoryCommandStore};

fn pending(id: &str, valve: u32, issued_at_ms: i64) -> Command {
    Command::pending(
        id,
        TargetRef::valve("mf-01", valve),
        CommandAction::On,
        None,
        issued_at_ms,
        30_000,
    )
}

#[tokio::test]
async fn duplicate_command_id_is_rejected() {
    let store = InMemoryCommandStore::new();
    store
        .create_command(pending("cmd-1", 1, 1_000))
        .await
        .expect("create");
    let err = store.create_command(pending("cmd-1", 2, 2_000)).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn transition_only_applies_from_predecessors() {
    let store = InMemoryCommandStore::new();
    store
        .create_command(pending("cmd-1", 1, 1_000))
        .await
        .expect("create");

    let sent = store
        .transition_command("cmd-1", CommandStatus::Sent, 1_100, None)
        .await
        .expect("transition")
        .expect("sent");
    assert_eq!(sent.sent_at_ms, Some(1_100));

    let failed = store
        .transition_command("cmd-1", CommandStatus::Failed, 1_200, Some("late".to_string()))
        .await
        .expect("transition");
    assert!(failed.is_none());

    let acked = store
        .transition_command("cmd-1", CommandStatus::Acknowledged, 1_300, None)
        .await
        .expect("transition")
        .expect("acked");
    assert_eq!(acked.acknowledged_at_ms, Some(1_300));

    let again = store
        .transition_command("cmd-1", CommandStatus::Expired, 99_000, None)
        .await
        .expect("transition");
    assert!(again.is_none());
    let stored = store
        .find_command("cmd-1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(stored.status, CommandStatus::Acknowledged);
}

#[tokio::test]
async fn unknown_command_transition_is_none() {
    let store = InMemoryCommandStore::new();
    let result = store
        .transition_command("missing", CommandStatus::Acknowledged, 1, None)
        .await
        .expect("transition");
    assert!(result.is_none());
}

#[tokio::test]
async fn expire_overdue_only_touches_open_commands_past_deadline() {
    let store = InMemoryCommandStore::new();
    store
        .create_command(pending("old-pending", 1, 0))
        .await
        .expect("create");
    store
        .create_command(pending("old-sent", 2, 0))
        .await
        .expect("create");
    store
        .create_command(pending("old-acked", 3, 0))
        .await
        .expect("create");
    store
        .create_command(pending("fresh", 4, 20_000))
        .await
        .expect("create");
    store
        .transition_command("old-sent", CommandStatus::Sent, 10, None)
        .await
        .expect("sent");
    store
        .transition_command("old-acked", CommandStatus::Acknowledged, 10, None)
        .await
        .expect("acked");

    // expires_at = 30_000；恰好等于截止时间不算过期
    let none = store
        .expire_overdue(30_000, EXPIRED_REASON)
        .await
        .expect("sweep");
    assert!(none.is_empty());

    let expired = store
        .expire_overdue(30_001, EXPIRED_REASON)
        .await
        .expect("sweep");
    let ids: Vec<&str> = expired.iter().map(|item| item.command_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"old-pending"));
    assert!(ids.contains(&"old-sent"));
    for command in expired.iter() {
        assert_eq!(command.status, CommandStatus::Expired);
        assert_eq!(command.error_message.as_deref(), Some(EXPIRED_REASON));
    }

    let second = store
        .expire_overdue(60_000, EXPIRED_REASON)
        .await
        .expect("sweep");
    assert!(second.is_empty());
}

#[tokio::test]
async fn list_commands_filters_and_orders_newest_first() {
    let store = InMemoryCommandStore::new();
    for (id, valve, at) in [("a", 1, 1_000), ("b", 1, 3_000), ("c", 2, 2_000)] {
        store
            .create_command(pending(id, valve, at))
            .await
            .expect("create");
    }
    let items = store
        .list_commands(&CommandFilter {
            target_id: Some("mf-01".to_string()),
            target_index: Some(1),
            ..CommandFilter::default()
        })
        .await
        .expect("list");
    let ids: Vec<&str> = items.iter().map(|item| item.command_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);

    let limited = store
        .list_commands(&CommandFilter {
            limit: 1,
            ..CommandFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].command_id, "b");
}
