//! Property and integration tests for the Task Manager (C5) that don't fit
//! naturally as inline `#[cfg(test)]` blocks because they drive multiple
//! tasks through the manager at once.

use std::sync::Arc;

use media_svc::config::ServiceConfig;
use media_svc::task::{CleanupRequest, TaskManager, TaskRequest};
use proptest::prelude::*;

fn manager() -> Arc<TaskManager> {
    TaskManager::new(Arc::new(ServiceConfig::from_env_or_default()))
}

/// P8: cleanup with `max_keep=k` applied twice to the same state is
/// idempotent, and the surviving set is always within bounds.
#[tokio::test]
async fn cleanup_is_idempotent_for_any_keep_count() {
    let manager = manager();
    for i in 0..5 {
        let id = manager.add_task(TaskRequest {
            url: format!("https://example.com/video-{i}"),
            ..Default::default()
        });
        manager.cancel_task(&id).unwrap();
    }

    // Give the worker pool a moment to settle each task into a terminal state.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let first_removed = manager.cleanup(CleanupRequest {
        max_keep: 2,
        remove_active: false,
    });
    let remaining_after_first = manager.list_tasks().len();

    let second_removed = manager.cleanup(CleanupRequest {
        max_keep: 2,
        remove_active: false,
    });
    let remaining_after_second = manager.list_tasks().len();

    assert_eq!(remaining_after_first, remaining_after_second);
    assert_eq!(second_removed, 0, "second cleanup pass must be a no-op");
    assert!(first_removed + remaining_after_first >= 2 || remaining_after_first <= 2);
}

proptest! {
    /// P7: the safe-filename function is idempotent and never reintroduces a
    /// forbidden character, across an arbitrary input space.
    #[test]
    fn sanitize_filename_is_idempotent(input in ".{0,200}") {
        let once = media_svc::utils::filename::sanitize_filename(&input);
        let twice = media_svc::utils::filename::sanitize_filename(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.chars().count() <= 150);
        prop_assert!(!once.is_empty());
    }
}
