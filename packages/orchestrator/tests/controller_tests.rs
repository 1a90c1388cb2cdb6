#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use build_core::{
    BuildError, BuildEvent, EventName, ItemBuildStatus, QueueError, QueueStatus,
};
use orchestrator::{BuildQueueController, CancellationToken, ControllerHooks, EventBus};
use parking_lot::Mutex;
use tokio::sync::Notify;

use common::{EventLog, activity, fast_config};

#[tokio::test(start_paused = true)]
async fn test_outcomes_follow_enqueue_order() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::default();
    let log = EventLog::attach(
        &bus,
        &[
            EventName::ItemCompleted,
            EventName::ItemError,
            EventName::QueueCompleted,
        ],
    );
    let controller = BuildQueueController::with_bus(fast_config(), bus);
    controller.init_queue(vec![
        activity("A", "Frações"),
        activity("B", "Decimais"),
        activity("C", "Porcentagem"),
    ]);
    controller.set_build_function(|activity, _cancel| {
        Box::pin(async move { Ok(activity.id.as_str() != "B") })
    });

    let summary = controller.start().await?;

    assert_eq!(summary.status, QueueStatus::Completed);
    assert_eq!(summary.total_activities, 3);
    assert_eq!(summary.completed_count, 2);
    assert_eq!(summary.failed_count, 1);
    assert!(summary.is_fully_accounted());
    assert_eq!(log.outcome_order(), vec!["A", "B", "C"]);

    let completed = log
        .events()
        .into_iter()
        .find_map(|event| match event {
            BuildEvent::QueueCompleted(summary) => Some(summary),
            _ => None,
        })
        .ok_or("queue.completed was not published")?;
    let statuses: Vec<_> = completed.activities.iter().map(|item| item.status).collect();
    assert_eq!(
        statuses,
        vec![
            ItemBuildStatus::Completed,
            ItemBuildStatus::Failed,
            ItemBuildStatus::Completed
        ]
    );
    assert_eq!(
        completed.activities[1].error.as_deref(),
        Some("Build function reported failure")
    );
    assert_eq!(controller.status(), QueueStatus::Completed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_faster_later_items_do_not_overtake() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::default();
    let log = EventLog::attach(&bus, &[EventName::ItemCompleted, EventName::ItemError]);
    let controller = BuildQueueController::with_bus(fast_config(), bus);
    controller.init_queue(vec![
        activity("slow", "Um"),
        activity("medium", "Dois"),
        activity("fast", "Três"),
    ]);

    let building = Arc::new(AtomicUsize::new(0));
    let max_building = Arc::new(AtomicUsize::new(0));
    let (now, peak) = (Arc::clone(&building), Arc::clone(&max_building));
    controller.set_build_function(move |activity, _cancel| {
        let (now, peak) = (Arc::clone(&now), Arc::clone(&peak));
        Box::pin(async move {
            let current = now.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(current, Ordering::SeqCst);
            let latency = match activity.id.as_str() {
                "slow" => 300,
                "medium" => 200,
                _ => 10,
            };
            tokio::time::sleep(Duration::from_millis(latency)).await;
            now.fetch_sub(1, Ordering::SeqCst);
            Ok(true)
        })
    });

    let summary = controller.start().await?;
    assert_eq!(summary.completed_count, 3);
    assert_eq!(log.outcome_order(), vec!["slow", "medium", "fast"]);
    assert_eq!(max_building.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_never_two_items_building() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue((1..=4).map(|n| activity(&format!("a{n}"), "Tema")).collect());

    let peak = Arc::new(AtomicUsize::new(0));
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let (peak_hook, transitions_hook) = (Arc::clone(&peak), Arc::clone(&transitions));
    controller.set_hooks(
        ControllerHooks::default()
            .on_progress(move |progress| {
                if let Some(item) = &progress.current_activity {
                    if item.status == ItemBuildStatus::Building {
                        peak_hook.fetch_max(1, Ordering::SeqCst);
                    }
                }
            })
            .on_activity_start(|item| assert_eq!(item.status, ItemBuildStatus::Building))
            .on_activity_complete(move |item, success| {
                transitions_hook
                    .lock()
                    .push((item.activity.id.to_string(), success));
            }),
    );

    let inspector = controller.clone();
    controller.set_build_function(move |_activity, _cancel| {
        let building = inspector
            .items()
            .iter()
            .filter(|item| item.status == ItemBuildStatus::Building)
            .count();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(building == 1)
        })
    });

    let summary = controller.start().await?;
    assert_eq!(summary.completed_count, 4);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(
        transitions.lock().clone(),
        vec![
            ("a1".to_string(), true),
            ("a2".to_string(), true),
            ("a3".to_string(), true),
            ("a4".to_string(), true),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_missing_title_fails_without_building() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue(vec![activity("untitled", "  "), activity("ok", "Frações")]);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    controller.set_build_function(move |_activity, _cancel| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(true) })
    });

    let summary = controller.start().await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.completed_count, 1);

    let failed = &summary.activities[0];
    assert_eq!(failed.status, ItemBuildStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some(BuildError::validation(["title"]).to_string().as_str())
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_already_built_items_are_skipped() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    let mut built = activity("built", "Pronta");
    built.is_built = true;
    controller.init_queue(vec![built, activity("fresh", "Nova")]);
    controller.set_build_function(|_activity, _cancel| Box::pin(async { Ok(true) }));

    let summary = controller.start().await?;
    assert_eq!(summary.skipped_count, 1);
    assert_eq!(summary.completed_count, 1);
    assert_eq!(summary.activities[0].status, ItemBuildStatus::Skipped);
    assert!(summary.is_fully_accounted());
    Ok(())
}

#[tokio::test]
async fn test_start_without_build_function_is_rejected() {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue(vec![activity("a", "Tema")]);
    let err = controller.start().await.unwrap_err();
    assert_eq!(err, QueueError::MissingBuildFunction);
    assert_eq!(controller.status(), QueueStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_item_and_cancels_its_token() -> Result<(), Box<dyn Error>> {
    let config = fast_config().with_timeout(Duration::from_millis(1_000));
    let controller = BuildQueueController::new(config);
    controller.init_queue(vec![activity("stuck", "Lento"), activity("next", "Rápido")]);

    let tokens: Arc<Mutex<Vec<CancellationToken>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&tokens);
    controller.set_build_function(move |activity, cancel| {
        seen.lock().push(cancel.clone());
        Box::pin(async move {
            if activity.id.as_str() == "stuck" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(true)
        })
    });

    let summary = controller.start().await?;
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.completed_count, 1);
    assert_eq!(
        summary.activities[0].error.as_deref(),
        Some("Build timed out after 1000ms")
    );

    let tokens = tokens.lock();
    assert!(tokens[0].is_cancelled());
    assert!(!tokens[1].is_cancelled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abort_stops_dequeuing() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue(vec![
        activity("a", "Um"),
        activity("b", "Dois"),
        activity("c", "Três"),
    ]);

    let started = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let (signal, counter) = (Arc::clone(&started), Arc::clone(&calls));
    controller.set_build_function(move |_activity, cancel| {
        counter.fetch_add(1, Ordering::SeqCst);
        signal.notify_one();
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(BuildError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(true),
            }
        })
    });

    let run = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    started.notified().await;

    assert!(controller.abort());
    assert!(!controller.abort());
    let summary = run.await??;

    assert_eq!(summary.status, QueueStatus::Error);
    assert_eq!(controller.status(), QueueStatus::Error);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.progress().current_position, 1);

    let items = controller.items();
    assert_eq!(items[0].status, ItemBuildStatus::Failed);
    assert_eq!(items[0].error.as_deref(), Some("Run aborted"));
    assert!(
        items[1..]
            .iter()
            .all(|item| item.status == ItemBuildStatus::Queued)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_supersedes_previous_run() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue(vec![activity("a", "Um"), activity("b", "Dois")]);

    let started = Arc::new(Notify::new());
    let signal = Arc::clone(&started);
    controller.set_build_function(move |_activity, cancel| {
        signal.notify_one();
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(BuildError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(500)) => Ok(true),
            }
        })
    });

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    started.notified().await;

    controller.init_queue(vec![
        activity("x", "Novo 1"),
        activity("y", "Novo 2"),
        activity("z", "Novo 3"),
    ]);
    let second = controller.start().await?;
    let first = first.await??;

    assert_eq!(first.status, QueueStatus::Error);
    assert_eq!(second.status, QueueStatus::Completed);
    assert_eq!(second.total_activities, 3);
    assert_eq!(second.completed_count, 3);
    assert!(second.run_id > first.run_id);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_start_retires_running_run() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue(vec![activity("a", "Um"), activity("b", "Dois")]);

    let started = Arc::new(Notify::new());
    let signal = Arc::clone(&started);
    controller.set_build_function(move |_activity, cancel| {
        signal.notify_one();
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(BuildError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(100)) => Ok(true),
            }
        })
    });

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    started.notified().await;

    let second = controller.start().await?;
    let first = first.await??;

    assert_eq!(first.status, QueueStatus::Error);
    assert_eq!(
        first.activities[0].error.as_deref(),
        Some("Superseded by a new run")
    );
    assert_eq!(second.status, QueueStatus::Completed);
    assert_eq!(second.total_activities, 2);
    assert_eq!(second.completed_count, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_latest_overlapping_start_wins() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue(vec![activity("a", "Um"), activity("b", "Dois")]);

    let started = Arc::new(Notify::new());
    let signal = Arc::clone(&started);
    controller.set_build_function(move |_activity, cancel| {
        signal.notify_one();
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(BuildError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(100)) => Ok(true),
            }
        })
    });

    let original = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    started.notified().await;

    // Still inside the supersede grace when the later request arrives.
    let earlier = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let later = controller.start().await?;

    let original = original.await??;
    let earlier = earlier.await??;

    assert_eq!(original.status, QueueStatus::Error);
    assert_eq!(earlier.status, QueueStatus::Error);
    assert_eq!(earlier.run_id, original.run_id);
    assert_eq!(later.status, QueueStatus::Completed);
    assert_eq!(later.completed_count, 2);
    assert!(later.run_id > original.run_id);
    assert_eq!(controller.status(), QueueStatus::Completed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_pause_then_resume_continues_from_cursor() -> Result<(), Box<dyn Error>> {
    let bus = EventBus::default();
    let log = EventLog::attach(&bus, &[EventName::QueueCompleted]);
    let controller = BuildQueueController::with_bus(fast_config(), bus);
    controller.init_queue(vec![
        activity("a", "Um"),
        activity("b", "Dois"),
        activity("c", "Três"),
    ]);

    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let (signal, release, counter) = (Arc::clone(&started), Arc::clone(&gate), Arc::clone(&calls));
    controller.set_build_function(move |_activity, _cancel| {
        let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
        signal.notify_one();
        let release = Arc::clone(&release);
        Box::pin(async move {
            if first {
                release.notified().await;
            }
            Ok(true)
        })
    });

    let run = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });
    started.notified().await;

    assert!(controller.pause());
    assert!(!controller.pause());
    gate.notify_one();

    let paused = run.await??;
    assert_eq!(paused.status, QueueStatus::Paused);
    assert_eq!(paused.completed_count, 1);
    assert_eq!(controller.status(), QueueStatus::Paused);
    assert_eq!(controller.progress().current_position, 2);
    assert!(log.events().is_empty());

    let resumed = controller.resume().await?;
    assert_eq!(resumed.status, QueueStatus::Completed);
    assert_eq!(resumed.completed_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(log.names(), vec![EventName::QueueCompleted]);
    Ok(())
}

#[tokio::test]
async fn test_resume_requires_paused_queue() {
    let controller = BuildQueueController::new(fast_config());
    let err = controller.resume().await.unwrap_err();
    assert_eq!(
        err,
        QueueError::InvalidState {
            operation: "resume",
            status: QueueStatus::Idle,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_queue() -> Result<(), Box<dyn Error>> {
    let controller = BuildQueueController::new(fast_config());
    controller.init_queue(vec![activity("a", "Um")]);
    controller.set_build_function(|_activity, _cancel| Box::pin(async { Ok(true) }));
    controller.start().await?;

    controller.reset();
    assert_eq!(controller.status(), QueueStatus::Idle);
    assert!(controller.items().is_empty());
    assert!(controller.current_activity().is_none());
    assert!(!controller.is_running());
    Ok(())
}
