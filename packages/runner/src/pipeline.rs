//! Wires the bus, bridge, build service and queue controller together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use build_core::{ConstructionActivity, QueueSummary};
use db::ArtifactRepository;
use orchestrator::{
    AutoBuildService, BuildMessage, BuildQueueController, ControllerHooks, EventBus,
    GenerationBridge, start_build_actor,
};
use storage::Storage;

use crate::config::RunnerConfig;
use crate::demo::{self, TemplateSurface};
use crate::error::RunnerError;

/// Simulated latency of the local template generator.
const GENERATOR_LATENCY: Duration = Duration::from_millis(50);

/// Read activities from a JSON array file.
pub fn load_activities(path: &Path) -> Result<Vec<ConstructionActivity>, RunnerError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RunnerError::Jobs {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Build every activity once and return the run summary.
pub async fn run(
    config: &RunnerConfig,
    activities: Vec<ConstructionActivity>,
) -> Result<QueueSummary, RunnerError> {
    let bus = EventBus::default();
    let bridge = GenerationBridge::with_bus(config.bridge.clone(), bus.clone());

    // The surface mounts a moment after startup; the bridge path waits for it.
    let mount_bridge = bridge.clone();
    let mount_delay = config.bridge.mount_delay();
    tokio::spawn(async move {
        tokio::time::sleep(mount_delay).await;
        mount_bridge.register(Arc::new(TemplateSurface::default()));
    });

    let store = Arc::new(Storage::new(config.storage.clone())?);
    let database = db::init(&config.database).await?;
    let repository = Arc::new(ArtifactRepository::new(database));

    let (actor, actor_handle) = start_build_actor(bridge.clone(), bus.clone()).await?;

    let service = Arc::new(
        AutoBuildService::new(bridge, store)
            .with_generators(demo::generators(GENERATOR_LATENCY))
            .with_persistence(repository.clone(), config.owner_id.clone())
            .with_bus(bus.clone())
            .with_config(config.auto_build.clone()),
    );

    let controller = BuildQueueController::with_bus(config.queue.clone(), bus);
    controller.set_hooks(
        ControllerHooks::default()
            .on_activity_start(|item| {
                tracing::info!(
                    "[{}] Building {} ({})",
                    item.position,
                    item.activity.id,
                    item.activity.activity_type
                );
            })
            .on_activity_complete(|item, success| {
                if success {
                    tracing::info!("[{}] {} built", item.position, item.activity.id);
                } else {
                    tracing::error!(
                        "[{}] {} failed: {}",
                        item.position,
                        item.activity.id,
                        item.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }),
    );
    controller.init_queue(activities);
    controller.set_build_function(service.build_fn());

    let summary = controller.start().await;

    if let Err(err) = actor.send_message(BuildMessage::Shutdown) {
        tracing::warn!("Build actor already stopped: {}", err);
    }
    if let Err(err) = actor_handle.await {
        tracing::warn!("Build actor task ended abnormally: {}", err);
    }

    let summary = summary?;
    let stored = repository.list_by_owner(&config.owner_id).await?;
    tracing::info!(
        "Run #{} finished: {} built, {} failed, {} skipped; {} artifacts stored for {}",
        summary.run_id,
        summary.completed_count,
        summary.failed_count,
        summary.skipped_count,
        stored.len(),
        config.owner_id
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use build_core::{ItemBuildStatus, QueueStatus};

    use super::*;

    fn fast_config() -> RunnerConfig {
        let mut config = RunnerConfig::default();
        config.queue.delay_between_activities_ms = 0;
        config.bridge.mount_delay_ms = 10;
        config.bridge.settle_delay_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_sample_run() {
        let summary = run(&fast_config(), demo::sample_activities()).await.unwrap();

        assert_eq!(summary.status, QueueStatus::Completed);
        assert_eq!(summary.total_activities, 4);
        assert_eq!(summary.completed_count, 3);
        assert_eq!(summary.failed_count, 1);

        let statuses: Vec<_> = summary.activities.iter().map(|item| item.status).collect();
        assert_eq!(
            statuses,
            vec![
                ItemBuildStatus::Completed,
                ItemBuildStatus::Completed,
                ItemBuildStatus::Completed,
                ItemBuildStatus::Failed,
            ]
        );
        assert!(summary.activities[0].activity.is_built);
    }

    #[test]
    fn test_load_activities() {
        let dir = std::env::temp_dir().join(format!("runner-jobs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobs.json");
        std::fs::write(
            &path,
            r#"[{"id": "q1", "title": "Frações", "description": "", "type": "quiz-interativo",
                "customFields": {"tema": "Frações"}}]"#,
        )
        .unwrap();

        let activities = load_activities(&path).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, "quiz-interativo");
        assert_eq!(activities[0].custom_fields["tema"], "Frações");

        let missing = load_activities(&dir.join("missing.json")).unwrap_err();
        assert!(matches!(missing, RunnerError::Jobs { .. }));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
