//! Actor serving `build.requested` events through the generation bridge.

use std::time::Duration;

use build_core::{BuildError, BuildEvent, BuildRequest, BuildResult, EventName};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::bridge::GenerationBridge;
use crate::bus::{EventBus, Subscription};
use crate::messages::{BuildActorStats, BuildMessage};

/// State for the build actor.
pub struct BuildActorState {
    pub bridge: GenerationBridge,
    pub bus: EventBus,
    pub stats: BuildActorStats,
    listener: Option<Subscription>,
}

/// Build actor arguments.
pub struct BuildActorArgs {
    pub bridge: GenerationBridge,
    pub bus: EventBus,
}

/// Actor that turns `build.requested` events into bridge builds, one at a time.
pub struct BuildActor;

impl Actor for BuildActor {
    type Msg = BuildMessage;
    type State = BuildActorState;
    type Arguments = BuildActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting build actor");

        let listener = args.bus.subscribe(EventName::BuildRequested, move |event| {
            if let BuildEvent::BuildRequested(request) = event {
                let message = BuildMessage::Build {
                    request: Box::new(request.clone()),
                    reply: None,
                };
                if myself.send_message(message).is_err() {
                    tracing::warn!("Build actor gone, dropping request {}", request.request_id);
                }
            }
        });

        Ok(BuildActorState {
            bridge: args.bridge,
            bus: args.bus,
            stats: BuildActorStats::default(),
            listener: Some(listener),
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(listener) = state.listener.take() {
            listener.unsubscribe();
        }
        tracing::info!(
            "Build actor stopped after {} requests",
            state.stats.handled
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BuildMessage::Build { request, reply } => {
                let result = state.bridge.build_request(&request).await;

                state.stats.handled += 1;
                if result.success {
                    state.stats.succeeded += 1;
                } else {
                    state.stats.failed += 1;
                }

                state.bus.publish(BuildEvent::BuildResult(result.clone()));
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }

            BuildMessage::GetStats { reply } => {
                let _ = reply.send(state.stats);
            }

            BuildMessage::Shutdown => {
                tracing::info!("Shutting down build actor");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Start a build actor serving requests published on `bus`.
pub async fn start_build_actor(
    bridge: GenerationBridge,
    bus: EventBus,
) -> Result<(ActorRef<BuildMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(None, BuildActor, BuildActorArgs { bridge, bus }).await?;
    Ok((actor, handle))
}

/// Publish a build request and wait for its correlated result.
///
/// Something must be serving `build.requested` on the bus, normally a
/// [`BuildActor`]. A failed build comes back as `Ok` with `success: false`.
pub async fn request_build(
    bus: &EventBus,
    request: BuildRequest,
    timeout: Duration,
) -> Result<BuildResult, BuildError> {
    // Listen before publishing so a synchronous answer is not missed.
    let result = bus.wait_for(
        EventName::BuildResult,
        request.request_id.to_string(),
        timeout,
    );
    bus.publish(BuildEvent::BuildRequested(request));

    match result.await? {
        BuildEvent::BuildResult(result) => Ok(result),
        other => Err(BuildError::Bridge(format!(
            "Unexpected reply event {}",
            other.name()
        ))),
    }
}
