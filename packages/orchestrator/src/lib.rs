//! Activity construction orchestrator.
//!
//! Builds queued activities one at a time against a single shared
//! generation surface.
//!
//! # Architecture
//!
//! - `EventBus` - In-process pub/sub carrying build and queue events
//! - `GenerationBridge` - Holds the one registered generation handle
//! - `BuildQueueController` - Sequential queue state machine
//! - `AutoBuildService` - Picks the build strategy for each activity
//! - `BuildActor` - Serves `build.requested` events from the bus
//!
//! # Usage
//!
//! ```ignore
//! use orchestrator::{AutoBuildService, BuildQueueController, EventBus, GenerationBridge};
//!
//! let bus = EventBus::default();
//! let bridge = GenerationBridge::with_bus(Default::default(), bus.clone());
//! let service = Arc::new(AutoBuildService::new(bridge, store).with_bus(bus.clone()));
//!
//! let controller = BuildQueueController::with_bus(Default::default(), bus);
//! controller.init_queue(activities);
//! controller.set_build_function(service.build_fn());
//! let summary = controller.start().await?;
//! ```

mod auto_build;
mod bridge;
mod build_actor;
mod bus;
mod controller;
mod generator;
mod messages;
pub mod routine;

pub use auto_build::{AutoBuildConfig, AutoBuildService, BuildOutcome, BuiltCallback};
pub use bridge::{
    BridgeConfig, GenerationBridge, GenerationHandle, GenerationOutput, HandleFuture, HandleResult,
};
pub use build_actor::{BuildActor, BuildActorArgs, BuildActorState, request_build, start_build_actor};
pub use bus::{EventBus, EventHandler, Subscription};
pub use controller::{BuildFn, BuildFuture, BuildQueueController, ControllerHooks};
pub use generator::{
    CascadeGenerator, ContentGenerator, FnGenerator, GenerationRequest, GeneratorError,
    GeneratorFuture, GeneratorRegistry, GeneratorResult,
};
pub use messages::{BuildActorStats, BuildMessage};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, SpawnErr};
/// Re-export the cancellation token handed to build functions and generators.
pub use tokio_util::sync::CancellationToken;
