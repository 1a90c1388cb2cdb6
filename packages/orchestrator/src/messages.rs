//! Message types for the build actor.

use build_core::{BuildRequest, BuildResult};
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};

/// Messages for the BuildActor.
#[derive(Debug)]
pub enum BuildMessage {
    /// Build one request through the generation bridge.
    ///
    /// Requests arriving from the bus carry no reply port; the result is
    /// published as `build.result` either way.
    Build {
        request: Box<BuildRequest>,
        reply: Option<RpcReplyPort<BuildResult>>,
    },

    /// Get counters for the requests handled so far.
    GetStats { reply: RpcReplyPort<BuildActorStats> },

    /// Stop listening and shut down.
    Shutdown,
}

/// Counters kept by the build actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildActorStats {
    pub handled: u64,
    pub succeeded: u64,
    pub failed: u64,
}
