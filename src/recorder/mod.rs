//! Recording pipelines
//!
//! Building blocks shared by every pipeline of a connection:
//! - `queue`: bounded drop-on-full frame queues
//! - `workers`: queue consumers writing audio, video and stills
//! - `drain`: bounded two-phase shutdown of a worker
//! - `state`: stream mode, recording sessions and backpressure counters

pub mod drain;
pub mod queue;
pub mod state;
pub mod workers;

pub use drain::{stop_worker, Drain, DrainPhase, StopOutcome, StopTimeouts};
pub use queue::{frame_queue, FrameReceiver, FrameSender, PushOutcome, RecvTimeout};
pub use state::{PipelineStats, RecordingSession, SessionKind, StatsSnapshot, StreamMode};
