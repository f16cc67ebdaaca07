pub mod engine;

pub use engine::{
    EngineError, MAX_CONSECUTIVE_RETRIES, SendMode, StopReason, TransmitConfig, TransmitSummary,
    Transmitter,
};
pub use tokio_util::sync::CancellationToken;
