//! The agent execution core: the iteration loop, retry state machine, and
//! the event/config types it's built from.

mod config;
mod events;
mod loop_;
mod sniffer;

pub use config::CoreConfig;
pub use events::{AgentEvent, ErrorCode, RetryReason};
pub use loop_::{AgentLoop, TurnRequest};
pub use sniffer::{NormalizedCall, SniffedSegment, TextualToolCallSniffer};
