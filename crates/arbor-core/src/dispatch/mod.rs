//! The event bus and the loop that drains it.

mod engine;
mod events;
mod script;

pub use engine::{Engine, EngineBuilder, EngineHandle, OutputReceiver};
pub use events::{Command, EngineEvent, EventSender, OutputEvent};

/// Tracing target for the dispatch loop.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
