//! Test doubles and the harness shared by the engine suites.

mod discovery;
mod driver;
mod harness;
mod reporter;

pub use discovery::StaticDiscovery;
pub use driver::{DriverCall, FakeDriver, rows};
pub use harness::{Harness, target};
pub use reporter::{HealthEvent, RecordingHealthReporter};
