// Shared test support code: scripted transports and in-process servers.

pub mod cps;
pub mod fake;
pub mod harness;

pub use cps::CpsServer;
pub use fake::{FakeTransport, Route, SeenCall};
pub use harness::{config_for, harness, with_probe_timeout, Harness};
