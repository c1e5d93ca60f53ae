// Builds a fully wired client pointed at a test server.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::cps::CpsServer;
use crate::app::App;
use crate::config::{new_test_config, Config};
use crate::preference::MemoryStore;

/// Test config whose coordinator and origin are `server`.
pub fn config_for(server: &CpsServer) -> Config {
    let mut cfg = new_test_config();
    if let Some(coordinator) = cfg.client.coordinator.as_mut() {
        coordinator.base_url = Some(server.api_base().to_string());
    }
    cfg.client.origin = Some(server.origin().to_string());
    cfg
}

pub struct Harness {
    pub app: App,
    pub store: Arc<MemoryStore>,
    pub cancel: CancellationToken,
}

pub fn harness(cfg: Config) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let app = App::with_store(cancel.clone(), cfg, store.clone()).unwrap();
    Harness { app, store, cancel }
}

/// Shortens the probe timeout of `cfg`.
pub fn with_probe_timeout(mut cfg: Config, timeout: Duration) -> Config {
    if let Some(probe) = cfg.client.probe.as_mut() {
        probe.timeout = Some(timeout);
    }
    cfg
}
