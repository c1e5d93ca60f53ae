use super::{Client, ClientBox, Config};
use crate::invoke::InvokeProtocol;
use crate::probe::{FailurePolicy, ProbeMode};
use std::time::Duration;

/// Creates a new test configuration.
pub fn new_test_config() -> Config {
    Client {
        client: ClientBox {
            env: super::TEST.to_string(),
            logs: Some(super::Logs {
                level: Some("debug".to_string()),
            }),
            coordinator: Some(super::Coordinator {
                base_url: Some("http://127.0.0.1:8080/api".to_string()),
                timeout: Some(Duration::from_secs(5)),
                announce_selection: false,
            }),
            origin: Some("http://127.0.0.1:8081".to_string()),
            probe: Some(super::Probe {
                timeout: Some(Duration::from_millis(500)),
                path: Some("ping".to_string()),
                mode: Some(ProbeMode::Concurrent),
                on_failure: Some(FailurePolicy::Record),
                budget: None,
            }),
            invoke: Some(super::Invoke {
                protocol: Some(InvokeProtocol::Site),
                model: None,
                timeout: Some(Duration::from_secs(5)),
            }),
            preferences: None,
            transport: Some(super::Transport {
                label: Some("test".to_string()),
            }),
        },
    }
}
