// Client application wiring: one transport, its collaborators and sessions.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, ConfigTrait};
use crate::coordinator::{Coordinator, HttpCoordinator};
use crate::invoke::{HttpInvoker, Invoker};
use crate::orchestrator::Session;
use crate::preference::{FileStore, PreferenceStore};
use crate::probe::Prober;
use crate::transport::{self, CallSink, FanoutSink, MemorySink, Transport, TracingSink};

/// Holds the collaborators built from configuration. Every network call of
/// the client goes through the single instrumented transport built here.
#[derive(Clone)]
pub struct App {
    cfg: Config,
    cancel: CancellationToken,
    network_log: Arc<MemorySink>,
    transport: Arc<dyn Transport>,
    coordinator: Arc<dyn Coordinator>,
    prober: Prober,
    invoker: Arc<dyn Invoker>,
    store: Arc<dyn PreferenceStore>,
}

impl App {
    /// Builds the application; fails on invalid URLs in the configuration.
    pub fn new(cancel: CancellationToken, cfg: Config) -> Result<Self> {
        let store = Arc::new(FileStore::new(cfg.preferences_path()));
        Self::with_store(cancel, cfg, store)
    }

    pub fn with_store(
        cancel: CancellationToken,
        cfg: Config,
        store: Arc<dyn PreferenceStore>,
    ) -> Result<Self> {
        let base_url = cfg.coordinator_url().context("coordinator")?;
        let origin = cfg.origin().context("origin")?;
        let label = cfg.transport_label().to_string();

        let network_log = Arc::new(MemorySink::new(label.clone()));
        let sink: Arc<dyn CallSink> = Arc::new(FanoutSink::new(vec![
            Arc::new(TracingSink::new(label)) as Arc<dyn CallSink>,
            network_log.clone() as Arc<dyn CallSink>,
        ]));
        let transport = transport::build(cfg.coordinator_timeout(), sink);

        let coordinator = Arc::new(
            HttpCoordinator::new(transport.clone(), &base_url, cfg.coordinator_timeout())
                .with_cancel(cancel.clone()),
        );

        let mut prober = Prober::new(transport.clone(), origin.clone()).with_cancel(cancel.clone());
        if let Some(p) = cfg.probe() {
            if let Some(timeout) = p.timeout {
                prober = prober.with_timeout(timeout);
            }
            if let Some(path) = &p.path {
                prober = prober.with_path(path.clone());
            }
            if let Some(mode) = p.mode {
                prober = prober.with_mode(mode);
            }
            if let Some(policy) = p.on_failure {
                prober = prober.with_policy(policy);
            }
            prober = prober.with_budget(p.budget);
        }

        let mut invoker = HttpInvoker::new(transport.clone(), origin.clone()).with_cancel(cancel.clone());
        if let Some(i) = cfg.invoke() {
            if let Some(protocol) = i.protocol {
                invoker = invoker.with_protocol(protocol);
            }
            if let Some(model) = &i.model {
                invoker = invoker.with_model(model.clone());
            }
            if let Some(timeout) = i.timeout {
                invoker = invoker.with_timeout(timeout);
            }
        }

        info!(
            component = "app",
            event = "configured",
            coordinator = %base_url,
            origin = %origin,
            probe_timeout = ?prober.timeout(),
            probe_mode = ?prober.mode(),
            probe_policy = ?prober.policy(),
            "client configured"
        );

        Ok(Self {
            cfg,
            cancel,
            network_log,
            transport,
            coordinator,
            prober,
            invoker: Arc::new(invoker),
            store,
        })
    }

    /// Fresh idle session sharing this application's collaborators.
    pub fn session(&self) -> Session {
        Session::new(
            self.coordinator.clone(),
            self.prober.clone(),
            self.invoker.clone(),
            self.store.clone(),
        )
        .with_cancel(self.cancel.clone())
        .with_announce_selection(self.cfg.announce_selection())
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    pub fn store(&self) -> &Arc<dyn PreferenceStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// In-memory copy of every network log line written so far.
    pub fn network_log(&self) -> &MemorySink {
        &self.network_log
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
