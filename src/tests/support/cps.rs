// In-process coordinator and site instances for integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use crate::model::{Candidate, CpsViewRow, InstanceRef, ServiceDescriptor};

#[derive(Default)]
struct Inner {
    services: Vec<ServiceDescriptor>,
    view: Vec<CpsViewRow>,
    candidates: HashMap<String, Vec<Candidate>>,
    deny: Option<String>,
    /// Allocate answers with an id but no address.
    drop_address: bool,
    allocations: HashMap<String, String>,
    next_id: u64,
    ping_delay: HashMap<String, Duration>,
    broken: HashSet<String>,
    last_allocate: Option<Value>,
    selections: Vec<Value>,
    hits: HashMap<String, i64>,
}

impl Inner {
    fn hit(&mut self, key: impl Into<String>) {
        *self.hits.entry(key.into()).or_insert(0) += 1;
    }
}

type Shared = Arc<Mutex<Inner>>;

/// Test server playing both the coordinator (under `/api`) and the site
/// instances (under `/<instance>`).
pub struct CpsServer {
    addr: String,
    state: Shared,
    handle: JoinHandle<()>,
    shutdown: tokio::sync::oneshot::Sender<()>,
}

impl CpsServer {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(Inner::default()));

        let router = Router::new()
            .route("/healthcheck", get(|| async { "ok" }))
            .route("/api/services", get(services))
            .route("/api/cps/view", get(cps_view))
            .route("/api/client/selection", post(selection))
            .route("/api/cps/candidates", post(candidates))
            .route("/api/cps/allocate", post(allocate))
            .route("/api/allocations/release", post(release))
            .route("/hang/ping", get(hang))
            .route("/:instance/ping", get(ping))
            .route("/:instance/invoke", post(invoke))
            .route("/:instance/ollama/api/generate", post(generate))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("127.0.0.1:{}", addr.port());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router);
            tokio::select! {
                _ = server => {},
                _ = shutdown_rx => {},
            }
        });

        Self {
            addr: addr_str,
            state,
            handle,
            shutdown: shutdown_tx,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Origin the site-relative addresses resolve against.
    pub fn origin(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn api_base(&self) -> Url {
        Url::parse(&format!("http://{}/api", self.addr)).unwrap()
    }

    /// Registers `service_id` as served by one site with the given instances.
    pub fn with_site(&self, service_id: &str, site: &str, instances: &[&str]) -> &Self {
        let refs = instances
            .iter()
            .map(|id| InstanceRef::new(*id, format!("/{}", id)))
            .collect();
        let mut candidate = Candidate::new(site, refs);
        candidate.service_id = service_id.to_string();
        candidate.csci_id = Some(instances.join("|"));
        candidate.cost = Some(4);
        candidate.gas = Some(2);
        self.state
            .lock()
            .candidates
            .entry(service_id.to_string())
            .or_default()
            .push(candidate);
        self
    }

    pub fn with_service(&self, service: ServiceDescriptor) -> &Self {
        self.state.lock().services.push(service);
        self
    }

    pub fn with_view_row(&self, row: CpsViewRow) -> &Self {
        self.state.lock().view.push(row);
        self
    }

    pub fn deny_allocations(&self, message: &str) -> &Self {
        self.state.lock().deny = Some(message.to_string());
        self
    }

    pub fn omit_allocated_address(&self) -> &Self {
        self.state.lock().drop_address = true;
        self
    }

    pub fn ping_delay(&self, instance: &str, delay: Duration) -> &Self {
        self.state.lock().ping_delay.insert(instance.to_string(), delay);
        self
    }

    /// Makes the instance fail its invocations with HTTP 500.
    pub fn break_instance(&self, instance: &str) -> &Self {
        self.state.lock().broken.insert(instance.to_string());
        self
    }

    /// Forgets every allocation, as if they expired on the coordinator side.
    pub fn expire_allocations(&self) {
        self.state.lock().allocations.clear();
    }

    pub fn hits(&self, key: &str) -> i64 {
        *self.state.lock().hits.get(key).unwrap_or(&0)
    }

    pub fn active_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn last_allocate(&self) -> Option<Value> {
        self.state.lock().last_allocate.clone()
    }

    pub fn selections(&self) -> Vec<Value> {
        self.state.lock().selections.clone()
    }

    pub async fn close(self) {
        let _ = self.shutdown.send(());
        self.handle.abort();
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"ok": false, "error": message}))).into_response()
}

async fn services(State(state): State<Shared>) -> Response {
    let mut s = state.lock();
    s.hit("services");
    Json(json!({"services": s.services})).into_response()
}

async fn cps_view(State(state): State<Shared>) -> Response {
    let mut s = state.lock();
    s.hit("view");
    Json(json!({"cps": s.view})).into_response()
}

async fn selection(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock();
    s.hit("selection");
    s.selections.push(body);
    Json(json!({"ok": true})).into_response()
}

async fn candidates(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock();
    s.hit("candidates");
    let service_id = body.get("ServiceID").and_then(Value::as_str).unwrap_or_default();
    match s.candidates.get(service_id) {
        Some(list) => Json(json!({"candidates": list})).into_response(),
        None => Json(json!({"candidates": null})).into_response(),
    }
}

async fn allocate(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock();
    s.hit("allocate");
    s.last_allocate = Some(body.clone());
    if let Some(message) = s.deny.clone() {
        return reject(StatusCode::CONFLICT, &message);
    }

    let best = body
        .get("measurements")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|m| Some((m.get("delayMs")?.as_u64()?, m)))
        .min_by_key(|(delay, _)| *delay)
        .map(|(_, m)| m.clone());
    let Some(best) = best else {
        return reject(StatusCode::CONFLICT, "no measured instances");
    };

    s.next_id += 1;
    let id = format!("alloc_{:x}", s.next_id);
    let instance = best["instanceId"].as_str().unwrap_or_default().to_string();
    s.allocations.insert(id.clone(), instance.clone());

    let addr = if s.drop_address { Value::Null } else { best["addr"].clone() };
    Json(json!({
        "allocationId": id,
        "ServiceID": body["ServiceID"],
        "instanceId": instance,
        "addr": addr,
        "CSCI-ID": instance,
        "Cost": 4,
        "GasRemaining": 1
    }))
    .into_response()
}

async fn release(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock();
    s.hit("release");
    let id = body.get("allocationId").and_then(Value::as_str).unwrap_or_default();
    if s.allocations.remove(id).is_some() {
        Json(json!({"ok": true})).into_response()
    } else {
        reject(StatusCode::NOT_FOUND, "allocation not found")
    }
}

async fn ping(State(state): State<Shared>, Path(instance): Path<String>) -> Response {
    let delay = {
        let mut s = state.lock();
        s.hit(format!("ping:{}", instance));
        s.ping_delay.get(&instance).copied()
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    Json(json!({"InstanceID": instance})).into_response()
}

async fn hang() -> Response {
    tokio::time::sleep(Duration::from_secs(3600)).await;
    StatusCode::OK.into_response()
}

async fn invoke(
    State(state): State<Shared>,
    Path(instance): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let broken = {
        let mut s = state.lock();
        s.hit(format!("invoke:{}", instance));
        s.broken.contains(&instance)
    };
    if broken {
        return (StatusCode::INTERNAL_SERVER_ERROR, "instance crashed").into_response();
    }
    let input = body["Input"].as_str().unwrap_or_default();
    Json(json!({
        "InstanceID": instance,
        "ServiceID": body["ServiceID"],
        "OutputType": "text",
        "Output": format!("{} says: {}", instance, input)
    }))
    .into_response()
}

async fn generate(
    State(state): State<Shared>,
    Path(instance): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state.lock().hit(format!("generate:{}", instance));
    let prompt = body["prompt"].as_str().unwrap_or_default();
    Json(json!({
        "model": body["model"],
        "response": format!("echo {}", prompt),
        "done": true
    }))
    .into_response()
}
