// Observational middleware around any transport.

use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::sink::{CallRecord, CallSink};
use super::trace as call_trace;
use super::{Request, Response, Transport, TransportError};
use crate::time;

/// Records method, URL, send time, status / error and elapsed time of every
/// call routed through it. Responses and errors are passed back unchanged and
/// nothing is retried here.
pub struct Instrumented {
    inner: Arc<dyn Transport>,
    sink: Arc<dyn CallSink>,
}

impl Instrumented {
    pub fn new(inner: Arc<dyn Transport>, sink: Arc<dyn CallSink>) -> Self {
        Self { inner, sink }
    }
}

#[async_trait::async_trait]
impl Transport for Instrumented {
    async fn send(&self, req: Request) -> Result<Response, TransportError> {
        let method = req.method.to_string();
        let url = req.url.to_string();
        let span = call_trace::start_call_span(&method, &url);

        self.sink.record(&CallRecord::sent(&method, &url));
        let started = Instant::now();
        let result = self.inner.send(req).instrument(span.clone()).await;
        let elapsed = started.elapsed();
        let elapsed_ms = time::millis_one_decimal(elapsed);

        let outcome = match &result {
            Ok(resp) => {
                call_trace::record_response_in_span(&span, resp.status);
                self.sink
                    .record(&CallRecord::completed(&method, &url, resp.status, elapsed_ms));
                "completed"
            }
            Err(e) => {
                call_trace::record_error_in_span(&span, e);
                self.sink
                    .record(&CallRecord::failed(&method, &url, &e.to_string(), elapsed_ms));
                "failed"
            }
        };

        metrics::counter!(
            "cpsclient_outbound_requests_total",
            "method" => method.clone(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("cpsclient_outbound_duration_ms", "method" => method)
            .record(elapsed.as_secs_f64() * 1000.0);

        result
    }
}
