use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::*;
use crate::support::fake::{FakeTransport, Route};

fn instrumented() -> (Arc<FakeTransport>, Arc<MemorySink>, Instrumented) {
    let fake = Arc::new(FakeTransport::new());
    let sink = Arc::new(MemorySink::new("client"));
    let layer = Instrumented::new(fake.clone(), sink.clone());
    (fake, sink, layer)
}

#[tokio::test]
async fn success_is_logged_as_sent_then_completed() {
    let (fake, sink, layer) = instrumented();
    fake.route("GET", "http://site.test/a/ping", Route::delayed(Duration::from_millis(15)));

    let resp = layer
        .send(Request::get(Url::parse("http://site.test/a/ping").unwrap()))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].phase, CallPhase::Sent);
    assert_eq!(records[0].method, "GET");
    assert_eq!(records[0].url, "http://site.test/a/ping");
    assert_eq!(records[1].phase, CallPhase::Completed { status: 200 });
    assert!(records[1].elapsed_ms.unwrap() >= 15.0);

    let lines = sink.lines();
    assert!(lines[0].contains("[client] → GET http://site.test/a/ping"));
    assert!(lines[1].contains("← GET http://site.test/a/ping  200  "));
    assert!(lines[1].ends_with("ms"));
}

#[tokio::test]
async fn non_success_status_passes_through_untouched() {
    let (fake, sink, layer) = instrumented();
    fake.route(
        "POST",
        "http://coord.test/api/cps/allocate",
        Route::status(409, r#"{"ok":false,"error":"no gas left"}"#),
    );

    let req = Request::post_json(
        Url::parse("http://coord.test/api/cps/allocate").unwrap(),
        &serde_json::json!({"ServiceID": "LLM1"}),
    )
    .unwrap();
    let resp = layer.send(req).await.unwrap();

    assert_eq!(resp.status, 409);
    assert_eq!(resp.error_message(), "no gas left");
    assert_eq!(sink.records()[1].phase, CallPhase::Completed { status: 409 });
    // Body reaches the inner transport as built.
    assert_eq!(
        fake.calls()[0].body.as_deref(),
        Some(r#"{"ServiceID":"LLM1"}"#)
    );
}

#[tokio::test]
async fn failures_are_logged_and_returned_unchanged() {
    let (fake, sink, layer) = instrumented();
    fake.route("GET", "http://site.test/void/ping", Route::Hang);

    let err = layer
        .send(
            Request::get(Url::parse("http://site.test/void/ping").unwrap())
                .with_timeout(Duration::from_millis(5)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { .. }));

    let records = sink.records();
    assert_eq!(records.len(), 2);
    match &records[1].phase {
        CallPhase::Failed { error } => assert_eq!(error, &err.to_string()),
        other => panic!("unexpected phase {other:?}"),
    }
    assert!(sink.lines()[1].contains("× GET http://site.test/void/ping  ERR  "));
}

#[tokio::test]
async fn every_call_is_observed_once() {
    let (fake, sink, layer) = instrumented();
    fake.route("GET", "http://site.test/x", Route::ok("x"));

    for _ in 0..3 {
        layer
            .send(Request::get(Url::parse("http://site.test/x").unwrap()))
            .await
            .unwrap();
    }
    assert_eq!(fake.calls().len(), 3);
    assert_eq!(sink.len(), 6);
}
