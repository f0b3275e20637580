//! Integration tests for grpcware.
//!
//! These drive full calls through the in-memory transport: routing,
//! middleware composition, error statuses and the concurrency limit.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{record, service, RECORDS};
use futures::stream;
use grpcware::protocol::Metadata;
use grpcware::transport::memory;
use grpcware::{App, GrpcwareError, Status, StatusCode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;

#[derive(Debug, Deserialize)]
struct ArgRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct ArgReply {
    message: String,
    length: usize,
}

async fn unary(app: &App, method: &str, metadata: Metadata) -> memory::ClientOutcome {
    let (incoming, client) = memory::call(method, metadata);
    client.send(record(RECORDS[0])).await.unwrap();
    app.dispatch(incoming).await;
    client.finish().await
}

/// Test registration order is execution order, unwinding in reverse.
#[tokio::test]
async fn test_middleware_onion_order() {
    let trace = Arc::new(Mutex::new(Vec::new()));

    let (t1, t2, t3) = (trace.clone(), trace.clone(), trace.clone());
    let app = App::builder(service())
        .use_fn(move |ctx, next| {
            let trace = t1.clone();
            Box::pin(async move {
                trace.lock().push("global before");
                next.run(ctx).await?;
                trace.lock().push("global after");
                Ok(())
            })
        })
        .method_fn("DoSomething", move |ctx, next| {
            let trace = t2.clone();
            Box::pin(async move {
                trace.lock().push("method before");
                next.run(ctx).await?;
                trace.lock().push("method after");
                Ok(())
            })
        })
        .handle("DoSomething", move |ctx| {
            let trace = t3.clone();
            Box::pin(async move {
                trace.lock().push("handler");
                ctx.set_res(json!({ "message": "ok" }))
            })
        })
        .build()
        .unwrap();

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert!(outcome.status().unwrap().is_ok());
    assert_eq!(
        *trace.lock(),
        vec![
            "global before",
            "method before",
            "handler",
            "method after",
            "global after"
        ]
    );
}

/// Test a middleware that does not call next short-circuits the handler.
#[tokio::test]
async fn test_auth_short_circuit() {
    let app = App::builder(service())
        .use_fn(|ctx, next| {
            Box::pin(async move {
                if ctx.get("authorization") != Some("Bearer secret") {
                    return Err(Status::new(StatusCode::Unauthenticated, "missing token").into());
                }
                next.run(ctx).await
            })
        })
        .handle("DoSomething", |ctx| {
            Box::pin(async move { ctx.set_res(json!({ "message": "secret stuff" })) })
        })
        .build()
        .unwrap();

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert!(outcome.messages().is_empty());
    assert_eq!(outcome.status().unwrap().code, StatusCode::Unauthenticated);

    let outcome = unary(
        &app,
        "DoSomething",
        Metadata::from([("Authorization", "Bearer secret")]),
    )
    .await;
    assert!(outcome.status().unwrap().is_ok());
    assert_eq!(outcome.messages(), vec![&json!({ "message": "secret stuff" })]);
}

/// Test a middleware can answer in place of the handler.
#[tokio::test]
async fn test_cache_short_circuit_with_response() {
    let app = App::builder(service())
        .method_fn("DoSomething", |ctx, _next| {
            Box::pin(async move {
                ctx.set("x-cache", "hit");
                ctx.set_res(json!({ "message": "cached" }))
            })
        })
        .handle("DoSomething", |_ctx| {
            Box::pin(async { Err(GrpcwareError::handler("should not run")) })
        })
        .build()
        .unwrap();

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert!(outcome.status().unwrap().is_ok());
    assert_eq!(outcome.headers().unwrap().get("x-cache"), Some("hit"));
    assert_eq!(outcome.messages(), vec![&json!({ "message": "cached" })]);
}

/// Test handler errors become statuses.
#[tokio::test]
async fn test_errors_map_to_status() {
    let app = App::builder(service())
        .handle("DoSomething", |_ctx| {
            Box::pin(async { Err(GrpcwareError::handler("boom")) })
        })
        .handle("ListStuff", |_ctx| {
            Box::pin(async { Err(Status::not_found("no stuff").into()) })
        })
        .build()
        .unwrap();

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    let status = outcome.status().unwrap();
    assert_eq!(status.code, StatusCode::Unknown);
    assert_eq!(status.message, "boom");

    let outcome = unary(&app, "ListStuff", Metadata::new()).await;
    let status = outcome.status().unwrap();
    assert_eq!(status.code, StatusCode::NotFound);
    assert_eq!(status.message, "no stuff");
    assert!(outcome.messages().is_empty());
}

/// Test outer middleware sees and can rewrite inner errors.
#[tokio::test]
async fn test_error_middleware_rewrites_status() {
    let app = App::builder(service())
        .use_fn(|ctx, next| {
            Box::pin(async move {
                next.run(ctx).await.map_err(|e| {
                    ctx.set_status("error-origin", "handler");
                    Status::internal(format!("wrapped: {}", e.to_status().message)).into()
                })
            })
        })
        .handle("DoSomething", |_ctx| {
            Box::pin(async { Err(GrpcwareError::handler("boom")) })
        })
        .build()
        .unwrap();

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert_eq!(outcome.status().unwrap().code, StatusCode::Internal);
    assert_eq!(outcome.status().unwrap().message, "wrapped: boom");
    assert_eq!(outcome.trailers().unwrap().get("error-origin"), Some("handler"));
}

/// Test calls to methods without handlers are unimplemented.
#[tokio::test]
async fn test_unknown_and_unrouted_methods() {
    let app = common::app(|builder| builder);

    let outcome = unary(&app, "Nope", Metadata::new()).await;
    assert_eq!(outcome.status().unwrap().code, StatusCode::Unimplemented);

    let app = App::builder(service())
        .use_fn(|ctx, next| next.run(ctx))
        .build()
        .unwrap();
    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert_eq!(outcome.status().unwrap().code, StatusCode::Unimplemented);
}

/// Test every method addressing form reaches the same route.
#[tokio::test]
async fn test_method_name_forms() {
    let app = App::builder(service())
        .handle("doSomething", |ctx| {
            Box::pin(async move {
                let reply = json!({ "name": ctx.name(), "full": ctx.full_name() });
                ctx.set_res(reply)
            })
        })
        .build()
        .unwrap();

    for method in [
        "DoSomething",
        "doSomething",
        "/argservice.ArgService/DoSomething",
    ] {
        let outcome = unary(&app, method, Metadata::new()).await;
        assert_eq!(
            outcome.messages(),
            vec![&json!({ "name": "DoSomething", "full": "/argservice.ArgService/DoSomething" })],
            "{}",
            method
        );
    }
}

/// Test typed request and response views.
#[tokio::test]
async fn test_typed_handler() {
    let app = App::builder(service())
        .handle("DoSomething", |ctx| {
            Box::pin(async move {
                let request: ArgRequest = ctx.req_as()?;
                ctx.set_res_as(&ArgReply {
                    length: request.message.len(),
                    message: request.message.to_uppercase(),
                })
            })
        })
        .build()
        .unwrap();

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert_eq!(
        outcome.messages(),
        vec![&json!({ "message": "1 FOO", "length": 5 })]
    );

    let (incoming, client) = memory::call("DoSomething", Metadata::new());
    client.send(json!({ "wrong": true })).await.unwrap();
    app.dispatch(incoming).await;
    let outcome = client.finish().await;
    assert_eq!(outcome.status().unwrap().code, StatusCode::InvalidArgument);
}

/// Test locals carry data from middleware to handler.
#[tokio::test]
async fn test_locals_and_request_metadata() {
    let app = App::builder(service())
        .use_fn(|ctx, next| {
            Box::pin(async move {
                let user = ctx.get("x-user").unwrap_or("anonymous").to_string();
                ctx.locals_mut().insert("user".into(), json!(user));
                next.run(ctx).await
            })
        })
        .handle("DoSomething", |ctx| {
            Box::pin(async move {
                let user = ctx.locals()["user"].clone();
                ctx.set_res(json!({ "message": user }))
            })
        })
        .build()
        .unwrap();

    let outcome = unary(&app, "DoSomething", Metadata::from([("X-User", "bob")])).await;
    assert_eq!(outcome.messages(), vec![&json!({ "message": "bob" })]);

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert_eq!(outcome.messages(), vec![&json!({ "message": "anonymous" })]);
}

/// Test calls above the limit are refused with RESOURCE_EXHAUSTED.
#[tokio::test]
async fn test_concurrency_limit() {
    let (release, gate) = watch::channel(false);

    let app = App::builder(service())
        .max_concurrent_calls(1)
        .handle("DoSomething", move |ctx| {
            let mut gate = gate.clone();
            Box::pin(async move {
                let _ = gate.wait_for(|open| *open).await;
                ctx.set_res(json!({ "message": "released" }))
            })
        })
        .build()
        .unwrap();

    let (first, first_client) = memory::call("DoSomething", Metadata::new());
    first_client.send(record("first")).await.unwrap();
    let server = app.clone();
    let running = tokio::spawn(async move { server.dispatch(first).await });

    while app.available_permits() > 0 {
        tokio::task::yield_now().await;
    }

    let outcome = unary(&app, "DoSomething", Metadata::new()).await;
    assert_eq!(outcome.status().unwrap().code, StatusCode::ResourceExhausted);

    release.send_replace(true);
    assert!(running.await.unwrap().is_ok());
    let outcome = first_client.finish().await;
    assert_eq!(outcome.messages(), vec![&json!({ "message": "released" })]);
    assert_eq!(app.available_permits(), 1);
}

/// Test the serving loop runs calls concurrently and waits for them.
#[tokio::test]
async fn test_serve_stream_of_calls() {
    let app = common::app(|builder| builder);

    let mut clients = Vec::new();
    let mut calls = Vec::new();
    for r in RECORDS {
        let (incoming, client) = memory::call("DoSomething", Metadata::new());
        client.send(record(r)).await.unwrap();
        calls.push(incoming);
        clients.push(client);
    }

    let stats = tokio::time::timeout(Duration::from_secs(1), app.serve(stream::iter(calls)))
        .await
        .unwrap();
    assert_eq!(stats.accepted, 6);
    assert_eq!(stats.refused, 0);

    for (client, r) in clients.into_iter().zip(RECORDS) {
        let outcome = client.finish().await;
        assert_eq!(outcome.messages(), vec![&record(&r.to_uppercase())]);
    }
}

/// Test the serving loop refuses above the limit.
#[tokio::test]
async fn test_serve_refuses_over_limit() {
    let (release, gate) = watch::channel(false);

    let app = App::builder(service())
        .max_concurrent_calls(2)
        .handle("DoSomething", move |ctx| {
            let mut gate = gate.clone();
            Box::pin(async move {
                let _ = gate.wait_for(|open| *open).await;
                ctx.set_res(json!({}))
            })
        })
        .build()
        .unwrap();

    let mut clients = Vec::new();
    let mut calls = Vec::new();
    for _ in 0..3 {
        let (incoming, client) = memory::call("DoSomething", Metadata::new());
        client.send(json!({})).await.unwrap();
        calls.push(incoming);
        clients.push(client);
    }

    let server = app.clone();
    let serving = tokio::spawn(async move { server.serve(stream::iter(calls)).await });

    let refused = clients.pop().unwrap().finish().await;
    assert_eq!(refused.status().unwrap().code, StatusCode::ResourceExhausted);

    release.send_replace(true);
    let stats = serving.await.unwrap();
    assert_eq!(stats, grpcware::ServeStats { accepted: 2, refused: 1 });

    for client in clients {
        assert!(client.finish().await.status().unwrap().is_ok());
    }
}
