//! End-to-end runs against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port in its own runtime thread, then
//! drives `Query` over real HTTP through `UreqTransport`. Covers fan-out,
//! batch envelopes and bearer credentials.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mock_server::MockApi;
use parking_lot::Mutex;
use query_core::{
    ApiClient, BatchConfig, Query, QueryConfig, QueryError, StaticToken, TransportError,
    UreqTransport,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Profile {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Owner {
    address: String,
}

#[derive(Debug, Deserialize)]
struct Calendar {
    owner: Owner,
}

#[derive(Debug, Deserialize)]
struct Item {
    id: u64,
}

/// Serve `api` on a random port and return its base URL.
fn start(api: Arc<MockApi>) -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with(listener, api).await
        })
    });

    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_against_live_server() {
    let base = start(Arc::new(MockApi::new()));
    let client = ApiClient::new(&base);
    let mut me = None;
    let mut calendar = None;
    let server = Mutex::new(Vec::new());

    let result = {
        let mut query = Query::new(Arc::new(UreqTransport::new()));
        query.on_server_error(|e| server.lock().push(e.status()));
        query.add_request(client.get("/me"), |p: Profile| me = Some(p));
        query.add_request(client.get("/me/calendar"), |c: Calendar| calendar = Some(c));
        query.add_request(client.get("/status/500"), |_: Profile| {});
        query.add_request(client.get("/empty"), |_: Profile| {});
        query.execute_all().await
    };

    assert_eq!(me.unwrap().name, "Ada");
    assert_eq!(calendar.unwrap().owner.address, "a@b.com");
    assert_eq!(server.into_inner(), vec![Some(500)]);

    let err = result.unwrap_err();
    assert_eq!(err.summary.delivered, 2);
    assert_eq!(err.summary.empty, 1);
    assert_eq!(err.summary.failed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn batched_against_live_server() {
    let api = Arc::new(MockApi::new());
    let base = start(api.clone());
    let client = ApiClient::new(&base);
    let config = QueryConfig::batched(BatchConfig::new(&base));
    let ids = Mutex::new(Vec::new());

    let summary = {
        let mut query = Query::new(Arc::new(UreqTransport::new()))
            .with_config(config)
            .unwrap();
        query.on_success(|item: Item| ids.lock().push(item.id));
        for i in 0..45 {
            query.add::<Item>(client.get(&format!("/items/{i}")));
        }
        query.execute_all().await.unwrap()
    };

    assert_eq!(summary.delivered, 45);
    assert_eq!(api.hits(), 3);
    let mut ids = ids.into_inner();
    ids.sort_unstable();
    assert_eq!(ids, (0..45).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn credential_is_acquired_once_and_sent() {
    let base = start(Arc::new(MockApi::new().with_token("secret")));
    let client = ApiClient::new(&base);
    let acquired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&acquired);
    let transport = UreqTransport::new().with_credential(move || -> Result<String, TransportError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("secret".to_string())
    });

    let mut query = Query::new(Arc::new(transport));
    for _ in 0..5 {
        query.add_request(client.get("/me"), |_: Profile| {});
    }
    let summary = query.execute_all().await.unwrap();

    assert_eq!(summary.delivered, 5);
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_or_wrong_token_is_a_server_error() {
    let base = start(Arc::new(MockApi::new().with_token("secret")));
    let client = ApiClient::new(&base);

    for transport in [
        UreqTransport::new(),
        UreqTransport::new().with_credential(StaticToken("wrong".into())),
    ] {
        let mut query = Query::new(Arc::new(transport));
        query.add_request(client.get("/me"), |_: Profile| {});
        let err = query.execute_all().await.unwrap_err();
        assert_eq!(err.failures[0].error.status(), Some(401));
        assert!(err.failures[0].error.is_unhandled());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn populate_by_name_against_live_server() {
    let base = start(Arc::new(MockApi::new()));
    let client = ApiClient::new(&base);
    let mut query = Query::new(Arc::new(UreqTransport::new()));

    let values = query
        .populate_by_name([
            ("Me", client.get("/me")),
            ("Calendar", client.get("/me/calendar")),
        ])
        .await
        .unwrap();

    assert_eq!(values["Me"]["mail"], "ada@example.com");
    assert_eq!(values["Calendar"]["owner"]["address"], "a@b.com");
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_is_a_transport_error() {
    let client = ApiClient::new("http://127.0.0.1:1");
    let mut query = Query::new(Arc::new(UreqTransport::new()));
    query.on_client_error(|_| {});
    query.add_request(client.get("/me"), |_: Profile| {});

    let err = query.execute_all().await.unwrap_err();
    assert!(matches!(err.failures[0].error, QueryError::Transport(_)));
}
