use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use waku_client::{
    ClientConfig, Elements, FetchFn, FetchRscStore, ReqwestFetch, Root, RscError, RscParams,
    RscRequest, RscResponse, Slot, fetch::Method,
};

/// Records every request and answers from a table keyed by url.
#[derive(Clone, Default)]
struct MockServer {
    requests: Arc<Mutex<Vec<RscRequest>>>,
    responses: Arc<Mutex<Vec<(String, RscResponse)>>>,
}

impl MockServer {
    fn respond(&self, url: &str, response: RscResponse) -> &Self {
        self.responses.lock().push((url.to_string(), response));
        self
    }

    fn requests(&self) -> Vec<RscRequest> {
        self.requests.lock().clone()
    }

    fn store(&self, config: ClientConfig) -> FetchRscStore {
        init_tracing();
        let server = self.clone();
        FetchRscStore::new(config, move |request: RscRequest| {
            server.requests.lock().push(request.clone());
            let response = server
                .responses
                .lock()
                .iter()
                .find(|(url, _)| *url == request.url)
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| RscResponse {
                    status: 404,
                    status_text: "Not Found".to_string(),
                    ..Default::default()
                });
            async move { Ok::<_, RscError>(response) }
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn rsc_config() -> ClientConfig {
    ClientConfig {
        rsc_base: "rsc".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn renders_slots_from_fetched_elements() {
    let server = MockServer::default();
    server.respond("/rsc/foo.txt", RscResponse::ok(r#"{"a":"<div>hi</div>"}"#));
    let root = Root::new(server.store(rsc_config()), Some("foo"), None);

    let output = Slot::new("a").render(Some(&root)).await.unwrap();
    assert_eq!(output.element, json!("<div>hi</div>"));

    let err = Slot::new("missing").render(Some(&root)).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid element: missing");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Get);
}

#[tokio::test]
async fn prefetch_is_adopted_only_with_matching_params() {
    let server = MockServer::default();
    server.respond("/rsc/p.txt", RscResponse::ok(r#"{"a":"A"}"#));
    let store = server.store(rsc_config());
    let x1 = Some(RscParams::Value(json!({ "x": 1 })));
    let x2 = Some(RscParams::Value(json!({ "x": 2 })));

    store.prefetch_rsc("p", x1.clone());
    store.prefetch_rsc("p", x1.clone());
    assert_eq!(server.requests().len(), 1);

    let elements = store.fetch_rsc("p", x1.clone()).await.unwrap();
    assert_eq!(elements.get("a"), Some(&Some(json!("A"))));
    assert_eq!(server.requests().len(), 1);
    assert!(!store.has_prefetched("p"));

    store.prefetch_rsc("p", x1.clone());
    store.fetch_rsc("p", x2).await.unwrap();
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].method, Method::Post);
    assert_eq!(requests[2].body, Some(Bytes::from_static(br#"{"x":2}"#)));
    assert!(!store.has_prefetched("p"));
}

#[tokio::test]
async fn call_server_returns_value_and_merges_patch() {
    let server = MockServer::default();
    server
        .respond("/rsc/_.txt", RscResponse::ok(r#"{"root":"<main/>"}"#))
        .respond(
            "/rsc/F/mod/fn.txt",
            RscResponse::ok(r#"{"_value":99,"slotA":"<span/>"}"#),
        );
    let store = server.store(rsc_config());
    let root = Root::new(store.clone(), None, None);

    let value = store
        .call_server_rsc("mod#fn", vec![RscParams::Value(json!(42))])
        .await
        .unwrap();
    assert_eq!(value, Some(json!(99)));

    let requests = server.requests();
    assert_eq!(requests[1].body, Some(Bytes::from_static(b"[42]")));

    let elements = root.elements().unwrap().await.unwrap();
    assert_eq!(
        *elements,
        Elements::from([("root", json!("<main/>")), ("slotA", json!("<span/>"))])
    );
}

#[tokio::test]
async fn call_server_with_query_argument_uses_get() {
    let server = MockServer::default();
    server.respond("/rsc/F/mod/search.txt?q=waku", RscResponse::ok(r#"{"_value":"found"}"#));
    let store = server.store(rsc_config());
    let notified = Arc::new(Mutex::new(0));
    let _unregister = store.register_call_server_elements_listener({
        let notified = notified.clone();
        move |_| *notified.lock() += 1
    });

    let value = store
        .call_server_rsc("mod#search", vec![RscParams::Query("q=waku".to_string())])
        .await
        .unwrap();
    assert_eq!(value, Some(json!("found")));
    assert_eq!(server.requests()[0].method, Method::Get);
    assert_eq!(*notified.lock(), 0);
    assert!(store.elements().is_none());
}

#[tokio::test]
async fn listeners_run_in_registration_order() {
    let server = MockServer::default();
    server.respond("/rsc/F/mod/fn.txt", RscResponse::ok(r#"{"a":"A"}"#));
    let store = server.store(rsc_config());
    let order = Arc::new(Mutex::new(Vec::new()));
    let _first = store.register_call_server_elements_listener({
        let order = order.clone();
        move |patch: &Elements| order.lock().push(("first", patch.len()))
    });
    let _second = store.register_call_server_elements_listener({
        let order = order.clone();
        move |patch: &Elements| order.lock().push(("second", patch.len()))
    });

    store.call_server_rsc("mod#fn", vec![]).await.unwrap();
    assert_eq!(*order.lock(), vec![("first", 1), ("second", 1)]);
    // Without a mounted root the patch becomes the live tree.
    let elements = store.elements().unwrap().await.unwrap();
    assert_eq!(*elements, Elements::from([("a", json!("A"))]));
}

#[tokio::test]
async fn same_entry_is_reused_until_cleared() {
    let server = MockServer::default();
    server
        .respond("/rsc/a.txt", RscResponse::ok(r#"{"a":"A"}"#))
        .respond("/rsc/b.txt", RscResponse::ok(r#"{"b":"B"}"#));
    let store = server.store(rsc_config());

    store.fetch_rsc("a", None).await.unwrap();
    store.fetch_rsc("a", None).await.unwrap();
    assert_eq!(server.requests().len(), 1);

    store.fetch_rsc("b", None).await.unwrap();
    store.fetch_rsc("a", None).await.unwrap();
    assert_eq!(server.requests().len(), 3);

    store.clear_entry();
    store.fetch_rsc("a", None).await.unwrap();
    assert_eq!(server.requests().len(), 4);
}

#[tokio::test]
async fn refetch_merges_and_keeps_tree_on_error() {
    let server = MockServer::default();
    server
        .respond("/rsc/_.txt", RscResponse::ok(r#"{"root":"R","page":"home"}"#))
        .respond("/rsc/about.txt", RscResponse::ok(r#"{"page":"about"}"#));
    let root = Root::new(server.store(rsc_config()), None, None);

    let data = root.refetch("about", None).await.unwrap();
    assert_eq!(data.get("page"), Some(&Some(json!("about"))));
    let elements = root.elements().unwrap().await.unwrap();
    assert_eq!(
        *elements,
        Elements::from([("root", json!("R")), ("page", json!("about"))])
    );

    let err = root.refetch("nowhere", None).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "Not Found");
    let elements = root.elements().unwrap().await.unwrap();
    assert_eq!(elements.len(), 2);

    // Refetching the live entry still issues a request.
    root.refetch("about", None).await.unwrap();
    assert_eq!(server.requests().len(), 4);
}

#[tokio::test]
async fn merging_an_empty_patch_keeps_the_tree() {
    let server = MockServer::default();
    server
        .respond("/rsc/_.txt", RscResponse::ok(r#"{"a":"A"}"#))
        .respond("/rsc/empty.txt", RscResponse::ok("{}"));
    let root = Root::new(server.store(rsc_config()), None, None);
    let before = root.elements().unwrap().await.unwrap();
    root.refetch("empty", None).await.unwrap();
    let after = root.elements().unwrap().await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn status_errors_carry_location() {
    let server = MockServer::default();
    server.respond(
        "/rsc/private.txt",
        RscResponse {
            status: 307,
            status_text: "Temporary Redirect".to_string(),
            location: Some("/login".to_string()),
            body: Bytes::new(),
        },
    );
    let store = server.store(rsc_config());
    let err = store.fetch_rsc("private", None).await.unwrap_err();
    assert!(matches!(err, RscError::Status { status: 307, .. }));
    assert_eq!(err.location(), Some("/login"));
}

#[tokio::test]
async fn enhanced_view_shares_state() {
    let server = MockServer::default();
    server.respond("/rsc/a.txt", RscResponse::ok(r#"{"a":"A"}"#));
    let store = server.store(rsc_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let view = store.enhance_fetch_fn(|inner: Arc<dyn FetchFn>| -> Arc<dyn FetchFn> {
        let seen = seen.clone();
        Arc::new(move |request: RscRequest| {
            seen.lock().push(request.url.clone());
            inner.fetch(request)
        })
    });

    view.fetch_rsc("a", None).await.unwrap();
    assert_eq!(*seen.lock(), vec!["/rsc/a.txt".to_string()]);

    // The entry created through the view is the store's entry.
    store.fetch_rsc("a", None).await.unwrap();
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn hot_reload_refetches_last_fetch() {
    let server = MockServer::default();
    server.respond("/rsc/a.txt", RscResponse::ok(r#"{"a":"A"}"#));
    let store = server.store(ClientConfig {
        hot: true,
        ..rsc_config()
    });
    assert!(store.reload().is_none());

    let root = Root::new(store.clone(), Some("a"), None);
    root.elements().unwrap().await.unwrap();
    let mut live = root.subscribe();
    live.mark_unchanged();

    let reloaded = store.reload().unwrap().await.unwrap();
    assert_eq!(reloaded.get("a"), Some(&Some(json!("A"))));
    assert!(live.has_changed().unwrap());
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn reload_is_off_without_hot() {
    let server = MockServer::default();
    server.respond("/rsc/a.txt", RscResponse::ok(r#"{"a":"A"}"#));
    let store = server.store(rsc_config());
    store.fetch_rsc("a", None).await.unwrap();
    assert!(store.reload().is_none());
}

/// Patches from concurrent calls are merged over whatever the tree resolves
/// to, so the slower call can win even though it was issued first.
#[tokio::test]
async fn concurrent_call_server_patches_interleave() {
    let (slow_tx, slow_rx) = futures::channel::oneshot::channel::<()>();
    let slow_rx = slow_rx.shared();
    let store = FetchRscStore::new(rsc_config(), move |request: RscRequest| {
        let slow_rx = slow_rx.clone();
        async move {
            if request.url.ends_with("/slow.txt") {
                let _ = slow_rx.await;
                Ok::<_, RscError>(RscResponse::ok(r#"{"a":"slow"}"#))
            } else {
                Ok(RscResponse::ok(r#"{"a":"fast"}"#))
            }
        }
    });

    let slow = tokio::spawn({
        let store = store.clone();
        async move { store.call_server_rsc("mod#slow", vec![]).await }
    });
    tokio::task::yield_now().await;
    store.call_server_rsc("mod#fast", vec![]).await.unwrap();
    let _ = slow_tx.send(());
    slow.await.unwrap().unwrap();

    let elements = store.elements().unwrap().await.unwrap();
    assert_eq!(elements.get("a"), Some(&Some(json!("slow"))));
}

#[tokio::test]
async fn reqwest_fetch_against_http_server() {
    let mut server = mockito::Server::new_async().await;
    let page = server
        .mock("GET", "/RSC/page.txt")
        .with_body(r#"{"a":"from server"}"#)
        .create_async()
        .await;
    let redirect = server
        .mock("GET", "/RSC/private.txt")
        .with_status(307)
        .with_header("location", "/login")
        .create_async()
        .await;

    let fetch = ReqwestFetch::new(server.url().parse().unwrap()).unwrap();
    let store = FetchRscStore::new(ClientConfig::default(), fetch);

    let elements = store.fetch_rsc("page", None).await.unwrap();
    assert_eq!(elements.get("a"), Some(&Some(json!("from server"))));
    page.assert_async().await;

    let err = store.fetch_rsc("private", None).await.unwrap_err();
    assert_eq!(err.status(), Some(307));
    assert_eq!(err.location(), Some("/login"));
    redirect.assert_async().await;
}
