//! Exercises the controller end to end: intent documents on disk in, watch
//! streams over the discovery API out, with membership fed by an in-process
//! registry.

#![deny(rust_2018_idioms)]

use std::time::Duration;
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::Streaming;
use weft_api::discovery::v1 as pb;
use weft_api::discovery::v1::discovery_client::DiscoveryClient;
use weft_api::registry::v1::registry_server::RegistryServer;
use weft_controller::{intents, registry, server, Index};
use weft_drain as drain;
use weft_exp_backoff::ExponentialBackoff;
use weft_registry::mock::{self, Mock};

const BILLING: &str = "
workload: shop/billing
listeners:
  - name: outbound
    kind: outbound
    port: 15001
    routes: [payments]
  - name: inbound
    kind: inbound
    port: 15006
    app_port: 8080
routes:
  - name: payments
    match:
      path_prefix: /payments
    backends:
      - cluster: payments
        weight: 1
clusters:
  - name: payments
    registry: payments.svc
";

const BILLING_REWEIGHTED: &str = "
workload: shop/billing
listeners:
  - name: outbound
    kind: outbound
    port: 15001
    routes: [payments]
  - name: inbound
    kind: inbound
    port: 15006
    app_port: 8080
routes:
  - name: payments
    match:
      path_prefix: /payments
    backends:
      - cluster: payments
        weight: 3
clusters:
  - name: payments
    registry: payments.svc
";

const WEB: &str = "
workload: shop/web
listeners:
  - name: outbound
    kind: outbound
    port: 15001
    routes: [assets]
routes:
  - name: assets
    match:
      path_prefix: /assets
    backends:
      - cluster: assets
        weight: 1
clusters:
  - name: assets
    static:
      - address: \"10.1.0.1:9000\"
";

const SCAN: Duration = Duration::from_millis(100);
const PATIENCE: Duration = Duration::from_secs(5);
/// Long enough for several scans to pass without publishing.
const QUIET: Duration = Duration::from_millis(300);

struct Harness {
    intents: tempfile::TempDir,
    client: DiscoveryClient<tonic::transport::Channel>,
    registry: Mock,
    drain: drain::Signal,
}

async fn harness() -> Harness {
    let registry = Mock::new();
    let registry_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let registry_addr = registry_listener.local_addr().unwrap();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(RegistryServer::new(registry.clone()))
            .serve_with_incoming(TcpListenerStream::new(registry_listener)),
    );

    let index = Index::shared();
    let backoff =
        ExponentialBackoff::try_new(Duration::from_millis(10), Duration::from_millis(100), 0.0)
            .unwrap();
    let watcher =
        registry::Watcher::new(&registry_addr.to_string(), backoff, index.clone()).unwrap();

    let intents = tempfile::tempdir().unwrap();
    tokio::spawn(intents::watch(
        intents.path().to_path_buf(),
        SCAN,
        index.clone(),
        watcher,
    ));

    let (drain, drain_rx) = drain::channel();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(server::Server::new(index, drain_rx).svc())
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );

    let client = DiscoveryClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    Harness {
        intents,
        client,
        registry,
        drain,
    }
}

impl Harness {
    async fn write(&self, file: &str, doc: &str) {
        tokio::fs::write(self.intents.path().join(file), doc)
            .await
            .unwrap();
    }

    async fn watch_config(&mut self, workload: &str) -> Streaming<pb::ConfigBundle> {
        self.client
            .watch_config(pb::ConfigRequest {
                workload: workload.to_string(),
            })
            .await
            .unwrap()
            .into_inner()
    }
}

async fn next_bundle(stream: &mut Streaming<pb::ConfigBundle>) -> pb::ConfigBundle {
    timeout(PATIENCE, stream.message())
        .await
        .expect("a bundle should arrive")
        .unwrap()
        .expect("stream should stay open")
}

async fn assert_quiet(stream: &mut Streaming<pb::ConfigBundle>) {
    if let Ok(msg) = timeout(QUIET, stream.message()).await {
        panic!("unexpected message: {:?}", msg);
    }
}

/// Reads membership updates until the set reaches `want` endpoints. The
/// first observed set may predate the registry connecting.
async fn await_endpoints(
    stream: &mut Streaming<weft_api::registry::v1::EndpointSet>,
    want: usize,
) -> weft_api::registry::v1::EndpointSet {
    timeout(PATIENCE, async {
        loop {
            let set = stream
                .message()
                .await
                .unwrap()
                .expect("stream should stay open");
            if set.endpoints.len() == want {
                return set;
            }
        }
    })
    .await
    .expect("membership should converge")
}

#[tokio::test(flavor = "multi_thread")]
async fn workloads_without_intent_receive_nothing() {
    let mut h = harness().await;
    let mut stream = h.watch_config("shop/billing").await;

    // The stream stays open but silent; the proxy's own pass-through seed
    // remains in effect until a document exists.
    assert_quiet(&mut stream).await;

    h.write("billing.yml", BILLING).await;
    let bundle = next_bundle(&mut stream).await;
    assert_eq!(bundle.listeners.len(), 2);
    assert!(!bundle.version.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn edits_publish_replacement_bundles() {
    let mut h = harness().await;
    h.write("billing.yml", BILLING).await;
    let mut stream = h.watch_config("shop/billing").await;
    let first = next_bundle(&mut stream).await;

    h.write("billing.yml", BILLING_REWEIGHTED).await;
    let second = next_bundle(&mut stream).await;
    assert_ne!(first.version, second.version);
    let route = second
        .routes
        .iter()
        .find(|r| r.name == "payments")
        .expect("route survives the edit");
    assert_eq!(route.backends[0].weight, 3);

    // Rewriting identical content republishes nothing.
    h.write("billing.yml", BILLING_REWEIGHTED).await;
    assert_quiet(&mut stream).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_documents_keep_the_last_bundle() {
    let mut h = harness().await;
    h.write("billing.yml", BILLING).await;
    let mut stream = h.watch_config("shop/billing").await;
    let good = next_bundle(&mut stream).await;

    h.write("billing.yml", "workload: [broken\n").await;
    assert_quiet(&mut stream).await;

    // A fresh subscriber still sees the last valid compilation.
    let mut fresh = h.watch_config("shop/billing").await;
    assert_eq!(next_bundle(&mut fresh).await.version, good.version);
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_intent_reverts_to_passthrough() {
    let mut h = harness().await;
    h.write("billing.yml", BILLING).await;
    let mut stream = h.watch_config("shop/billing").await;
    let routed = next_bundle(&mut stream).await;
    assert!(routed.routes.iter().any(|r| r.name == "payments"));

    tokio::fs::remove_file(h.intents.path().join("billing.yml"))
        .await
        .unwrap();
    let reverted = next_bundle(&mut stream).await;

    // The interception surface survives; only the synthesized local route
    // and cluster remain.
    assert_eq!(reverted.listeners.len(), 2);
    assert_eq!(reverted.routes.len(), 1);
    assert_eq!(reverted.routes[0].name, "inbound-default");
    assert_eq!(reverted.clusters.len(), 1);
    assert_eq!(reverted.clusters[0].name, "inbound-local");
}

#[tokio::test(flavor = "multi_thread")]
async fn endpoints_flow_from_the_registry() {
    let mut h = harness().await;
    h.registry
        .set("payments.svc", vec![mock::endpoint("10.0.0.1:8080")]);
    h.write("billing.yml", BILLING).await;
    let mut config = h.watch_config("shop/billing").await;
    next_bundle(&mut config).await;

    let mut stream = h
        .client
        .watch_endpoints(pb::EndpointsRequest {
            workload: "shop/billing".to_string(),
            service: "payments.svc".to_string(),
        })
        .await
        .unwrap()
        .into_inner();

    let set = await_endpoints(&mut stream, 1).await;
    assert_eq!(set.name, "payments.svc");
    assert_eq!(set.endpoints[0].address, "10.0.0.1:8080");

    h.registry.set(
        "payments.svc",
        vec![
            mock::endpoint("10.0.0.1:8080"),
            mock::endpoint("10.0.0.2:8080"),
        ],
    );
    await_endpoints(&mut stream, 2).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn endpoint_watches_are_scoped_to_the_workload() {
    let mut h = harness().await;
    h.write("billing.yml", BILLING).await;
    h.write("web.yml", WEB).await;
    let mut billing = h.watch_config("shop/billing").await;
    next_bundle(&mut billing).await;
    let mut web = h.watch_config("shop/web").await;
    next_bundle(&mut web).await;

    // shop/web's intent never names payments.svc.
    let err = h
        .client
        .watch_endpoints(pb::EndpointsRequest {
            workload: "shop/web".to_string(),
            service: "payments.svc".to_string(),
        })
        .await
        .expect_err("subscription should be refused");
    assert_eq!(err.code(), tonic::Code::NotFound);

    // Editing one workload's intent never wakes another's stream.
    h.write("billing.yml", BILLING_REWEIGHTED).await;
    next_bundle(&mut billing).await;
    assert_quiet(&mut web).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn draining_closes_open_streams() {
    let mut h = harness().await;
    h.write("billing.yml", BILLING).await;
    let mut stream = h.watch_config("shop/billing").await;
    next_bundle(&mut stream).await;

    tokio::spawn(h.drain.drain());

    let end = timeout(PATIENCE, stream.message())
        .await
        .expect("stream should close")
        .unwrap();
    assert!(end.is_none(), "the stream ends cleanly, not with an error");
}
