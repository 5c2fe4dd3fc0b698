// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::Duration;

use matches::assert_matches;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use mesh_ads::ads::{self, AdsServer, Termination};
use mesh_ads::config::Config;
use mesh_ads::identity::CommonNameResolver;
use mesh_ads::metrics::sub_registry;
use mesh_ads::proxy::CommonName;
use mesh_ads::registry::ProxyRegistry;
use mesh_ads::service::ServiceAccount;
use mesh_ads::test_helpers::*;
use mesh_ads::xds::{self, DiscoveryRequest};

const WAIT: Duration = Duration::from_secs(5);

type Inbound = mpsc::Sender<Result<DiscoveryRequest, tonic::Status>>;

fn xds_certificate(service_account: &ServiceAccount) -> Vec<u8> {
    let cn = CommonName::for_proxy(Uuid::new_v4(), service_account, TEST_TRUST_DOMAIN);
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, cn.as_str());
    let key = rcgen::KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().der().to_vec()
}

struct Fixture {
    server: AdsServer,
    registry: Arc<ProxyRegistry>,
    metrics: Registry,
}

fn fixture(config: Config) -> Fixture {
    initialize_telemetry();
    let mut metrics = Registry::default();
    let ads_metrics = Arc::new(ads::Metrics::new(sub_registry(&mut metrics)));
    let registry = Arc::new(ProxyRegistry::new());
    let server = AdsServer::new(
        &config,
        registry.clone(),
        Arc::new(CommonNameResolver),
        ads_metrics,
    );
    Fixture {
        server,
        registry,
        metrics,
    }
}

fn connect(f: &Fixture, service_account: &ServiceAccount) -> (Inbound, ads::Session) {
    let (inbound, rx) = mpsc::channel(8);
    let session = f
        .server
        .accept(&xds_certificate(service_account), ReceiverStream::new(rx))
        .unwrap();
    (inbound, session)
}

fn encoded(metrics: &Registry) -> String {
    let mut out = String::new();
    encode(&mut out, metrics).unwrap();
    out
}

#[tokio::test]
async fn test_bound_session_lifecycle() {
    let f = fixture(Config::default());
    let bookstore = ServiceAccount::new("bookstore-ns", "bookstore");
    let (inbound, mut session) = connect(&f, &bookstore);

    assert_eq!(f.registry.connected_proxy_count(), 1);
    assert!(
        f.registry
            .find_by_serial(session.proxy.serial_number())
            .is_some()
    );

    inbound
        .send(Ok(typed_request(xds::CLUSTER_TYPE.as_str())))
        .await
        .unwrap();
    inbound
        .send(Ok(discovery_request(Some(&node_id(
            "pod-1",
            &bookstore,
            "10.0.0.1",
        )))))
        .await
        .unwrap();

    let first = timeout(WAIT, session.requests.recv()).await.unwrap().unwrap();
    assert_eq!(first.type_url, xds::CLUSTER_TYPE.as_str());
    let second = timeout(WAIT, session.requests.recv()).await.unwrap().unwrap();
    assert!(second.node.is_some());

    let meta = session.proxy.pod_metadata().unwrap();
    assert_eq!(meta.uid.as_str(), "pod-1");
    assert_eq!(meta.service_account, bookstore);
    assert!(f.registry.find_by_pod_uid("pod-1").is_some());

    drop(inbound);
    let res = timeout(WAIT, session.join()).await.unwrap();
    assert_matches!(res, Ok(Termination::Closed));
    assert_eq!(f.registry.connected_proxy_count(), 0);

    let out = encoded(&f.metrics);
    assert!(out.contains("mesh_ads_identity_bindings_total{outcome=\"bound\"} 1"));
    assert!(out.contains("mesh_ads_stream_terminations_total{reason=\"complete\"} 1"));
}

#[tokio::test]
async fn test_impersonation_is_rejected() {
    let f = fixture(Config::default());
    let bookstore = ServiceAccount::new("bookstore-ns", "bookstore");
    let bookbuyer = ServiceAccount::new("bookstore-ns", "bookbuyer");
    let (inbound, mut session) = connect(&f, &bookstore);

    inbound
        .send(Ok(discovery_request(Some(&node_id(
            "pod-1",
            &bookbuyer,
            "10.0.0.1",
        )))))
        .await
        .unwrap();

    timeout(WAIT, session.terminated()).await.unwrap();
    assert_eq!(session.requests.recv().await, None);
    assert!(session.proxy.pod_metadata().is_none());

    let res = timeout(WAIT, session.join()).await.unwrap();
    assert_matches!(res, Err(ads::Error::Binding(_)));
    assert_eq!(f.registry.connected_proxy_count(), 0);
    assert!(f.registry.find_by_pod_uid("pod-1").is_none());

    let out = encoded(&f.metrics);
    assert!(out.contains("mesh_ads_identity_bindings_total{outcome=\"rejected\"} 1"));
    assert!(out.contains("mesh_ads_stream_terminations_total{reason=\"identity_rejected\"} 1"));
}

#[tokio::test]
async fn test_unbound_proxy_is_disconnected() {
    let f = fixture(Config {
        max_unbound_requests: Some(1),
        ..Config::default()
    });
    let (inbound, mut session) = connect(&f, &ServiceAccount::new("ns", "sa"));

    inbound.send(Ok(discovery_request(None))).await.unwrap();
    inbound
        .send(Ok(discovery_request(Some("uid/ns/ip"))))
        .await
        .unwrap();

    assert!(timeout(WAIT, session.requests.recv()).await.unwrap().is_some());
    assert_eq!(timeout(WAIT, session.requests.recv()).await.unwrap(), None);
    let res = timeout(WAIT, session.join()).await.unwrap();
    assert_matches!(res, Err(ads::Error::Unauthenticated { requests: 2, .. }));
}

#[tokio::test]
async fn test_client_cancel() {
    let f = fixture(Config::default());
    let (inbound, session) = connect(&f, &ServiceAccount::new("ns", "sa"));

    inbound
        .send(Err(tonic::Status::cancelled("context canceled")))
        .await
        .unwrap();
    let res = timeout(WAIT, session.join()).await.unwrap();
    assert_matches!(res, Ok(Termination::Canceled));
    assert_eq!(f.registry.connected_proxy_count(), 0);
}

#[tokio::test]
async fn test_invalid_peer_certificate() {
    let f = fixture(Config::default());
    let (_inbound, rx) = mpsc::channel(1);
    let res = f.server.accept(b"garbage", ReceiverStream::new(rx));
    assert_matches!(res, Err(ads::Error::Certificate(_)));
    assert_eq!(f.registry.connected_proxy_count(), 0);
}
