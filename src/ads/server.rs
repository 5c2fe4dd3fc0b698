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

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use super::Error;
use super::binder::IdentityBinder;
use super::metrics::Metrics;
use super::stream::{RequestReceiver, Termination};
use crate::config::Config;
use crate::identity::ServiceAccountResolver;
use crate::proxy::Proxy;
use crate::registry::RegisterProxy;
use crate::xds::DiscoveryRequest;

/// AdsServer accepts the ADS streams of connecting proxies.
pub struct AdsServer {
    registry: Arc<dyn RegisterProxy>,
    binder: IdentityBinder,
    metrics: Arc<Metrics>,
    request_buffer_size: usize,
    max_unbound_requests: Option<usize>,
}

impl AdsServer {
    pub fn new(
        config: &Config,
        registry: Arc<dyn RegisterProxy>,
        resolver: Arc<dyn ServiceAccountResolver>,
        metrics: Arc<Metrics>,
    ) -> Self {
        AdsServer {
            binder: IdentityBinder::new(resolver, registry.clone(), metrics.clone()),
            registry,
            metrics,
            // tokio rejects zero capacity channels.
            request_buffer_size: config.request_buffer_size.max(1),
            max_unbound_requests: config.max_unbound_requests,
        }
    }

    /// Accepts a stream from the proxy that presented `peer_certificate` (DER) during the
    /// mTLS handshake.
    pub fn accept<S>(&self, peer_certificate: &[u8], stream: S) -> Result<Session, Error>
    where
        S: Stream<Item = Result<DiscoveryRequest, tonic::Status>> + Unpin + Send + 'static,
    {
        let proxy = Proxy::from_peer_certificate(peer_certificate)?;
        Ok(self.accept_proxy(Arc::new(proxy), stream))
    }

    /// Registers `proxy` and starts receiving its requests on a new task. The proxy is
    /// unregistered when the receiver finishes.
    pub fn accept_proxy<S>(&self, proxy: Arc<Proxy>, stream: S) -> Session
    where
        S: Stream<Item = Result<DiscoveryRequest, tonic::Status>> + Unpin + Send + 'static,
    {
        info!(%proxy, "accepted discovery stream");
        self.registry.register_proxy(proxy.clone());

        let (tx, requests) = mpsc::channel(self.request_buffer_size);
        let done = CancellationToken::new();
        let receiver = RequestReceiver::new(
            stream,
            proxy.clone(),
            self.binder.clone(),
            tx,
            done.clone(),
            self.metrics.clone(),
        )
        .with_max_unbound_requests(self.max_unbound_requests);

        let registry = self.registry.clone();
        let span = info_span!("ads", serial = %proxy.serial_number());
        let task_proxy = proxy.clone();
        let task = tokio::spawn(
            async move {
                let res = receiver.run().await;
                registry.unregister_proxy(&task_proxy);
                debug!(?res, "discovery stream finished");
                res
            }
            .instrument(span),
        );

        Session {
            proxy,
            requests,
            done,
            task,
        }
    }
}

/// Session is the consumer side of an accepted stream.
#[derive(Debug)]
pub struct Session {
    pub proxy: Arc<Proxy>,
    /// Discovery requests in the order the proxy sent them. Closed when the stream ends.
    pub requests: mpsc::Receiver<DiscoveryRequest>,
    done: CancellationToken,
    task: JoinHandle<Result<Termination, Error>>,
}

impl Session {
    /// Resolves once the receive loop has ended.
    pub async fn terminated(&self) {
        self.done.cancelled().await
    }

    pub fn is_terminated(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Waits for the receive loop to finish and returns how it ended.
    pub async fn join(self) -> Result<Termination, Error> {
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProxyRegistry;
    use crate::service::ServiceAccount;
    use crate::test_helpers::{FakeResolver, discovery_request, proxy_for};
    use matches::assert_matches;
    use tokio_stream::wrappers::ReceiverStream;

    #[tokio::test]
    async fn session_lifecycle() {
        let registry = Arc::new(ProxyRegistry::new());
        let server = AdsServer::new(
            &Config::default(),
            registry.clone(),
            Arc::new(FakeResolver::default()),
            Arc::new(Metrics::default()),
        );
        let proxy = proxy_for(&ServiceAccount::new("ns", "sa"));
        let (inbound, rx) = mpsc::channel(4);
        let mut session = server.accept_proxy(proxy.clone(), ReceiverStream::new(rx));
        assert_eq!(registry.connected_proxy_count(), 1);
        assert!(!session.is_terminated());

        inbound
            .send(Ok(discovery_request(Some("uid-1/ns/10.0.0.1/sa/envoy"))))
            .await
            .unwrap();
        assert!(session.requests.recv().await.is_some());
        assert!(
            registry
                .find_by_pod_uid("uid-1")
                .is_some_and(|p| Arc::ptr_eq(&p, &proxy))
        );

        drop(inbound);
        session.terminated().await;
        assert_matches!(session.join().await, Ok(Termination::Closed));
        assert_eq!(registry.connected_proxy_count(), 0);
        assert!(registry.find_by_pod_uid("uid-1").is_none());
    }

    #[tokio::test]
    async fn zero_request_buffer_is_clamped() {
        let registry = Arc::new(ProxyRegistry::new());
        let server = AdsServer::new(
            &Config {
                request_buffer_size: 0,
                ..Config::default()
            },
            registry.clone(),
            Arc::new(FakeResolver::default()),
            Arc::new(Metrics::default()),
        );
        let (inbound, rx) = mpsc::channel(1);
        let mut session = server.accept_proxy(
            proxy_for(&ServiceAccount::new("ns", "sa")),
            ReceiverStream::new(rx),
        );

        inbound.send(Ok(discovery_request(None))).await.unwrap();
        assert!(session.requests.recv().await.is_some());
        drop(inbound);
        assert_matches!(session.join().await, Ok(Termination::Closed));
    }
}
