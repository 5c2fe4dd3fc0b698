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

use tracing::{Level, instrument, trace};

use super::metrics::{IdentityBindingOutcome, Metrics};
use crate::identity::{self, ServiceAccountResolver};
use crate::metrics::IncrementRecorder;
use crate::proxy::{self, CertificateSerialNumber, CommonName, PodMetadata, Proxy};
use crate::registry::RegisterProxy;
use crate::service::ServiceAccount;
use crate::xds::DiscoveryRequest;

/// Errors that reject the proxy. None of them are retried.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to resolve service account from xds certificate with common name {common_name}: {source}")]
    Lookup {
        common_name: CommonName,
        #[source]
        source: identity::Error,
    },
    #[error(
        "service account referenced in node id ({asserted}) does not match service account in certificate ({certificate})"
    )]
    ServiceAccountMismatch {
        asserted: ServiceAccount,
        certificate: ServiceAccount,
    },
    #[error("proxy {0} already has pod metadata bound")]
    AlreadyBound(CertificateSerialNumber),
}

/// The result of a binding attempt that did not reject the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// The request carries no node information.
    NoNode,
    /// The node ID could not be parsed. Binding is retried on the next request.
    Malformed(proxy::Error),
    /// The pod metadata is now bound to the proxy.
    Bound,
}

/// IdentityBinder binds the pod metadata a proxy asserts in its node ID to the proxy, after
/// checking it against the identity of the proxy's xDS certificate.
#[derive(Clone)]
pub struct IdentityBinder {
    resolver: Arc<dyn ServiceAccountResolver>,
    registry: Arc<dyn RegisterProxy>,
    metrics: Arc<Metrics>,
}

impl IdentityBinder {
    pub fn new(
        resolver: Arc<dyn ServiceAccountResolver>,
        registry: Arc<dyn RegisterProxy>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            resolver,
            registry,
            metrics,
        }
    }

    /// Attempts to bind the pod metadata carried by `request` to `proxy`.
    ///
    /// On success the proxy is registered again so the registry can index it by pod.
    #[instrument(level = Level::TRACE, skip_all, fields(serial = %proxy.serial_number()))]
    pub async fn bind(
        &self,
        request: &DiscoveryRequest,
        proxy: &Arc<Proxy>,
    ) -> Result<Binding, Error> {
        let Some(node) = request.node.as_ref() else {
            return Ok(Binding::NoNode);
        };
        let meta: PodMetadata = match node.id.parse() {
            Ok(meta) => meta,
            Err(e) => {
                self.metrics.increment(&IdentityBindingOutcome::malformed);
                return Ok(Binding::Malformed(e));
            }
        };

        // The proxy may only join the mesh as the service account its certificate was issued for.
        let common_name = proxy.common_name();
        let certificate = self
            .resolver
            .resolve_service_account(common_name)
            .await
            .map_err(|source| {
                self.metrics.increment(&IdentityBindingOutcome::rejected);
                Error::Lookup {
                    common_name: common_name.clone(),
                    source,
                }
            })?;
        if certificate != meta.service_account {
            self.metrics.increment(&IdentityBindingOutcome::rejected);
            return Err(Error::ServiceAccountMismatch {
                asserted: meta.service_account,
                certificate,
            });
        }

        trace!(
            pod_uid = %meta.uid,
            pod_namespace = %meta.namespace,
            service_account = %meta.service_account,
            envoy_node_id = %meta.envoy_node_id,
            "recorded pod metadata"
        );
        if proxy.bind_pod_metadata(meta).is_err() {
            self.metrics.increment(&IdentityBindingOutcome::rejected);
            return Err(Error::AlreadyBound(proxy.serial_number().clone()));
        }
        self.registry.register_proxy(proxy.clone());
        self.metrics.increment(&IdentityBindingOutcome::bound);
        Ok(Binding::Bound)
    }
}
