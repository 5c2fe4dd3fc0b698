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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::identity::{self, CommonNameMeta, ServiceAccountResolver};
use crate::proxy::{CertificateSerialNumber, CommonName, Proxy};
use crate::registry::RegisterProxy;
use crate::service::ServiceAccount;
use crate::xds::{DiscoveryRequest, Node};

pub mod helpers;

pub use helpers::initialize_telemetry;

pub const TEST_TRUST_DOMAIN: &str = "cluster.local";

/// A discovery request with an optional node ID and no other content.
pub fn discovery_request(node_id: Option<&str>) -> DiscoveryRequest {
    DiscoveryRequest {
        node: node_id.map(|id| Node {
            id: id.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A node-less discovery request for the given resource type.
pub fn typed_request(type_url: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        type_url: type_url.to_string(),
        ..Default::default()
    }
}

/// Builds the node ID the sidecar injector would write for a pod.
pub fn node_id(pod_uid: &str, service_account: &ServiceAccount, ip: &str) -> String {
    format!(
        "{pod_uid}/{}/{ip}/{}/envoy~{pod_uid}",
        service_account.namespace, service_account.name
    )
}

/// A proxy whose certificate was issued for `service_account`, with a random serial number.
pub fn proxy_for(service_account: &ServiceAccount) -> Arc<Proxy> {
    let id = Uuid::new_v4();
    Arc::new(Proxy::new(
        CommonName::for_proxy(id, service_account, TEST_TRUST_DOMAIN),
        CertificateSerialNumber::new(id.simple().to_string()),
    ))
}

/// FakeResolver resolves service accounts from the common name, like the certificate issuer
/// encodes them, and counts the lookups.
#[derive(Debug, Default)]
pub struct FakeResolver {
    lookups: AtomicUsize,
    fail: bool,
}

impl FakeResolver {
    /// A resolver whose every lookup fails.
    pub fn failing() -> Self {
        FakeResolver {
            lookups: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceAccountResolver for FakeResolver {
    async fn resolve_service_account(
        &self,
        cn: &CommonName,
    ) -> Result<ServiceAccount, identity::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(identity::Error::Lookup(format!("no certificate for {cn}")));
        }
        CommonNameMeta::try_from(cn).map(|meta| meta.service_account)
    }
}

/// RecordingRegistry counts the registrations a stream makes into the proxy registry.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    registrations: AtomicUsize,
}

impl RecordingRegistry {
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

impl RegisterProxy for RecordingRegistry {
    fn register_proxy(&self, _proxy: Arc<Proxy>) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
    }

    fn unregister_proxy(&self, _proxy: &Proxy) {}
}
