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

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::proxy::{CertificateSerialNumber, Proxy};
use crate::strng::Strng;

/// RegisterProxy is the registry of connected proxies, as seen by a stream.
///
/// A stream registers its proxy twice: once when the connection is accepted, with only the
/// transport identity, and once more after the pod metadata is bound. Implementations must
/// treat the second call as an update of the existing entry, keyed by the certificate serial
/// number, not as a new proxy.
pub trait RegisterProxy: Send + Sync {
    fn register_proxy(&self, proxy: Arc<Proxy>);
    fn unregister_proxy(&self, proxy: &Proxy);
}

/// ProxyRegistry keeps track of the proxies connected to this control plane.
#[derive(Default, Debug)]
pub struct ProxyRegistry {
    state: RwLock<RegistryState>,
}

#[derive(Default, Debug)]
struct RegistryState {
    /// by_serial maps xDS certificate serial numbers to proxies
    by_serial: HashMap<CertificateSerialNumber, Arc<Proxy>>,
    /// by_pod_uid maps pod UIDs to the serial number of the proxy running in the pod
    by_pod_uid: HashMap<Strng, CertificateSerialNumber>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the proxy by the serial number of its xDS certificate.
    pub fn find_by_serial(&self, serial: &CertificateSerialNumber) -> Option<Arc<Proxy>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_serial.get(serial).cloned()
    }

    /// Finds the proxy by the UID of the pod it runs in. Only proxies with bound metadata are indexed.
    pub fn find_by_pod_uid(&self, uid: &str) -> Option<Arc<Proxy>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .by_pod_uid
            .get(uid)
            .and_then(|serial| state.by_serial.get(serial))
            .cloned()
    }

    pub fn connected_proxy_count(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_serial.len()
    }
}

impl RegisterProxy for ProxyRegistry {
    fn register_proxy(&self, proxy: Arc<Proxy>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let serial = proxy.serial_number().clone();
        if let Some(meta) = proxy.pod_metadata() {
            trace!(%serial, pod_uid=%meta.uid, "indexing proxy by pod");
            state.by_pod_uid.insert(meta.uid.clone(), serial.clone());
        }
        match state.by_serial.insert(serial.clone(), proxy) {
            Some(_) => debug!(%serial, "updated registered proxy"),
            None => debug!(%serial, "registered proxy"),
        }
    }

    fn unregister_proxy(&self, proxy: &Proxy) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let serial = proxy.serial_number();
        // A proxy reconnecting with the same certificate replaces the entry under the same
        // serial; only the connection that owns the entry may remove it.
        let owned = state
            .by_serial
            .get(serial)
            .is_some_and(|p| std::ptr::eq(p.as_ref(), proxy));
        if !owned {
            trace!(%serial, "proxy is not registered by this connection");
            return;
        }
        state.by_serial.remove(serial);
        if let Some(meta) = proxy.pod_metadata() {
            if state.by_pod_uid.get(&meta.uid) == Some(serial) {
                state.by_pod_uid.remove(&meta.uid);
            }
        }
        debug!(%serial, "unregistered proxy");
    }
}
