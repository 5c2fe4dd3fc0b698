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

use std::fmt;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use uuid::Uuid;
use x509_parser::parse_x509_certificate;

use crate::service::ServiceAccount;
use crate::strng::{self, Strng};

/// Separator between the fields of an Envoy node ID.
const NODE_ID_SEPARATOR: char = '/';

/// Separator between the fields of an xDS certificate common name.
pub const DOMAIN_DELIMITER: char = '.';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid envoy node id {0:?}: {1}")]
    InvalidNodeId(String, &'static str),
    #[error("invalid peer certificate: {0}")]
    InvalidCertificate(String),
    #[error("peer certificate has no subject common name")]
    MissingCommonName,
}

/// CertificateSerialNumber identifies the xDS client certificate of a connection.
/// It is stable for the lifetime of the mTLS session and keys the proxy registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateSerialNumber(Strng);

impl CertificateSerialNumber {
    pub fn new(s: impl AsRef<str>) -> Self {
        CertificateSerialNumber(strng::new(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateSerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// CommonName is the subject common name of the xDS client certificate.
/// The issuer encodes it as `<proxy uuid>.<service account>.<namespace>.<trust domain>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommonName(Strng);

impl CommonName {
    pub fn new(s: impl AsRef<str>) -> Self {
        CommonName(strng::new(s))
    }

    /// Builds the common name the certificate issuer assigns to a proxy.
    pub fn for_proxy(proxy: Uuid, service_account: &ServiceAccount, trust_domain: &str) -> Self {
        CommonName(strng::new(format!(
            "{proxy}{DOMAIN_DELIMITER}{}{DOMAIN_DELIMITER}{}{DOMAIN_DELIMITER}{trust_domain}",
            service_account.name, service_account.namespace
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// PodMetadata describes the workload a proxy runs for, as asserted by the proxy in its node ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodMetadata {
    pub uid: Strng,
    pub namespace: Strng,
    pub ip: Strng,
    pub service_account: ServiceAccount,
    pub envoy_node_id: Strng,
    pub workload_kind: Option<Strng>,
    pub workload_name: Option<Strng>,
}

/// Parses an Envoy node ID written by the sidecar injector:
/// `<pod uid>/<pod namespace>/<pod ip>/<service account>/<envoy node id>[/<workload kind>[/<workload name>]]`
impl FromStr for PodMetadata {
    type Err = Error;

    fn from_str(node_id: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| Error::InvalidNodeId(node_id.to_string(), reason);
        let chunks: Vec<&str> = node_id.split(NODE_ID_SEPARATOR).collect();
        let [uid, namespace, ip, service_account, envoy_node_id, rest @ ..] = chunks.as_slice()
        else {
            return Err(invalid("expected at least 5 segments"));
        };
        if uid.is_empty() {
            return Err(invalid("empty pod uid"));
        }
        if namespace.is_empty() {
            return Err(invalid("empty pod namespace"));
        }
        if service_account.is_empty() {
            return Err(invalid("empty service account"));
        }
        if envoy_node_id.is_empty() {
            return Err(invalid("empty envoy node id"));
        }
        let optional = |i: usize| {
            rest.get(i)
                .filter(|s| !s.is_empty())
                .map(|s| strng::new(s))
        };
        Ok(PodMetadata {
            uid: strng::new(uid),
            namespace: strng::new(namespace),
            ip: strng::new(ip),
            service_account: ServiceAccount::new(namespace, service_account),
            envoy_node_id: strng::new(envoy_node_id),
            workload_kind: optional(0),
            workload_name: optional(1),
        })
    }
}

/// Proxy is a single connected Envoy.
///
/// The transport identity is known when the connection is accepted. The pod metadata is
/// unbound until the proxy sends a valid node ID that matches its certificate, and can be
/// bound only once; readers observe it through [Proxy::pod_metadata].
#[derive(Debug)]
pub struct Proxy {
    serial_number: CertificateSerialNumber,
    common_name: CommonName,
    pod_metadata: OnceCell<PodMetadata>,
}

impl Proxy {
    pub fn new(common_name: CommonName, serial_number: CertificateSerialNumber) -> Self {
        Proxy {
            serial_number,
            common_name,
            pod_metadata: OnceCell::new(),
        }
    }

    /// Builds a proxy from the DER encoded leaf certificate the client presented.
    pub fn from_peer_certificate(der: &[u8]) -> Result<Self, Error> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| Error::InvalidCertificate(e.to_string()))?;
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .filter(|cn| !cn.is_empty())
            .ok_or(Error::MissingCommonName)?;
        Ok(Proxy::new(
            CommonName::new(common_name),
            CertificateSerialNumber::new(cert.raw_serial_as_string()),
        ))
    }

    pub fn serial_number(&self) -> &CertificateSerialNumber {
        &self.serial_number
    }

    pub fn common_name(&self) -> &CommonName {
        &self.common_name
    }

    /// Returns the pod metadata, if it has been bound.
    pub fn pod_metadata(&self) -> Option<&PodMetadata> {
        self.pod_metadata.get()
    }

    pub fn has_pod_metadata(&self) -> bool {
        self.pod_metadata.get().is_some()
    }

    /// Binds the pod metadata. Fails, returning the rejected metadata, if it was already bound.
    pub(crate) fn bind_pod_metadata(&self, metadata: PodMetadata) -> Result<(), PodMetadata> {
        self.pod_metadata.set(metadata)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proxy on XDS cert SerialNumber={}, CN={}",
            self.serial_number, self.common_name
        )?;
        if let Some(meta) = self.pod_metadata() {
            write!(f, ", pod={}/{}", meta.namespace, meta.uid)?;
        }
        Ok(())
    }
}
