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

//! Resource names used by the secret discovery service (SDS).
//!
//! A proxy requests certificate material with a resource name of the form
//! `<cert type>:<namespace>/<service>`, for example `service-cert:billing/checkout`.

use std::fmt;
use std::str::FromStr;

use crate::service::{self, MeshService};
use crate::strng::{self, Strng};

/// Separator between the certificate type and the certificate name.
pub const SEPARATOR: char = ':';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid certificate name format: {0:?}")]
    InvalidCertFormat(String),
    #[error(transparent)]
    InvalidMeshService(#[from] service::Error),
}

/// The purpose of the certificate material being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdsCertType {
    /// The service's own certificate and key.
    ServiceCert,
    /// Trust root used to validate downstream peers on inbound mTLS.
    RootCertForMtlsInbound,
    /// Trust root used to validate upstream peers on outbound mTLS.
    RootCertForMtlsOutbound,
    /// Trust root used to validate upstreams on non-mTLS HTTPS.
    RootCertForHttps,
}

impl SdsCertType {
    pub const ALL: [SdsCertType; 4] = [
        SdsCertType::ServiceCert,
        SdsCertType::RootCertForMtlsInbound,
        SdsCertType::RootCertForMtlsOutbound,
        SdsCertType::RootCertForHttps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SdsCertType::ServiceCert => "service-cert",
            SdsCertType::RootCertForMtlsInbound => "root-cert-for-mtls-inbound",
            SdsCertType::RootCertForMtlsOutbound => "root-cert-for-mtls-outbound",
            SdsCertType::RootCertForHttps => "root-cert-https",
        }
    }
}

impl fmt::Display for SdsCertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdsCertType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SdsCertType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidCertFormat(s.to_string()))
    }
}

/// SdsCert is a parsed SDS resource name.
/// `name` is kept as received; [SdsCert::mesh_service] splits it into namespace and service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SdsCert {
    pub cert_type: SdsCertType,
    pub name: Strng,
}

impl SdsCert {
    pub fn new(cert_type: SdsCertType, service: &MeshService) -> Self {
        SdsCert {
            cert_type,
            name: strng::new(service.to_string()),
        }
    }

    /// Returns the mesh service the certificate is requested for.
    pub fn mesh_service(&self) -> Result<MeshService, service::Error> {
        self.name.parse()
    }
}

impl fmt::Display for SdsCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.cert_type, self.name)
    }
}

impl FromStr for SdsCert {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(SEPARATOR);
        let (Some(cert_type), Some(name), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidCertFormat(s.to_string()));
        };
        if cert_type.is_empty() || name.is_empty() {
            return Err(Error::InvalidCertFormat(s.to_string()));
        }
        let cert_type = cert_type
            .parse()
            .map_err(|_| Error::InvalidCertFormat(s.to_string()))?;
        Ok(SdsCert {
            cert_type,
            name: strng::new(name),
        })
    }
}

/// Formats the SDS resource name for the certificate of the given type and service.
pub fn marshal(cert_type: SdsCertType, service: &MeshService) -> String {
    SdsCert::new(cert_type, service).to_string()
}

/// Parses an SDS resource name into the certificate type and the service it refers to.
pub fn unmarshal(s: &str) -> Result<(SdsCertType, MeshService), Error> {
    let cert: SdsCert = s.parse()?;
    let service = cert.mesh_service()?;
    Ok((cert.cert_type, service))
}
