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

use async_trait::async_trait;
use uuid::Uuid;

use crate::proxy::{CommonName, DOMAIN_DELIMITER};
use crate::service::ServiceAccount;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid certificate common name: {0}")]
    InvalidCommonName(CommonName),
    #[error("invalid proxy uuid in certificate common name {0}: {1}")]
    InvalidProxyUuid(CommonName, String),
    #[error("service account lookup failed: {0}")]
    Lookup(String),
}

/// ServiceAccountResolver resolves the service account a proxy's xDS certificate was issued for.
#[async_trait]
pub trait ServiceAccountResolver: Send + Sync {
    async fn resolve_service_account(&self, cn: &CommonName) -> Result<ServiceAccount, Error>;
}

/// CommonNameResolver reads the service account directly out of the certificate common name,
/// `<proxy uuid>.<service account>.<namespace>[.<trust domain>]`.
#[derive(Clone, Debug, Default)]
pub struct CommonNameResolver;

/// The identity fields the certificate issuer encodes into a common name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonNameMeta {
    pub proxy_uuid: Uuid,
    pub service_account: ServiceAccount,
}

impl TryFrom<&CommonName> for CommonNameMeta {
    type Error = Error;

    fn try_from(cn: &CommonName) -> Result<Self, Self::Error> {
        let mut chunks = cn.as_str().split(DOMAIN_DELIMITER);
        let (Some(proxy_uuid), Some(name), Some(namespace)) =
            (chunks.next(), chunks.next(), chunks.next())
        else {
            return Err(Error::InvalidCommonName(cn.clone()));
        };
        if name.is_empty() || namespace.is_empty() {
            return Err(Error::InvalidCommonName(cn.clone()));
        }
        let proxy_uuid = Uuid::parse_str(proxy_uuid)
            .map_err(|e| Error::InvalidProxyUuid(cn.clone(), e.to_string()))?;
        Ok(CommonNameMeta {
            proxy_uuid,
            service_account: ServiceAccount::new(namespace, name),
        })
    }
}

#[async_trait]
impl ServiceAccountResolver for CommonNameResolver {
    async fn resolve_service_account(&self, cn: &CommonName) -> Result<ServiceAccount, Error> {
        CommonNameMeta::try_from(cn).map(|meta| meta.service_account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;
    use test_case::test_case;

    #[tokio::test]
    async fn resolve_from_common_name() {
        let id = Uuid::new_v4();
        let sa = ServiceAccount::new("bookstore-ns", "bookstore");
        let cn = CommonName::for_proxy(id, &sa, "cluster.local");

        let meta = CommonNameMeta::try_from(&cn).unwrap();
        assert_eq!(meta.proxy_uuid, id);
        assert_eq!(meta.service_account, sa);
        assert_eq!(
            CommonNameResolver.resolve_service_account(&cn).await.unwrap(),
            sa
        );
    }

    #[test]
    fn trust_domain_is_optional() {
        let id = Uuid::new_v4();
        let cn = CommonName::new(format!("{id}.sa.ns"));
        assert_eq!(
            CommonNameMeta::try_from(&cn).unwrap().service_account,
            ServiceAccount::new("ns", "sa")
        );
    }

    #[test_case(""; "empty")]
    #[test_case("uuid.sa"; "too few segments")]
    #[test_case("2f6c1c3e-7f0c-4b6e-9a43-2b3c9f1d1a10..ns.cluster.local"; "empty service account")]
    #[test_case("2f6c1c3e-7f0c-4b6e-9a43-2b3c9f1d1a10.sa..cluster.local"; "empty namespace")]
    fn invalid_common_name(cn: &str) {
        assert_matches!(
            CommonNameMeta::try_from(&CommonName::new(cn)),
            Err(Error::InvalidCommonName(_))
        );
    }

    #[test]
    fn invalid_proxy_uuid() {
        assert_matches!(
            CommonNameMeta::try_from(&CommonName::new("not-a-uuid.sa.ns.cluster.local")),
            Err(Error::InvalidProxyUuid(_, _))
        );
    }
}
