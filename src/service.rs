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

use crate::strng::{self, Strng};

/// Separator between the namespace and the name of a namespaced mesh object.
pub const NAMESPACE_NAME_SEPARATOR: char = '/';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid mesh service format: {0:?}")]
    InvalidMeshServiceFormat(String),
}

/// MeshService is a service in the mesh, addressed as `<namespace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshService {
    pub namespace: Strng,
    pub name: Strng,
}

impl MeshService {
    pub fn new(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            namespace: strng::new(namespace),
            name: strng::new(name),
        }
    }
}

impl fmt::Display for MeshService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{NAMESPACE_NAME_SEPARATOR}{}", self.namespace, self.name)
    }
}

impl FromStr for MeshService {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(NAMESPACE_NAME_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(MeshService::new(namespace, name))
            }
            _ => Err(Error::InvalidMeshServiceFormat(s.to_string())),
        }
    }
}

/// ServiceAccount is the Kubernetes service account a workload runs as.
/// It is the identity that both the xDS certificate and the proxy's node ID assert.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAccount {
    pub namespace: Strng,
    pub name: Strng,
}

impl ServiceAccount {
    pub fn new(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            namespace: strng::new(namespace),
            name: strng::new(name),
        }
    }
}

impl fmt::Display for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{NAMESPACE_NAME_SEPARATOR}{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn mesh_service_display_parse() {
        let svc = MeshService::new("randomNamespace", "randomServiceName");
        assert_eq!(svc.to_string(), "randomNamespace/randomServiceName");
        assert_eq!(
            MeshService::from_str("randomNamespace/randomServiceName").unwrap(),
            svc
        );
    }

    #[test_case(""; "empty")]
    #[test_case("/"; "only separator")]
    #[test_case("/svc"; "missing namespace")]
    #[test_case("ns/"; "missing name")]
    #[test_case("/svc/"; "leading and trailing separator")]
    #[test_case("ns/svc/extra"; "too many segments")]
    #[test_case("nsvc"; "no separator")]
    fn mesh_service_invalid(input: &str) {
        assert_eq!(
            MeshService::from_str(input),
            Err(Error::InvalidMeshServiceFormat(input.to_string()))
        );
    }

    #[test]
    fn service_account_display() {
        assert_eq!(ServiceAccount::new("ns", "sa").to_string(), "ns/sa");
    }
}
