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

use crate::strng;
use crate::strng::Strng;

// The subset of the envoy v3 API the stream reads. Field tags match
// envoy/service/discovery/v3/discovery.proto and envoy/config/core/v3/base.proto,
// so these decode the messages Envoy sends on the wire.
#[allow(clippy::derive_partial_eq_without_eq)]
pub mod service {
    pub mod discovery {
        pub mod v3 {
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct DiscoveryRequest {
                #[prost(string, tag = "1")]
                pub version_info: ::prost::alloc::string::String,
                #[prost(message, optional, tag = "2")]
                pub node: ::core::option::Option<super::super::super::config::core::v3::Node>,
                #[prost(string, repeated, tag = "3")]
                pub resource_names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
                #[prost(string, tag = "4")]
                pub type_url: ::prost::alloc::string::String,
                #[prost(string, tag = "5")]
                pub response_nonce: ::prost::alloc::string::String,
                #[prost(message, optional, tag = "6")]
                pub error_detail: ::core::option::Option<super::super::super::rpc::Status>,
            }
        }
    }
}

#[allow(clippy::derive_partial_eq_without_eq)]
pub mod config {
    pub mod core {
        pub mod v3 {
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct Node {
                #[prost(string, tag = "1")]
                pub id: ::prost::alloc::string::String,
                #[prost(string, tag = "2")]
                pub cluster: ::prost::alloc::string::String,
                #[prost(message, optional, tag = "3")]
                pub metadata: ::core::option::Option<::prost_types::Struct>,
                #[prost(string, tag = "6")]
                pub user_agent_name: ::prost::alloc::string::String,
            }
        }
    }
}

#[allow(clippy::derive_partial_eq_without_eq)]
pub mod rpc {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Status {
        #[prost(int32, tag = "1")]
        pub code: i32,
        #[prost(string, tag = "2")]
        pub message: ::prost::alloc::string::String,
        #[prost(message, repeated, tag = "3")]
        pub details: ::prost::alloc::vec::Vec<::prost_types::Any>,
    }
}

pub use config::core::v3::Node;
pub use service::discovery::v3::DiscoveryRequest;

pub const LISTENER_TYPE: Strng =
    strng::literal!("type.googleapis.com/envoy.config.listener.v3.Listener");
pub const CLUSTER_TYPE: Strng = strng::literal!("type.googleapis.com/envoy.config.cluster.v3.Cluster");

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn decode_envoy_wire_format() {
        // node { id: "a/b/c/d/e" }, type_url: "t", resource_names: ["r"]
        let wire: &[u8] = &[
            0x12, 0x0b, 0x0a, 0x09, b'a', b'/', b'b', b'/', b'c', b'/', b'd', b'/', b'e', 0x22,
            0x01, b't', 0x1a, 0x01, b'r',
        ];
        let req = DiscoveryRequest::decode(wire).unwrap();
        assert_eq!(req.node.unwrap().id, "a/b/c/d/e");
        assert_eq!(req.type_url, "t");
        assert_eq!(req.resource_names, vec!["r".to_string()]);
        assert_eq!(req.error_detail, None);
    }
}
