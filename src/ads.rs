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

//! Server side of the aggregated discovery service (ADS) stream opened by each proxy.
//!
//! Every accepted stream gets its own [RequestReceiver], which binds the proxy's pod
//! metadata to its certificate identity and hands the requests to the response builder.

use std::error::Error as StdErr;
use std::fmt;
use std::fmt::Formatter;

pub use binder::{Binding, IdentityBinder};
pub use metrics::Metrics;
pub use server::{AdsServer, Session};
pub use stream::{RequestReceiver, Termination};

use crate::proxy::{self, CertificateSerialNumber};

pub mod binder;
pub mod metrics;
mod server;
mod stream;

struct DisplayStatus<'a>(&'a tonic::Status);

impl fmt::Display for DisplayStatus<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = &self.0;
        write!(f, "status: {:?}, message: {:?}", s.code(), s.message())?;

        if !s.details().is_empty() {
            if let Ok(st) = std::str::from_utf8(s.details()) {
                write!(f, ", details: {st}")?;
            }
        }
        if let Some(src) = s.source() {
            write!(f, ", source: {src}")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("gRPC error {}", DisplayStatus(.0))]
    GrpcStatus(#[from] tonic::Status),
    #[error("identity binding failed: {0}")]
    Binding(#[from] binder::Error),
    /// The consumer of the discovery requests dropped its end of the channel.
    #[error("discovery request consumer is gone")]
    RequestChannelClosed,
    #[error("proxy {serial} sent {requests} requests without valid node metadata")]
    Unauthenticated {
        serial: CertificateSerialNumber,
        requests: usize,
    },
    #[error("{0}")]
    Certificate(#[from] proxy::Error),
    #[error("stream task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
