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

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::binder::{Binding, IdentityBinder};
use super::metrics::{Metrics, StreamTerminationReason};
use super::{DisplayStatus, Error};
use crate::metrics::IncrementRecorder;
use crate::proxy::Proxy;
use crate::xds::DiscoveryRequest;

/// How a stream ended when the proxy, not the server, ended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The proxy half-closed the stream.
    Closed,
    /// The proxy canceled the RPC.
    Canceled,
}

/// RequestReceiver reads the discovery requests of a single proxy stream.
///
/// Requests are forwarded in arrival order into a bounded channel. When the receiver returns,
/// for any reason, the channel is closed and the quit token is canceled.
pub struct RequestReceiver<S> {
    stream: S,
    proxy: Arc<Proxy>,
    binder: IdentityBinder,
    requests: mpsc::Sender<DiscoveryRequest>,
    quit: CancellationToken,
    metrics: Arc<Metrics>,
    max_unbound_requests: Option<usize>,
}

impl<S> RequestReceiver<S>
where
    S: Stream<Item = Result<DiscoveryRequest, tonic::Status>> + Unpin,
{
    pub fn new(
        stream: S,
        proxy: Arc<Proxy>,
        binder: IdentityBinder,
        requests: mpsc::Sender<DiscoveryRequest>,
        quit: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> Self {
        RequestReceiver {
            stream,
            proxy,
            binder,
            requests,
            quit,
            metrics,
            max_unbound_requests: None,
        }
    }

    /// Ends the stream once the proxy sent more than `max` requests without binding its pod metadata.
    pub fn with_max_unbound_requests(mut self, max: Option<usize>) -> Self {
        self.max_unbound_requests = max;
        self
    }

    pub async fn run(self) -> Result<Termination, Error> {
        let metrics = self.metrics.clone();
        let res = self.receive().await;
        metrics.increment(&termination_reason(&res));
        res
    }

    async fn receive(self) -> Result<Termination, Error> {
        let RequestReceiver {
            mut stream,
            proxy,
            binder,
            requests,
            quit,
            max_unbound_requests,
            ..
        } = self;
        let _quit = quit.drop_guard();
        let mut unbound = 0;

        loop {
            let request = match stream.next().await {
                Some(Ok(request)) => request,
                Some(Err(status)) if status.code() == tonic::Code::Cancelled => {
                    debug!("proxy canceled the stream");
                    return Ok(Termination::Canceled);
                }
                Some(Err(status)) => {
                    error!(status = %DisplayStatus(&status), "error receiving discovery request");
                    return Err(Error::GrpcStatus(status));
                }
                None => {
                    debug!("proxy closed the stream");
                    return Ok(Termination::Closed);
                }
            };

            if !proxy.has_pod_metadata() {
                match binder.bind(&request, &proxy).await {
                    Ok(Binding::Bound) => debug!(%proxy, "bound pod metadata"),
                    Ok(unbound_reason) => {
                        if let Binding::Malformed(e) = &unbound_reason {
                            warn!(error = %e, "invalid node id, will retry on the next request");
                        }
                        unbound += 1;
                        if max_unbound_requests.is_some_and(|max| unbound > max) {
                            warn!(requests = unbound, "proxy did not bind its pod metadata");
                            return Err(Error::Unauthenticated {
                                serial: proxy.serial_number().clone(),
                                requests: unbound,
                            });
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "rejecting proxy");
                        return Err(Error::Binding(e));
                    }
                }
            }

            trace!(
                type_url = %request.type_url,
                version = %request.version_info,
                nonce = %request.response_nonce,
                resources = request.resource_names.len(),
                "received discovery request"
            );
            // Bounded; a slow consumer stalls receipt from the proxy.
            if requests.send(request).await.is_err() {
                debug!("discovery request consumer is gone");
                return Err(Error::RequestChannelClosed);
            }
        }
    }
}

fn termination_reason(res: &Result<Termination, Error>) -> StreamTerminationReason {
    match res {
        Ok(Termination::Closed) => StreamTerminationReason::complete,
        Ok(Termination::Canceled) => StreamTerminationReason::canceled,
        Err(Error::Binding(_)) => StreamTerminationReason::identity_rejected,
        Err(Error::Unauthenticated { .. }) => StreamTerminationReason::unauthenticated,
        Err(Error::RequestChannelClosed) => StreamTerminationReason::consumer_gone,
        Err(Error::GrpcStatus(_) | Error::Certificate(_) | Error::Task(_)) => {
            StreamTerminationReason::error
        }
    }
}
