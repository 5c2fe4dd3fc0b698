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

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::metrics::Recorder;

pub struct Metrics {
    pub stream_terminations: Family<StreamTermination, Counter>,
    pub identity_bindings: Family<IdentityBinding, Counter>,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct StreamTermination {
    pub reason: StreamTerminationReason,
}

#[derive(Copy, Clone, Hash, Debug, PartialEq, Eq, EncodeLabelValue)]
#[allow(non_camel_case_types)]
pub enum StreamTerminationReason {
    complete,
    canceled,
    error,
    identity_rejected,
    unauthenticated,
    consumer_gone,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct IdentityBinding {
    pub outcome: IdentityBindingOutcome,
}

#[derive(Copy, Clone, Hash, Debug, PartialEq, Eq, EncodeLabelValue)]
#[allow(non_camel_case_types)]
pub enum IdentityBindingOutcome {
    bound,
    malformed,
    rejected,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let stream_terminations = Family::default();
        registry.register(
            "ads_stream_terminations",
            "The total number of terminated proxy discovery streams",
            stream_terminations.clone(),
        );
        let identity_bindings = Family::default();
        registry.register(
            "ads_identity_bindings",
            "The total number of attempts to bind pod metadata to a proxy",
            identity_bindings.clone(),
        );

        Self {
            stream_terminations,
            identity_bindings,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new(&mut Registry::default())
    }
}

impl Recorder<StreamTerminationReason, u64> for Metrics {
    fn record(&self, reason: &StreamTerminationReason, count: u64) {
        self.stream_terminations
            .get_or_create(&StreamTermination { reason: *reason })
            .inc_by(count);
    }
}

impl Recorder<IdentityBindingOutcome, u64> for Metrics {
    fn record(&self, outcome: &IdentityBindingOutcome, count: u64) {
        self.identity_bindings
            .get_or_create(&IdentityBinding { outcome: *outcome })
            .inc_by(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{IncrementRecorder, sub_registry};
    use prometheus_client::encoding::text::encode;

    #[test]
    fn encode_counters() {
        let mut registry = Registry::default();
        let metrics = Metrics::new(sub_registry(&mut registry));
        metrics.increment(&StreamTerminationReason::identity_rejected);
        metrics.increment(&IdentityBindingOutcome::bound);
        metrics.increment(&IdentityBindingOutcome::bound);

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();
        assert!(out.contains(
            "mesh_ads_stream_terminations_total{reason=\"identity_rejected\"} 1"
        ));
        assert!(out.contains("mesh_ads_identity_bindings_total{outcome=\"bound\"} 2"));
    }
}
