use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use kakku::{CacheDefinition, CachePolicy, FreshValue, Registry};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

/// One cache under load.
#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    /// Cache name; also used in the closing report.
    pub name: String,
    /// Number of requests kept in flight at once.
    pub concurrency: usize,
    /// Number of distinct keys the requests are spread over. Must be at
    /// least 1.
    pub keys: usize,
    /// Declared lifetime of computed values, in seconds. Zero or negative
    /// makes every stored entry immediately stale.
    pub ttl: i64,
    /// Simulated compute time per fresh value.
    #[serde(with = "humantime_serde")]
    pub compute_delay: Duration,
    /// Size of the computed payload.
    #[serde(default = "default_payload_bytes")]
    pub payload_bytes: usize,
    #[serde(flatten)]
    pub policy: CachePolicy,
}

fn default_payload_bytes() -> usize {
    512
}

/// The request parameters a stressed cache is keyed by.
#[derive(Debug, Serialize)]
pub struct StressParams {
    pub workload: String,
    pub key: usize,
}

/// Registers one cache per workload, each computing a synthetic payload
/// after the configured delay.
pub fn register_workloads(registry: &Registry<StressParams, String>, workloads: &[Arc<Workload>]) {
    for workload in workloads {
        let delay = workload.compute_delay;
        let ttl = workload.ttl;
        let payload_bytes = workload.payload_bytes;

        registry.register(
            CacheDefinition::new(workload.name.clone(), move |params: Arc<StressParams>| {
                async move {
                    tokio::time::sleep(delay).await;
                    anyhow::Ok(FreshValue::new(synthetic_payload(&params, payload_bytes), ttl))
                }
                .boxed()
            })
            .use_after_stale(workload.policy.use_after_stale)
            .collapse_gets(workload.policy.collapse_gets)
            .collapse_fetches(workload.policy.collapse_fetches),
        );
    }
}

fn synthetic_payload(params: &StressParams, payload_bytes: usize) -> String {
    let mut payload = format!("{}/{}:", params.workload, params.key);
    let padding = payload_bytes.saturating_sub(payload.len());
    payload.extend(std::iter::repeat_n('x', padding));
    payload
}

pub async fn process_request(
    registry: &Registry<StressParams, String>,
    workload: &Workload,
    key: usize,
) {
    let params = StressParams {
        workload: workload.name.clone(),
        key,
    };
    registry.get(&workload.name, params).await.unwrap();
}
