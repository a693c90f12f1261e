use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use cadence::StatsdClient;
use kakku::{CacheEvent, EventSink, JsonSha256, MemoryStore, Registry, StatsdSink};
use rand::Rng;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{StressParams, WorkloadsConfig, process_request, register_workloads};

/// Counts events by name, for the closing report.
#[derive(Debug, Default)]
struct CountingSink {
    counts: Mutex<BTreeMap<String, u64>>,
}

impl CountingSink {
    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.lock().unwrap().clone()
    }
}

impl EventSink<StressParams> for CountingSink {
    fn emit(&self, event: CacheEvent<StressParams>) {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(event.kind.name())
            .or_default() += 1;
    }
}

/// Fans the event stream out to the counter and, if configured, statsd.
struct StressSink {
    counter: Arc<CountingSink>,
    statsd: Option<StatsdSink>,
}

impl EventSink<StressParams> for StressSink {
    fn emit(&self, event: CacheEvent<StressParams>) {
        if let Some(statsd) = &self.statsd {
            statsd.emit(event.clone());
        }
        self.counter.emit(event);
    }
}

pub async fn perform_stresstest(
    workloads: WorkloadsConfig,
    statsd: Option<StatsdClient>,
    duration: Duration,
) -> Result<()> {
    let counter = Arc::new(CountingSink::default());
    let sink = StressSink {
        counter: Arc::clone(&counter),
        statsd: statsd.map(StatsdSink::new),
    };

    let registry = Registry::builder(JsonSha256, MemoryStore::new())
        .prefix("stress")
        .event_sink(sink)
        .build();

    // initialize workloads
    let workloads: Vec<_> = workloads.workloads.into_iter().map(Arc::new).collect();
    for workload in &workloads {
        ensure!(workload.keys > 0, "workload `{}` needs at least one key", workload.name);
        ensure!(
            workload.concurrency > 0,
            "workload `{}` needs a concurrency of at least 1",
            workload.name
        );
    }
    register_workloads(&registry, &workloads);

    // warmup: run each workload once to make sure caches are warm
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|workload| {
            let registry = registry.clone();
            let workload = Arc::clone(workload);
            tokio::spawn(async move {
                process_request(&registry, &workload, 0).await;
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for workload in workloads.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let registry = registry.clone();

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let semaphore = Arc::new(Semaphore::new(workload.concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let registry = registry.clone();
                        let workload = Arc::clone(&workload);
                        let task_durations = Arc::clone(&task_durations);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            let key = rand::rng().random_range(0..workload.keys);
                            process_request(&registry, &workload, key).await;

                            task_durations.lock().unwrap().add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            let task_durations: DDSketch = {
                let mut task_durations = task_durations.lock().unwrap();
                std::mem::take(&mut task_durations)
            };

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(workload.concurrency as u32).await;

            (workload, task_durations)
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for task in finished_tasks {
        let (workload, task_durations) = task.unwrap();

        let ops = task_durations.count();
        let ops_ps = ops as f32 / duration.as_secs() as f32;
        println!(
            "Workload `{}` (concurrency: {}, keys: {}): {ops} operations, {ops_ps:.2} ops/s",
            workload.name, workload.concurrency, workload.keys
        );

        if ops == 0 {
            continue;
        }

        let avg = Duration::from_secs_f64(task_durations.sum().unwrap() / ops as f64);
        let p50 = Duration::from_secs_f64(task_durations.quantile(0.5).unwrap().unwrap());
        let p90 = Duration::from_secs_f64(task_durations.quantile(0.9).unwrap().unwrap());
        let p99 = Duration::from_secs_f64(task_durations.quantile(0.99).unwrap().unwrap());
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    println!();
    println!("Cache events:");
    for (name, count) in counter.snapshot() {
        println!("  {name}: {count}");
    }

    Ok(())
}
