//! Metric sampling.
//!
//! Two independent sources are sampled concurrently: the agent process and
//! its async runtime, and the host. Each source feeds its own channel and a
//! fan-in stage merges both into one stream that closes once every source is
//! done.

use crate::core::{CollectorError, Metric, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Samples produced by one source.
pub type Samples = Vec<Result<Metric>>;

/// Stream of scan results.
pub type ScanStream = mpsc::Receiver<Result<Metric>>;

/// Process and runtime probe.
struct ProcessProbe {
    system: System,
    pid: Option<Pid>,
}

/// Concurrent sampler of process and host statistics.
///
/// The underlying `System` handles are kept between scans so CPU usage is
/// computed over the interval since the previous scan.
#[derive(Clone)]
pub struct Scanner {
    process: Arc<Mutex<ProcessProbe>>,
    host: Arc<Mutex<System>>,
}

impl Scanner {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Process statistics unavailable: {}", e);
                None
            },
        };

        Self {
            process: Arc::new(Mutex::new(ProcessProbe {
                system: System::new(),
                pid,
            })),
            host: Arc::new(Mutex::new(System::new())),
        }
    }

    /// Start one scan and return the merged stream of results.
    pub fn scan(&self, token: &CancellationToken) -> ScanStream {
        let runtime = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.metrics());
        let process = Arc::clone(&self.process);
        let host = Arc::clone(&self.host);

        let sources = vec![
            spawn_source(token.clone(), move || {
                sample_process(&mut process.lock(), runtime.as_ref())
            }),
            spawn_source(token.clone(), move || sample_host(&mut host.lock())),
        ];
        merge(token.clone(), sources)
    }

    /// Run a scan to completion.
    ///
    /// The first failing sample aborts the scan and is returned.
    pub async fn collect(&self, token: &CancellationToken) -> Result<Vec<Metric>> {
        let scan_token = token.child_token();
        let mut stream = self.scan(&scan_token);
        let mut metrics = Vec::new();

        while let Some(item) = stream.recv().await {
            match item {
                Ok(metric) => metrics.push(metric),
                Err(e) => {
                    scan_token.cancel();
                    return Err(e);
                },
            }
        }

        Ok(metrics)
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a blocking sampler and stream its results.
pub fn spawn_source<F>(token: CancellationToken, sample: F) -> ScanStream
where
    F: FnOnce() -> Samples + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let samples = match tokio::task::spawn_blocking(sample).await {
            Ok(samples) => samples,
            Err(e) => vec![Err(CollectorError::from(e))],
        };

        for item in samples {
            tokio::select! {
                _ = token.cancelled() => return,
                sent = tx.send(item) => if sent.is_err() { return },
            }
        }
    });

    rx
}

/// Fan several streams into one.
///
/// The output closes when every input has closed.
pub fn merge(token: CancellationToken, inputs: Vec<ScanStream>) -> ScanStream {
    let (tx, rx) = mpsc::channel(inputs.len().max(1));

    for mut input in inputs {
        let tx = tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            while let Some(item) = input.recv().await {
                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = tx.send(item) => if sent.is_err() { return },
                }
            }
        });
    }

    rx
}

fn sample_process(probe: &mut ProcessProbe, runtime: Option<&tokio::runtime::RuntimeMetrics>) -> Samples {
    let mut samples = vec![Ok(Metric::gauge(
        "RandomValue",
        f64::from(rand::thread_rng().gen::<u32>()),
    ))];

    if let Some(runtime) = runtime {
        samples.push(Ok(Metric::gauge("RuntimeWorkers", runtime.num_workers() as f64)));
        samples.push(Ok(Metric::gauge(
            "RuntimeAliveTasks",
            runtime.num_alive_tasks() as f64,
        )));
    }

    let Some(pid) = probe.pid else {
        return samples;
    };

    probe
        .system
        .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match probe.system.process(pid) {
        Some(process) => {
            let disk = process.disk_usage();
            samples.extend(
                [
                    ("ResidentMemory", process.memory() as f64),
                    ("VirtualMemory", process.virtual_memory() as f64),
                    ("ProcessCPUUsage", f64::from(process.cpu_usage())),
                    ("DiskReadBytes", disk.total_read_bytes as f64),
                    ("DiskWrittenBytes", disk.total_written_bytes as f64),
                    ("RunTime", process.run_time() as f64),
                ]
                .into_iter()
                .filter(|(_, value)| value.is_finite())
                .map(|(name, value)| Ok(Metric::gauge(name, value))),
            );
        },
        None => samples.push(Err(CollectorError::scan(format!(
            "process {pid} not found while sampling"
        )))),
    }

    samples
}

fn sample_host(system: &mut System) -> Samples {
    system.refresh_memory();
    system.refresh_cpu_usage();

    let mut samples = vec![
        Ok(Metric::gauge("TotalMemory", system.total_memory() as f64)),
        Ok(Metric::gauge("FreeMemory", system.free_memory() as f64)),
    ];

    // Idle share of each core since the previous refresh.
    for (i, cpu) in system.cpus().iter().enumerate() {
        let usage = f64::from(cpu.cpu_usage());
        let idle = if usage.is_finite() {
            (100.0 - usage).clamp(0.0, 100.0)
        } else {
            100.0
        };
        samples.push(Ok(Metric::gauge(format!("CPUutilization{i}"), idle)));
    }

    samples
}
