//! Metrics agent.
//!
//! Two loops share the pending snapshot: the scan loop replaces it on every
//! poll tick and counts scans, the send loop ships it on every report tick
//! together with a `PollCount` counter and resets the count. On shutdown the
//! send loop performs one final send before exiting.

use crate::core::{AgentConfig, CollectorError, Metric, Result, TransportKind};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub mod scan;
pub mod sender;

pub use scan::Scanner;
pub use sender::{GrpcTransport, HttpTransport, Sender, Transport};

/// Name of the counter reporting scans since the previous send.
pub const POLL_COUNT: &str = "PollCount";

/// Metrics collected since the last send.
#[derive(Debug, Default)]
pub struct Pending {
    metrics: Vec<Metric>,
    scan_count: i64,
}

impl Pending {
    /// Replace the snapshot with a fresh scan.
    pub fn record_scan(&mut self, metrics: Vec<Metric>) {
        self.metrics = metrics;
        self.scan_count += 1;
    }

    /// Copy of the snapshot plus the poll counter.
    pub fn prepare(&self) -> Vec<Metric> {
        let mut batch = Vec::with_capacity(self.metrics.len() + 1);
        batch.extend_from_slice(&self.metrics);
        batch.push(Metric::counter(POLL_COUNT, self.scan_count));
        batch
    }

    /// Snapshot for a periodic send; the poll counter restarts.
    pub fn take_report(&mut self) -> Vec<Metric> {
        let batch = self.prepare();
        self.scan_count = 0;
        batch
    }
}

/// Agent orchestrator.
pub struct Agent {
    poll_interval: Duration,
    report_interval: Duration,
    scanner: Scanner,
    sender: Sender,
}

impl Agent {
    /// Build the agent and its transport from configuration.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let real_ip = config
            .real_ip
            .unwrap_or_else(|| advertised_ip(&config.server_address));
        tracing::info!("Advertising {} as X-Real-IP", real_ip);

        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Http => Arc::new(HttpTransport::new(config, real_ip)?),
            TransportKind::Grpc => Arc::new(GrpcTransport::new(config, real_ip)?),
        };

        Ok(Self::with_transport(config, transport))
    }

    /// Build the agent around an existing transport.
    pub fn with_transport(config: &AgentConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
            scanner: Scanner::new(),
            sender: Sender::new(transport, config),
        }
    }

    /// Run until `shutdown` fires or a loop fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("Agent is running...");

        let pending = Arc::new(Mutex::new(Pending::default()));
        let group = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn(scan_loop(
            self.scanner,
            Arc::clone(&pending),
            self.poll_interval,
            shutdown.clone(),
            group.clone(),
        ));
        tasks.spawn(send_loop(
            self.sender,
            pending,
            self.report_interval,
            shutdown,
            group.clone(),
        ));

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(CollectorError::from).and_then(|r| r);
            if let Err(e) = result {
                tracing::error!("Agent loop failed: {}", e);
                group.cancel();
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn scan_loop(
    scanner: Scanner,
    pending: Arc<Mutex<Pending>>,
    period: Duration,
    shutdown: CancellationToken,
    group: CancellationToken,
) -> Result<()> {
    let mut ticker = ticker(period);
    // Consume the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = group.cancelled() => return Ok(()),
            _ = shutdown.cancelled() => {
                tracing::info!("Metrics scanner stopped gracefully");
                return Ok(());
            }
            _ = ticker.tick() => {
                let metrics = scanner.collect(&group).await?;
                tracing::debug!("Scanned {} metrics", metrics.len());
                pending.lock().record_scan(metrics);
            }
        }
    }
}

async fn send_loop(
    sender: Sender,
    pending: Arc<Mutex<Pending>>,
    period: Duration,
    shutdown: CancellationToken,
    group: CancellationToken,
) -> Result<()> {
    let mut ticker = ticker(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = group.cancelled() => return Ok(()),
            _ = shutdown.cancelled() => {
                let batch = pending.lock().prepare();
                sender.send(batch, &group).await?;
                tracing::info!("Metrics sender stopped gracefully");
                return Ok(());
            }
            _ = ticker.tick() => {
                let batch = pending.lock().take_report();
                sender.send(batch, &group).await?;
            }
        }
    }
}

/// Address the agent reports in `X-Real-IP`.
///
/// Uses the local address the OS routes to the collector when it is private
/// (RFC 1918) or loopback, otherwise falls back to loopback. No packet is
/// sent: connecting a UDP socket only selects a route.
pub fn advertised_ip(server_address: &str) -> IpAddr {
    let target = server_address
        .split("://")
        .last()
        .unwrap_or(server_address)
        .trim_end_matches('/');

    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(target)?;
            socket.local_addr()
        })
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
            IpAddr::V6(v6) => v6.is_loopback(),
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
