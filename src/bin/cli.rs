use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use udpts_ingest::{
    CapabilityManager, IngestionConfig, IngestionPipeline, NullLock, PipelineEvent,
    list_active_interfaces,
};

#[derive(Parser)]
struct Opt {
    /// Stream to ingest, e.g. udp://239.1.1.2:1234
    #[clap(long)]
    url: Option<String>,

    /// Read timeout per datagram, in milliseconds
    #[clap(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Multicast TTL
    #[clap(long, default_value_t = 1)]
    ttl: u32,

    /// Interface to join multicast on (default: platform default)
    #[clap(long)]
    iface: Option<String>,

    /// Interval for the JSON stats snapshot, in seconds
    #[clap(long, default_value_t = 2)]
    stats_secs: u64,

    /// Print the active network interfaces and exit
    #[clap(long, default_value_t = false)]
    list_interfaces: bool,
}

#[derive(Default)]
struct PidCounters {
    units: u64,
    bytes: u64,
    random_access: u64,
}

#[derive(Serialize)]
struct PidSnapshot {
    pid: u16,
    stream_type: u8,
    units: u64,
    bytes: u64,
    random_access: u64,
}

#[derive(Serialize)]
struct Snapshot {
    ts_time: String,
    endpoint: String,
    streams: Vec<PidSnapshot>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = Opt::parse();

    if opt.list_interfaces {
        println!("{}", serde_json::to_string_pretty(&list_active_interfaces())?);
        return Ok(());
    }

    let url = opt.url.context("--url is required unless --list-interfaces")?;
    let mut config = IngestionConfig::default()
        .with_connection_timeout(Duration::from_millis(opt.timeout_ms))
        .with_ttl(opt.ttl);
    if let Some(iface) = opt.iface {
        config = config.with_network_interface(iface);
    }

    let capability = Arc::new(CapabilityManager::new(NullLock));
    let mut pipeline = IngestionPipeline::build(&url, config, &capability)?;

    let mut counters = HashMap::<u16, (u8, PidCounters)>::new();
    let mut last_print = Instant::now();
    let stats_every = Duration::from_secs(opt.stats_secs.max(1));

    loop {
        match pipeline.next_access_unit().await? {
            PipelineEvent::AccessUnit(unit) => {
                let (_, c) = counters
                    .entry(unit.pid)
                    .or_insert_with(|| (unit.stream_type, PidCounters::default()));
                c.units += 1;
                c.bytes += unit.data.len() as u64;
                if unit.is_random_access {
                    c.random_access += 1;
                }
            }
            PipelineEvent::Timeout => {
                warn!("no datagram within the timeout window, still waiting");
            }
            PipelineEvent::EndOfStream => break,
        }

        if last_print.elapsed() >= stats_every {
            let snapshot = Snapshot {
                ts_time: chrono::Utc::now().to_rfc3339(),
                endpoint: pipeline.endpoint().to_string(),
                streams: counters
                    .iter()
                    .map(|(pid, (stream_type, c))| PidSnapshot {
                        pid: *pid,
                        stream_type: *stream_type,
                        units: c.units,
                        bytes: c.bytes,
                        random_access: c.random_access,
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            last_print = Instant::now();
        }
    }

    pipeline.dispose();
    Ok(())
}
