use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use sluice_transfer::loopback::LOOPBACK_HANDLE;
use sluice_transfer::{
    RemoteFile, SharedProgress, StepLogger, TransferConfig, download, spawn_loopback_server,
    upload,
};

#[derive(Debug, Serialize)]
struct RunReport {
    direction: &'static str,
    window: usize,
    chunk_size: u32,
    bytes: u64,
    elapsed_ms: u64,
    mib_per_sec: f64,
    sha256: String,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    file_size: u64,
    latency_us: u64,
    runs: Vec<RunReport>,
    speedup: f64,
}

fn env_u64(key: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{} must be an integer, got {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn report(direction: &'static str, config: &TransferConfig, bytes: u64, elapsed: Duration, data: &[u8]) -> RunReport {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    RunReport {
        direction,
        window: config.window_limit,
        chunk_size: config.chunk_size,
        bytes,
        elapsed_ms: elapsed.as_millis() as u64,
        mib_per_sec: bytes as f64 / (1024.0 * 1024.0) / secs,
        sha256: hex::encode(Sha256::digest(data)),
    }
}

fn run_download(data: &[u8], latency: Duration, config: &TransferConfig) -> anyhow::Result<RunReport> {
    let (mut conn, server) = spawn_loopback_server(data.to_vec(), latency, config.window_limit);
    let remote = RemoteFile::new(Bytes::from_static(LOOPBACK_HANDLE), data.len() as u64);
    let mut sink = Vec::with_capacity(data.len());

    let start = Instant::now();
    let n = download(&mut conn, &remote, &mut sink, config, &mut StepLogger::default())?;
    let elapsed = start.elapsed();

    drop(conn);
    if server.join().is_err() {
        bail!("loopback server thread panicked");
    }
    Ok(report("download", config, n, elapsed, &sink))
}

fn run_upload(data: &[u8], latency: Duration, config: &TransferConfig) -> anyhow::Result<RunReport> {
    let (mut conn, server) = spawn_loopback_server(Vec::new(), latency, config.window_limit);
    let handle = Bytes::from_static(LOOPBACK_HANDLE);
    let mut progress = SharedProgress::new(data.len() as u64);

    let start = Instant::now();
    let n = upload(&mut conn, &mut &data[..], data.len() as u64, &handle, config, &mut progress)?;
    let elapsed = start.elapsed();

    drop(conn);
    let stored = match server.join() {
        Ok(stored) => stored,
        Err(_) => bail!("loopback server thread panicked"),
    };
    info!(fraction = progress.fraction(), chunks = progress.chunks_done(), "upload acknowledged");
    Ok(report("upload", config, n, elapsed, &stored))
}

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_bench=info,sluice_transfer=info".into()),
        )
        .init();

    // Config
    let file_size = env_u64("SLUICE_BENCH_FILE_SIZE", 8 * 1024 * 1024)?;
    let latency_us = env_u64("SLUICE_BENCH_LATENCY_US", 2_000)?;
    let json = std::env::var("SLUICE_BENCH_JSON").is_ok();
    let latency = Duration::from_micros(latency_us);

    let pipelined = TransferConfig::from_env();
    pipelined.validate()?;
    let serial = pipelined.clone().with_window(1);

    let data = pattern(file_size as usize);
    let expected = hex::encode(Sha256::digest(&data));
    info!(file_size, latency_us, window = pipelined.window_limit, chunk_size = pipelined.chunk_size, "starting loopback bench");

    let runs = vec![
        run_download(&data, latency, &serial)?,
        run_download(&data, latency, &pipelined)?,
        run_upload(&data, latency, &pipelined)?,
    ];
    for run in &runs {
        if run.sha256 != expected {
            bail!("{} with window {} corrupted data: {} != {}", run.direction, run.window, run.sha256, expected);
        }
    }

    let speedup = runs[0].elapsed_ms.max(1) as f64 / runs[1].elapsed_ms.max(1) as f64;
    let bench = BenchReport {
        file_size,
        latency_us,
        runs,
        speedup,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&bench)?);
    } else {
        for run in &bench.runs {
            info!(
                direction = run.direction,
                window = run.window,
                elapsed_ms = run.elapsed_ms,
                mib_per_sec = run.mib_per_sec,
                "run complete"
            );
        }
        info!(speedup = bench.speedup, "pipelining speedup");
    }
    Ok(())
}
