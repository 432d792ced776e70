//! Task wiring: a capture task feeds an ip-assembly task, which
//! fans out to a fixed pool of dispatch tasks — each owning a disjoint slice
//! of connections, so no connection state is ever touched from two tasks —
//! and those converge on a single sink task. Everything crosses task
//! boundaries over `tokio::sync::mpsc`, never a shared lock.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::breakdown::TcpBreakdown;
use crate::config::Config;
use crate::ip::IpDefragmenter;
use crate::registry::ServiceRegistry;
use crate::tcp::TcpReassembler;
use crate::time::Timestamp;

/// One captured packet, already stripped of its link-layer framing.
pub struct CapturedPacket {
    pub ip_bytes: Vec<u8>,
    pub ts: Timestamp,
}

/// A whole, reassembled IPv4 datagram handed from ip-assembly to dispatch.
struct AssembledDatagram {
    bytes: Vec<u8>,
    ts: Timestamp,
}

/// Spawns the ip-assembly and dispatch-pool tasks and returns the channel the
/// capture loop feeds packets into, plus the channel the sink loop reads
/// breakdowns from. The caller owns both ends and is responsible for driving
/// (or spawning) its own capture and sink loops.
pub fn spawn(
    config: Config,
    registry: Arc<ServiceRegistry>,
    shutdown: CancellationToken,
) -> (mpsc::Sender<CapturedPacket>, mpsc::Receiver<TcpBreakdown>) {
    let (capture_tx, capture_rx) = mpsc::channel::<CapturedPacket>(4096);
    let (sink_tx, sink_rx) = mpsc::channel::<TcpBreakdown>(4096);

    let mut dispatch_txs = Vec::with_capacity(config.dispatch_workers);
    for worker in 0..config.dispatch_workers {
        let (tx, rx) = mpsc::channel::<AssembledDatagram>(1024);
        dispatch_txs.push(tx);
        let worker_capacity = config.connection_table_capacity / config.dispatch_workers.max(1);
        let registry = registry.clone();
        let sink_tx = sink_tx.clone();
        let shutdown = shutdown.clone();
        let config = config.clone();
        tokio::spawn(dispatch_task(
            worker,
            rx,
            registry,
            sink_tx,
            shutdown,
            config,
            worker_capacity,
        ));
    }

    tokio::spawn(ip_assembly_task(
        capture_rx,
        dispatch_txs,
        registry,
        shutdown,
        config,
    ));

    (capture_tx, sink_rx)
}

async fn ip_assembly_task(
    mut capture_rx: mpsc::Receiver<CapturedPacket>,
    dispatch_txs: Vec<mpsc::Sender<AssembledDatagram>>,
    registry: Arc<ServiceRegistry>,
    shutdown: CancellationToken,
    config: Config,
) {
    let mut defrag = IpDefragmenter::with_config(&config);
    loop {
        let packet = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            packet = capture_rx.recv() => match packet {
                Some(p) => p,
                None => break,
            },
        };

        let Some(whole) = defrag.defragment(&packet.ip_bytes, packet.ts, &registry) else {
            continue;
        };

        let Some(worker) = dispatch_worker_for(&whole, dispatch_txs.len()) else {
            continue;
        };

        let datagram = AssembledDatagram { bytes: whole, ts: packet.ts };
        if dispatch_txs[worker].send(datagram).await.is_err() {
            warn!(worker, "dispatch task gone, dropping datagram");
        }
    }
    info!("ip-assembly task shutting down");
}

/// Hashes the connection's 4-tuple so every packet belonging to the same
/// connection always lands on the same dispatch task — the property that
/// lets each task own its connections without locking.
fn dispatch_worker_for(ip_bytes: &[u8], worker_count: usize) -> Option<usize> {
    use crate::ip::header;
    use crate::tcp::header as tcp_header;
    use std::hash::{Hash, Hasher};

    if worker_count == 0 {
        return None;
    }
    let iph = header::parse(ip_bytes).ok()?;
    let hlen = iph.header_len();
    let tcp_bytes = ip_bytes.get(hlen..)?;
    let tcph = tcp_header::parse(tcp_bytes).ok()?;

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    let (lo_ip, hi_ip, lo_port, hi_port) = if iph.src < iph.dst {
        (iph.src, iph.dst, tcph.src_port, tcph.dst_port)
    } else {
        (iph.dst, iph.src, tcph.dst_port, tcph.src_port)
    };
    lo_ip.hash(&mut hasher);
    hi_ip.hash(&mut hasher);
    lo_port.hash(&mut hasher);
    hi_port.hash(&mut hasher);
    Some((hasher.finish() as usize) % worker_count)
}

async fn dispatch_task(
    worker: usize,
    mut rx: mpsc::Receiver<AssembledDatagram>,
    registry: Arc<ServiceRegistry>,
    sink_tx: mpsc::Sender<TcpBreakdown>,
    shutdown: CancellationToken,
    config: Config,
    capacity: usize,
) {
    let mut reassembler = TcpReassembler::with_config(&config, capacity.max(1));
    loop {
        let datagram = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            datagram = rx.recv() => match datagram {
                Some(d) => d,
                None => break,
            },
        };

        for breakdown in reassembler.on_ip(&datagram.bytes, datagram.ts, &registry) {
            if sink_tx.send(breakdown).await.is_err() {
                warn!(worker, "sink task gone, dropping breakdown");
                return;
            }
        }
    }
    info!(worker, "dispatch task shutting down");
}
