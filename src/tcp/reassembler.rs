//! Per-connection TCP state machine: connection acquisition,
//! the handshake/teardown table, packet acceptance filters, and in-order
//! delivery to the parser contract.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, warn};

use crate::breakdown::{
    build_tcp_breakdown, ProtoBreakdown, TcpBreakdown, TcpFields, TcpState,
};
use crate::error::Result;
use crate::parser::{Direction, ParserKind, ParserState, SessionState};
use crate::registry::ServiceRegistry;
use crate::tcp::half_stream::{seq_leq, seq_lt, HalfStream, HalfState, Skbuff};
use crate::tcp::header::{self, TcpFlags, TcpHeader};
use crate::time::Timestamp;
use crate::ip::header as ip_header;

const CLOSING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CAPACITY: usize = 65_535;
const EVICTION_LOAD_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub server_ip: IpAddr,
    pub server_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Init,
    DataExchanging,
    Closing,
}

struct Connection {
    key: ConnKey,
    connection_id: u64,
    state: ConnState,
    client: HalfStream,
    server: HalfStream,
    parser_kind: ParserKind,
    parser_state: ParserState,
    stats: TcpFields,
    close_deadline_sec: Option<u64>,
    insertion_seq: u64,
    syn_sent_at: Timestamp,
}

impl Connection {
    fn half(&mut self, dir: Direction) -> (&mut HalfStream, &mut HalfStream) {
        match dir {
            Direction::FromClient => (&mut self.client, &mut self.server),
            Direction::FromServer => (&mut self.server, &mut self.client),
        }
    }
}

pub struct TcpReassembler {
    connections: HashMap<ConnKey, Connection>,
    capacity: usize,
    eviction_load_factor: f64,
    closing_timeout_secs: u64,
    insertion_counter: u64,
}

impl TcpReassembler {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: HashMap::new(),
            capacity,
            eviction_load_factor: EVICTION_LOAD_FACTOR,
            closing_timeout_secs: CLOSING_TIMEOUT_SECS,
            insertion_counter: 0,
        }
    }

    pub fn with_config(config: &crate::config::Config, capacity: usize) -> Self {
        Self {
            connections: HashMap::new(),
            capacity,
            eviction_load_factor: config.eviction_threshold,
            closing_timeout_secs: config.tcp_closing_timeout_secs,
            insertion_counter: 0,
        }
    }

    pub fn on_ip(
        &mut self,
        ip_bytes: &[u8],
        ts: Timestamp,
        registry: &ServiceRegistry,
    ) -> Vec<TcpBreakdown> {
        let mut out = Vec::new();
        self.sweep_timeouts(ts, &mut out);

        let Ok(iph) = ip_header::parse(ip_bytes) else {
            return out;
        };
        if iph.protocol != ip_header::PROTOCOL_TCP {
            return out;
        }
        let hlen = iph.header_len();
        let Some(tcp_bytes) = ip_bytes.get(hlen..iph.total_length as usize) else {
            return out;
        };
        let Ok(tcph) = header::parse(tcp_bytes) else {
            return out;
        };
        let tcp_hlen = tcph.header_len();
        let Some(payload) = tcp_bytes.get(tcp_hlen..) else {
            return out;
        };

        let fwd_key = ConnKey {
            client_ip: IpAddr::V4(iph.src),
            client_port: tcph.src_port,
            server_ip: IpAddr::V4(iph.dst),
            server_port: tcph.dst_port,
        };
        let rev_key = ConnKey {
            client_ip: IpAddr::V4(iph.dst),
            client_port: tcph.dst_port,
            server_ip: IpAddr::V4(iph.src),
            server_port: tcph.src_port,
        };

        let (key, dir) = if self.connections.contains_key(&fwd_key) {
            (fwd_key, Direction::FromClient)
        } else if self.connections.contains_key(&rev_key) {
            (rev_key, Direction::FromServer)
        } else {
            if tcph.flags.contains(TcpFlags::SYN)
                && !tcph.flags.contains(TcpFlags::ACK)
                && !tcph.flags.contains(TcpFlags::RST)
            {
                if let Some(entry) = registry.lookup(IpAddr::V4(iph.dst), tcph.dst_port) {
                    self.open_connection(fwd_key, &tcph, ts, entry.parser);
                }
            }
            return out;
        };

        self.process_segment(&key, dir, &tcph, payload, ts, &mut out);
        out
    }

    fn open_connection(
        &mut self,
        key: ConnKey,
        syn: &TcpHeader,
        ts: Timestamp,
        parser_kind: ParserKind,
    ) {
        self.evict_if_over_capacity();

        let mut client = HalfStream::new();
        client.init_from_syn(syn);
        client.sub_state = HalfState::SynSent;

        let connection_id = crate::breakdown::next_connection_id();
        self.insertion_counter += 1;
        let conn = Connection {
            key,
            connection_id,
            state: ConnState::Init,
            client,
            server: HalfStream::new(),
            parser_kind,
            parser_state: parser_kind.new_state(),
            stats: TcpFields::default(),
            close_deadline_sec: None,
            insertion_seq: self.insertion_counter,
            syn_sent_at: ts,
        };
        debug!(connection_id, "tcp connection opened on lone SYN");
        self.connections.insert(key, conn);
    }

    fn evict_if_over_capacity(&mut self) {
        let threshold = (self.capacity as f64 * self.eviction_load_factor) as usize;
        if self.connections.len() < threshold {
            return;
        }
        if let Some(&oldest_key) = self
            .connections
            .values()
            .min_by_key(|c| c.insertion_seq)
            .map(|c| &c.key)
        {
            warn!("connection table at capacity, evicting oldest connection");
            self.connections.remove(&oldest_key);
        }
    }

    fn sweep_timeouts(&mut self, ts: Timestamp, out: &mut Vec<TcpBreakdown>) {
        let expired: Vec<ConnKey> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                c.close_deadline_sec
                    .map(|deadline| ts.sec >= deadline)
                    .unwrap_or(false)
            })
            .map(|(k, _)| *k)
            .collect();

        for key in expired {
            if let Some(mut conn) = self.connections.remove(&key) {
                out.push(finish_breakdown(&mut conn, TcpState::Closed, ts));
            }
        }
    }

    fn process_segment(
        &mut self,
        key: &ConnKey,
        dir: Direction,
        h: &TcpHeader,
        payload: &[u8],
        ts: Timestamp,
        out: &mut Vec<TcpBreakdown>,
    ) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };

        if h.flags.contains(TcpFlags::RST) {
            let was_connected = conn.state != ConnState::Init;
            let code = reset_code(dir, was_connected);
            if was_connected {
                conn.parser_kind.on_reset(dir, &mut conn.parser_state, ts);
            }
            let mut conn = self.connections.remove(key).expect("just matched");
            out.push(finish_breakdown(&mut conn, code, ts));
            return;
        }

        if conn.state == ConnState::Init {
            self.process_handshake(key, dir, h, ts, out);
            return;
        }

        self.process_established(key, dir, h, payload, ts, out);
    }

    fn process_handshake(
        &mut self,
        key: &ConnKey,
        dir: Direction,
        h: &TcpHeader,
        ts: Timestamp,
        out: &mut Vec<TcpBreakdown>,
    ) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };

        match dir {
            Direction::FromClient => {
                if h.flags.contains(TcpFlags::SYN) && conn.client.sub_state == HalfState::SynSent {
                    conn.stats.retries += 1;
                    conn.stats.retries_latency = ts.millis_since(conn.syn_sent_at);
                    conn.stats.retransmitted_pkts += 1;
                    return;
                }
                if h.flags.contains(TcpFlags::ACK)
                    && conn.server.sub_state == HalfState::SynRecv
                    && h.ack_seq == conn.server.seq
                {
                    conn.client.sub_state = HalfState::Established;
                    conn.server.sub_state = HalfState::Established;
                    conn.client.ack_seq = h.ack_seq;
                    conn.client.window = h.window;
                    conn.state = ConnState::DataExchanging;
                    conn.stats.mss = negotiated_mss(conn.client.mss, conn.server.mss);
                    conn.stats.conn_latency = ts.millis_since(conn.syn_sent_at);
                    conn.parser_kind.on_established(&mut conn.parser_state, ts);
                    out.push(build_connected_breakdown(conn, ts));
                }
            }
            Direction::FromServer => {
                if h.flags.contains(TcpFlags::SYN) && h.flags.contains(TcpFlags::ACK) {
                    if conn.server.sub_state == HalfState::SynRecv {
                        conn.stats.dup_synacks += 1;
                        conn.stats.dup_acks += 1;
                        return;
                    }
                    if conn.client.sub_state == HalfState::SynSent && h.ack_seq == conn.client.seq
                    {
                        conn.server.init_from_syn(h);
                        conn.server.sub_state = HalfState::SynRecv;
                        if !h.options.window_scale.is_some() {
                            conn.server.wscale = 1;
                        }
                    }
                }
            }
        }
    }

    fn process_established(
        &mut self,
        key: &ConnKey,
        dir: Direction,
        h: &TcpHeader,
        payload: &[u8],
        ts: Timestamp,
        out: &mut Vec<TcpBreakdown>,
    ) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };

        conn.stats.total_pkts += 1;
        if payload.len() == 1 {
            conn.stats.tiny_pkts += 1;
        }
        if h.window == 0 {
            conn.stats.zero_windows += 1;
        }

        let (peer_ack_seq, peer_window, peer_wscale) = {
            let (_, peer) = conn.half(dir);
            (peer.ack_seq, peer.window, peer.wscale)
        };
        let peer_low = peer_ack_seq;
        let peer_high = peer_ack_seq
            .wrapping_add((peer_window as u32).saturating_mul(peer_wscale.max(1) as u32));

        let seg_end = h.seq.wrapping_add(payload.len() as u32);
        if !payload.is_empty() {
            if seq_leq(seg_end, peer_low) && seg_end != peer_low {
                conn.stats.retransmitted_pkts += 1;
                return;
            }
            if seq_lt(peer_high, h.seq) {
                return; // fully right of the advertised window
            }
        }

        if h.options.timestamp.is_some() {
            let (mine, peer) = conn.half(dir);
            if mine.ts_on && peer.ts_on {
                let (tsval, _) = h.options.timestamp.expect("checked above");
                if mine.paws_violation(tsval) {
                    conn.stats.paws_pkts += 1;
                    return;
                }
            }
        }

        let is_pure_ack = payload.is_empty() && !h.flags.contains(TcpFlags::FIN);
        if is_pure_ack {
            let mine = match dir {
                Direction::FromClient => &mut conn.client,
                Direction::FromServer => &mut conn.server,
            };
            if h.ack_seq == mine.ack_seq {
                conn.stats.dup_acks += 1;
            }
            mine.ack_seq = h.ack_seq;
            mine.window = h.window;
            return;
        }

        self.deliver_in_order(key, dir, h, payload, ts, out);

        if let Some(conn) = self.connections.get_mut(key) {
            let mine = match dir {
                Direction::FromClient => &mut conn.client,
                Direction::FromServer => &mut conn.server,
            };
            mine.ack_seq = h.ack_seq;
            mine.window = h.window;
        }

        if h.flags.contains(TcpFlags::FIN) {
            self.handle_fin_flag(key, dir, ts, out);
        }
        self.handle_ack_of_fin(key, dir, h, ts, out);
    }

    fn deliver_in_order(
        &mut self,
        key: &ConnKey,
        dir: Direction,
        h: &TcpHeader,
        payload: &[u8],
        ts: Timestamp,
        out: &mut Vec<TcpBreakdown>,
    ) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let exp = {
            let (mine, _) = conn.half(dir);
            mine.exp_seq()
        };

        if seq_leq(h.seq, exp) {
            if seq_lt(h.seq, exp) {
                conn.stats.retransmitted_pkts += 1;
            }
            let fin_phantom = if h.flags.contains(TcpFlags::FIN) { 1 } else { 0 };
            let seg_end = h.seq.wrapping_add(payload.len() as u32).wrapping_add(fin_phantom);
            if seq_lt(exp, seg_end) {
                if let Some((tsval, _)) = h.options.timestamp {
                    let (mine, _) = conn.half(dir);
                    mine.record_timestamp(tsval);
                }
                let lost = exp.wrapping_sub(h.seq) as usize;
                let contributed = &payload[lost.min(payload.len())..];
                self.append_with_urgent(conn, dir, h, contributed, exp, ts);
            }
        } else {
            let (mine, _) = conn.half(dir);
            mine.enqueue_out_of_order(Skbuff {
                seq: h.seq,
                bytes: payload.to_vec(),
                fin: h.flags.contains(TcpFlags::FIN),
                urg: h.flags.contains(TcpFlags::URG),
                urg_ptr: h.urg_ptr,
            });
            conn.stats.out_of_order_pkts += 1;
            if h.flags.contains(TcpFlags::FIN) {
                conn.state = ConnState::Closing;
                conn.close_deadline_sec = Some(ts.sec + self.closing_timeout_secs);
            }
            return;
        }

        self.feed_parser(key, dir, ts, out);
    }

    /// Appends `bytes` (the already-trimmed, in-order contribution of this
    /// segment, whose first byte sits at sequence number `seg_start_exp`) to
    /// the receiving half-stream, splitting around an in-segment urgent byte
    /// then drains any out-of-order segments that become
    /// contiguous with the new `exp_seq`.
    ///
    /// `urg_ptr` is taken as the offset from `h.seq` to the urgent byte
    /// itself (BSD convention), so its absolute sequence number is
    /// `h.seq + urg_ptr`.
    fn append_with_urgent(
        &self,
        conn: &mut Connection,
        dir: Direction,
        h: &TcpHeader,
        bytes: &[u8],
        seg_start_exp: u32,
        ts: Timestamp,
    ) {
        let mine_mut = |conn: &mut Connection| match dir {
            Direction::FromClient => &mut conn.client,
            Direction::FromServer => &mut conn.server,
        };

        let urgent_index = if h.flags.contains(TcpFlags::URG) {
            let abs_urgent_seq = h.seq.wrapping_add(h.urg_ptr as u32);
            let idx = abs_urgent_seq.wrapping_sub(seg_start_exp) as usize;
            (idx < bytes.len()).then_some(idx)
        } else {
            None
        };

        match urgent_index {
            Some(idx) => {
                let (pre, rest) = bytes.split_at(idx);
                let (&urgent_byte, post) = rest.split_first().expect("idx < bytes.len()");
                mine_mut(conn).push_bytes(pre);
                mine_mut(conn).count_urgent_byte();
                conn.parser_kind
                    .on_urgent(dir, urgent_byte, &mut conn.parser_state, ts);
                mine_mut(conn).push_bytes(post);
            }
            None => {
                mine_mut(conn).push_bytes(bytes);
            }
        }
        mine_mut(conn).drain_contiguous();
    }

    fn feed_parser(
        &mut self,
        key: &ConnKey,
        dir: Direction,
        ts: Timestamp,
        out: &mut Vec<TcpBreakdown>,
    ) {
        loop {
            let Some(conn) = self.connections.get_mut(key) else { return };
            let pending_len = {
                let (mine, _) = conn.half(dir);
                mine.pending().len()
            };
            if pending_len == 0 {
                return;
            }
            let result: Result<(usize, SessionState)> = {
                let (mine, _) = conn.half(dir);
                let bytes = mine.pending().to_vec();
                conn.parser_kind
                    .on_data(dir, &bytes, &mut conn.parser_state, ts)
            };
            let Ok((consumed, session_state)) = result else {
                // malformed protocol data: drop the unconsumed tail so the
                // connection doesn't spin retrying the same bytes forever.
                let (mine, _) = conn.half(dir);
                let len = mine.pending().len();
                mine.consume(len);
                return;
            };
            if consumed == 0 && session_state == SessionState::Active {
                return;
            }
            {
                let (mine, _) = conn.half(dir);
                mine.consume(consumed);
            }
            if session_state == SessionState::Done {
                if let Some(bkd) = conn.parser_kind.build_breakdown(&mut conn.parser_state, ts) {
                    out.push(build_tcp_breakdown(
                        ts.as_millis(),
                        protocol_tag(bkd.clone()),
                        key.client_ip,
                        key.client_port,
                        key.server_ip,
                        key.server_port,
                        &conn.stats,
                        bkd,
                    ));
                }
                conn.stats = TcpFields {
                    connection_id: conn.stats.connection_id,
                    mss: conn.stats.mss,
                    conn_latency: conn.stats.conn_latency,
                    ..TcpFields::default()
                };
            }
            if consumed == 0 {
                return;
            }
        }
    }

    fn handle_fin_flag(
        &mut self,
        key: &ConnKey,
        dir: Direction,
        ts: Timestamp,
        out: &mut Vec<TcpBreakdown>,
    ) {
        let Some(conn) = self.connections.get_mut(key) else { return };
        {
            let (mine, _) = conn.half(dir);
            mine.sub_state = HalfState::FinSent;
        }
        conn.state = ConnState::Closing;
        conn.close_deadline_sec = Some(ts.sec + self.closing_timeout_secs);
        let session_state = conn.parser_kind.on_fin(dir, &mut conn.parser_state, ts);
        if session_state == SessionState::Done {
            if let Some(bkd) = conn.parser_kind.build_breakdown(&mut conn.parser_state, ts) {
                out.push(build_tcp_breakdown(
                    ts.as_millis(),
                    protocol_tag(bkd.clone()),
                    key.client_ip,
                    key.client_port,
                    key.server_ip,
                    key.server_port,
                    &conn.stats,
                    bkd,
                ));
            }
        }
    }

    fn handle_ack_of_fin(
        &mut self,
        key: &ConnKey,
        dir: Direction,
        h: &TcpHeader,
        ts: Timestamp,
        out: &mut Vec<TcpBreakdown>,
    ) {
        let Some(conn) = self.connections.get_mut(key) else { return };
        if conn.state != ConnState::Closing {
            return;
        }
        let (_, peer) = conn.half(dir);
        if peer.sub_state == HalfState::FinSent && seq_leq(peer.exp_seq().wrapping_add(1), h.ack_seq)
        {
            peer.sub_state = HalfState::FinConfirmed;
        }
        if conn.client.sub_state == HalfState::FinConfirmed
            && conn.server.sub_state == HalfState::FinConfirmed
        {
            let mut conn = self.connections.remove(key).expect("just matched");
            out.push(finish_breakdown(&mut conn, TcpState::Closed, ts));
        }
    }
}

impl Default for TcpReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// The smaller of the two advertised MSS values, falling back to whichever
/// side actually sent one when the other omitted the option.
fn negotiated_mss(client_mss: u16, server_mss: u16) -> u16 {
    match (client_mss, server_mss) {
        (0, s) => s,
        (c, 0) => c,
        (c, s) => c.min(s),
    }
}

fn reset_code(dir: Direction, was_connected: bool) -> TcpState {
    match (dir, was_connected) {
        (Direction::FromClient, false) => TcpState::ResetType1,
        (Direction::FromServer, false) => TcpState::ResetType2,
        (Direction::FromClient, true) => TcpState::ResetType3,
        (Direction::FromServer, true) => TcpState::ResetType4,
    }
}

fn protocol_tag(bkd: ProtoBreakdown) -> &'static str {
    match bkd {
        ProtoBreakdown::Http(_) => "http",
        ProtoBreakdown::Mysql(_) => "mysql",
        ProtoBreakdown::None(_) => "tcp",
    }
}

fn build_connected_breakdown(conn: &mut Connection, ts: Timestamp) -> TcpBreakdown {
    conn.stats.state = TcpState::Connected;
    conn.stats.connection_id = conn.connection_id;
    build_tcp_breakdown(
        ts.as_millis(),
        "tcp",
        conn.key.client_ip,
        conn.key.client_port,
        conn.key.server_ip,
        conn.key.server_port,
        &conn.stats,
        ProtoBreakdown::None(crate::breakdown::Empty {}),
    )
}

fn finish_breakdown(conn: &mut Connection, state: TcpState, ts: Timestamp) -> TcpBreakdown {
    conn.stats.state = state;
    conn.stats.connection_id = conn.connection_id;
    let bkd = conn
        .parser_kind
        .build_breakdown(&mut conn.parser_state, ts)
        .unwrap_or(ProtoBreakdown::None(crate::breakdown::Empty {}));
    let tag = protocol_tag(bkd.clone());
    build_tcp_breakdown(
        ts.as_millis(),
        tag,
        conn.key.client_ip,
        conn.key.client_port,
        conn.key.server_ip,
        conn.key.server_port,
        &conn.stats,
        bkd,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserKind;
    use crate::registry::ServiceEntry;
    use std::net::Ipv4Addr;

    fn registry() -> ServiceRegistry {
        let reg = ServiceRegistry::new();
        reg.replace(vec![ServiceEntry {
            ip: "10.0.0.2".parse().unwrap(),
            port: 80,
            protocol_tag: "http".to_string(),
            parser: ParserKind::Http,
        }]);
        reg
    }

    fn ipv4_tcp(
        src: [u8; 4],
        dst: [u8; 4],
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        window: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[8..12].copy_from_slice(&ack.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = flags;
        tcp[14..16].copy_from_slice(&window.to_be_bytes());
        tcp.extend_from_slice(payload);

        let mut ip = vec![0u8; 20];
        ip[0] = (4 << 4) | 5;
        let total_len = 20 + tcp.len();
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[9] = ip_header::PROTOCOL_TCP;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);
        ip.extend_from_slice(&tcp);
        ip
    }

    const CLIENT: [u8; 4] = [10, 0, 0, 1];
    const SERVER: [u8; 4] = [10, 0, 0, 2];
    const SYN: u8 = TcpFlags::SYN.bits();
    const SYN_ACK: u8 = TcpFlags::SYN.bits() | TcpFlags::ACK.bits();
    const ACK: u8 = TcpFlags::ACK.bits();
    const PSH_ACK: u8 = TcpFlags::PSH.bits() | TcpFlags::ACK.bits();

    fn ts(sec: u64) -> Timestamp {
        Timestamp::new(sec, 0)
    }

    #[test]
    fn full_handshake_reaches_data_exchanging() {
        let mut r = TcpReassembler::new();
        let reg = registry();

        let syn = ipv4_tcp(CLIENT, SERVER, 4000, 80, 100, 0, SYN, 65535, &[]);
        assert!(r.on_ip(&syn, ts(0), &reg).is_empty());

        let synack = ipv4_tcp(SERVER, CLIENT, 80, 4000, 500, 101, SYN_ACK, 65535, &[]);
        assert!(r.on_ip(&synack, ts(0), &reg).is_empty());

        let ack = ipv4_tcp(CLIENT, SERVER, 4000, 80, 101, 501, ACK, 65535, &[]);
        let breakdowns = r.on_ip(&ack, ts(0), &reg);
        assert_eq!(breakdowns.len(), 1);
        assert_eq!(breakdowns[0].tcp_state, TcpState::Connected.as_code());
    }

    #[test]
    fn duplicate_client_syn_counts_as_retry() {
        let mut r = TcpReassembler::new();
        let reg = registry();
        let syn = ipv4_tcp(CLIENT, SERVER, 4001, 80, 200, 0, SYN, 65535, &[]);
        r.on_ip(&syn, ts(0), &reg);
        r.on_ip(&syn, ts(1), &reg);
        let key = ConnKey {
            client_ip: IpAddr::V4(Ipv4Addr::from(CLIENT)),
            client_port: 4001,
            server_ip: IpAddr::V4(Ipv4Addr::from(SERVER)),
            server_port: 80,
        };
        let conn = r.connections.get(&key).unwrap();
        assert_eq!(conn.stats.retries, 1);
    }

    #[test]
    fn http_request_then_response_emits_breakdown() {
        let mut r = TcpReassembler::new();
        let reg = registry();

        r.on_ip(&ipv4_tcp(CLIENT, SERVER, 4002, 80, 1, 0, SYN, 65535, &[]), ts(0), &reg);
        r.on_ip(
            &ipv4_tcp(SERVER, CLIENT, 80, 4002, 1, 2, SYN_ACK, 65535, &[]),
            ts(0),
            &reg,
        );
        r.on_ip(&ipv4_tcp(CLIENT, SERVER, 4002, 80, 2, 2, ACK, 65535, &[]), ts(0), &reg);

        let req = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        r.on_ip(
            &ipv4_tcp(CLIENT, SERVER, 4002, 80, 2, 2, PSH_ACK, 65535, req),
            ts(1),
            &reg,
        );

        let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
        let out = r.on_ip(
            &ipv4_tcp(
                SERVER,
                CLIENT,
                80,
                4002,
                2,
                2 + req.len() as u32,
                PSH_ACK,
                65535,
                resp,
            ),
            ts(2),
            &reg,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].protocol, "http");
    }

    #[test]
    fn rst_before_established_is_reset_type1_or_2() {
        let mut r = TcpReassembler::new();
        let reg = registry();
        r.on_ip(&ipv4_tcp(CLIENT, SERVER, 4003, 80, 1, 0, SYN, 65535, &[]), ts(0), &reg);
        let rst = ipv4_tcp(SERVER, CLIENT, 80, 4003, 1, 2, TcpFlags::RST.bits(), 0, &[]);
        let out = r.on_ip(&rst, ts(0), &reg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tcp_state, TcpState::ResetType2.as_code());
    }
}
