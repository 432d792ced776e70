//! One direction of a TCP connection's byte stream.
//!
//! The source this is grounded on (`original_source/src/protocol/tcp_packet.h`)
//! gives each host struct two jobs: `snd` fields track that host's own
//! sequence space, while the *same* struct doubles as `rcv` — the buffer the
//! **peer's** bytes land in — with call sites passing `&a_tcp->client` or
//! `&a_tcp->server` depending on packet direction. That reuse is a C
//! optimization (two structs instead of four), not a semantic requirement.
//!
//! Here a `HalfStream` owns exactly one direction's byte stream end to end:
//! its own sequence counters *and* the receive buffer those counters index
//! into. `EXP_SEQ` becomes `self.first_data_seq + self.count +
//! self.urg_count` — no cross-referencing the peer struct required. Flow
//! control is the one place a real cross-reference remains (whether a
//! segment is inside the window the *peer* advertised), and the reassembler
//! expresses that as a read of two plain fields rather than aliased pointers.

use std::collections::VecDeque;

use crate::tcp::header::TcpHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    Close,
    SynSent,
    SynRecv,
    Established,
    FinSent,
    FinConfirmed,
    Closing,
}

/// An out-of-order segment waiting for its predecessor bytes to arrive.
#[derive(Debug, Clone)]
pub struct Skbuff {
    pub seq: u32,
    pub bytes: Vec<u8>,
    pub fin: bool,
    pub urg: bool,
    pub urg_ptr: u16,
}

#[derive(Debug, Clone)]
pub struct HalfStream {
    pub sub_state: HalfState,

    pub seq: u32,
    pub ack_seq: u32,
    pub first_data_seq: u32,

    /// Bytes appended to the stream so far, offered to the parser or still
    /// queued for it. Draining consumed bytes off the front keeps this equal
    /// to `count - offset`; `Vec`'s own amortized-doubling growth already
    /// satisfies the "grow geometrically when short" requirement.
    buffer: VecDeque<u8>,
    pub count: u64,
    pub offset: u64,
    pub urg_count: u64,

    pub out_of_order: Vec<Skbuff>,

    pub urg_ptr: Option<u16>,

    pub ts_on: bool,
    pub ws_on: bool,
    pub wscale: u8,
    pub mss: u16,
    pub window: u16,
    last_ts: Option<u32>,
}

impl Default for HalfStream {
    fn default() -> Self {
        Self {
            sub_state: HalfState::Close,
            seq: 0,
            ack_seq: 0,
            first_data_seq: 0,
            buffer: VecDeque::new(),
            count: 0,
            offset: 0,
            urg_count: 0,
            out_of_order: Vec::new(),
            urg_ptr: None,
            ts_on: false,
            ws_on: false,
            wscale: 1,
            mss: 0,
            window: 0,
            last_ts: None,
        }
    }
}

impl HalfStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes this half from the SYN (client) or SYN/ACK (server) that
    /// opened the connection: `seq`/`first_data_seq` one past the SYN, and
    /// negotiated options. `wscale` defaults to 1 when the peer sent no
    /// Window Scale option.
    pub fn init_from_syn(&mut self, header: &TcpHeader) {
        self.seq = header.seq.wrapping_add(1);
        self.first_data_seq = self.seq;
        self.ack_seq = header.ack_seq;
        self.window = header.window;
        self.mss = header.options.mss.unwrap_or(0);
        self.ws_on = header.options.window_scale.is_some();
        self.wscale = header.options.window_scale.unwrap_or(1).max(1);
        self.ts_on = header.options.timestamp.is_some();
        if let Some((tsval, _)) = header.options.timestamp {
            self.last_ts = Some(tsval);
        }
    }

    pub fn exp_seq(&self) -> u32 {
        self.first_data_seq
            .wrapping_add(self.count as u32)
            .wrapping_add(self.urg_count as u32)
    }

    /// `true` if `ts` is older than the last timestamp seen from this same
    /// sender. Ties are accepted (RFC 1323 permits an unchanged echoed
    /// value), only a strictly smaller value is a PAWS violation — see
    /// the Open Question resolution in DESIGN.md.
    pub fn paws_violation(&self, ts: u32) -> bool {
        match self.last_ts {
            Some(last) => (ts.wrapping_sub(last) as i32) < 0,
            None => false,
        }
    }

    pub fn record_timestamp(&mut self, ts: u32) {
        self.last_ts = Some(ts);
    }

    /// Appends already-in-order bytes to the receive buffer and advances
    /// `count`. Does not touch `first_data_seq`/`seq`.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied());
        self.count += bytes.len() as u64;
    }

    /// Counts the urgent byte toward `exp_seq` without enqueuing it in the
    /// data buffer — it reaches the parser exclusively through `on_urgent`,
    /// never through the regular `on_data` stream.
    pub fn count_urgent_byte(&mut self) {
        self.urg_count += 1;
    }

    /// Hands up to `max_len` unconsumed bytes to the caller as a contiguous
    /// slice view; the caller reports back how many were actually consumed
    /// via `consume`. `VecDeque` can't expose a single contiguous slice
    /// across a wraparound, so this makes the queue contiguous first — rare
    /// in practice since the parser usually drains faster than data arrives.
    pub fn pending(&mut self) -> &[u8] {
        self.buffer.make_contiguous()
    }

    pub fn consume(&mut self, n: usize) {
        self.buffer.drain(0..n);
        self.offset += n as u64;
    }

    pub fn enqueue_out_of_order(&mut self, skb: Skbuff) {
        let pos = self.out_of_order.partition_point(|s| s.seq < skb.seq);
        self.out_of_order.insert(pos, skb);
    }

    /// Drains buffered out-of-order segments that have become contiguous
    /// with the current `exp_seq`, appending their bytes in order. Returns
    /// `true` if any drained segment carried `FIN`.
    pub fn drain_contiguous(&mut self) -> bool {
        let mut saw_fin = false;
        loop {
            let exp = self.exp_seq();
            let Some(idx) = self
                .out_of_order
                .iter()
                .position(|s| seq_leq(s.seq, exp))
            else {
                break;
            };
            let skb = self.out_of_order.remove(idx);
            let skb_end = skb.seq.wrapping_add(skb.bytes.len() as u32);
            if seq_leq(skb_end, exp) {
                // fully covered by data we already have; drop
                if skb.fin {
                    saw_fin = true;
                }
                continue;
            }
            let lost = exp.wrapping_sub(skb.seq) as usize;
            self.push_bytes(&skb.bytes[lost.min(skb.bytes.len())..]);
            if skb.fin {
                saw_fin = true;
            }
        }
        saw_fin
    }
}

/// Sequence-number comparison tolerant of wraparound, `a <= b`.
pub fn seq_leq(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) >= 0
}

pub fn seq_lt(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_seq_advances_with_pushed_bytes() {
        let mut h = HalfStream::new();
        h.first_data_seq = 100;
        h.push_bytes(b"abcd");
        assert_eq!(h.exp_seq(), 104);
    }

    #[test]
    fn urgent_byte_counts_toward_exp_seq() {
        let mut h = HalfStream::new();
        h.first_data_seq = 100;
        h.count_urgent_byte();
        assert_eq!(h.exp_seq(), 101);
        assert_eq!(h.urg_count, 1);
    }

    #[test]
    fn paws_rejects_strictly_smaller_timestamp_only() {
        let mut h = HalfStream::new();
        h.record_timestamp(100);
        assert!(!h.paws_violation(100)); // equal is accepted
        assert!(!h.paws_violation(101));
        assert!(h.paws_violation(99));
    }

    #[test]
    fn out_of_order_segment_drains_once_contiguous() {
        let mut h = HalfStream::new();
        h.first_data_seq = 0;
        h.enqueue_out_of_order(Skbuff {
            seq: 4,
            bytes: b"world".to_vec(),
            fin: false,
            urg: false,
            urg_ptr: 0,
        });
        h.push_bytes(b"ab");
        assert!(!h.drain_contiguous());
        h.push_bytes(b"cd");
        h.drain_contiguous();
        assert_eq!(h.pending(), b"abcdworld");
    }

    #[test]
    fn consume_advances_offset_and_drops_front_bytes() {
        let mut h = HalfStream::new();
        h.push_bytes(b"abcdef");
        h.consume(3);
        assert_eq!(h.pending(), b"def");
        assert_eq!(h.offset, 3);
    }
}
