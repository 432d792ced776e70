//! IP defragmenter: per-flow fragment queues, emitting whole datagrams.
//!
//! Owned by a single task (the ip-assembly task) — no locking, matching the
//! "one task, one owned map" rule the rest of the pipeline follows. Expiry
//! is swept opportunistically on every call rather than by a background
//! timer, deliberately with no background sweeper task; grounded on
//! `original_source/src/protocol/ip_packet.c`'s expire-timeout list, which
//! the original also drives off packet arrival rather than a wall clock.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tracing::{debug, warn};

use crate::ip::header::{self, Ipv4Header};
use crate::registry::ServiceRegistry;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ip_id: u16,
}

#[derive(Debug, Clone)]
struct Fragment {
    offset: usize,
    end: usize,
    bytes: Vec<u8>,
}

struct FragmentQueue {
    fragments: Vec<Fragment>,
    total_len: Option<usize>,
    header_template: Option<Vec<u8>>,
    expires_at_sec: u64,
}

impl FragmentQueue {
    fn new(expires_at_sec: u64) -> Self {
        Self {
            fragments: Vec::new(),
            total_len: None,
            header_template: None,
            expires_at_sec,
        }
    }

    /// Insert a fragment, clamping against overlap with its immediately
    /// previous and next queued neighbors (earlier bytes win).
    fn insert(&mut self, mut offset: usize, mut bytes: Vec<u8>) {
        let mut insert_at = self.fragments.len();
        for (i, existing) in self.fragments.iter().enumerate() {
            if existing.offset >= offset {
                insert_at = i;
                break;
            }
        }

        // Trim overlap with the immediately-previous fragment.
        if insert_at > 0 {
            let prev = &self.fragments[insert_at - 1];
            if prev.end > offset {
                let trim = prev.end - offset;
                if trim >= bytes.len() {
                    return; // fully covered already, drop
                }
                bytes.drain(0..trim);
                offset = prev.end;
            }
        }

        let mut end = offset + bytes.len();

        // Trim overlap with subsequent queued fragments.
        while insert_at < self.fragments.len() && self.fragments[insert_at].offset < end {
            let next = &self.fragments[insert_at];
            if next.offset <= offset {
                // fully shadowed by a fragment that starts no later
                return;
            }
            let keep = next.offset - offset;
            bytes.truncate(keep);
            end = offset + bytes.len();
            break;
        }

        if bytes.is_empty() {
            return;
        }

        self.fragments.insert(insert_at, Fragment { offset, end, bytes });
    }

    fn is_complete(&self) -> bool {
        let Some(total) = self.total_len else {
            return false;
        };
        let mut covered = 0usize;
        for frag in &self.fragments {
            if frag.offset > covered {
                return false;
            }
            covered = covered.max(frag.end);
        }
        covered >= total
    }

    fn assemble(&self) -> Vec<u8> {
        let total = self.total_len.unwrap_or(0);
        let mut out = vec![0u8; total];
        for frag in &self.fragments {
            let end = frag.end.min(total);
            if frag.offset < end {
                out[frag.offset..end].copy_from_slice(&frag.bytes[..end - frag.offset]);
            }
        }
        out
    }
}

pub const MAX_ASSEMBLED_SIZE: usize = 65_535;
const FRAGMENT_TTL_SECS: u64 = 30;

pub struct IpDefragmenter {
    queues: HashMap<FlowKey, FragmentQueue>,
    fragment_ttl_secs: u64,
    max_assembled_size: usize,
}

impl IpDefragmenter {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            fragment_ttl_secs: FRAGMENT_TTL_SECS,
            max_assembled_size: MAX_ASSEMBLED_SIZE,
        }
    }

    pub fn with_config(config: &crate::config::Config) -> Self {
        Self {
            queues: HashMap::new(),
            fragment_ttl_secs: config.fragment_ttl_secs,
            max_assembled_size: config.max_assembled_datagram,
        }
    }

    /// `defragment(ip_bytes, ts) -> Some(full_datagram) | None`.
    ///
    /// Checks IP version/ihl/total_length preconditions, fast-paths whole
    /// datagrams addressed to a registered service, and otherwise queues
    /// fragments until the run covers `[0, total_len)`.
    pub fn defragment(
        &mut self,
        ip_bytes: &[u8],
        ts: Timestamp,
        registry: &ServiceRegistry,
    ) -> Option<Vec<u8>> {
        self.sweep_expired(ts.sec);

        let h = header::parse(ip_bytes).ok()?;
        let hlen = h.header_len();

        if !h.more_fragments() && h.frag_byte_offset() == 0 {
            if !endpoint_registered(&h, ip_bytes, hlen, registry) {
                return None;
            }
            return Some(ip_bytes[..h.total_length as usize].to_vec());
        }

        let key = FlowKey { src: h.src, dst: h.dst, ip_id: h.identification };
        let ttl = self.fragment_ttl_secs;
        let queue = self
            .queues
            .entry(key)
            .or_insert_with(|| FragmentQueue::new(ts.sec + ttl));
        queue.expires_at_sec = ts.sec + ttl;

        let offset = h.frag_byte_offset();
        let payload = ip_bytes[hlen..h.total_length as usize].to_vec();
        let end = offset + payload.len();

        if offset == 0 {
            queue.header_template = Some(ip_bytes[..hlen].to_vec());
        }
        if !h.more_fragments() {
            queue.total_len = Some(end);
        }

        queue.insert(offset, payload);

        let max_size = self.max_assembled_size;
        if end > max_size || queue.total_len.map(|t| t > max_size).unwrap_or(false) {
            warn!(ip_id = h.identification, "dropping over-size assembled datagram");
            self.queues.remove(&key);
            return None;
        }

        if !queue.is_complete() {
            return None;
        }

        let queue = self.queues.remove(&key)?;
        let mut header_template = queue.header_template?;
        let assembled = queue.assemble();
        let total_len = header_template.len() + assembled.len();
        if total_len > max_size {
            return None;
        }

        header::rewrite_as_whole(&mut header_template, total_len as u16);
        header_template.extend_from_slice(&assembled);
        debug!(ip_id = h.identification, total_len, "datagram reassembled");
        Some(header_template)
    }

    fn sweep_expired(&mut self, now_sec: u64) {
        self.queues.retain(|_, q| q.expires_at_sec > now_sec);
    }
}

impl Default for IpDefragmenter {
    fn default() -> Self {
        Self::new()
    }
}

fn endpoint_registered(h: &Ipv4Header, ip_bytes: &[u8], hlen: usize, registry: &ServiceRegistry) -> bool {
    if h.protocol != header::PROTOCOL_TCP {
        return false;
    }
    if ip_bytes.len() < hlen + 4 {
        return false;
    }
    let src_port = u16::from_be_bytes([ip_bytes[hlen], ip_bytes[hlen + 1]]);
    let dst_port = u16::from_be_bytes([ip_bytes[hlen + 2], ip_bytes[hlen + 3]]);
    registry.lookup(h.src.into(), src_port).is_some() || registry.lookup(h.dst.into(), dst_port).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_datagram(ip_id: u16, offset_bytes: usize, mf: bool, payload: &[u8]) -> Vec<u8> {
        let mut b = vec![0u8; 20];
        b[0] = (4 << 4) | 5;
        let total_len = 20 + payload.len();
        b[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        b[4..6].copy_from_slice(&ip_id.to_be_bytes());
        let off_words = (offset_bytes / 8) as u16;
        let flags_frag = (if mf { 0x1u16 << 13 } else { 0 }) | (off_words & 0x1FFF);
        b[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        b[9] = header::PROTOCOL_TCP;
        b[12..16].copy_from_slice(&[10, 0, 0, 1]);
        b[16..20].copy_from_slice(&[10, 0, 0, 2]);
        b.extend_from_slice(payload);
        b
    }

    fn registry_allowing_all() -> ServiceRegistry {
        use crate::parser::ParserKind;
        use crate::registry::ServiceEntry;
        let reg = ServiceRegistry::new();
        reg.replace(vec![ServiceEntry {
            ip: "10.0.0.2".parse().unwrap(),
            port: 3306,
            protocol_tag: "mysql".to_string(),
            parser: ParserKind::Mysql,
        }]);
        reg
    }

    #[test]
    fn whole_datagram_passes_through_fast_path() {
        let mut d = IpDefragmenter::new();
        let reg = registry_allowing_all();
        let pkt = ipv4_datagram(1, 0, false, b"hello");
        let out = d.defragment(&pkt, Timestamp::new(0, 0), &reg).unwrap();
        assert_eq!(&out[20..], b"hello");
    }

    #[test]
    fn unregistered_whole_datagram_is_dropped() {
        let mut d = IpDefragmenter::new();
        let reg = ServiceRegistry::new();
        let pkt = ipv4_datagram(1, 0, false, b"hello");
        assert!(d.defragment(&pkt, Timestamp::new(0, 0), &reg).is_none());
    }

    #[test]
    fn two_fragments_reassemble_in_order() {
        let mut d = IpDefragmenter::new();
        let reg = registry_allowing_all();
        let frag0 = ipv4_datagram(7, 0, true, &[b'a'; 8]);
        let frag1 = ipv4_datagram(7, 8, false, &[b'b'; 4]);

        assert!(d.defragment(&frag0, Timestamp::new(0, 0), &reg).is_none());
        let out = d.defragment(&frag1, Timestamp::new(0, 0), &reg).unwrap();
        assert_eq!(out.len(), 20 + 12);
        assert_eq!(&out[20..28], &[b'a'; 8]);
        assert_eq!(&out[28..32], &[b'b'; 4]);
    }

    #[test]
    fn permutation_order_does_not_change_assembled_bytes() {
        let reg = registry_allowing_all();
        let frag0 = ipv4_datagram(9, 0, true, &[1u8; 10]);
        let frag1 = ipv4_datagram(9, 10, false, &[2u8; 10]);

        let mut forward = IpDefragmenter::new();
        forward.defragment(&frag0, Timestamp::new(0, 0), &reg);
        let out_forward = forward.defragment(&frag1, Timestamp::new(0, 0), &reg).unwrap();

        let mut backward = IpDefragmenter::new();
        backward.defragment(&frag1, Timestamp::new(0, 0), &reg);
        let out_backward = backward.defragment(&frag0, Timestamp::new(0, 0), &reg).unwrap();

        assert_eq!(out_forward, out_backward);
    }

    #[test]
    fn overlapping_fragment_keeps_earlier_bytes() {
        let reg = registry_allowing_all();
        let mut d = IpDefragmenter::new();
        let first = ipv4_datagram(11, 0, true, &[b'A'; 100]);
        let second = ipv4_datagram(11, 80, false, &[b'B'; 120]);

        assert!(d.defragment(&first, Timestamp::new(0, 0), &reg).is_none());
        let out = d.defragment(&second, Timestamp::new(0, 0), &reg).unwrap();
        assert_eq!(out.len(), 20 + 200);
        assert_eq!(&out[20..120], &[b'A'; 100]);
        assert_eq!(&out[120..220], &[b'B'; 100]);
    }

    #[test]
    fn redelivering_first_fragment_is_idempotent() {
        let reg = registry_allowing_all();
        let mut d = IpDefragmenter::new();
        let first = ipv4_datagram(13, 0, true, &[b'A'; 100]);
        d.defragment(&first, Timestamp::new(0, 0), &reg);
        d.defragment(&first, Timestamp::new(0, 0), &reg);
        let second = ipv4_datagram(13, 100, false, &[b'B'; 100]);
        let out = d.defragment(&second, Timestamp::new(0, 0), &reg).unwrap();
        assert_eq!(&out[20..120], &[b'A'; 100]);
        assert_eq!(&out[120..220], &[b'B'; 100]);
    }

    #[test]
    fn expired_queue_is_dropped_with_no_output() {
        let reg = registry_allowing_all();
        let mut d = IpDefragmenter::new();
        let frag0 = ipv4_datagram(21, 0, true, &[1u8; 10]);
        d.defragment(&frag0, Timestamp::new(0, 0), &reg);
        let frag1 = ipv4_datagram(21, 10, false, &[2u8; 10]);
        // arrives after the 30s TTL: queue should already have been swept
        assert!(d.defragment(&frag1, Timestamp::new(31, 0), &reg).is_none());
    }
}
