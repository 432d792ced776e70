//! Service registry: maps `ip:port` to a protocol tag and parser handle.
//!
//! Swapped in place from the control plane. Grounded on the double-buffered
//! design: a single locked map would stall the capture
//! loop under frequent updates, so lookups go through an `arc-swap` pointer
//! load instead of a lock acquisition.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::parser::ParserKind;

/// `(ip, port)` → protocol tag + parser handle, installed atomically.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol_tag: String,
    pub parser: ParserKind,
}

type Table = HashMap<(IpAddr, u16), ServiceEntry>;

/// Concurrent-reader, single-writer service registry.
///
/// `lookup` is a single atomic load plus a hash lookup on the loaded map —
/// no lock is ever acquired by a reader. `replace` builds the new table off
/// to the side and swaps the pointer in one atomic store; in-flight
/// connections bound to a service that was just removed keep the parser
/// handle they already captured, since they hold an `Arc` clone from the
/// lookup that created them, not a reference into the live table.
pub struct ServiceRegistry {
    table: ArcSwap<Table>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Constant-time (amortized) lookup; safe to call from the hot path.
    pub fn lookup(&self, ip: IpAddr, port: u16) -> Option<ServiceEntry> {
        self.table.load().get(&(ip, port)).cloned()
    }

    /// Atomically replace the whole service set.
    pub fn replace(&self, entries: Vec<ServiceEntry>) {
        let mut table = Table::with_capacity(entries.len());
        for entry in entries {
            table.insert((entry.ip, entry.port), entry);
        }
        self.table.store(Arc::new(table));
    }

    /// Derived BPF-style predicate advertised to the capture subsystem.
    ///
    /// `(ip host <svc_ip> and (tcp port <svc_port> or <frag_expr>)) or ...`
    /// where `<frag_expr>` matches the documented IPv4-fragment predicate.
    pub fn filter_expression(&self) -> String {
        const FRAG_EXPR: &str =
            "tcp and (ip[6]&0x20!=0 or (ip[6]&0x20=0 and ip[6:2]&0x1fff!=0))";

        let table = self.table.load();
        let mut clauses: Vec<String> = table
            .values()
            .map(|e| format!("(ip host {} and (tcp port {} or {}))", e.ip, e.port, FRAG_EXPR))
            .collect();
        clauses.sort();
        if clauses.is_empty() {
            return "icmp".to_string();
        }
        clauses.push("icmp".to_string());
        clauses.join(" or ")
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ip: &str, port: u16) -> ServiceEntry {
        ServiceEntry {
            ip: ip.parse().unwrap(),
            port,
            protocol_tag: "mysql".to_string(),
            parser: ParserKind::Mysql,
        }
    }

    #[test]
    fn lookup_misses_before_any_replace() {
        let reg = ServiceRegistry::new();
        assert!(reg.lookup("127.0.0.1".parse().unwrap(), 3306).is_none());
    }

    #[test]
    fn replace_is_visible_to_subsequent_lookups() {
        let reg = ServiceRegistry::new();
        reg.replace(vec![entry("10.0.0.1", 3306)]);
        let found = reg.lookup("10.0.0.1".parse().unwrap(), 3306).unwrap();
        assert_eq!(found.protocol_tag, "mysql");
    }

    #[test]
    fn filter_expression_always_includes_icmp() {
        let reg = ServiceRegistry::new();
        assert_eq!(reg.filter_expression(), "icmp");
        reg.replace(vec![entry("10.0.0.1", 80)]);
        let expr = reg.filter_expression();
        assert!(expr.ends_with("or icmp"));
        assert!(expr.contains("ip host 10.0.0.1"));
    }
}
