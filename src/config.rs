/// Tunables for the pipeline. Populated by the embedding binary; this crate
/// never reads a file or an environment variable itself (that belongs to the
/// control plane, out of scope here).
///
/// ```
/// let mut cfg = ntrace::config::Config::default();
/// cfg.dispatch_workers = 4;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of dispatch tasks in the fixed pool; each owns a disjoint
    /// slice of connections keyed by `hash(tuple4) % dispatch_workers`.
    pub dispatch_workers: usize,

    /// Soft cap on live connections per dispatch task before the
    /// oldest-by-insertion connection is evicted.
    pub connection_table_capacity: usize,

    /// Fraction of `connection_table_capacity` at which eviction kicks in.
    pub eviction_threshold: f64,

    /// IP fragment queue time-to-live, in seconds, from last insert.
    pub fragment_ttl_secs: u64,

    /// TCP closing-timeout window, in seconds, from entering `CLOSING`.
    pub tcp_closing_timeout_secs: u64,

    /// Largest assembled IPv4 datagram accepted; larger ones are dropped.
    pub max_assembled_datagram: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch_workers: 4,
            connection_table_capacity: 65_535,
            eviction_threshold: 0.8,
            fragment_ttl_secs: 30,
            tcp_closing_timeout_secs: 30,
            max_assembled_datagram: 65_535,
        }
    }
}

impl Config {
    /// Connection count at which the soft cap starts evicting.
    pub fn eviction_watermark(&self) -> usize {
        (self.connection_table_capacity as f64 * self.eviction_threshold) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_is_eighty_percent_by_default() {
        let cfg = Config::default();
        assert_eq!(cfg.eviction_watermark(), 52_428);
    }
}
