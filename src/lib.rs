//! Passive network traffic analyzer: IPv4 defragmentation, TCP stream
//! reassembly, and pluggable protocol parsers (HTTP, MySQL) that turn
//! reconstructed byte streams into structured breakdown records.

pub mod breakdown;
pub mod config;
pub mod error;
pub mod ip;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod tcp;
pub mod time;

pub use breakdown::TcpBreakdown;
pub use config::Config;
pub use pipeline::{spawn, CapturedPacket};
pub use registry::{ServiceEntry, ServiceRegistry};
