pub mod defrag;
pub mod header;

pub use defrag::IpDefragmenter;
pub use header::Ipv4Header;
