pub mod half_stream;
pub mod header;
pub mod reassembler;

pub use half_stream::HalfStream;
pub use header::TcpHeader;
pub use reassembler::TcpReassembler;
