use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while parsing attacker-controlled bytes off the wire.
///
/// Every variant here is recoverable by construction: the caller drops the
/// offending unit (packet, fragment, or protocol frame) and leaves connection
/// state untouched, per the error handling design. Nothing in this crate
/// panics on malformed input.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed ip datagram: {0}")]
    MalformedIp(&'static str),

    #[error("malformed tcp segment: {0}")]
    MalformedTcp(&'static str),

    #[error("malformed mysql packet: {0}")]
    MalformedMysql(&'static str),

    #[error("malformed http message: {0}")]
    MalformedHttp(&'static str),

    #[error("zlib inflate error: {0}")]
    Decompress(#[from] std::io::Error),
}

impl Error {
    pub fn mysql(msg: &'static str) -> Self {
        Self::MalformedMysql(msg)
    }
}
