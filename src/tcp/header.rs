//! TCP header and options parsing. Flags use `bitflags`, the same crate
//! used for `CapabilityFlags`/`ServerStatusFlags`.

use crate::error::{Error, Result};

pub const MIN_HEADER_LEN: usize = 20;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpOptions {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
    pub timestamp: Option<(u32, u32)>, // (tsval, tsecr)
}

#[derive(Debug, Clone, Copy)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack_seq: u32,
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub urg_ptr: u16,
    pub options: TcpOptions,
}

impl TcpHeader {
    pub fn header_len(&self) -> usize {
        self.data_offset as usize * 4
    }
}

/// Parse a TCP segment header, including the options region (needed for
/// `MSS`/window-scale/timestamp negotiation). `bytes` starts at the TCP
/// header, not the IP header.
pub fn parse(bytes: &[u8]) -> Result<TcpHeader> {
    if bytes.len() < MIN_HEADER_LEN {
        return Err(Error::MalformedTcp("segment shorter than a minimal header"));
    }

    let src_port = u16::from_be_bytes([bytes[0], bytes[1]]);
    let dst_port = u16::from_be_bytes([bytes[2], bytes[3]]);
    let seq = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let ack_seq = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let data_offset = bytes[12] >> 4;
    let flags = TcpFlags::from_bits_truncate(bytes[13]);
    let window = u16::from_be_bytes([bytes[14], bytes[15]]);
    let urg_ptr = u16::from_be_bytes([bytes[18], bytes[19]]);

    let header_len = data_offset as usize * 4;
    if header_len < MIN_HEADER_LEN || bytes.len() < header_len {
        return Err(Error::MalformedTcp("bad data offset"));
    }

    let options = parse_options(&bytes[MIN_HEADER_LEN..header_len]);

    Ok(TcpHeader {
        src_port,
        dst_port,
        seq,
        ack_seq,
        data_offset,
        flags,
        window,
        urg_ptr,
        options,
    })
}

fn parse_options(mut opts: &[u8]) -> TcpOptions {
    let mut result = TcpOptions::default();
    while !opts.is_empty() {
        match opts[0] {
            0 => break,                    // end of options list
            1 => opts = &opts[1..],        // no-op
            2 if opts.len() >= 4 => {
                result.mss = Some(u16::from_be_bytes([opts[2], opts[3]]));
                opts = &opts[4..];
            }
            3 if opts.len() >= 3 => {
                result.window_scale = Some(opts[2]);
                opts = &opts[3..];
            }
            8 if opts.len() >= 10 => {
                let tsval = u32::from_be_bytes([opts[2], opts[3], opts[4], opts[5]]);
                let tsecr = u32::from_be_bytes([opts[6], opts[7], opts[8], opts[9]]);
                result.timestamp = Some((tsval, tsecr));
                opts = &opts[10..];
            }
            _ => {
                if opts.len() < 2 || opts[1] == 0 {
                    break;
                }
                let len = opts[1] as usize;
                if len > opts.len() {
                    break;
                }
                opts = &opts[len..];
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_mss(mss: u16) -> Vec<u8> {
        let mut b = vec![0u8; 24];
        b[12] = (6 << 4) as u8; // data_offset = 6 words = 24 bytes
        b[20] = 2;
        b[21] = 4;
        b[22..24].copy_from_slice(&mss.to_be_bytes());
        b
    }

    #[test]
    fn parses_mss_option() {
        let b = header_with_mss(1460);
        let h = parse(&b).unwrap();
        assert_eq!(h.options.mss, Some(1460));
        assert_eq!(h.header_len(), 24);
    }

    #[test]
    fn rejects_truncated_header() {
        let b = vec![0u8; 10];
        assert!(parse(&b).is_err());
    }
}
