//! Protocol v10 handshake parsing: the server greeting and
//! the client's reply. Only v10 is supported; anything else is a handler
//! mismatch the caller skips rather than crashes on.

use super::constant::CapabilityFlags;
use super::primitive::{read_int_2, read_int_4, read_string_null};
use crate::error::{Error, Result};

pub const PROTOCOL_VERSION_10: u8 = 0x0a;

#[derive(Debug, Clone, Default)]
pub struct ServerGreeting {
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: CapabilityFlags,
}

pub fn parse_server_greeting(payload: &[u8]) -> Result<ServerGreeting> {
    let proto_ver = *payload
        .first()
        .ok_or(Error::mysql("empty server greeting"))?;
    if proto_ver != PROTOCOL_VERSION_10 {
        return Err(Error::mysql("unsupported handshake protocol version"));
    }
    let (version_bytes, consumed) =
        read_string_null(&payload[1..]).ok_or(Error::mysql("truncated server_version"))?;
    let server_version = String::from_utf8_lossy(version_bytes).to_string();
    let mut rest = &payload[1 + consumed..];

    let connection_id = read_int_4(rest).ok_or(Error::mysql("truncated connection_id"))?;
    rest = &rest[4..];
    rest = rest.get(8..).ok_or(Error::mysql("truncated auth-plugin-data-1"))?; // skip auth-plugin-data-part-1
    rest = rest.get(1..).ok_or(Error::mysql("truncated filler"))?; // filler

    let cap_low = read_int_2(rest).ok_or(Error::mysql("truncated capability_flags_1"))?;
    rest = &rest[2..];
    rest = rest.get(1..).ok_or(Error::mysql("truncated charset"))?; // charset
    rest = rest.get(2..).ok_or(Error::mysql("truncated status_flags"))?; // status flags

    let cap_high = read_int_2(rest).unwrap_or(0);
    let capabilities =
        CapabilityFlags::from_bits_truncate((cap_low as u32) | ((cap_high as u32) << 16));

    Ok(ServerGreeting {
        server_version,
        connection_id,
        capabilities,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ClientHandshake {
    pub capabilities: CapabilityFlags,
    pub is_protocol_41: bool,
    pub max_packet_size: u32,
    pub user_name: String,
    pub do_ssl: bool,
    pub do_compress: bool,
}

pub fn parse_client_handshake(payload: &[u8]) -> Result<ClientHandshake> {
    if payload.len() < 4 {
        return Err(Error::mysql("truncated client handshake capabilities"));
    }
    let cap_bits = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let capabilities = CapabilityFlags::from_bits_truncate(cap_bits);
    let is_protocol_41 = capabilities.contains(CapabilityFlags::PROTOCOL_41);

    if !is_protocol_41 {
        // Pre-4.1 handshakes are rare on modern servers; record what we can
        // without the fixed 32-byte filler the v4.1 layout guarantees.
        return Ok(ClientHandshake {
            capabilities,
            is_protocol_41,
            max_packet_size: 0,
            user_name: String::new(),
            do_ssl: capabilities.contains(CapabilityFlags::SSL),
            do_compress: capabilities.contains(CapabilityFlags::COMPRESS),
        });
    }

    let max_packet_size =
        read_int_4(&payload[4..]).ok_or(Error::mysql("truncated max_packet_size"))?;
    // payload[8] = charset, payload[9..32] = reserved
    let rest = payload
        .get(32..)
        .ok_or(Error::mysql("truncated handshake reserved region"))?;
    let (user_bytes, _) = read_string_null(rest).ok_or(Error::mysql("truncated user name"))?;

    Ok(ClientHandshake {
        capabilities,
        is_protocol_41,
        max_packet_size,
        user_name: String::from_utf8_lossy(user_bytes).to_string(),
        do_ssl: capabilities.contains(CapabilityFlags::SSL),
        do_compress: capabilities.contains(CapabilityFlags::COMPRESS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_greeting() -> Vec<u8> {
        let mut p = vec![PROTOCOL_VERSION_10];
        p.extend_from_slice(b"8.0.34\0");
        p.extend_from_slice(&42u32.to_le_bytes());
        p.extend_from_slice(&[0u8; 8]);
        p.push(0);
        p.extend_from_slice(&0xff01u16.to_le_bytes());
        p.push(0xff);
        p.extend_from_slice(&0x0002u16.to_le_bytes());
        p.extend_from_slice(&0x0000u16.to_le_bytes());
        p
    }

    #[test]
    fn parses_server_version_and_connection_id() {
        let g = parse_server_greeting(&sample_greeting()).unwrap();
        assert_eq!(g.server_version, "8.0.34");
        assert_eq!(g.connection_id, 42);
    }

    #[test]
    fn rejects_non_v10_protocol() {
        let mut p = sample_greeting();
        p[0] = 9;
        assert!(parse_server_greeting(&p).is_err());
    }

    #[test]
    fn parses_client_handshake_user_name() {
        let mut p = (CapabilityFlags::PROTOCOL_41.bits()).to_le_bytes().to_vec();
        p.extend_from_slice(&16_777_216u32.to_le_bytes());
        p.push(33); // charset
        p.extend_from_slice(&[0u8; 23]);
        p.extend_from_slice(b"root\0");
        let ch = parse_client_handshake(&p).unwrap();
        assert_eq!(ch.user_name, "root");
        assert!(ch.is_protocol_41);
    }
}
