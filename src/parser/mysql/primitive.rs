//! Byte-level readers for the MySQL wire format. Same manual-offset idiom
//! as the rest of the wire-protocol code: no intermediate struct overlay,
//! since length-encoded fields make fixed `repr(C)` layouts unusable here.

/// Length-encoded integer, per the documented prefix rules: `<0xFB` is a
/// one-byte literal, `0xFB` is SQL NULL, `0xFC`/`0xFD`/`0xFE` introduce a
/// 2/3/8-byte little-endian integer. Returns `(value, bytes_consumed,
/// is_null)`, or `None` if `data` is too short or the prefix is one of the
/// two reserved-but-undefined values (`0xFF`/`0xFA`... actually only 0xFF is
/// reserved beyond the documented set; any prefix not covered above yields
/// `None` so the caller abandons the frame instead of guessing).
pub fn read_int_lenenc(data: &[u8]) -> Option<(u64, usize, bool)> {
    let first = *data.first()?;
    match first {
        0..=0xfa => Some((first as u64, 1, false)),
        0xfb => Some((0, 1, true)),
        0xfc => {
            let b = data.get(1..3)?;
            Some((u16::from_le_bytes([b[0], b[1]]) as u64, 3, false))
        }
        0xfd => {
            let b = data.get(1..4)?;
            Some((
                u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64,
                4,
                false,
            ))
        }
        0xfe => {
            let b = data.get(1..9)?;
            Some((
                u64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]),
                9,
                false,
            ))
        }
        0xff => None,
    }
}

/// Length-encoded string: a length-encoded integer prefix followed by that
/// many bytes. Returns `(bytes, consumed)`, or `None` for a NULL value or a
/// short buffer.
pub fn read_string_lenenc(data: &[u8]) -> Option<(&[u8], usize)> {
    let (len, prefix_len, is_null) = read_int_lenenc(data)?;
    if is_null {
        return None;
    }
    let len = len as usize;
    let body = data.get(prefix_len..prefix_len + len)?;
    Some((body, prefix_len + len))
}

/// A NUL-terminated string, as used for `user_name` in the handshake.
pub fn read_string_null(data: &[u8]) -> Option<(&[u8], usize)> {
    let end = data.iter().position(|&b| b == 0)?;
    Some((&data[..end], end + 1))
}

pub fn read_int_1(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

pub fn read_int_2(data: &[u8]) -> Option<u16> {
    let b = data.get(0..2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

pub fn read_int_3(data: &[u8]) -> Option<u32> {
    let b = data.get(0..3)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], 0]))
}

pub fn read_int_4(data: &[u8]) -> Option<u32> {
    let b = data.get(0..4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_int_8(data: &[u8]) -> Option<u64> {
    let b = data.get(0..8)?;
    Some(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_one_byte_literal() {
        assert_eq!(read_int_lenenc(&[5]), Some((5, 1, false)));
        assert_eq!(read_int_lenenc(&[0xfa]), Some((0xfa, 1, false)));
    }

    #[test]
    fn lenenc_null_is_0xfb_not_a_literal() {
        assert_eq!(read_int_lenenc(&[0xfb]), Some((0, 1, true)));
    }

    #[test]
    fn lenenc_u16_prefix() {
        assert_eq!(read_int_lenenc(&[0xfc, 0x01, 0x02]), Some((0x0201, 3, false)));
    }

    #[test]
    fn lenenc_u64_prefix_above_2_32() {
        let mut buf = vec![0xfe];
        buf.extend_from_slice(&(5_000_000_000u64).to_le_bytes());
        assert_eq!(read_int_lenenc(&buf), Some((5_000_000_000, 9, false)));
    }

    #[test]
    fn lenenc_reserved_prefix_is_none() {
        assert_eq!(read_int_lenenc(&[0xff]), None);
    }

    #[test]
    fn string_null_stops_at_terminator() {
        let data = b"root\0rest";
        assert_eq!(read_string_null(data), Some((&b"root"[..], 5)));
    }
}
