//! MySQL packet framing: `{payload_len:u24-le, seq_id:u8,
//! payload}`. Operates directly on the reassembler's byte slice rather than
//! a `tokio_util::codec::Decoder` fed from a socket, since the bytes here
//! already came through TCP reassembly — framing just needs to know how
//! many bytes one packet occupies so the caller can report `consumed`.

use super::primitive::read_int_3;

pub struct Framed<'a> {
    pub seq_id: u8,
    pub payload: &'a [u8],
    pub consumed: usize,
}

/// Attempts to read one packet header+payload from the front of `data`.
/// Returns `None` if fewer bytes than the full packet have arrived yet.
pub fn try_read_packet(data: &[u8]) -> Option<Framed<'_>> {
    if data.len() < 4 {
        return None;
    }
    let len = read_int_3(data)? as usize;
    let seq_id = data[3];
    let total = 4 + len;
    if data.len() < total {
        return None;
    }
    Some(Framed {
        seq_id,
        payload: &data[4..total],
        consumed: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_one_packet_and_reports_consumed() {
        let mut buf = vec![3, 0, 0, 7];
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(b"trailing");
        let f = try_read_packet(&buf).unwrap();
        assert_eq!(f.seq_id, 7);
        assert_eq!(f.payload, b"abc");
        assert_eq!(f.consumed, 7);
    }

    #[test]
    fn returns_none_on_partial_payload() {
        let buf = vec![10, 0, 0, 0, b'a', b'b'];
        assert!(try_read_packet(&buf).is_none());
    }
}
