//! Optional zlib-compressed MySQL transport. Framing is
//! `{uncompressed_len:u24, compressed_seq:u8, compressed_len:u24,
//! compressed_payload}`; when `uncompressed_len != 0` the payload is zlib
//! deflate and must be inflated, otherwise it is already the inner stream
//! (the server skips compressing packets that wouldn't shrink).

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};
use crate::parser::mysql::primitive::read_int_3;

pub struct CompressedFrame {
    pub seq_id: u8,
    pub inner: Vec<u8>,
    pub consumed: usize,
}

pub fn try_read_compressed_frame(data: &[u8]) -> Result<Option<CompressedFrame>> {
    if data.len() < 7 {
        return Ok(None);
    }
    let uncompressed_len = read_int_3(data).ok_or(Error::mysql("truncated compressed header"))? as usize;
    let seq_id = data[3];
    let compressed_len =
        read_int_3(&data[4..7]).ok_or(Error::mysql("truncated compressed header"))? as usize;
    let total = 7 + compressed_len;
    if data.len() < total {
        return Ok(None);
    }
    let payload = &data[7..total];

    let inner = if uncompressed_len == 0 {
        payload.to_vec()
    } else {
        let mut decoder = ZlibDecoder::new(payload);
        let mut out = Vec::with_capacity(uncompressed_len);
        decoder.read_to_end(&mut out)?;
        out
    };

    Ok(Some(CompressedFrame {
        seq_id,
        inner,
        consumed: total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn passthrough_when_uncompressed_len_is_zero() {
        let mut buf = vec![0, 0, 0, 0, 3, 0, 0];
        buf.extend_from_slice(b"abc");
        let f = try_read_compressed_frame(&buf).unwrap().unwrap();
        assert_eq!(f.inner, b"abc");
        assert_eq!(f.consumed, 10);
    }

    #[test]
    fn inflates_zlib_payload() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello world").unwrap();
        let compressed = enc.finish().unwrap();

        let mut buf = vec![];
        buf.extend_from_slice(&11u32.to_le_bytes()[..3]);
        buf.push(0);
        buf.extend_from_slice(&(compressed.len() as u32).to_le_bytes()[..3]);
        buf.extend_from_slice(&compressed);

        let f = try_read_compressed_frame(&buf).unwrap().unwrap();
        assert_eq!(f.inner, b"hello world");
    }
}
