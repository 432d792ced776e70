//! An incremental HTTP/1.x message parser for one direction of a
//! connection. Mirrors the byte-cursor style of the MySQL wire-protocol
//! primitives: no backtracking, partial lines carried across calls.

use crate::parser::http::detail::{DetailNode, DetailState};
use crate::time::Timestamp;

const MAX_LINE_LEN: usize = 8 * 1024;

#[derive(Debug, Clone)]
enum ChunkPhase {
    Size,
    Data(u64),
    CrlfAfterData,
    Trailer,
}

#[derive(Debug, Clone)]
enum BodyMode {
    ContentLength(u64),
    Chunked(ChunkPhase),
    UntilClose,
    None,
}

#[derive(Debug, Clone)]
enum Phase {
    StartLine,
    Headers,
    Body(BodyMode),
}

pub struct MessageParser {
    phase: Phase,
    line_buf: Vec<u8>,
    is_request: bool,
}

impl MessageParser {
    pub fn new(is_request: bool) -> Self {
        Self {
            phase: Phase::StartLine,
            line_buf: Vec::new(),
            is_request,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::StartLine) && self.line_buf.is_empty()
    }

    fn reset(&mut self) {
        self.phase = Phase::StartLine;
        self.line_buf.clear();
    }

    /// Feed bytes belonging to `node`'s message. Returns `(consumed,
    /// message_complete)`. Malformed lines longer than `MAX_LINE_LEN` force
    /// the message complete rather than stall the connection forever.
    pub fn feed(&mut self, bytes: &[u8], node: &mut DetailNode, ts: Timestamp) -> (usize, bool) {
        let mut pos = 0;
        loop {
            match &mut self.phase {
                Phase::StartLine | Phase::Headers => {
                    let Some(nl) = bytes[pos..].iter().position(|&b| b == b'\n') else {
                        self.line_buf.extend_from_slice(&bytes[pos..]);
                        pos = bytes.len();
                        if self.line_buf.len() > MAX_LINE_LEN {
                            self.reset();
                            return (pos, true);
                        }
                        return (pos, false);
                    };
                    let line_end = pos + nl;
                    self.line_buf.extend_from_slice(&bytes[pos..line_end]);
                    pos = line_end + 1;
                    if self.line_buf.last() == Some(&b'\r') {
                        self.line_buf.pop();
                    }
                    let line = std::mem::take(&mut self.line_buf);

                    match &self.phase {
                        Phase::StartLine => {
                            if self.is_request {
                                parse_request_line(&line, node);
                                node.req_time = Some(ts);
                                node.state = DetailState::ReqHeaderBegin;
                            } else {
                                parse_status_line(&line, node);
                                node.resp_time_begin = Some(ts);
                                node.state = DetailState::RspHeaderBegin;
                            }
                            self.phase = Phase::Headers;
                        }
                        Phase::Headers => {
                            if self.is_request {
                                node.req_header_size += (line.len() + 2) as u64;
                            } else {
                                node.resp_header_size += (line.len() + 2) as u64;
                            }
                            if line.is_empty() {
                                if self.is_request {
                                    node.state = DetailState::ReqHeaderComplete;
                                } else {
                                    node.state = DetailState::RspHeaderComplete;
                                }
                                let mode = body_mode_from_headers(node, self.is_request);
                                if matches!(mode, BodyMode::None) {
                                    if self.is_request {
                                        node.state = DetailState::ReqBodyComplete;
                                    } else {
                                        node.state = DetailState::RspBodyComplete;
                                        node.resp_time_end = Some(ts);
                                    }
                                    self.reset();
                                    return (pos, true);
                                }
                                if self.is_request {
                                    node.state = DetailState::ReqBodyBegin;
                                } else {
                                    node.state = DetailState::RspBodyBegin;
                                }
                                self.phase = Phase::Body(mode);
                            } else {
                                apply_header(&line, node, self.is_request);
                            }
                        }
                        Phase::Body(_) => unreachable!(),
                    }
                }
                Phase::Body(mode) => match mode {
                    BodyMode::ContentLength(remaining) => {
                        let take = (*remaining).min((bytes.len() - pos) as u64) as usize;
                        pos += take;
                        *remaining -= take as u64;
                        if self.is_request {
                            node.req_body_size += take as u64;
                        } else {
                            node.resp_body_size += take as u64;
                        }
                        if *remaining == 0 {
                            if self.is_request {
                                node.state = DetailState::ReqBodyComplete;
                            } else {
                                node.state = DetailState::RspBodyComplete;
                                node.resp_time_end = Some(ts);
                            }
                            self.reset();
                            return (pos, true);
                        }
                        return (pos, false);
                    }
                    BodyMode::UntilClose => {
                        let take = bytes.len() - pos;
                        pos += take;
                        if self.is_request {
                            node.req_body_size += take as u64;
                        } else {
                            node.resp_body_size += take as u64;
                        }
                        return (pos, false);
                    }
                    BodyMode::Chunked(phase) => {
                        if !advance_chunked(phase, bytes, &mut pos, node, self.is_request) {
                            return (pos, false);
                        }
                        if self.is_request {
                            node.state = DetailState::ReqBodyComplete;
                        } else {
                            node.state = DetailState::RspBodyComplete;
                            node.resp_time_end = Some(ts);
                        }
                        self.reset();
                        return (pos, true);
                    }
                },
            }
            if pos >= bytes.len() {
                return (pos, false);
            }
        }
    }
}

/// Drains as much of a chunked body as `bytes[*pos..]` allows. Returns
/// `true` once the terminating zero-length chunk has been consumed.
fn advance_chunked(
    phase: &mut ChunkPhase,
    bytes: &[u8],
    pos: &mut usize,
    node: &mut DetailNode,
    is_request: bool,
) -> bool {
    loop {
        match phase {
            ChunkPhase::Size => {
                let Some(nl) = bytes[*pos..].iter().position(|&b| b == b'\n') else {
                    return false;
                };
                let line_end = *pos + nl;
                let mut line = &bytes[*pos..line_end];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                let size_str = std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.split(';').next())
                    .unwrap_or("0");
                let size = u64::from_str_radix(size_str.trim(), 16).unwrap_or(0);
                *pos = line_end + 1;
                if size == 0 {
                    *phase = ChunkPhase::Trailer;
                } else {
                    *phase = ChunkPhase::Data(size);
                }
            }
            ChunkPhase::Data(remaining) => {
                let take = (*remaining).min((bytes.len() - *pos) as u64) as usize;
                *pos += take;
                *remaining -= take as u64;
                if is_request {
                    node.req_body_size += take as u64;
                } else {
                    node.resp_body_size += take as u64;
                }
                if *remaining > 0 {
                    return false;
                }
                *phase = ChunkPhase::CrlfAfterData;
            }
            ChunkPhase::CrlfAfterData => {
                let Some(nl) = bytes[*pos..].iter().position(|&b| b == b'\n') else {
                    return false;
                };
                *pos += nl + 1;
                *phase = ChunkPhase::Size;
            }
            ChunkPhase::Trailer => {
                let Some(nl) = bytes[*pos..].iter().position(|&b| b == b'\n') else {
                    return false;
                };
                let line_end = *pos + nl;
                let empty = line_end == *pos || (line_end == *pos + 1 && bytes[*pos] == b'\r');
                *pos = line_end + 1;
                if empty {
                    return true;
                }
            }
        }
    }
}

fn body_mode_from_headers(node: &DetailNode, is_request: bool) -> BodyMode {
    if node.transfer_encoding.eq_ignore_ascii_case("chunked") {
        return BodyMode::Chunked(ChunkPhase::Size);
    }
    if let Some(len) = node.pending_content_length {
        return if len == 0 {
            BodyMode::None
        } else {
            BodyMode::ContentLength(len)
        };
    }
    if is_request {
        BodyMode::None
    } else {
        BodyMode::UntilClose
    }
}

fn apply_header(line: &[u8], node: &mut DetailNode, is_request: bool) {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return;
    };
    let name = &line[..colon];
    let mut value = &line[colon + 1..];
    while value.first() == Some(&b' ') {
        value = &value[1..];
    }
    let value = String::from_utf8_lossy(value).trim().to_string();

    if is_request {
        if name.eq_ignore_ascii_case(b"host") {
            node.host = value;
        } else if name.eq_ignore_ascii_case(b"user-agent") {
            node.user_agent = value;
        } else if name.eq_ignore_ascii_case(b"referer") {
            node.referer = value;
        } else if name.eq_ignore_ascii_case(b"accept") {
            node.accept = value;
        } else if name.eq_ignore_ascii_case(b"accept-language") {
            node.accept_language = value;
        } else if name.eq_ignore_ascii_case(b"accept-encoding") {
            node.accept_encoding = value;
        } else if name.eq_ignore_ascii_case(b"x-forwarded-for") {
            node.x_forwarded_for = value;
        } else if name.eq_ignore_ascii_case(b"connection") {
            node.req_connection = value;
        } else if name.eq_ignore_ascii_case(b"content-length") {
            node.pending_content_length = value.trim().parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            node.transfer_encoding = value;
        }
    } else if name.eq_ignore_ascii_case(b"content-type") {
        node.content_type = value;
    } else if name.eq_ignore_ascii_case(b"content-disposition") {
        node.content_disposition = value;
    } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
        node.transfer_encoding = value;
    } else if name.eq_ignore_ascii_case(b"connection") {
        node.resp_connection = value;
    } else if name.eq_ignore_ascii_case(b"content-length") {
        node.pending_content_length = value.trim().parse::<u64>().ok();
    }
}

fn parse_request_line(line: &[u8], node: &mut DetailNode) {
    let text = String::from_utf8_lossy(line);
    let mut parts = text.splitn(3, ' ');
    node.method = parts.next().unwrap_or("").to_string();
    node.url = parts.next().unwrap_or("").to_string();
    node.req_version = parts.next().unwrap_or("").trim().to_string();
}

fn parse_status_line(line: &[u8], node: &mut DetailNode) {
    let text = String::from_utf8_lossy(line);
    let mut parts = text.splitn(3, ' ');
    node.resp_version = parts.next().unwrap_or("").to_string();
    node.status_code = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::http::detail::DetailNode;

    fn ts() -> Timestamp {
        Timestamp::new(0, 0)
    }

    #[test]
    fn parses_request_with_no_body() {
        let mut node = DetailNode::default();
        let mut p = MessageParser::new(true);
        let input = b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n";
        let (consumed, done) = p.feed(input, &mut node, ts());
        assert_eq!(consumed, input.len());
        assert!(done);
        assert_eq!(node.method, "GET");
        assert_eq!(node.url, "/x");
        assert_eq!(node.host, "a");
    }

    #[test]
    fn parses_response_with_content_length_body() {
        let mut node = DetailNode::default();
        let mut p = MessageParser::new(false);
        let input = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc";
        let (consumed, done) = p.feed(input, &mut node, ts());
        assert_eq!(consumed, input.len());
        assert!(done);
        assert_eq!(node.status_code, 200);
        assert_eq!(node.resp_body_size, 3);
    }

    #[test]
    fn handles_split_across_calls() {
        let mut node = DetailNode::default();
        let mut p = MessageParser::new(true);
        let (c1, d1) = p.feed(b"GET /x HTT", &mut node, ts());
        assert_eq!(c1, 10);
        assert!(!d1);
        let (c2, d2) = p.feed(b"P/1.1\r\nHost: a\r\n\r\n", &mut node, ts());
        assert_eq!(c2, 19);
        assert!(d2);
        assert_eq!(node.url, "/x");
    }

    #[test]
    fn decodes_chunked_body() {
        let mut node = DetailNode::default();
        let mut p = MessageParser::new(false);
        let input = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let (consumed, done) = p.feed(input, &mut node, ts());
        assert_eq!(consumed, input.len());
        assert!(done);
        assert_eq!(node.resp_body_size, 3);
    }
}
