//! One detail node per HTTP transaction on a connection.
//! Requests and responses share a node so FIFO matching (pipelining) only
//! needs a single queue, not two correlated ones.

use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailState {
    Init,
    ReqHeaderBegin,
    ReqHeaderComplete,
    ReqBodyBegin,
    ReqBodyComplete,
    RspHeaderBegin,
    RspHeaderComplete,
    RspBodyBegin,
    RspBodyComplete,
    ResetType1,
    ResetType2,
    ResetType3,
    ResetType4,
}

#[derive(Debug, Clone)]
pub struct DetailNode {
    pub state: DetailState,

    pub method: String,
    pub url: String,
    pub host: String,
    pub user_agent: String,
    pub referer: String,
    pub accept: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub x_forwarded_for: String,
    pub req_connection: String,
    pub req_version: String,

    pub resp_version: String,
    pub content_type: String,
    pub content_disposition: String,
    pub transfer_encoding: String,
    pub resp_connection: String,
    pub status_code: u16,

    pub req_header_size: u64,
    pub req_body_size: u64,
    pub resp_header_size: u64,
    pub resp_body_size: u64,

    pub req_time: Option<Timestamp>,
    pub resp_time_begin: Option<Timestamp>,
    pub resp_time_end: Option<Timestamp>,

    /// Not a breakdown field: `Content-Length` staged here while headers are
    /// still being parsed, consumed once the body-mode decision is made.
    pub pending_content_length: Option<u64>,

    /// Set only when the node was finished by `on_reset` rather than by a
    /// completed response; overrides the OK/ERROR classification.
    pub reset_http_state: Option<u8>,
}

impl Default for DetailNode {
    fn default() -> Self {
        Self {
            state: DetailState::Init,
            method: String::new(),
            url: String::new(),
            host: String::new(),
            user_agent: String::new(),
            referer: String::new(),
            accept: String::new(),
            accept_language: String::new(),
            accept_encoding: String::new(),
            x_forwarded_for: String::new(),
            req_connection: String::new(),
            req_version: String::new(),
            resp_version: String::new(),
            content_type: String::new(),
            content_disposition: String::new(),
            transfer_encoding: String::new(),
            resp_connection: String::new(),
            status_code: 0,
            req_header_size: 0,
            req_body_size: 0,
            resp_header_size: 0,
            resp_body_size: 0,
            req_time: None,
            resp_time_begin: None,
            resp_time_end: None,
            pending_content_length: None,
            reset_http_state: None,
        }
    }
}

impl DetailNode {
    /// `http_state`: `OK` iff the first digit of the status code is 1, 2, or 3.
    pub fn is_ok_status(&self) -> bool {
        matches!(self.status_code / 100, 1 | 2 | 3)
    }

    pub fn resp_latency(&self) -> i64 {
        match (self.resp_time_begin, self.req_time) {
            (Some(begin), Some(req)) => begin.millis_since(req),
            _ => 0,
        }
    }

    pub fn download_latency(&self) -> i64 {
        match (self.resp_time_end, self.resp_time_begin) {
            (Some(end), Some(begin)) => end.millis_since(begin),
            _ => 0,
        }
    }
}
