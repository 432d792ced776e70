//! HTTP/1.x request+response framing. Two independent
//! incremental parsers (request direction, response direction) share one
//! FIFO of in-flight transactions so pipelined requests match their
//! responses in order.

pub mod detail;
pub mod parser;

use std::collections::VecDeque;

use crate::breakdown::{
    HttpBreakdown, ProtoBreakdown, HTTP_STATE_ERROR, HTTP_STATE_OK, HTTP_STATE_RESET_TYPE1,
    HTTP_STATE_RESET_TYPE2, HTTP_STATE_RESET_TYPE3, HTTP_STATE_RESET_TYPE4,
};
use crate::error::Result;
use crate::parser::{Direction, Parser, SessionState};
use crate::time::Timestamp;
use detail::{DetailNode, DetailState};
use parser::MessageParser;

pub struct HttpParser;

pub struct HttpState {
    req_parser: MessageParser,
    resp_parser: MessageParser,
    queue: VecDeque<DetailNode>,
    last_finished: Option<DetailNode>,
}

impl Parser for HttpParser {
    type State = HttpState;

    fn new_state(&self) -> Self::State {
        HttpState {
            req_parser: MessageParser::new(true),
            resp_parser: MessageParser::new(false),
            queue: VecDeque::new(),
            last_finished: None,
        }
    }

    fn on_established(&self, _state: &mut Self::State, _ts: Timestamp) {}

    fn on_urgent(&self, _dir: Direction, _byte: u8, _state: &mut Self::State, _ts: Timestamp) {}

    fn on_data(
        &self,
        dir: Direction,
        bytes: &[u8],
        state: &mut Self::State,
        ts: Timestamp,
    ) -> Result<(usize, SessionState)> {
        match dir {
            Direction::FromClient => Ok((feed_requests(state, bytes, ts), SessionState::Active)),
            Direction::FromServer => Ok(feed_one_response(state, bytes, ts)),
        }
    }

    fn on_reset(&self, dir: Direction, state: &mut Self::State, ts: Timestamp) {
        let http_state = match state.queue.front().map(|n| n.state) {
            None => HTTP_STATE_RESET_TYPE4,
            Some(
                DetailState::ReqHeaderBegin
                | DetailState::ReqHeaderComplete
                | DetailState::ReqBodyBegin,
            ) => HTTP_STATE_RESET_TYPE1,
            Some(DetailState::ReqBodyComplete) => HTTP_STATE_RESET_TYPE2,
            Some(
                DetailState::RspHeaderBegin
                | DetailState::RspHeaderComplete
                | DetailState::RspBodyBegin,
            ) => HTTP_STATE_RESET_TYPE3,
            _ => HTTP_STATE_RESET_TYPE4,
        };
        let _ = dir;
        let mut node = state.queue.pop_front().unwrap_or_default();
        node.resp_time_end = Some(ts);
        state.last_finished = Some(mark_reset(node, http_state));
    }

    fn on_fin(&self, dir: Direction, state: &mut Self::State, ts: Timestamp) -> SessionState {
        if dir != Direction::FromServer {
            return SessionState::Active;
        }
        let Some(head) = state.queue.front() else {
            return SessionState::Active;
        };
        if head.state != DetailState::RspBodyBegin {
            return SessionState::Active;
        }
        let mut node = state.queue.pop_front().expect("checked above");
        node.state = DetailState::RspBodyComplete;
        node.resp_time_end = Some(ts);
        state.last_finished = Some(node);
        SessionState::Done
    }

    fn build_breakdown(&self, state: &mut Self::State, _ts: Timestamp) -> Option<ProtoBreakdown> {
        let node = state.last_finished.take()?;
        Some(ProtoBreakdown::Http(to_breakdown(&node)))
    }
}

fn feed_requests(state: &mut HttpState, bytes: &[u8], ts: Timestamp) -> usize {
    let mut consumed = 0;
    loop {
        if state.req_parser.is_idle() {
            state.queue.push_back(DetailNode::default());
        }
        let node = state.queue.back_mut().expect("just pushed if idle");
        let (n, done) = state.req_parser.feed(&bytes[consumed..], node, ts);
        consumed += n;
        if n == 0 || !done || consumed >= bytes.len() {
            break;
        }
    }
    consumed
}

fn feed_one_response(state: &mut HttpState, bytes: &[u8], ts: Timestamp) -> (usize, SessionState) {
    let mut consumed = 0;
    loop {
        let Some(node) = state.queue.front_mut() else {
            return (bytes.len(), SessionState::Active);
        };
        let (n, done) = state.resp_parser.feed(&bytes[consumed..], node, ts);
        consumed += n;
        if done {
            let finished = state.queue.pop_front().expect("checked above");
            state.last_finished = Some(finished);
            return (consumed, SessionState::Done);
        }
        if n == 0 || consumed >= bytes.len() {
            return (consumed, SessionState::Active);
        }
    }
}

fn mark_reset(mut node: DetailNode, http_state_code: u8) -> DetailNode {
    node.reset_http_state = Some(http_state_code);
    node
}

fn to_breakdown(node: &DetailNode) -> HttpBreakdown {
    let http_state = node.reset_http_state.unwrap_or(if node.is_ok_status() {
        HTTP_STATE_OK
    } else {
        HTTP_STATE_ERROR
    });

    HttpBreakdown {
        http_request_version: node.req_version.clone(),
        http_method: node.method.clone(),
        http_url: node.url.clone(),
        http_host: node.host.clone(),
        http_user_agent: node.user_agent.clone(),
        http_referer: node.referer.clone(),
        http_accept: node.accept.clone(),
        http_accept_language: node.accept_language.clone(),
        http_accept_encoding: node.accept_encoding.clone(),
        http_x_forwarded_for: node.x_forwarded_for.clone(),
        http_request_connection: node.req_connection.clone(),
        http_response_version: node.resp_version.clone(),
        http_content_type: node.content_type.clone(),
        http_content_disposition: node.content_disposition.clone(),
        http_transfer_encoding: node.transfer_encoding.clone(),
        http_response_connection: node.resp_connection.clone(),
        http_state,
        http_status_code: node.status_code,
        http_request_header_size: node.req_header_size,
        http_request_body_size: node.req_body_size,
        http_response_header_size: node.resp_header_size,
        http_response_body_size: node.resp_body_size,
        http_response_latency: node.resp_latency(),
        http_download_latency: node.download_latency(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(sec: u64) -> Timestamp {
        Timestamp::new(sec, 0)
    }

    #[test]
    fn happy_path_request_then_response_emits_one_breakdown() {
        let p = HttpParser;
        let mut s = p.new_state();
        let (c, done) = p
            .on_data(
                Direction::FromClient,
                b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n",
                &mut s,
                ts(0),
            )
            .unwrap();
        assert_eq!(done, SessionState::Active);
        assert_eq!(c, 29);

        let (_c, done) = p
            .on_data(
                Direction::FromServer,
                b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc",
                &mut s,
                ts(1),
            )
            .unwrap();
        assert_eq!(done, SessionState::Done);

        let bkd = p.build_breakdown(&mut s, ts(1)).unwrap();
        let ProtoBreakdown::Http(http) = bkd else {
            panic!("expected http breakdown")
        };
        assert_eq!(http.http_status_code, 200);
        assert_eq!(http.http_state, HTTP_STATE_OK);
        assert_eq!(http.http_response_body_size, 3);
        assert_eq!(http.http_request_body_size, 0);
    }

    #[test]
    fn pipelined_requests_match_responses_in_order() {
        let p = HttpParser;
        let mut s = p.new_state();
        p.on_data(
            Direction::FromClient,
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
            &mut s,
            ts(0),
        )
        .unwrap();
        assert_eq!(s.queue.len(), 2);

        let (_c, done) = p
            .on_data(
                Direction::FromServer,
                b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
                &mut s,
                ts(1),
            )
            .unwrap();
        assert_eq!(done, SessionState::Done);
        let first = p.build_breakdown(&mut s, ts(1)).unwrap();
        let ProtoBreakdown::Http(http) = first else {
            panic!("expected http")
        };
        assert_eq!(s.queue.len(), 1);
        assert_eq!(http.http_url, "/a");
    }

    #[test]
    fn reset_during_response_headers_is_reset_type3() {
        let p = HttpParser;
        let mut s = p.new_state();
        p.on_data(
            Direction::FromClient,
            b"GET /x HTTP/1.1\r\n\r\n",
            &mut s,
            ts(0),
        )
        .unwrap();
        p.on_data(
            Direction::FromServer,
            b"HTTP/1.1 200 OK\r\n",
            &mut s,
            ts(1),
        )
        .unwrap();
        p.on_reset(Direction::FromServer, &mut s, ts(2));
        let bkd = p.build_breakdown(&mut s, ts(2)).unwrap();
        let ProtoBreakdown::Http(http) = bkd else {
            panic!("expected http")
        };
        assert_eq!(http.http_state, HTTP_STATE_RESET_TYPE3);
    }
}
