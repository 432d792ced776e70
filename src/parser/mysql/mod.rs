//! MySQL wire protocol parser: handshake, command dispatch,
//! and result-set framing collapsed into one state matrix. Row and field
//! payloads are never decoded for their values here — every logical MySQL
//! unit is already a whole wire packet, so packet framing alone is enough
//! to track result-set boundaries; no breakdown field ever surfaces a
//! decoded column value, so this parser only needs packet *counts*.

pub mod compress;
pub mod constant;
pub mod handshake;
pub mod packet;
pub mod primitive;

use tracing::warn;

use crate::breakdown::{
    MysqlBreakdown, ProtoBreakdown, MYSQL_STATE_ERROR, MYSQL_STATE_OK, MYSQL_STATE_RESET_TYPE1,
    MYSQL_STATE_RESET_TYPE2, MYSQL_STATE_RESET_TYPE3, MYSQL_STATE_RESET_TYPE4,
};
use crate::error::Result;
use crate::parser::{Direction, Parser, SessionState};
use crate::time::Timestamp;
use constant::{CapabilityFlags, CommandByte, ServerStatusFlags, RESPONSE_EOF, RESPONSE_ERR, RESPONSE_OK};

pub struct MysqlParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakePhase {
    AwaitGreeting,
    AwaitClientReply,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubState {
    SecureAuth,
    Sleep,
    FieldList,
    TxtRs,
    TxtField,
    TxtRow,
    BinRs,
    BinField,
    BinRow,
    StmtMeta,
    StmtParam,
    StmtFetchRs,
    Pong,
    OkOrError,
}

/// Classifies where in a transaction a reset landed, for the T1..T4
/// mapping used analogously to the HTTP parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    RequestBegin,
    RequestComplete,
    ResponseBegin,
}

pub struct MysqlState {
    handshake_phase: HandshakePhase,
    sub_state: SubState,
    phase: Phase,
    do_compress: bool,
    server_version: String,
    connection_id: u32,
    user_name: String,

    req_statement: String,
    req_time: Option<Timestamp>,
    req_size: u64,
    resp_size: u64,
    resp_time_begin: Option<Timestamp>,
    remaining_fields: u32,
    produces_breakdown: bool,

    last_finished: Option<MysqlBreakdown>,
    reset_marker: Option<u8>,
}

impl Default for MysqlState {
    fn default() -> Self {
        Self {
            handshake_phase: HandshakePhase::AwaitGreeting,
            sub_state: SubState::Sleep,
            phase: Phase::Init,
            do_compress: false,
            server_version: String::new(),
            connection_id: 0,
            user_name: String::new(),
            req_statement: String::new(),
            req_time: None,
            req_size: 0,
            resp_size: 0,
            resp_time_begin: None,
            remaining_fields: 0,
            produces_breakdown: true,
            last_finished: None,
            reset_marker: None,
        }
    }
}

impl Parser for MysqlParser {
    type State = MysqlState;

    fn new_state(&self) -> Self::State {
        MysqlState::default()
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
        let mut consumed = 0;
        loop {
            let remaining = &bytes[consumed..];
            let Some((seq_id, payload, frame_len)) = next_frame(state.do_compress, remaining)?
            else {
                break;
            };
            consumed += frame_len;
            let _ = seq_id;
            let done = dispatch(state, dir, payload, ts);
            if done {
                return Ok((consumed, SessionState::Done));
            }
            if consumed >= bytes.len() {
                break;
            }
        }
        Ok((consumed, SessionState::Active))
    }

    fn on_reset(&self, _dir: Direction, state: &mut Self::State, _ts: Timestamp) {
        let code = match state.phase {
            Phase::Init => MYSQL_STATE_RESET_TYPE4,
            Phase::RequestBegin => MYSQL_STATE_RESET_TYPE1,
            Phase::RequestComplete => MYSQL_STATE_RESET_TYPE2,
            Phase::ResponseBegin => MYSQL_STATE_RESET_TYPE3,
        };
        state.reset_marker = Some(code);
        state.last_finished = Some(finish(state, code, None));
    }

    fn on_fin(&self, _dir: Direction, _state: &mut Self::State, _ts: Timestamp) -> SessionState {
        SessionState::Active
    }

    fn build_breakdown(&self, state: &mut Self::State, _ts: Timestamp) -> Option<ProtoBreakdown> {
        state
            .last_finished
            .take()
            .map(ProtoBreakdown::Mysql)
    }
}

/// Reads one logical frame off the front of `bytes`, compressed or plain.
/// Compressed transport is treated as one inner packet per outer frame —
/// servers may pack several small packets into one compressed frame, which
/// this simplification does not split; see DESIGN.md.
fn next_frame(do_compress: bool, bytes: &[u8]) -> Result<Option<(u8, Vec<u8>, usize)>> {
    if do_compress {
        let Some(frame) = compress::try_read_compressed_frame(bytes)? else {
            return Ok(None);
        };
        Ok(Some((frame.seq_id, frame.inner, frame.consumed)))
    } else {
        let Some(frame) = packet::try_read_packet(bytes) else {
            return Ok(None);
        };
        Ok(Some((frame.seq_id, frame.payload.to_vec(), frame.consumed)))
    }
}

fn dispatch(state: &mut MysqlState, dir: Direction, payload: Vec<u8>, ts: Timestamp) -> bool {
    match state.handshake_phase {
        HandshakePhase::AwaitGreeting if dir == Direction::FromServer => {
            if let Ok(greeting) = handshake::parse_server_greeting(&payload) {
                state.server_version = greeting.server_version;
                state.connection_id = greeting.connection_id;
            }
            state.handshake_phase = HandshakePhase::AwaitClientReply;
            return false;
        }
        HandshakePhase::AwaitClientReply if dir == Direction::FromClient => {
            if let Ok(reply) = handshake::parse_client_handshake(&payload) {
                state.user_name = reply.user_name;
                state.do_compress = reply.do_compress;
            }
            state.handshake_phase = HandshakePhase::Done;
            state.sub_state = SubState::SecureAuth;
            return false;
        }
        HandshakePhase::Done => {}
        _ => return false,
    }

    match dir {
        Direction::FromClient => on_client(state, payload, ts),
        Direction::FromServer => on_server(state, payload, ts),
    }
}

fn on_client(state: &mut MysqlState, payload: Vec<u8>, ts: Timestamp) -> bool {
    if state.sub_state != SubState::Sleep {
        // Mid-auth re-handshake bytes (e.g. an auth-switch reply) or a
        // stray command during a result set: not part of the documented
        // command dispatch, ignored rather than desynchronizing.
        return false;
    }
    let Some(&cmd_byte) = payload.first() else {
        return false;
    };
    let Some(cmd) = CommandByte::from_u8(cmd_byte) else {
        warn!(cmd_byte, "unsupported mysql command byte");
        return false;
    };

    state.phase = Phase::RequestBegin;
    state.req_time = Some(ts);
    state.req_size = payload.len() as u64;
    state.resp_size = 0;
    state.resp_time_begin = None;
    state.produces_breakdown = true;

    let arg = String::from_utf8_lossy(&payload[1..]).to_string();
    use CommandByte::*;
    match cmd {
        Query => {
            state.req_statement = format!("COM_QUERY schema:{arg}");
            state.sub_state = SubState::TxtRs;
        }
        FieldList => {
            state.req_statement = "COM_FIELD_LIST".to_string();
            state.sub_state = SubState::FieldList;
        }
        Quit => {
            state.req_statement.clear();
            state.produces_breakdown = false;
            state.sub_state = SubState::Sleep;
        }
        Ping => {
            state.req_statement.clear();
            state.produces_breakdown = false;
            state.sub_state = SubState::Pong;
        }
        StmtPrepare => {
            state.req_statement = format!("COM_STMT_PREPARE {arg}");
            state.sub_state = SubState::StmtMeta;
        }
        StmtExecute => {
            state.req_statement = "COM_STMT_EXECUTE".to_string();
            state.sub_state = SubState::BinRs;
        }
        StmtFetch => {
            state.req_statement = "COM_STMT_FETCH".to_string();
            state.sub_state = SubState::StmtFetchRs;
        }
        ChangeUser => {
            state.req_statement = "COM_CHANGE_USER".to_string();
            state.produces_breakdown = false;
            state.sub_state = SubState::SecureAuth;
            state.handshake_phase = HandshakePhase::Done;
        }
        StmtSendLongData | StmtClose => {
            // Neither expects a response packet.
            state.req_statement.clear();
            state.produces_breakdown = false;
            state.sub_state = SubState::Sleep;
        }
        _ => {
            state.req_statement = format!("{cmd:?}");
            state.sub_state = SubState::OkOrError;
        }
    }
    state.phase = Phase::RequestComplete;
    false
}

fn on_server(state: &mut MysqlState, payload: Vec<u8>, ts: Timestamp) -> bool {
    state.resp_size += payload.len() as u64;
    if state.resp_time_begin.is_none() {
        state.resp_time_begin = Some(ts);
        state.phase = Phase::ResponseBegin;
    }
    let Some(&marker) = payload.first() else {
        return false;
    };

    match state.sub_state {
        SubState::SecureAuth => match marker {
            RESPONSE_OK => {
                state.sub_state = SubState::Sleep;
                state.handshake_phase = HandshakePhase::Done;
                false
            }
            RESPONSE_ERR => {
                state.sub_state = SubState::Sleep;
                false
            }
            _ => false, // AuthSwitchRequest: stays in SecureAuth, session not ended
        },
        SubState::Pong => {
            state.sub_state = SubState::Sleep;
            false // COM_PING never produces a breakdown
        }
        SubState::OkOrError => finish_or_continue(state, marker, ts, SubState::Sleep),
        SubState::TxtRs | SubState::BinRs => match marker {
            RESPONSE_OK => complete(state, MYSQL_STATE_OK, None, ts),
            RESPONSE_ERR => complete(state, MYSQL_STATE_ERROR, Some(&payload), ts),
            _ => {
                let (count, _) = primitive::read_int_lenenc(&payload).unwrap_or((0, 1, false));
                state.remaining_fields = count as u32;
                state.sub_state = if state.sub_state == SubState::TxtRs {
                    SubState::TxtField
                } else {
                    SubState::BinField
                };
                false
            }
        },
        SubState::TxtField | SubState::BinField => {
            if is_eof(&payload) && state.remaining_fields == 0 {
                state.sub_state = if state.sub_state == SubState::TxtField {
                    SubState::TxtRow
                } else {
                    SubState::BinRow
                };
            } else {
                state.remaining_fields = state.remaining_fields.saturating_sub(1);
            }
            false
        }
        SubState::FieldList => {
            if is_eof(&payload) {
                complete(state, MYSQL_STATE_OK, None, ts)
            } else {
                false
            }
        }
        SubState::TxtRow | SubState::BinRow => {
            if is_eof(&payload) {
                if eof_has_more_results(&payload) {
                    state.sub_state = SubState::TxtRs;
                    false
                } else {
                    complete(state, MYSQL_STATE_OK, None, ts)
                }
            } else {
                false
            }
        }
        SubState::StmtMeta if marker == RESPONSE_ERR => {
            complete(state, MYSQL_STATE_ERROR, Some(&payload), ts)
        }
        SubState::StmtMeta => {
            let num_columns = payload.get(5..7).and_then(primitive::read_int_2).unwrap_or(0);
            let num_params = payload.get(7..9).and_then(primitive::read_int_2).unwrap_or(0);
            if num_params > 0 {
                state.remaining_fields = num_params as u32;
                state.sub_state = SubState::StmtParam;
            } else if num_columns > 0 {
                state.remaining_fields = num_columns as u32;
                state.sub_state = SubState::BinField;
            } else {
                return complete(state, MYSQL_STATE_OK, None, ts);
            }
            false
        }
        SubState::StmtParam => {
            if is_eof(&payload) {
                state.sub_state = SubState::BinField;
            } else {
                state.remaining_fields = state.remaining_fields.saturating_sub(1);
            }
            false
        }
        SubState::StmtFetchRs => match marker {
            RESPONSE_ERR => complete(state, MYSQL_STATE_ERROR, Some(&payload), ts),
            _ if is_eof(&payload) => complete(state, MYSQL_STATE_OK, None, ts),
            _ => false,
        },
    }
}

fn finish_or_continue(
    state: &mut MysqlState,
    marker: u8,
    ts: Timestamp,
    next_idle: SubState,
) -> bool {
    match marker {
        RESPONSE_OK => {
            state.sub_state = next_idle;
            complete(state, MYSQL_STATE_OK, None, ts)
        }
        RESPONSE_ERR => {
            state.sub_state = next_idle;
            complete(state, MYSQL_STATE_ERROR, None, ts)
        }
        _ => false,
    }
}

fn is_eof(payload: &[u8]) -> bool {
    payload.first() == Some(&RESPONSE_EOF) && payload.len() < 9
}

fn eof_has_more_results(payload: &[u8]) -> bool {
    let Some(tail) = payload.get(3..5) else {
        return false;
    };
    let Some(status) = primitive::read_int_2(tail) else {
        return false;
    };
    ServerStatusFlags::from_bits_truncate(status).contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
}

fn complete(state: &mut MysqlState, code: u8, err_payload: Option<&[u8]>, ts: Timestamp) -> bool {
    state.sub_state = SubState::Sleep;
    if !state.produces_breakdown {
        return false;
    }
    let bkd = finish(state, code, err_payload);
    state.last_finished = Some(bkd);
    let _ = ts;
    true
}

fn finish(state: &MysqlState, code: u8, err_payload: Option<&[u8]>) -> MysqlBreakdown {
    let (error_code, sql_state, error_message) = err_payload
        .and_then(parse_err_payload)
        .unwrap_or((0, String::new(), String::new()));

    let resp_latency = match state.resp_time_begin {
        Some(begin) => match state.req_time {
            Some(req) => begin.millis_since(req),
            None => 0,
        },
        None => 0,
    };

    MysqlBreakdown {
        mysql_server_version: state.server_version.clone(),
        mysql_user_name: state.user_name.clone(),
        mysql_connection_id: state.connection_id,
        mysql_request_statement: state.req_statement.clone(),
        mysql_state: code,
        mysql_error_code: error_code,
        mysql_sql_state: sql_state,
        mysql_error_message: error_message,
        mysql_request_size: state.req_size,
        mysql_response_size: state.resp_size,
        mysql_response_latency: resp_latency,
        mysql_download_latency: 0,
    }
}

/// `ERR` packet: `0xff, error_code:u16, sql_state_marker('#'), sql_state:5,
/// message`. The `CapabilityFlags` import exists so the handshake-derived
/// capability set stays in scope for documentation of why the marker byte
/// is assumed present (CLIENT_PROTOCOL_41 is near-universal today).
fn parse_err_payload(payload: &[u8]) -> Option<(u16, String, String)> {
    let _ = CapabilityFlags::PROTOCOL_41;
    if payload.first() != Some(&RESPONSE_ERR) {
        return None;
    }
    let code = primitive::read_int_2(&payload[1..])?;
    if payload.get(3) == Some(&b'#') && payload.len() >= 9 {
        let sql_state = String::from_utf8_lossy(&payload[4..9]).to_string();
        let message = String::from_utf8_lossy(&payload[9..]).to_string();
        Some((code, sql_state, message))
    } else {
        let message = String::from_utf8_lossy(payload.get(3..).unwrap_or(&[])).to_string();
        Some((code, String::new(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        let len = payload.len() as u32;
        out.extend_from_slice(&len.to_le_bytes()[..3]);
        out.push(seq);
        out.extend_from_slice(payload);
        out
    }

    fn ts(sec: u64) -> Timestamp {
        Timestamp::new(sec, 0)
    }

    fn greeting_packet() -> Vec<u8> {
        let mut p = vec![0x0a];
        p.extend_from_slice(b"8.0.34\0");
        p.extend_from_slice(&7u32.to_le_bytes());
        p.extend_from_slice(&[0u8; 8]);
        p.push(0);
        p.extend_from_slice(&0xffffu16.to_le_bytes());
        p.push(0xff);
        p.extend_from_slice(&0x0002u16.to_le_bytes());
        p.extend_from_slice(&0x0000u16.to_le_bytes());
        packet(0, &p)
    }

    fn client_reply_packet() -> Vec<u8> {
        let mut p = CapabilityFlags::PROTOCOL_41.bits().to_le_bytes().to_vec();
        p.extend_from_slice(&16_777_216u32.to_le_bytes());
        p.push(33);
        p.extend_from_slice(&[0u8; 23]);
        p.extend_from_slice(b"root\0");
        packet(1, &p)
    }

    #[test]
    fn simple_query_produces_ok_breakdown() {
        let p = MysqlParser;
        let mut s = p.new_state();

        p.on_data(Direction::FromServer, &greeting_packet(), &mut s, ts(0))
            .unwrap();
        p.on_data(Direction::FromClient, &client_reply_packet(), &mut s, ts(0))
            .unwrap();
        p.on_data(Direction::FromServer, &packet(2, &[RESPONSE_OK, 0, 0, 2, 0, 0]), &mut s, ts(0))
            .unwrap();

        let mut query = vec![CommandByte::Query as u8];
        query.extend_from_slice(b"SELECT 1");
        let (_c, done) = p
            .on_data(Direction::FromClient, &packet(0, &query), &mut s, ts(1))
            .unwrap();
        assert_eq!(done, SessionState::Active);

        // field count = 1
        p.on_data(Direction::FromServer, &packet(1, &[1]), &mut s, ts(2))
            .unwrap();
        // one field definition packet (opaque)
        p.on_data(Direction::FromServer, &packet(2, &[0u8; 20]), &mut s, ts(2))
            .unwrap();
        // EOF ending field defs
        p.on_data(
            Direction::FromServer,
            &packet(3, &[RESPONSE_EOF, 0, 0, 0, 0]),
            &mut s,
            ts(2),
        )
        .unwrap();
        // one row
        p.on_data(Direction::FromServer, &packet(4, b"\x011"), &mut s, ts(2))
            .unwrap();
        // EOF ending the result set
        let (_c, done) = p
            .on_data(
                Direction::FromServer,
                &packet(5, &[RESPONSE_EOF, 0, 0, 0, 0]),
                &mut s,
                ts(3),
            )
            .unwrap();
        assert_eq!(done, SessionState::Done);

        let bkd = p.build_breakdown(&mut s, ts(3)).unwrap();
        let ProtoBreakdown::Mysql(m) = bkd else {
            panic!("expected mysql breakdown")
        };
        assert_eq!(m.mysql_state, MYSQL_STATE_OK);
        assert_eq!(m.mysql_request_statement, "COM_QUERY schema:SELECT 1");
        assert!(m.mysql_response_size > 0);
        assert!(m.mysql_response_latency >= 0);
    }

    #[test]
    fn quit_and_ping_do_not_produce_breakdowns() {
        let p = MysqlParser;
        let mut s = p.new_state();
        p.on_data(Direction::FromServer, &greeting_packet(), &mut s, ts(0))
            .unwrap();
        p.on_data(Direction::FromClient, &client_reply_packet(), &mut s, ts(0))
            .unwrap();
        p.on_data(Direction::FromServer, &packet(2, &[RESPONSE_OK, 0, 0, 2, 0, 0]), &mut s, ts(0))
            .unwrap();

        let (_c, done) = p
            .on_data(
                Direction::FromClient,
                &packet(0, &[CommandByte::Ping as u8]),
                &mut s,
                ts(1),
            )
            .unwrap();
        assert_eq!(done, SessionState::Active);
        let (_c, done) = p
            .on_data(Direction::FromServer, &packet(1, &[RESPONSE_OK, 0, 0]), &mut s, ts(1))
            .unwrap();
        assert_eq!(done, SessionState::Active);
        assert!(s.last_finished.is_none());
    }
}
