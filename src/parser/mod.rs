//! The parser contract: a uniform callback set the TCP
//! reassembler drives, and a closed set of variants (`ParserKind`) instead of
//! a function-pointer dispatch table — the sum-type redesign
//! calls for in place of the source's table of callbacks.

pub mod default;
pub mod http;
pub mod mysql;

use crate::breakdown::ProtoBreakdown;
use crate::error::Result;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FromClient,
    FromServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Done,
}

/// Per-connection parser state and breakdown payload, behind one trait.
/// Each concrete parser (`Http`, `Mysql`, `Default`) implements this; the
/// dispatcher never calls through a function pointer.
pub trait Parser {
    type State;

    fn new_state(&self) -> Self::State;
    fn on_established(&self, state: &mut Self::State, ts: Timestamp);
    fn on_urgent(&self, dir: Direction, byte: u8, state: &mut Self::State, ts: Timestamp);
    fn on_data(
        &self,
        dir: Direction,
        bytes: &[u8],
        state: &mut Self::State,
        ts: Timestamp,
    ) -> Result<(usize, SessionState)>;
    fn on_reset(&self, dir: Direction, state: &mut Self::State, ts: Timestamp);
    fn on_fin(&self, dir: Direction, state: &mut Self::State, ts: Timestamp) -> SessionState;
    fn build_breakdown(&self, state: &mut Self::State, ts: Timestamp) -> Option<ProtoBreakdown>;
}

/// The closed set of parser variants a registered service can select.
/// Registration time maps `protocol_tag -> ParserKind`; nothing here is a
/// runtime function-pointer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Http,
    Mysql,
    Default,
}

/// Per-connection state for whichever parser the registry selected. Holding
/// a sum type here (rather than `Box<dyn Any>`) keeps dispatch exhaustive
/// and avoids downcasting.
pub enum ParserState {
    Http(<http::HttpParser as Parser>::State),
    Mysql(<mysql::MysqlParser as Parser>::State),
    Default(<default::DefaultParser as Parser>::State),
}

impl ParserKind {
    pub fn new_state(&self) -> ParserState {
        match self {
            ParserKind::Http => ParserState::Http(http::HttpParser.new_state()),
            ParserKind::Mysql => ParserState::Mysql(mysql::MysqlParser.new_state()),
            ParserKind::Default => ParserState::Default(default::DefaultParser.new_state()),
        }
    }

    pub fn on_established(&self, state: &mut ParserState, ts: Timestamp) {
        match (self, state) {
            (ParserKind::Http, ParserState::Http(s)) => http::HttpParser.on_established(s, ts),
            (ParserKind::Mysql, ParserState::Mysql(s)) => mysql::MysqlParser.on_established(s, ts),
            (ParserKind::Default, ParserState::Default(s)) => {
                default::DefaultParser.on_established(s, ts)
            }
            _ => unreachable!("parser kind and state must match"),
        }
    }

    pub fn on_urgent(&self, dir: Direction, byte: u8, state: &mut ParserState, ts: Timestamp) {
        match (self, state) {
            (ParserKind::Http, ParserState::Http(s)) => {
                http::HttpParser.on_urgent(dir, byte, s, ts)
            }
            (ParserKind::Mysql, ParserState::Mysql(s)) => {
                mysql::MysqlParser.on_urgent(dir, byte, s, ts)
            }
            (ParserKind::Default, ParserState::Default(s)) => {
                default::DefaultParser.on_urgent(dir, byte, s, ts)
            }
            _ => unreachable!("parser kind and state must match"),
        }
    }

    pub fn on_data(
        &self,
        dir: Direction,
        bytes: &[u8],
        state: &mut ParserState,
        ts: Timestamp,
    ) -> Result<(usize, SessionState)> {
        match (self, state) {
            (ParserKind::Http, ParserState::Http(s)) => {
                http::HttpParser.on_data(dir, bytes, s, ts)
            }
            (ParserKind::Mysql, ParserState::Mysql(s)) => {
                mysql::MysqlParser.on_data(dir, bytes, s, ts)
            }
            (ParserKind::Default, ParserState::Default(s)) => {
                default::DefaultParser.on_data(dir, bytes, s, ts)
            }
            _ => unreachable!("parser kind and state must match"),
        }
    }

    pub fn on_reset(&self, dir: Direction, state: &mut ParserState, ts: Timestamp) {
        match (self, state) {
            (ParserKind::Http, ParserState::Http(s)) => http::HttpParser.on_reset(dir, s, ts),
            (ParserKind::Mysql, ParserState::Mysql(s)) => mysql::MysqlParser.on_reset(dir, s, ts),
            (ParserKind::Default, ParserState::Default(s)) => {
                default::DefaultParser.on_reset(dir, s, ts)
            }
            _ => unreachable!("parser kind and state must match"),
        }
    }

    pub fn on_fin(&self, dir: Direction, state: &mut ParserState, ts: Timestamp) -> SessionState {
        match (self, state) {
            (ParserKind::Http, ParserState::Http(s)) => http::HttpParser.on_fin(dir, s, ts),
            (ParserKind::Mysql, ParserState::Mysql(s)) => mysql::MysqlParser.on_fin(dir, s, ts),
            (ParserKind::Default, ParserState::Default(s)) => {
                default::DefaultParser.on_fin(dir, s, ts)
            }
            _ => unreachable!("parser kind and state must match"),
        }
    }

    pub fn build_breakdown(&self, state: &mut ParserState, ts: Timestamp) -> Option<ProtoBreakdown> {
        match (self, state) {
            (ParserKind::Http, ParserState::Http(s)) => http::HttpParser.build_breakdown(s, ts),
            (ParserKind::Mysql, ParserState::Mysql(s)) => {
                mysql::MysqlParser.build_breakdown(s, ts)
            }
            (ParserKind::Default, ParserState::Default(s)) => {
                default::DefaultParser.build_breakdown(s, ts)
            }
            _ => unreachable!("parser kind and state must match"),
        }
    }
}
