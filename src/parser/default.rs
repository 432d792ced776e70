//! The built-in fallback parser: for services registered
//! without a more specific `protocol_tag`, accumulate byte counts and
//! timing only. It never reports `done`, so no protocol breakdown is ever
//! built for it — the connection's CONNECTED/CLOSED breakdowns still fire
//! from the reassembler regardless.

use crate::breakdown::ProtoBreakdown;
use crate::error::Result;
use crate::parser::{Direction, Parser, SessionState};
use crate::time::Timestamp;

pub struct DefaultParser;

#[derive(Debug, Default)]
pub struct DefaultState {
    pub bytes_from_client: u64,
    pub bytes_from_server: u64,
    pub established_at: Option<Timestamp>,
}

impl Parser for DefaultParser {
    type State = DefaultState;

    fn new_state(&self) -> Self::State {
        DefaultState::default()
    }

    fn on_established(&self, state: &mut Self::State, ts: Timestamp) {
        state.established_at = Some(ts);
    }

    fn on_urgent(&self, _dir: Direction, _byte: u8, _state: &mut Self::State, _ts: Timestamp) {}

    fn on_data(
        &self,
        dir: Direction,
        bytes: &[u8],
        state: &mut Self::State,
        _ts: Timestamp,
    ) -> Result<(usize, SessionState)> {
        match dir {
            Direction::FromClient => state.bytes_from_client += bytes.len() as u64,
            Direction::FromServer => state.bytes_from_server += bytes.len() as u64,
        }
        Ok((bytes.len(), SessionState::Active))
    }

    fn on_reset(&self, _dir: Direction, _state: &mut Self::State, _ts: Timestamp) {}

    fn on_fin(&self, _dir: Direction, _state: &mut Self::State, _ts: Timestamp) -> SessionState {
        SessionState::Active
    }

    fn build_breakdown(&self, _state: &mut Self::State, _ts: Timestamp) -> Option<ProtoBreakdown> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_byte_counts_per_direction() {
        let p = DefaultParser;
        let mut s = p.new_state();
        p.on_data(Direction::FromClient, b"hello", &mut s, Timestamp::new(0, 0))
            .unwrap();
        p.on_data(Direction::FromServer, b"hi", &mut s, Timestamp::new(0, 0))
            .unwrap();
        assert_eq!(s.bytes_from_client, 5);
        assert_eq!(s.bytes_from_server, 2);
    }

    #[test]
    fn never_signals_done() {
        let p = DefaultParser;
        let mut s = p.new_state();
        let (consumed, state) = p
            .on_data(Direction::FromClient, b"x", &mut s, Timestamp::new(0, 0))
            .unwrap();
        assert_eq!(consumed, 1);
        assert_eq!(state, SessionState::Active);
    }
}
