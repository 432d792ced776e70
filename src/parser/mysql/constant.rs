//! MySQL wire-protocol constants relevant to passive observation. Trimmed
//! to what a sniffer needs: command bytes, capability/status flags, and
//! response markers. No capability negotiation helpers for driving a
//! connection — this parser only ever reads what passed on the wire,
//! never writes.

/// The full documented client command set, `COM_SLEEP=0x00`
/// through `COM_RESET_CONNECTION=0x1F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandByte {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Refresh = 0x07,
    Shutdown = 0x08,
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    Connect = 0x0b,
    ProcessKill = 0x0c,
    Debug = 0x0d,
    Ping = 0x0e,
    Time = 0x0f,
    DelayedInsert = 0x10,
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    TableDump = 0x13,
    ConnectOut = 0x14,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    Daemon = 0x1d,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
}

impl CommandByte {
    pub fn from_u8(b: u8) -> Option<Self> {
        use CommandByte::*;
        Some(match b {
            0x00 => Sleep,
            0x01 => Quit,
            0x02 => InitDb,
            0x03 => Query,
            0x04 => FieldList,
            0x05 => CreateDb,
            0x06 => DropDb,
            0x07 => Refresh,
            0x08 => Shutdown,
            0x09 => Statistics,
            0x0a => ProcessInfo,
            0x0b => Connect,
            0x0c => ProcessKill,
            0x0d => Debug,
            0x0e => Ping,
            0x0f => Time,
            0x10 => DelayedInsert,
            0x11 => ChangeUser,
            0x12 => BinlogDump,
            0x13 => TableDump,
            0x14 => ConnectOut,
            0x15 => RegisterSlave,
            0x16 => StmtPrepare,
            0x17 => StmtExecute,
            0x18 => StmtSendLongData,
            0x19 => StmtClose,
            0x1a => StmtReset,
            0x1b => SetOption,
            0x1c => StmtFetch,
            0x1d => Daemon,
            0x1e => BinlogDumpGtid,
            0x1f => ResetConnection,
            _ => return None,
        })
    }
}

pub const RESPONSE_OK: u8 = 0x00;
pub const RESPONSE_EOF: u8 = 0xfe;
pub const RESPONSE_ERR: u8 = 0xff;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityFlags: u32 {
        const LONG_PASSWORD = 0x0000_0001;
        const FOUND_ROWS = 0x0000_0002;
        const LONG_FLAG = 0x0000_0004;
        const CONNECT_WITH_DB = 0x0000_0008;
        const COMPRESS = 0x0000_0020;
        const LOCAL_FILES = 0x0000_0080;
        const PROTOCOL_41 = 0x0000_0200;
        const SSL = 0x0000_0800;
        const TRANSACTIONS = 0x0000_2000;
        const SECURE_CONNECTION = 0x0000_8000;
        const MULTI_STATEMENTS = 0x0001_0000;
        const MULTI_RESULTS = 0x0002_0000;
        const PS_MULTI_RESULTS = 0x0004_0000;
        const PLUGIN_AUTH = 0x0008_0000;
        const CONNECT_ATTRS = 0x0010_0000;
        const PLUGIN_AUTH_LENENC_CLIENT_DATA = 0x0020_0000;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServerStatusFlags: u16 {
        const SERVER_STATUS_IN_TRANS = 0x0001;
        const SERVER_STATUS_AUTOCOMMIT = 0x0002;
        const SERVER_MORE_RESULTS_EXISTS = 0x0008;
        const SERVER_STATUS_CURSOR_EXISTS = 0x0040;
        const SERVER_STATUS_LAST_ROW_SENT = 0x0080;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_byte_round_trips_full_documented_range() {
        for b in 0x00u8..=0x1f {
            assert!(CommandByte::from_u8(b).is_some(), "missing command {b:#x}");
        }
        assert!(CommandByte::from_u8(0x20).is_none());
    }
}
