//! Breakdown records and their JSON shape. Field names are
//! exact wire contract with the downstream sink, so nothing here gets
//! `rename_all` convenience — every key is spelled out.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static BREAKDOWN_ID: AtomicU64 = AtomicU64::new(1);
static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_breakdown_id() -> u64 {
    BREAKDOWN_ID.fetch_add(1, Ordering::Relaxed)
}

pub fn next_connection_id() -> u64 {
    CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// `tcp_state` values, fixed by the wire contract: `0=CONNECTED,
/// 1=DATA_EXCHANGING, 2=CLOSED, 3..6=RESET_TYPE1..4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Connected,
    DataExchanging,
    Closed,
    ResetType1,
    ResetType2,
    ResetType3,
    ResetType4,
}

impl TcpState {
    pub fn as_code(self) -> u8 {
        match self {
            TcpState::Connected => 0,
            TcpState::DataExchanging => 1,
            TcpState::Closed => 2,
            TcpState::ResetType1 => 3,
            TcpState::ResetType2 => 4,
            TcpState::ResetType3 => 5,
            TcpState::ResetType4 => 6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpBreakdown {
    pub breakdown_id: u64,
    pub timestamp: u64,
    pub protocol: &'static str,
    pub source_ip: String,
    pub source_port: u16,
    pub service_ip: String,
    pub service_port: u16,
    pub tcp_connection_id: u64,
    pub tcp_state: u8,
    pub tcp_retries: u32,
    pub tcp_retries_latency: i64,
    pub tcp_duplicate_synacks: u32,
    pub tcp_mss: u16,
    pub tcp_connection_latency: i64,
    pub tcp_total_packets: u64,
    pub tcp_tiny_packets: u64,
    pub tcp_paws_packets: u64,
    pub tcp_retransmitted_packets: u64,
    pub tcp_out_of_order_packets: u64,
    pub tcp_zero_windows: u64,
    pub tcp_duplicate_acks: u64,
    #[serde(flatten)]
    pub proto: ProtoBreakdown,
}

#[derive(Debug, Clone, Default)]
pub struct TcpFields {
    pub connection_id: u64,
    pub state: TcpState,
    pub retries: u32,
    pub retries_latency: i64,
    pub dup_synacks: u32,
    pub mss: u16,
    pub conn_latency: i64,
    pub total_pkts: u64,
    pub tiny_pkts: u64,
    pub paws_pkts: u64,
    pub retransmitted_pkts: u64,
    pub out_of_order_pkts: u64,
    pub zero_windows: u64,
    pub dup_acks: u64,
}

impl Default for TcpState {
    fn default() -> Self {
        TcpState::Connected
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_tcp_breakdown(
    ts_millis: u64,
    protocol: &'static str,
    src_ip: IpAddr,
    src_port: u16,
    svc_ip: IpAddr,
    svc_port: u16,
    fields: &TcpFields,
    proto: ProtoBreakdown,
) -> TcpBreakdown {
    TcpBreakdown {
        breakdown_id: next_breakdown_id(),
        timestamp: ts_millis,
        protocol,
        source_ip: src_ip.to_string(),
        source_port: src_port,
        service_ip: svc_ip.to_string(),
        service_port: svc_port,
        tcp_connection_id: fields.connection_id,
        tcp_state: fields.state.as_code(),
        tcp_retries: fields.retries,
        tcp_retries_latency: fields.retries_latency,
        tcp_duplicate_synacks: fields.dup_synacks,
        tcp_mss: fields.mss,
        tcp_connection_latency: fields.conn_latency,
        tcp_total_packets: fields.total_pkts,
        tcp_tiny_packets: fields.tiny_pkts,
        tcp_paws_packets: fields.paws_pkts,
        tcp_retransmitted_packets: fields.retransmitted_pkts,
        tcp_out_of_order_packets: fields.out_of_order_pkts,
        tcp_zero_windows: fields.zero_windows,
        tcp_duplicate_acks: fields.dup_acks,
        proto,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProtoBreakdown {
    Http(HttpBreakdown),
    Mysql(MysqlBreakdown),
    None(Empty),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize)]
pub struct HttpBreakdown {
    pub http_request_version: String,
    pub http_method: String,
    pub http_url: String,
    pub http_host: String,
    pub http_user_agent: String,
    pub http_referer: String,
    pub http_accept: String,
    pub http_accept_language: String,
    pub http_accept_encoding: String,
    pub http_x_forwarded_for: String,
    pub http_request_connection: String,
    pub http_response_version: String,
    pub http_content_type: String,
    pub http_content_disposition: String,
    pub http_transfer_encoding: String,
    pub http_response_connection: String,
    pub http_state: u8,
    pub http_status_code: u16,
    pub http_request_header_size: u64,
    pub http_request_body_size: u64,
    pub http_response_header_size: u64,
    pub http_response_body_size: u64,
    pub http_response_latency: i64,
    pub http_download_latency: i64,
}

impl Default for HttpBreakdown {
    fn default() -> Self {
        Self {
            http_request_version: String::new(),
            http_method: String::new(),
            http_url: String::new(),
            http_host: String::new(),
            http_user_agent: String::new(),
            http_referer: String::new(),
            http_accept: String::new(),
            http_accept_language: String::new(),
            http_accept_encoding: String::new(),
            http_x_forwarded_for: String::new(),
            http_request_connection: String::new(),
            http_response_version: String::new(),
            http_content_type: String::new(),
            http_content_disposition: String::new(),
            http_transfer_encoding: String::new(),
            http_response_connection: String::new(),
            http_state: 0,
            http_status_code: 0,
            http_request_header_size: 0,
            http_request_body_size: 0,
            http_response_header_size: 0,
            http_response_body_size: 0,
            http_response_latency: 0,
            http_download_latency: 0,
        }
    }
}

/// `http_state` values: the HTTP parser's own small taxonomy, distinct from
/// `tcp_state` — `0=OK, 1=ERROR, 2..5=RESET_TYPE1..4`.
pub const HTTP_STATE_OK: u8 = 0;
pub const HTTP_STATE_ERROR: u8 = 1;
pub const HTTP_STATE_RESET_TYPE1: u8 = 2;
pub const HTTP_STATE_RESET_TYPE2: u8 = 3;
pub const HTTP_STATE_RESET_TYPE3: u8 = 4;
pub const HTTP_STATE_RESET_TYPE4: u8 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct MysqlBreakdown {
    pub mysql_server_version: String,
    pub mysql_user_name: String,
    pub mysql_connection_id: u32,
    pub mysql_request_statement: String,
    pub mysql_state: u8,
    pub mysql_error_code: u16,
    pub mysql_sql_state: String,
    pub mysql_error_message: String,
    pub mysql_request_size: u64,
    pub mysql_response_size: u64,
    pub mysql_response_latency: i64,
    pub mysql_download_latency: i64,
}

impl Default for MysqlBreakdown {
    fn default() -> Self {
        Self {
            mysql_server_version: String::new(),
            mysql_user_name: String::new(),
            mysql_connection_id: 0,
            mysql_request_statement: String::new(),
            mysql_state: 0,
            mysql_error_code: 0,
            mysql_sql_state: String::new(),
            mysql_error_message: String::new(),
            mysql_request_size: 0,
            mysql_response_size: 0,
            mysql_response_latency: 0,
            mysql_download_latency: 0,
        }
    }
}

/// `mysql_state` values: `0=OK, 1=ERROR, 2..5=RESET_TYPE1..4`.
pub const MYSQL_STATE_OK: u8 = 0;
pub const MYSQL_STATE_ERROR: u8 = 1;
pub const MYSQL_STATE_RESET_TYPE1: u8 = 2;
pub const MYSQL_STATE_RESET_TYPE2: u8 = 3;
pub const MYSQL_STATE_RESET_TYPE3: u8 = 4;
pub const MYSQL_STATE_RESET_TYPE4: u8 = 5;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn tcp_state_codes_match_wire_contract() {
        assert_eq!(TcpState::Connected.as_code(), 0);
        assert_eq!(TcpState::DataExchanging.as_code(), 1);
        assert_eq!(TcpState::Closed.as_code(), 2);
        assert_eq!(TcpState::ResetType1.as_code(), 3);
        assert_eq!(TcpState::ResetType4.as_code(), 6);
    }

    #[test]
    fn http_breakdown_flattens_into_parent_object() {
        let fields = TcpFields::default();
        let bkd = build_tcp_breakdown(
            1_700_000_000_000,
            "http",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            51000,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            80,
            &fields,
            ProtoBreakdown::Http(HttpBreakdown {
                http_status_code: 200,
                ..Default::default()
            }),
        );
        let json = serde_json::to_string(&bkd).unwrap();
        assert!(json.contains("\"http_status_code\":200"));
        assert!(json.contains("\"protocol\":\"http\""));
        assert!(!json.contains("\"proto\""));
    }

    #[test]
    fn breakdown_ids_are_monotonic() {
        let a = next_breakdown_id();
        let b = next_breakdown_id();
        assert!(b > a);
    }
}
