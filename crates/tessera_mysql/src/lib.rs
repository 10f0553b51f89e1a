//! MySQL protocol *values*: the shapes the proxy core exchanges with the
//! wire layer. Packet framing, handshake and auth live outside the core; this
//! crate only knows result sets, status bits, charsets, the connection
//! attribute blob, and SQL fingerprinting.

pub mod charset;
pub mod connattrs;
pub mod fingerprint;
pub mod result;
pub mod value;

pub use result::{ColumnType, Field, QueryResult, Row};
pub use value::Value;

/// Server status flags (OK packet / EOF packet `status_flags`).
pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;

/// Bits that only make sense for a single backend stream; the merger masks
/// them out before OR-ing shard statuses together.
pub const PER_SHARD_ONLY_STATUS: u16 =
    SERVER_STATUS_CURSOR_EXISTS | SERVER_STATUS_LAST_ROW_SENT | SERVER_PS_OUT_PARAMS;
