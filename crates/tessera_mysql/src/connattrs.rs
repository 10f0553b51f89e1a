//! Connection-attribute blob parsing.
//!
//! The handshake response may carry a key/value blob: a length-encoded
//! integer with the total byte length, then pairs of `len-u8 key`,
//! `len-u8 value`. The wire layer hands the raw bytes here.

use std::collections::HashMap;
use tessera_common::error::{ExecError, ProxyError};

/// Read a length-encoded integer at `pos`. Returns `(value, next_pos)`.
fn read_lenc_int(data: &[u8], pos: usize) -> Result<(u64, usize), ProxyError> {
    let first = *data.get(pos).ok_or(ProxyError::Exec(ExecError::MalformedPacket))?;
    match first {
        0x00..=0xfa => Ok((first as u64, pos + 1)),
        0xfc => {
            let b = data
                .get(pos + 1..pos + 3)
                .ok_or(ProxyError::Exec(ExecError::MalformedPacket))?;
            Ok((u16::from_le_bytes([b[0], b[1]]) as u64, pos + 3))
        }
        0xfd => {
            let b = data
                .get(pos + 1..pos + 4)
                .ok_or(ProxyError::Exec(ExecError::MalformedPacket))?;
            Ok((u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64, pos + 4))
        }
        0xfe => {
            let b = data
                .get(pos + 1..pos + 9)
                .ok_or(ProxyError::Exec(ExecError::MalformedPacket))?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            Ok((u64::from_le_bytes(buf), pos + 9))
        }
        _ => Err(ProxyError::Exec(ExecError::MalformedPacket)),
    }
}

fn read_lenc_bytes(data: &[u8], pos: usize) -> Result<(&[u8], usize), ProxyError> {
    let (len, pos) = read_lenc_int(data, pos)?;
    let end = pos
        .checked_add(len as usize)
        .ok_or(ProxyError::Exec(ExecError::MalformedPacket))?;
    let bytes = data
        .get(pos..end)
        .ok_or(ProxyError::Exec(ExecError::MalformedPacket))?;
    Ok((bytes, end))
}

/// Parse the blob starting at `pos`. Returns the attribute map and the
/// position of the first byte after the blob.
pub fn parse_conn_attrs(
    data: &[u8],
    pos: usize,
) -> Result<(HashMap<String, String>, usize), ProxyError> {
    let (total, mut cur) = read_lenc_int(data, pos)?;
    let end = cur
        .checked_add(total as usize)
        .ok_or(ProxyError::Exec(ExecError::MalformedPacket))?;
    if end > data.len() {
        return Err(ProxyError::Exec(ExecError::MalformedPacket));
    }

    let mut attrs = HashMap::new();
    while cur < end {
        let (key, next) = read_lenc_bytes(data, cur)?;
        let (val, next) = read_lenc_bytes(data, next)?;
        if next > end {
            return Err(ProxyError::Exec(ExecError::MalformedPacket));
        }
        attrs.insert(
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(val).into_owned(),
        );
        cur = next;
    }
    Ok((attrs, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Capture from a libmysql 8.0.11 handshake.
    const BLOB: &[u8] = &[
        0x70, 0x04, 0x5f, 0x70, 0x69, 0x64, 0x05, 0x32, 0x32, 0x38, 0x35, 0x30, 0x09, 0x5f, 0x70,
        0x6c, 0x61, 0x74, 0x66, 0x6f, 0x72, 0x6d, 0x06, 0x78, 0x38, 0x36, 0x5f, 0x36, 0x34, 0x03,
        0x5f, 0x6f, 0x73, 0x0f, 0x6c, 0x69, 0x6e, 0x75, 0x78, 0x2d, 0x67, 0x6c, 0x69, 0x62, 0x63,
        0x32, 0x2e, 0x31, 0x32, 0x0c, 0x5f, 0x63, 0x6c, 0x69, 0x65, 0x6e, 0x74, 0x5f, 0x6e, 0x61,
        0x6d, 0x65, 0x08, 0x6c, 0x69, 0x62, 0x6d, 0x79, 0x73, 0x71, 0x6c, 0x0f, 0x5f, 0x63, 0x6c,
        0x69, 0x65, 0x6e, 0x74, 0x5f, 0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, 0x06, 0x38, 0x2e,
        0x30, 0x2e, 0x31, 0x31, 0x0c, 0x70, 0x72, 0x6f, 0x67, 0x72, 0x61, 0x6d, 0x5f, 0x6e, 0x61,
        0x6d, 0x65, 0x05, 0x6d, 0x79, 0x73, 0x71, 0x6c,
    ];

    #[test]
    fn parses_libmysql_blob() {
        let (attrs, pos) = parse_conn_attrs(BLOB, 0).unwrap();
        assert_eq!(pos, 113);
        assert_eq!(attrs["_client_version"], "8.0.11");
        assert_eq!(attrs["program_name"], "mysql");
        assert_eq!(attrs["_pid"], "22850");
        assert_eq!(attrs["_platform"], "x86_64");
        assert_eq!(attrs["_os"], "linux-glibc2.12");
        assert_eq!(attrs["_client_name"], "libmysql");
        assert_eq!(attrs.len(), 6);
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let err = parse_conn_attrs(&BLOB[..40], 0).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Exec(ExecError::MalformedPacket)
        ));
    }

    #[test]
    fn truncated_value_is_malformed() {
        // total length says 4 bytes, key wants 10
        let data = [0x04, 0x0a, b'a', b'b', b'c'];
        assert!(parse_conn_attrs(&data, 0).is_err());
    }

    #[test]
    fn empty_blob_is_fine() {
        let (attrs, pos) = parse_conn_attrs(&[0x00], 0).unwrap();
        assert!(attrs.is_empty());
        assert_eq!(pos, 1);
    }

    #[test]
    fn two_byte_length_prefix() {
        // 0xfc prefix with little-endian length 4, then one tiny pair
        let data = [0xfc, 0x04, 0x00, 0x01, b'k', 0x01, b'v'];
        let (attrs, pos) = parse_conn_attrs(&data, 0).unwrap();
        assert_eq!(attrs["k"], "v");
        assert_eq!(pos, 7);
    }
}
