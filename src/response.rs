//! Fixed-width, text-encoded response header (§4.4.3) and the framing rule
//! for the binary level payload that follows it (§4.4.4).

use crate::error::ServerError;

/// Maximum size of the serialized response header, including the trailing
/// newline.
pub const RESPONSE_HEADER_BUFFER_SIZE: usize = 256;

/// The crate's own protocol version string, distinct from the Cargo package
/// version, since the wire format and the crate's release cadence are
/// allowed to diverge.
pub const PROTOCOL_VERSION: &str = "1";

/// `(status, version, cols, rows, n_bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: ServerError,
    pub version: String,
    pub cols: u32,
    pub rows: u32,
    pub n_bytes: u32,
}

impl ResponseHeader {
    #[must_use]
    pub fn ok(cols: u32, rows: u32, n_bytes: u32) -> Self {
        Self {
            status: ServerError::Ok,
            version: PROTOCOL_VERSION.to_string(),
            cols,
            rows,
            n_bytes,
        }
    }

    #[must_use]
    pub fn error(status: ServerError) -> Self {
        Self {
            status,
            version: PROTOCOL_VERSION.to_string(),
            cols: 0,
            rows: 0,
            n_bytes: 0,
        }
    }

    /// `<status_code>\t<server_version>\t<cols>\t<rows>\t<n_bytes>\n`.
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\n",
            self.status.code(),
            self.version,
            self.cols,
            self.rows,
            self.n_bytes
        )
    }

    pub fn compose(&self) -> Result<[u8; RESPONSE_HEADER_BUFFER_SIZE], ServerError> {
        let s = self.to_wire_string();
        if s.len() > RESPONSE_HEADER_BUFFER_SIZE {
            return Err(ServerError::ServerFailure);
        }
        let mut buf = [0u8; RESPONSE_HEADER_BUFFER_SIZE];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        Ok(buf)
    }

    /// Parse a response header terminated by `\n` out of a byte buffer.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let term = buf.iter().position(|&b| b == b'\n')?;
        let line = std::str::from_utf8(&buf[..term]).ok()?;
        let mut fields = line.split('\t');
        let status: u32 = fields.next()?.parse().ok()?;
        let version = fields.next()?.to_string();
        let cols: u32 = fields.next()?.parse().ok()?;
        let rows: u32 = fields.next()?.parse().ok()?;
        let n_bytes: u32 = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            status: ServerError::from_code(status),
            version,
            cols,
            rows,
            n_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_round_trip() {
        let hdr = ResponseHeader::ok(3, 10, 120);
        let buf = hdr.compose().unwrap();
        let parsed = ResponseHeader::parse(&buf).unwrap();
        assert_eq!(hdr, parsed);
    }

    #[test]
    fn test_error_round_trip() {
        let hdr = ResponseHeader::error(ServerError::InconsistentGenomes);
        let buf = hdr.compose().unwrap();
        let parsed = ResponseHeader::parse(&buf).unwrap();
        assert_eq!(parsed.status, ServerError::InconsistentGenomes);
        assert_eq!(parsed.rows, 0);
    }

    #[test]
    fn test_empty_intervals_header_still_written() {
        let hdr = ResponseHeader::ok(2, 0, 0);
        assert_eq!(hdr.rows, 0);
        let buf = hdr.compose().unwrap();
        assert!(ResponseHeader::parse(&buf).is_some());
    }
}
