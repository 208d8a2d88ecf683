//! pkt-line framing for the smart-protocol service announcement.

use crate::service::Service;

pub const PKT_FLUSH: &[u8] = b"0000";

/// Frames `data` as a pkt-line: four lowercase hex digits holding the total
/// length (prefix included), then the payload.
pub fn encode_pkt_line(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    let len = 4 + data.len();
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(data);
    out
}

/// `# service=git-<name>\n` as a pkt-line followed by a flush marker.
pub fn service_announcement(service: Service) -> Vec<u8> {
    let line = format!("# service=git-{}\n", service.name());
    let mut out = encode_pkt_line(line.as_bytes());
    out.extend_from_slice(PKT_FLUSH);
    out
}
