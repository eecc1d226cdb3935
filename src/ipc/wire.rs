//! ### English
//! Record framing: a fixed little-endian header, then the JSON payload.
//!
//! ### 中文
//! 记录分帧：固定的小端头部，随后是 JSON 负载。

use bytemuck::{Pod, Zeroable};

pub(super) const MAGIC: u32 = u32::from_le_bytes(*b"INLY");
pub(super) const HEADER_LEN: usize = std::mem::size_of::<WireHeader>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(super) enum FrameKind {
    /// ### English
    /// Request whose sender is blocked waiting for a `Response` or `Error` with the same id.
    ///
    /// ### 中文
    /// 发送方正阻塞等待同 id 的 `Response` 或 `Error` 的请求。
    Request = 1,
    /// ### English
    /// Fire-and-forget request; the receiver never answers.
    ///
    /// ### 中文
    /// 发送即忘的请求；接收方不作应答。
    Notify = 2,
    Response = 3,
    /// ### English
    /// The peer could not handle the request; payload is a UTF-8 message.
    ///
    /// ### 中文
    /// 对端无法处理该请求；负载为 UTF-8 消息。
    Error = 4,
}

impl FrameKind {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Request),
            2 => Some(Self::Notify),
            3 => Some(Self::Response),
            4 => Some(Self::Error),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub(super) struct WireHeader {
    pub magic: u32,
    pub kind: u32,
    pub id: u64,
}

pub(super) fn encode(kind: FrameKind, id: u64, payload: &[u8]) -> Vec<u8> {
    let header = WireHeader {
        magic: MAGIC,
        kind: kind as u32,
        id,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(payload);
    out
}

/// ### English
/// Splits a record into kind, correlation id and payload. `None` for anything malformed.
///
/// ### 中文
/// 将记录拆分为类型、关联 id 与负载。格式不正确时返回 `None`。
pub(super) fn decode(record: &[u8]) -> Option<(FrameKind, u64, &[u8])> {
    let header = record.get(..HEADER_LEN)?;
    let header: WireHeader = bytemuck::pod_read_unaligned(header);
    if header.magic != MAGIC {
        return None;
    }
    let kind = FrameKind::from_u32(header.kind)?;
    Some((kind, header.id, &record[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_then_payload() {
        let record = encode(FrameKind::Response, 42, b"{}");
        assert_eq!(record.len(), HEADER_LEN + 2);
        assert_eq!(decode(&record), Some((FrameKind::Response, 42, &b"{}"[..])));
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert_eq!(decode(b"short"), None);
        let mut record = encode(FrameKind::Notify, 1, b"");
        record[4] = 9;
        assert_eq!(decode(&record), None);
        record = encode(FrameKind::Notify, 1, b"");
        record[0] = 0;
        assert_eq!(decode(&record), None);
    }
}
