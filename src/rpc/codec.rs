//! Message framing: 1-byte compression flag, 4-byte big-endian length, JSON payload.

use serde::{de::DeserializeOwned, Serialize};

use super::status::{Code, RpcError};

pub const HEADER_LEN: usize = 5;
pub const MAX_MESSAGE_LEN: usize = 4 * 1024 * 1024;
pub const CONTENT_TYPE: &str = "application/fintrack-rpc+json";

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, RpcError> {
    let payload = serde_json::to_vec(message)
        .map_err(|e| RpcError::internal(format!("failed to encode message: {}", e)))?;
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(RpcError::new(
            Code::ResourceExhausted,
            format!("message of {} bytes exceeds limit", payload.len()),
        ));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(0);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, RpcError> {
    if frame.len() < HEADER_LEN {
        return Err(RpcError::invalid_argument("truncated frame header"));
    }
    if frame[0] != 0 {
        return Err(RpcError::new(
            Code::Unimplemented,
            "compressed frames are not supported",
        ));
    }

    let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(RpcError::new(
            Code::ResourceExhausted,
            format!("declared message length {} exceeds limit", len),
        ));
    }
    let payload = &frame[HEADER_LEN..];
    if payload.len() != len {
        return Err(RpcError::invalid_argument(format!(
            "frame declares {} bytes but carries {}",
            len,
            payload.len()
        )));
    }

    serde_json::from_slice(payload)
        .map_err(|e| RpcError::invalid_argument(format!("malformed message: {}", e)))
}

/// Percent-encodes bytes that cannot appear in a header value.
pub fn encode_message_header(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for b in message.bytes() {
        if (0x20..0x7f).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

pub fn decode_message_header(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn frame_layout() {
        let frame = encode(&Ping { n: 7 }).unwrap();
        assert_eq!(frame[0], 0);
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert_eq!(len, frame.len() - HEADER_LEN);
        assert_eq!(&frame[HEADER_LEN..], br#"{"n":7}"#);
    }

    #[test]
    fn rejects_length_mismatch_and_compression() {
        let mut frame = encode(&Ping { n: 1 }).unwrap();
        frame.push(b' ');
        assert_eq!(decode::<Ping>(&frame).unwrap_err().code, Code::InvalidArgument);

        let mut compressed = encode(&Ping { n: 1 }).unwrap();
        compressed[0] = 1;
        assert_eq!(decode::<Ping>(&compressed).unwrap_err().code, Code::Unimplemented);

        assert_eq!(decode::<Ping>(&[0, 0]).unwrap_err().code, Code::InvalidArgument);
    }

    #[test]
    fn header_message_escaping() {
        let raw = "account 'Épargne' not found: 100%";
        let escaped = encode_message_header(raw);
        assert!(escaped.is_ascii());
        assert_eq!(decode_message_header(&escaped), raw);
    }
}
