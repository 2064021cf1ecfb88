use crate::path::Path;
use crate::types::{TransferType, UNSPECIFIED_TAG};

use super::{FrameError, read_i32, read_i64, wire, write_i32, write_i64};

/// A decoded request frame.
///
/// `transfer_type` is `None` when the client asked the server to infer the
/// type from the resolved value. `count` is `None` when the client has not
/// pre-allocated a destination buffer and wants array metadata back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub path: Path,
    pub transfer_type: Option<TransferType>,
    pub count: Option<i64>,
}

impl Request {
    /// Whether the response to this request uses the 64-byte metadata
    /// header rather than the plain 16-byte one. Holds for success and
    /// error responses alike, so the client knows the header size up
    /// front.
    pub fn wants_metadata(&self) -> bool {
        self.count.is_none() && self.transfer_type.is_none_or(TransferType::is_array)
    }
}

/// Encode a request into its fixed 256-byte frame.
///
/// The path is guaranteed to fit by [`Path`]'s construction-time length
/// check, so encoding cannot fail.
pub fn encode_request(request: &Request) -> [u8; wire::REQUEST_SIZE] {
    let mut frame = [0u8; wire::REQUEST_SIZE];

    let path = request.path.to_string();
    debug_assert!(path.len() <= wire::PATH_SIZE);
    frame[..path.len()].copy_from_slice(path.as_bytes());

    let tag = request
        .transfer_type
        .map_or(UNSPECIFIED_TAG, TransferType::tag);
    write_i32(&mut frame, wire::REQUEST_TYPE, tag);
    write_i64(&mut frame, wire::REQUEST_COUNT, request.count.unwrap_or(-1));

    frame
}

/// Decode a 256-byte request frame.
pub fn decode_request(frame: &[u8]) -> Result<Request, FrameError> {
    if frame.len() != wire::REQUEST_SIZE {
        return Err(FrameError::MalformedRequest(format!(
            "frame is {} bytes, expected {}",
            frame.len(),
            wire::REQUEST_SIZE
        )));
    }

    let path_field = &frame[..wire::PATH_SIZE];
    let end = path_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(wire::PATH_SIZE);
    if path_field[end..].iter().any(|&b| b != 0) {
        return Err(FrameError::MalformedRequest(
            "path field has bytes after the NUL padding".to_string(),
        ));
    }
    let text = std::str::from_utf8(&path_field[..end])
        .map_err(|_| FrameError::MalformedRequest("path is not valid UTF-8".to_string()))?;
    let path: Path = text
        .parse()
        .map_err(|e| FrameError::MalformedRequest(format!("bad path: {e}")))?;

    let tag = read_i32(frame, wire::REQUEST_TYPE);
    let transfer_type = if tag == UNSPECIFIED_TAG {
        None
    } else {
        Some(TransferType::from_tag(tag).ok_or(FrameError::UnknownTag(tag))?)
    };

    let count = match read_i64(frame, wire::REQUEST_COUNT) {
        -1 => None,
        n if n < 0 => {
            return Err(FrameError::MalformedRequest(format!(
                "negative element count {n}"
            )));
        }
        n => Some(n),
    };

    Ok(Request {
        path,
        transfer_type,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::MAX_PATH_BYTES;

    fn request(path: &str, ttype: Option<TransferType>, count: Option<i64>) -> Request {
        Request {
            path: path.parse().unwrap(),
            transfer_type: ttype,
            count,
        }
    }

    #[test]
    fn round_trip_fully_specified() {
        let req = request("model[layers][0][weight]", Some(TransferType::Float32), Some(64));
        let frame = encode_request(&req);
        assert_eq!(decode_request(&frame).unwrap(), req);
    }

    #[test]
    fn round_trip_unspecified_fields() {
        let req = request("model[step]", None, None);
        let frame = encode_request(&req);
        assert_eq!(frame.len(), wire::REQUEST_SIZE);
        assert_eq!(read_i32(&frame, wire::REQUEST_TYPE), -1);
        assert_eq!(read_i64(&frame, wire::REQUEST_COUNT), -1);
        assert_eq!(decode_request(&frame).unwrap(), req);
    }

    #[test]
    fn path_padded_with_nulls() {
        let frame = encode_request(&request("ab", None, None));
        assert_eq!(&frame[..2], b"ab");
        assert!(frame[2..wire::PATH_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn path_at_exact_limit() {
        let text = "k".repeat(MAX_PATH_BYTES);
        let req = request(&text, None, None);
        let frame = encode_request(&req);
        assert_eq!(decode_request(&frame).unwrap().path.to_string(), text);
    }

    #[test]
    fn wrong_frame_size_rejected() {
        assert!(matches!(
            decode_request(&[0u8; 255]),
            Err(FrameError::MalformedRequest(_))
        ));
        assert!(matches!(
            decode_request(&[0u8; 257]),
            Err(FrameError::MalformedRequest(_))
        ));
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut frame = encode_request(&request("model[x]", None, None));
        write_i32(&mut frame, wire::REQUEST_TYPE, 99);
        assert!(matches!(
            decode_request(&frame),
            Err(FrameError::UnknownTag(99))
        ));
    }

    #[test]
    fn negative_count_rejected() {
        let mut frame = encode_request(&request("model[x]", None, None));
        write_i64(&mut frame, wire::REQUEST_COUNT, -2);
        assert!(matches!(
            decode_request(&frame),
            Err(FrameError::MalformedRequest(_))
        ));
    }

    #[test]
    fn bytes_after_padding_rejected() {
        let mut frame = encode_request(&request("model[x]", None, None));
        frame[100] = b'x';
        assert!(matches!(
            decode_request(&frame),
            Err(FrameError::MalformedRequest(_))
        ));
    }

    #[test]
    fn metadata_framing_rule() {
        assert!(request("m[x]", None, None).wants_metadata());
        assert!(request("m[x]", Some(TransferType::Float32), None).wants_metadata());
        assert!(!request("m[x]", Some(TransferType::Str), None).wants_metadata());
        assert!(!request("m[x]", Some(TransferType::Float64), None).wants_metadata());
        assert!(!request("m[x]", Some(TransferType::Float32), Some(4)).wants_metadata());
        assert!(!request("m[x]", None, Some(4)).wants_metadata());
    }
}
