use crate::store::Scalar;
use crate::types::TransferType;

use super::{FrameError, read_i32, read_i64, wire, write_i32, write_i64};

/// The fixed leading fields of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// 0 on success; anything else means the payload is an error message.
    pub success: i32,
    pub transfer_type: TransferType,
    /// Element count for arrays, payload byte length for STR and errors,
    /// fixed payload size for the other scalars.
    pub count: i64,
}

impl ResponseHeader {
    pub fn is_error(&self) -> bool {
        self.success != 0
    }
}

/// Encode the plain 16-byte response header.
pub fn encode_header(header: ResponseHeader) -> [u8; wire::HEADER_SIZE] {
    let mut frame = [0u8; wire::HEADER_SIZE];
    write_i32(&mut frame, wire::HEADER_SUCCESS, header.success);
    write_i32(&mut frame, wire::HEADER_TYPE, header.transfer_type.tag());
    write_i64(&mut frame, wire::HEADER_COUNT, header.count);
    frame
}

pub fn decode_header(frame: &[u8; wire::HEADER_SIZE]) -> Result<ResponseHeader, FrameError> {
    decode_header_fields(frame)
}

fn decode_header_fields(frame: &[u8]) -> Result<ResponseHeader, FrameError> {
    let tag = read_i32(frame, wire::HEADER_TYPE);
    Ok(ResponseHeader {
        success: read_i32(frame, wire::HEADER_SUCCESS),
        transfer_type: TransferType::from_tag(tag).ok_or(FrameError::UnknownTag(tag))?,
        count: read_i64(frame, wire::HEADER_COUNT),
    })
}

/// Encode the 64-byte header carrying array metadata. Shape and stride
/// slots beyond the rank are filled with -1.
pub fn encode_metadata_header(
    header: ResponseHeader,
    shape: &[usize],
    stride: &[isize],
) -> Result<[u8; wire::META_HEADER_SIZE], FrameError> {
    debug_assert!(shape.len() <= wire::META_SLOTS);
    debug_assert_eq!(shape.len(), stride.len());

    let mut frame = [0u8; wire::META_HEADER_SIZE];
    frame[..wire::HEADER_SIZE].copy_from_slice(&encode_header(header));

    for slot in 0..wire::META_SLOTS {
        let dim = match shape.get(slot) {
            Some(&dim) => i32::try_from(dim).map_err(|_| FrameError::DimensionOverflow(dim))?,
            None => wire::UNUSED,
        };
        let step = match stride.get(slot) {
            Some(&step) => i32::try_from(step)
                .map_err(|_| FrameError::DimensionOverflow(step.unsigned_abs()))?,
            None => wire::UNUSED,
        };
        write_i32(&mut frame, wire::META_SHAPE + slot * 4, dim);
        write_i32(&mut frame, wire::META_STRIDE + slot * 4, step);
    }

    Ok(frame)
}

/// Decode the 64-byte metadata header into its fields plus shape and
/// stride.
///
/// Rank is recovered from the shape slots alone: the first -1 terminates.
/// Stride slots are then read for exactly that rank, so a genuinely
/// negative stride inside the rank is preserved rather than mistaken for
/// padding.
pub fn decode_metadata_header(
    frame: &[u8; wire::META_HEADER_SIZE],
) -> Result<(ResponseHeader, Vec<usize>, Vec<isize>), FrameError> {
    let header = decode_header_fields(&frame[..wire::HEADER_SIZE])?;

    let mut shape = Vec::new();
    for slot in 0..wire::META_SLOTS {
        let dim = read_i32(frame, wire::META_SHAPE + slot * 4);
        if dim == wire::UNUSED {
            break;
        }
        if dim < 0 {
            return Err(FrameError::MalformedResponse(format!(
                "negative dimension {dim} in shape slot {slot}"
            )));
        }
        shape.push(dim as usize);
    }

    let stride = (0..shape.len())
        .map(|slot| read_i32(frame, wire::META_STRIDE + slot * 4) as isize)
        .collect();

    Ok((header, shape, stride))
}

/// Encode an error response in plain framing: header {1, STR, len} plus
/// the UTF-8 message.
pub fn encode_error(message: &str) -> Vec<u8> {
    let header = encode_header(error_header(message));
    let mut frame = Vec::with_capacity(wire::HEADER_SIZE + message.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(message.as_bytes());
    frame
}

/// Encode an error response in metadata framing: same fields in the
/// 64-byte header, shape and stride slots all unused.
pub fn encode_error_with_metadata(message: &str) -> Vec<u8> {
    // infallible: no dimensions to overflow
    let header = encode_metadata_header(error_header(message), &[], &[])
        .expect("empty metadata cannot overflow");
    let mut frame = Vec::with_capacity(wire::META_HEADER_SIZE + message.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(message.as_bytes());
    frame
}

fn error_header(message: &str) -> ResponseHeader {
    ResponseHeader {
        success: 1,
        transfer_type: TransferType::Str,
        count: message.len() as i64,
    }
}

/// Encode a successful scalar response: plain header plus the payload.
///
/// INT64 and FLOAT64 are 8 little-endian bytes, BOOL8 is one byte, STR is
/// `count` UTF-8 bytes.
pub fn encode_scalar(value: &Scalar) -> Vec<u8> {
    let (count, payload): (i64, Vec<u8>) = match value {
        Scalar::Str(s) => (s.len() as i64, s.as_bytes().to_vec()),
        Scalar::Int64(i) => (8, i.to_le_bytes().to_vec()),
        Scalar::Float64(f) => (8, f.to_le_bytes().to_vec()),
        Scalar::Bool(b) => (1, vec![u8::from(*b)]),
    };

    let header = encode_header(ResponseHeader {
        success: 0,
        transfer_type: value.transfer_type(),
        count,
    });

    let mut frame = Vec::with_capacity(wire::HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&payload);
    frame
}

/// Decode a scalar payload of the given transfer type.
pub fn decode_scalar(ttype: TransferType, payload: &[u8]) -> Result<Scalar, FrameError> {
    let fixed = |want: usize| {
        if payload.len() == want {
            Ok(())
        } else {
            Err(FrameError::MalformedResponse(format!(
                "{ttype:?} payload is {} bytes, expected {want}",
                payload.len()
            )))
        }
    };

    match ttype {
        TransferType::Str => {
            let text = std::str::from_utf8(payload).map_err(|_| {
                FrameError::MalformedResponse("STR payload is not valid UTF-8".to_string())
            })?;
            Ok(Scalar::Str(text.to_string()))
        }
        TransferType::Int64 => {
            fixed(8)?;
            Ok(Scalar::Int64(i64::from_le_bytes(payload.try_into().unwrap())))
        }
        TransferType::Float64 => {
            fixed(8)?;
            Ok(Scalar::Float64(f64::from_le_bytes(
                payload.try_into().unwrap(),
            )))
        }
        TransferType::Bool8 => {
            fixed(1)?;
            match payload[0] {
                0 => Ok(Scalar::Bool(false)),
                1 => Ok(Scalar::Bool(true)),
                b => Err(FrameError::MalformedResponse(format!(
                    "BOOL8 payload byte {b} is neither 0 nor 1"
                ))),
            }
        }
        _ => Err(FrameError::MalformedResponse(format!(
            "{ttype:?} is not a scalar transfer type"
        ))),
    }
}
