use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};

use log::debug;
use thiserror::Error;

use crate::path::{Path, PathError};
use crate::store::{ArrayValue, Scalar, StoreError};
use crate::types::{Dtype, TransferType};

use super::{FrameError, Request, ResponseHeader, request, response, wire};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Path(#[from] PathError),

    /// The server answered with an error frame; carries its message.
    #[error("server error: {0}")]
    Server(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("size mismatch: destination holds {expected} elements, server reported {actual}")]
    SizeMismatch { expected: usize, actual: i64 },

    #[error("server sent {got:?}, expected {want:?}")]
    UnexpectedType {
        want: TransferType,
        got: TransferType,
    },

    #[error("server sent non-array transfer type {0:?} for an array request")]
    NotAnArray(TransferType),

    #[error("dtype {0:?} cannot cross the wire")]
    UnsupportedDtype(Dtype),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("invalid array metadata: {0}")]
    Metadata(#[from] StoreError),

    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetches values from a [`StateServer`](super::StateServer).
///
/// The protocol is one-shot, so every call opens a fresh socket, performs
/// a single request/response exchange, and closes it on every exit path
/// (the stream is owned by the call and dropped on return or error). A
/// client holds no connection state and is cheap to construct.
pub struct StateClient {
    address: SocketAddr,
}

impl StateClient {
    pub fn new(address: SocketAddr) -> Self {
        StateClient { address }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Fetch an array leaf, letting the server pick the transfer type and
    /// describe shape and stride in the metadata header.
    pub fn get_array(&self, path: &Path) -> Result<ArrayValue, ClientError> {
        self.fetch_array(path, None)
    }

    /// Fetch an array leaf with an explicit transfer type.
    pub fn get_array_as(
        &self,
        path: &Path,
        ttype: TransferType,
    ) -> Result<ArrayValue, ClientError> {
        self.fetch_array(path, Some(ttype))
    }

    /// Fetch an array leaf into a pre-allocated destination. The server
    /// answers with the plain header; its reported element count must
    /// match the destination exactly.
    pub fn get_array_into(
        &self,
        path: &Path,
        dest: &mut ArrayValue,
    ) -> Result<(), ClientError> {
        let ttype = dest
            .dtype()
            .transfer_type()
            .ok_or(ClientError::UnsupportedDtype(dest.dtype()))?;
        let request = Request {
            path: path.clone(),
            transfer_type: Some(ttype),
            count: Some(dest.element_count() as i64),
        };
        let mut stream = self.exchange(&request)?;
        read_array_into(&mut stream, dest, ttype)
    }

    pub fn get_int(&self, path: &Path) -> Result<i64, ClientError> {
        match self.fetch_scalar(path, TransferType::Int64, Some(8))? {
            Scalar::Int64(value) => Ok(value),
            other => Err(unexpected(TransferType::Int64, &other)),
        }
    }

    pub fn get_float(&self, path: &Path) -> Result<f64, ClientError> {
        match self.fetch_scalar(path, TransferType::Float64, Some(8))? {
            Scalar::Float64(value) => Ok(value),
            other => Err(unexpected(TransferType::Float64, &other)),
        }
    }

    pub fn get_bool(&self, path: &Path) -> Result<bool, ClientError> {
        match self.fetch_scalar(path, TransferType::Bool8, Some(1))? {
            Scalar::Bool(value) => Ok(value),
            other => Err(unexpected(TransferType::Bool8, &other)),
        }
    }

    pub fn get_str(&self, path: &Path) -> Result<String, ClientError> {
        match self.fetch_scalar(path, TransferType::Str, None)? {
            Scalar::Str(value) => Ok(value),
            other => Err(unexpected(TransferType::Str, &other)),
        }
    }

    fn fetch_array(
        &self,
        path: &Path,
        ttype: Option<TransferType>,
    ) -> Result<ArrayValue, ClientError> {
        let request = Request {
            path: path.clone(),
            transfer_type: ttype,
            count: None,
        };
        let mut stream = self.exchange(&request)?;
        read_array(&mut stream)
    }

    fn fetch_scalar(
        &self,
        path: &Path,
        want: TransferType,
        count: Option<i64>,
    ) -> Result<Scalar, ClientError> {
        let request = Request {
            path: path.clone(),
            transfer_type: Some(want),
            count,
        };
        let mut stream = self.exchange(&request)?;
        read_scalar(&mut stream, want)
    }

    fn exchange(&self, request: &Request) -> Result<TcpStream, ClientError> {
        debug!("requesting '{}' from {}", request.path, self.address);
        let mut stream = TcpStream::connect(self.address)?;
        stream.write_all(&request::encode_request(request))?;
        Ok(stream)
    }
}

fn unexpected(want: TransferType, got: &Scalar) -> ClientError {
    ClientError::UnexpectedType {
        want,
        got: got.transfer_type(),
    }
}

/// Exact-count read: loops until `buf` is full or the peer closes, in
/// which case the shortfall surfaces as [`ClientError::ConnectionClosed`].
fn read_exact_or_closed<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<(), ClientError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ClientError::ConnectionClosed(
            format!("peer closed before {} bytes of {what} arrived", buf.len()),
        )),
        Err(e) => Err(ClientError::Io(e)),
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<ResponseHeader, ClientError> {
    let mut frame = [0u8; wire::HEADER_SIZE];
    read_exact_or_closed(reader, &mut frame, "response header")?;
    Ok(response::decode_header(&frame)?)
}

/// The success flag was nonzero: the payload is always a length-prefixed
/// UTF-8 message, whatever the request was.
fn read_server_error<R: Read>(reader: &mut R, header: ResponseHeader) -> ClientError {
    let Ok(len) = usize::try_from(header.count) else {
        return ClientError::Frame(FrameError::MalformedResponse(format!(
            "error frame reports negative length {}",
            header.count
        )));
    };
    let mut message = vec![0u8; len];
    if let Err(err) = read_exact_or_closed(reader, &mut message, "error message") {
        return err;
    }
    match String::from_utf8(message) {
        Ok(text) => ClientError::Server(text),
        Err(_) => ClientError::Server("server sent an unreadable error message".to_string()),
    }
}

fn read_payload<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>, ClientError> {
    let mut payload = vec![0u8; len];
    read_exact_or_closed(reader, &mut payload, what)?;
    Ok(payload)
}

/// Quantized responses carry a codebook block before the payload. It is
/// read to keep the stream aligned and discarded; dequantization is
/// unimplemented.
fn skip_codebook<R: Read>(reader: &mut R, ttype: TransferType) -> Result<(), ClientError> {
    let size = ttype.codebook_size();
    if size > 0 {
        read_payload(reader, size, "codebook")?;
    }
    Ok(())
}

fn read_scalar<R: Read>(reader: &mut R, want: TransferType) -> Result<Scalar, ClientError> {
    let header = read_header(reader)?;
    if header.is_error() {
        return Err(read_server_error(reader, header));
    }
    if header.transfer_type != want {
        return Err(ClientError::UnexpectedType {
            want,
            got: header.transfer_type,
        });
    }

    let len = usize::try_from(header.count).map_err(|_| {
        FrameError::MalformedResponse(format!("negative payload length {}", header.count))
    })?;
    let payload = read_payload(reader, len, "scalar payload")?;
    Ok(response::decode_scalar(header.transfer_type, &payload)?)
}

fn read_array<R: Read>(reader: &mut R) -> Result<ArrayValue, ClientError> {
    let mut frame = [0u8; wire::META_HEADER_SIZE];
    read_exact_or_closed(reader, &mut frame, "array metadata header")?;
    let (header, shape, stride) = response::decode_metadata_header(&frame)?;
    if header.is_error() {
        return Err(read_server_error(reader, header));
    }

    let ttype = header.transfer_type;
    let dtype = ttype.dtype().ok_or(ClientError::NotAnArray(ttype))?;
    let count = usize::try_from(header.count).map_err(|_| {
        FrameError::MalformedResponse(format!("negative element count {}", header.count))
    })?;
    let from_shape: usize = shape.iter().product();
    if from_shape != count {
        return Err(ClientError::Frame(FrameError::MalformedResponse(format!(
            "element count {count} disagrees with shape product {from_shape}"
        ))));
    }

    skip_codebook(reader, ttype)?;
    let payload = read_payload(reader, count * dtype.element_size(), "array payload")?;

    let mut array = ArrayValue::allocate(dtype, shape, stride)?;
    array.copy_from(&payload)?;
    Ok(array)
}

fn read_array_into<R: Read>(
    reader: &mut R,
    dest: &mut ArrayValue,
    want: TransferType,
) -> Result<(), ClientError> {
    let header = read_header(reader)?;
    if header.is_error() {
        return Err(read_server_error(reader, header));
    }
    if header.transfer_type != want {
        return Err(ClientError::UnexpectedType {
            want,
            got: header.transfer_type,
        });
    }
    if header.count != dest.element_count() as i64 {
        return Err(ClientError::SizeMismatch {
            expected: dest.element_count(),
            actual: header.count,
        });
    }

    skip_codebook(reader, want)?;
    let payload = read_payload(reader, dest.bytes().len(), "array payload")?;
    dest.copy_from(&payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use super::*;
    use crate::store::contiguous_strides;

    /// Delivers at most one byte per read call, the worst case a socket
    /// can legally produce.
    struct OneByteReader<R> {
        inner: R,
    }

    impl<R: Read> Read for OneByteReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            self.inner.read(&mut buf[..1])
        }
    }

    fn one_byte_at_a_time(frame: Vec<u8>) -> OneByteReader<Cursor<Vec<u8>>> {
        OneByteReader {
            inner: Cursor::new(frame),
        }
    }

    #[test]
    fn scalar_read_survives_chunked_delivery() {
        let frame = response::encode_scalar(&Scalar::Str("hello world".to_string()));
        let mut reader = one_byte_at_a_time(frame);
        let scalar = read_scalar(&mut reader, TransferType::Str).unwrap();
        assert_eq!(scalar, Scalar::Str("hello world".to_string()));
    }

    #[test]
    fn array_read_survives_chunked_delivery() {
        let payload: Vec<u8> = (0..24).collect();
        let header = ResponseHeader {
            success: 0,
            transfer_type: TransferType::Float32,
            count: 6,
        };
        let mut frame = response::encode_metadata_header(header, &[2, 3], &[3, 1])
            .unwrap()
            .to_vec();
        frame.extend_from_slice(&payload);

        let mut reader = one_byte_at_a_time(frame);
        let array = read_array(&mut reader).unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.stride(), contiguous_strides(&[2, 3]).as_slice());
        assert_eq!(array.bytes(), payload.as_slice());
    }

    #[test]
    fn quantized_array_read_skips_codebook() {
        let header = ResponseHeader {
            success: 0,
            transfer_type: TransferType::UniformInt8,
            count: 4,
        };
        let mut frame = response::encode_metadata_header(header, &[4], &[1])
            .unwrap()
            .to_vec();
        frame.extend_from_slice(&[0u8; 256]);
        frame.extend_from_slice(&[10, 20, 30, 40]);

        let mut reader = one_byte_at_a_time(frame);
        let array = read_array(&mut reader).unwrap();
        assert_eq!(array.dtype(), Dtype::U8);
        assert_eq!(array.bytes(), &[10, 20, 30, 40]);
    }

    #[test]
    fn premature_close_is_connection_closed() {
        let mut frame = response::encode_scalar(&Scalar::Int64(7));
        frame.truncate(wire::HEADER_SIZE + 3);
        let mut reader = one_byte_at_a_time(frame);
        assert!(matches!(
            read_scalar(&mut reader, TransferType::Int64),
            Err(ClientError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn truncated_header_is_connection_closed() {
        let mut reader = one_byte_at_a_time(vec![0u8; 5]);
        assert!(matches!(
            read_header(&mut reader),
            Err(ClientError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn error_frame_decodes_to_server_error() {
        let frame = response::encode_error("path 'model[x]' not found");
        let mut reader = one_byte_at_a_time(frame);
        match read_scalar(&mut reader, TransferType::Int64) {
            Err(ClientError::Server(message)) => {
                assert_eq!(message, "path 'model[x]' not found");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn metadata_framed_error_decodes_to_server_error() {
        let frame = response::encode_error_with_metadata("boom");
        let mut reader = one_byte_at_a_time(frame);
        assert!(matches!(
            read_array(&mut reader),
            Err(ClientError::Server(m)) if m == "boom"
        ));
    }

    #[test]
    fn scalar_type_mismatch_detected() {
        let frame = response::encode_scalar(&Scalar::Int64(7));
        let mut reader = one_byte_at_a_time(frame);
        assert!(matches!(
            read_scalar(&mut reader, TransferType::Float64),
            Err(ClientError::UnexpectedType {
                want: TransferType::Float64,
                got: TransferType::Int64,
            })
        ));
    }

    #[test]
    fn count_disagreeing_with_shape_rejected() {
        let header = ResponseHeader {
            success: 0,
            transfer_type: TransferType::Float32,
            count: 7,
        };
        let frame = response::encode_metadata_header(header, &[2, 3], &[3, 1]).unwrap();
        let mut reader = Cursor::new(frame.to_vec());
        assert!(matches!(
            read_array(&mut reader),
            Err(ClientError::Frame(FrameError::MalformedResponse(_)))
        ));
    }

    #[test]
    fn preallocated_count_mismatch_detected() {
        let header = ResponseHeader {
            success: 0,
            transfer_type: TransferType::Float32,
            count: 9,
        };
        let mut reader = Cursor::new(response::encode_header(header).to_vec());
        let mut dest = ArrayValue::allocate(Dtype::F32, vec![6], vec![1]).unwrap();
        assert!(matches!(
            read_array_into(&mut reader, &mut dest, TransferType::Float32),
            Err(ClientError::SizeMismatch {
                expected: 6,
                actual: 9,
            })
        ));
    }

    #[test]
    fn scalar_transfer_type_in_metadata_header_rejected() {
        let header = ResponseHeader {
            success: 0,
            transfer_type: TransferType::Int64,
            count: 1,
        };
        let frame = response::encode_metadata_header(header, &[], &[]).unwrap();
        let mut reader = Cursor::new(frame.to_vec());
        assert!(matches!(
            read_array(&mut reader),
            Err(ClientError::NotAnArray(TransferType::Int64))
        ));
    }
}
