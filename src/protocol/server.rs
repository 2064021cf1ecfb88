use std::{
    io::{Read, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::store::{ArrayValue, Scalar, StateStore, StoreError, Value};

use super::{FrameError, Request, ResponseHeader, ThreadPool, request, response, wire};

/// Handlers dispatched concurrently per accepted connection.
const POOL_SIZE: usize = 15;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
}

/// Failures inside one request/response exchange. Everything except
/// `Send` is answered with a wire error frame; `Send` means the response
/// itself could not be written, which is logged and the connection
/// dropped with no second attempt.
#[derive(Debug, Error)]
enum RequestError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported transfer type: {0}")]
    UnsupportedType(String),

    #[error("size mismatch: requested {requested} elements, value holds {actual}")]
    SizeMismatch { requested: i64, actual: usize },

    #[error("failed to send response: {0}")]
    Send(std::io::Error),
}

/// Serves one read-only [`StateStore`] over TCP.
///
/// `start()` binds the listening socket and runs the accept loop on a
/// dedicated thread; every accepted connection is handed to a worker from
/// the pool for its single request/response exchange.
pub struct StateServer {
    address: SocketAddr,
    store: Arc<StateStore>,
    running: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl StateServer {
    pub fn new(address: SocketAddr, store: Arc<StateStore>) -> Self {
        StateServer {
            address,
            store,
            running: Arc::new(AtomicBool::new(false)),
            accept_handle: None,
            local_addr: None,
        }
    }

    /// Address the listener is actually bound to, once running. Differs
    /// from the configured address when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind, listen and spawn the accept loop.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.accept_handle.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(self.address).map_err(|source| ServerError::Bind {
            address: self.address,
            source,
        })?;
        let local = listener.local_addr().map_err(|source| ServerError::Bind {
            address: self.address,
            source,
        })?;
        info!("listening at {local}");

        self.local_addr = Some(local);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        self.accept_handle = Some(thread::spawn(move || accept_loop(listener, running, store)));
        Ok(())
    }

    /// Shut the server down.
    ///
    /// Clears the running flag, unblocks the accept loop with a throwaway
    /// self-connection, then joins the accept thread, which in turn joins
    /// the worker pool, so handlers already mid-exchange finish before
    /// `stop` returns. A handler stuck on a peer that neither reads nor
    /// closes will stall this join; there is no per-request timeout.
    ///
    /// Calling `stop` when not running is a no-op.
    pub fn stop(&mut self) {
        let Some(handle) = self.accept_handle.take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        if let Some(addr) = self.local_addr.take() {
            // defeat the blocking accept call
            let _ = TcpStream::connect(connectable(addr));
        }
        if handle.join().is_err() {
            warn!("accept loop panicked");
        }
        info!("server stopped");
    }
}

impl Drop for StateServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// An address the server can dial itself on; wildcard addresses are not
/// connectable and become loopback.
fn connectable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

fn accept_loop(listener: TcpListener, running: Arc<AtomicBool>, store: Arc<StateStore>) {
    let pool = ThreadPool::new(POOL_SIZE);

    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let store = Arc::clone(&store);
                pool.execute(move || handle_connection(stream, &store));
            }
            Err(e) => warn!("broken connection: {e:?}"),
        }
    }

    debug!("accept loop exited");
    // the pool drops here, joining handlers still mid-exchange
}

/// Single catch-all boundary per connection: no failure below escapes to
/// the accept loop.
fn handle_connection(mut stream: TcpStream, store: &StateStore) {
    if let Err(err) = serve(&mut stream, store) {
        match err {
            RequestError::Send(e) => warn!("failed to send response: {e}"),
            err => {
                // the request frame never arrived or never decoded, so the
                // peer's framing is unknown; answer in plain framing
                info!("rejecting connection: {err}");
                let _ = stream.write_all(&response::encode_error(&err.to_string()));
            }
        }
    }
}

fn serve(stream: &mut TcpStream, store: &StateStore) -> Result<(), RequestError> {
    let mut frame = [0u8; wire::REQUEST_SIZE];
    stream
        .read_exact(&mut frame)
        .map_err(|e| FrameError::MalformedRequest(format!("short request frame: {e}")))?;
    let request = request::decode_request(&frame)?;
    debug!("received request: {request:?}");

    match answer(stream, store, &request) {
        Err(err) if !matches!(err, RequestError::Send(_)) => {
            info!("request for '{}' failed: {err}", request.path);
            let frame = if request.wants_metadata() {
                response::encode_error_with_metadata(&err.to_string())
            } else {
                response::encode_error(&err.to_string())
            };
            stream.write_all(&frame).map_err(RequestError::Send)
        }
        other => other,
    }
}

fn answer<S: Write>(
    stream: &mut S,
    store: &StateStore,
    request: &Request,
) -> Result<(), RequestError> {
    match store.resolve(&request.path)? {
        Value::Scalar(scalar) => answer_scalar(stream, request, scalar),
        Value::Array(array) => answer_array(stream, request, array),
    }
}

fn answer_scalar<S: Write>(
    stream: &mut S,
    request: &Request,
    scalar: &Scalar,
) -> Result<(), RequestError> {
    let native = scalar.transfer_type();
    match request.transfer_type {
        None if request.wants_metadata() => {
            return Err(RequestError::UnsupportedType(format!(
                "value at '{}' is a scalar, array metadata was requested",
                request.path
            )));
        }
        Some(requested) if requested != native => {
            return Err(RequestError::UnsupportedType(format!(
                "value at '{}' is {native:?}, not {requested:?}",
                request.path
            )));
        }
        // a count on a scalar request is advisory and ignored
        _ => {}
    }

    stream
        .write_all(&response::encode_scalar(scalar))
        .map_err(RequestError::Send)
}

fn answer_array<S: Write>(
    stream: &mut S,
    request: &Request,
    array: &ArrayValue,
) -> Result<(), RequestError> {
    let native = array.dtype().transfer_type().ok_or_else(|| {
        RequestError::UnsupportedType(format!(
            "array at '{}' has dtype {:?}, which cannot cross the wire",
            request.path,
            array.dtype()
        ))
    })?;

    let ttype = match request.transfer_type {
        None => native,
        Some(requested) if requested.is_scalar() => {
            return Err(RequestError::UnsupportedType(format!(
                "value at '{}' is an array, scalar {requested:?} was requested",
                request.path
            )));
        }
        Some(requested) if requested != native => {
            return Err(RequestError::UnsupportedType(format!(
                "array at '{}' is served as {native:?}, transcoding to {requested:?} \
                 is not supported",
                request.path
            )));
        }
        Some(requested) => requested,
    };

    let count = array.element_count();
    if let Some(requested) = request.count {
        if requested != count as i64 {
            return Err(RequestError::SizeMismatch {
                requested,
                actual: count,
            });
        }
    }

    let header = ResponseHeader {
        success: 0,
        transfer_type: ttype,
        count: count as i64,
    };
    if request.wants_metadata() {
        let frame = response::encode_metadata_header(header, array.shape(), array.stride())?;
        stream.write_all(&frame).map_err(RequestError::Send)?;
    } else {
        stream
            .write_all(&response::encode_header(header))
            .map_err(RequestError::Send)?;
    }

    // quantized payloads carry a placeholder codebook; table generation is
    // unimplemented
    let codebook = ttype.codebook_size();
    if codebook > 0 {
        stream
            .write_all(&vec![0u8; codebook])
            .map_err(RequestError::Send)?;
    }

    stream.write_all(array.bytes()).map_err(RequestError::Send)
}
