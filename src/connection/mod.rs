//! A single TCP stream to one shard of one node: handshake, request
//! multiplexing, coalescing, and close semantics (C4, §4.4).

mod handshake;
mod reader;
mod writer;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::buffer::{BodyReader, BodyWriter};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::frame::{self, Compression, Flags, RequestOpcode, ResponseOpcode};
use crate::result::{self, ResultBody};
use crate::statement::Statement;
use crate::stream_id::StreamIdAllocator;
use crate::types::Consistency;

use writer::WriterCommand;

/// What the reader hands back for a given stream id: the decoded frame, or
/// `Err(ConnectionClosed)` if the connection died before a response arrived.
pub type ResponseSlot = Result<frame::Frame>;

struct Streams {
    allocator: StreamIdAllocator,
    handlers: HashMap<i16, mpsc::Sender<ResponseSlot>>,
}

struct Shared {
    streams: Mutex<Streams>,
    in_queue: AtomicUsize,
    closed: AtomicBool,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Shared {
    fn waiting(&self) -> usize {
        let in_flight = self.streams.lock().unwrap().allocator.outstanding();
        in_flight + self.in_queue.load(Ordering::Acquire)
    }
}

fn parse_error_body(body: Bytes) -> Error {
    let mut r = BodyReader::new(body);
    let code = r.read_int();
    let message = r.read_string();
    // Errors are reported regardless of whether the body was otherwise
    // well-formed; a truncated message just yields an empty string.
    Error::ServerError { code, message }
}

fn expect_opcode(frame: &frame::Frame, expected: ResponseOpcode) -> Result<()> {
    match ResponseOpcode::from_byte(frame.header.opcode)? {
        op if op == expected => Ok(()),
        ResponseOpcode::Error => Err(parse_error_body(frame.body.clone())),
        other => Err(Error::protocol(format!("expected {expected:?}, got {other:?}"))),
    }
}

const QUERY_FLAG_VALUES: u8 = 0x01;
const QUERY_FLAG_PAGE_SIZE: u8 = 0x04;
const QUERY_FLAG_WITH_PAGING_STATE: u8 = 0x08;

/// Encodes the shared tail of a QUERY/EXECUTE body: consistency, flags, and
/// the flag-gated optional fields (§3 Statement, §6). The query text (QUERY)
/// or prepared id (EXECUTE) is written by the caller first.
fn write_query_params(w: &mut BodyWriter, stmt: &Statement) {
    let mut query_flags = 0u8;
    if !stmt.values.is_empty() {
        query_flags |= QUERY_FLAG_VALUES;
    }
    if stmt.page_size.is_some() {
        query_flags |= QUERY_FLAG_PAGE_SIZE;
    }
    if stmt.paging_state.is_some() {
        query_flags |= QUERY_FLAG_WITH_PAGING_STATE;
    }

    w.write_consistency(stmt.consistency);
    w.write_byte(query_flags);
    if !stmt.values.is_empty() {
        w.write_short(stmt.values.len() as u16);
        for value in &stmt.values {
            w.write_bytes(value.as_deref());
        }
    }
    if let Some(page_size) = stmt.page_size {
        w.write_int(page_size);
    }
    if let Some(paging_state) = &stmt.paging_state {
        w.write_bytes(Some(paging_state));
    }
}

/// QUERY body (§6): `[long string] query_text` followed by the shared query
/// parameters. The driver's primitive set (§4.1) only defines a
/// short-length `[string]` and an int-length `[bytes]`; this uses the
/// latter to carry the query text rather than introducing a third,
/// unspecified string flavor.
fn encode_query_body(stmt: &Statement) -> BytesMutExt {
    let mut w = BodyWriter::new();
    w.write_bytes(Some(stmt.text.as_bytes()));
    write_query_params(&mut w, stmt);
    BytesMutExt(w.into_bytes())
}

/// EXECUTE body (§6): prepared statement id followed by the shared query
/// parameters.
fn encode_execute_body(stmt: &Statement) -> Result<BytesMutExt> {
    let id = stmt
        .prepared_id
        .as_deref()
        .ok_or_else(|| Error::protocol("EXECUTE requires a prepared statement id"))?;
    let mut w = BodyWriter::new();
    w.write_bytes(Some(id));
    write_query_params(&mut w, stmt);
    Ok(BytesMutExt(w.into_bytes()))
}

/// Thin wrapper so the above can return something that derefs to `&[u8]`
/// without naming `bytes::BytesMut` at every call site.
struct BytesMutExt(bytes::BytesMut);

impl std::ops::Deref for BytesMutExt {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// One TCP stream, multiplexing concurrent requests over 15-bit stream ids.
pub struct Connection {
    shared: Arc<Shared>,
    writer_tx: mpsc::Sender<WriterCommand>,
    version: frame::Version,
    compression: Option<Compression>,
    compr_buffer_size: usize,
    send_controller_target: usize,
    pub address: SocketAddr,
    pub shard: Option<u16>,
    pub nr_shards: Option<u16>,
}

impl Connection {
    /// Dials `address` and runs the handshake (§4.4). For shard-targeted
    /// dialing via local-port arithmetic, see [`crate::shard`], which builds
    /// its own `TcpStream` and calls [`handshake::run`] directly.
    pub async fn connect(
        address: SocketAddr,
        config: &ConnectionConfig,
        send_controller_target: usize,
    ) -> Result<Arc<Connection>> {
        if config.tls {
            return Err(Error::protocol(
                "TLS wrapping is not implemented by this core (see Non-goals)",
            ));
        }
        let stream = tokio::time::timeout(config.dial_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::protocol(format!("dial timeout connecting to {address}")))??;
        handshake::run(stream, address, config, send_controller_target).await
    }

    /// Like [`Connection::connect`], but dials via [`crate::shard::open_shard_conn`]
    /// so the connection lands on a specific shard's local-port residue
    /// (§4.5) before the handshake runs.
    pub async fn connect_shard(
        address: SocketAddr,
        shard: crate::shard::ShardInfo,
        config: &ConnectionConfig,
        send_controller_target: usize,
    ) -> Result<Arc<Connection>> {
        if config.tls {
            return Err(Error::protocol(
                "TLS wrapping is not implemented by this core (see Non-goals)",
            ));
        }
        let stream = crate::shard::open_shard_conn(address, shard, config.dial_timeout).await?;
        handshake::run(stream, address, config, send_controller_target).await
    }

    /// `in_queue + in_flight` (§3 Connection stats, §4.4 backpressure).
    pub fn waiting(&self) -> usize {
        self.shared.waiting()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Registers a hook to run exactly once, the first time this connection
    /// closes (§4.4) — used by the pool to null out the owning slot.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        *self.shared.on_close.lock().unwrap() = Some(Box::new(hook));
    }

    /// Idempotent (§4.4): a second call, or a call after the socket already
    /// died on its own, is a harmless no-op.
    pub async fn close(&self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }

    async fn send_controller(&self) {
        while self.shared.waiting() >= self.send_controller_target {
            sleep(Duration::from_millis(50)).await;
        }
    }

    fn alloc_stream(&self) -> Result<(i16, mpsc::Receiver<ResponseSlot>)> {
        let mut streams = self.shared.streams.lock().unwrap();
        let id = streams.allocator.alloc()?;
        let (tx, rx) = mpsc::channel(2);
        streams.handlers.insert(id, tx);
        Ok((id, rx))
    }

    fn free_stream(&self, id: i16) {
        let mut streams = self.shared.streams.lock().unwrap();
        streams.handlers.remove(&id);
        streams.allocator.free(id);
    }

    async fn submit(&self, stream: i16, opcode: u8, flags: Flags, body: &[u8]) -> Result<()> {
        let compressor = self.compression.map(|c| (c, self.compr_buffer_size));
        let encoded = frame::encode(self.version, stream, opcode, flags, body, compressor)?;
        self.shared.in_queue.fetch_add(1, Ordering::AcqRel);
        self.writer_tx
            .send(WriterCommand::Write(encoded))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Synchronous submission path (§4.4): allocate a stream id, enqueue,
    /// await the response.
    async fn send_request(&self, opcode: u8, flags: Flags, body: &[u8]) -> Result<frame::Frame> {
        self.send_controller().await;
        let (stream, mut rx) = self.alloc_stream()?;
        if let Err(e) = self.submit(stream, opcode, flags, body).await {
            self.free_stream(stream);
            return Err(e);
        }
        rx.recv().await.ok_or(Error::ConnectionClosed)?
    }

    /// Async submission path (§4.4): returns the sink immediately rather than
    /// awaiting it, retrying `AllStreamsBusy` with a bounded exponential
    /// backoff instead of gating on `send_controller`.
    pub async fn async_send_request(
        &self,
        opcode: u8,
        flags: Flags,
        body: &[u8],
    ) -> Result<mpsc::Receiver<ResponseSlot>> {
        let backoff = exponential_backoff::Backoff::new(8, Duration::from_millis(5), Duration::from_millis(500));
        let mut delays = backoff.into_iter();
        loop {
            match self.alloc_stream() {
                Ok((stream, rx)) => {
                    if let Err(e) = self.submit(stream, opcode, flags, body).await {
                        self.free_stream(stream);
                        return Err(e);
                    }
                    return Ok(rx);
                }
                Err(Error::AllStreamsBusy) => match delays.next().flatten() {
                    Some(delay) => sleep(delay).await,
                    None => return Err(Error::AllStreamsBusy),
                },
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn options(&self) -> Result<HashMap<String, Vec<String>>> {
        let frame = self.send_request(RequestOpcode::Options as u8, Flags::default(), &[]).await?;
        expect_opcode(&frame, ResponseOpcode::Supported)?;
        let mut r = BodyReader::new(frame.body);
        let map = r.read_string_multimap();
        r.finish_with(map)
    }

    pub async fn register(&self, events: &[&str]) -> Result<()> {
        let mut w = BodyWriter::new();
        w.write_string_list(events);
        let frame = self
            .send_request(RequestOpcode::Register as u8, Flags::default(), &w.into_bytes())
            .await?;
        expect_opcode(&frame, ResponseOpcode::Ready)
    }

    pub async fn prepare(&self, text: &str) -> Result<ResultBody> {
        let mut w = BodyWriter::new();
        w.write_bytes(Some(text.as_bytes()));
        let frame = self
            .send_request(RequestOpcode::Prepare as u8, Flags::default(), &w.into_bytes())
            .await?;
        self.handle_result_frame(frame)
    }

    pub async fn query(&self, stmt: &Statement) -> Result<ResultBody> {
        let body = encode_query_body(stmt);
        let flags = Flags::default().with_tracing(stmt.tracing);
        let frame = self.send_request(RequestOpcode::Query as u8, flags, &body).await?;
        self.handle_result_frame(frame)
    }

    pub async fn execute(&self, stmt: &Statement) -> Result<ResultBody> {
        let body = encode_execute_body(stmt)?;
        let flags = Flags::default().with_tracing(stmt.tracing);
        let frame = self.send_request(RequestOpcode::Execute as u8, flags, &body).await?;
        self.handle_result_frame(frame)
    }

    pub async fn use_keyspace(&self, keyspace: &str) -> Result<()> {
        let stmt = Statement::new(format!("USE {keyspace}"), Consistency::One);
        self.query(&stmt).await?;
        Ok(())
    }

    fn handle_result_frame(&self, frame: frame::Frame) -> Result<ResultBody> {
        match ResponseOpcode::from_byte(frame.header.opcode)? {
            ResponseOpcode::Result => result::parse(frame.body),
            ResponseOpcode::Error => Err(parse_error_body(frame.body)),
            other => Err(Error::protocol(format!(
                "unexpected response opcode {other:?} for a result-bearing request"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BodyWriter as W;
    use crate::frame::{Header, ResponseOpcode, Version, HEADER_LEN};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn read_frame_raw(stream: &mut TcpStream) -> frame::Frame {
        let mut header_buf = [0u8; HEADER_LEN];
        stream.read_exact(&mut header_buf).await.unwrap();
        let header = Header::decode(&header_buf);
        let mut body_buf = vec![0u8; header.body_len as usize];
        stream.read_exact(&mut body_buf).await.unwrap();
        frame::decode_body(header, Bytes::from(body_buf), None).unwrap()
    }

    async fn write_frame_raw(stream: &mut TcpStream, resp_stream: i16, opcode: u8, body: &[u8]) {
        let encoded = frame::encode(Version::PROTOCOL_V4_RESPONSE, resp_stream, opcode, Flags::default(), body, None).unwrap();
        stream.write_all(&encoded).await.unwrap();
    }

    /// Accepts one connection, runs the handshake with no auth and no
    /// compression, then answers a single QUERY with a Void RESULT.
    async fn fake_server(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();

        let _options = read_frame_raw(&mut stream).await;
        let mut body = W::new();
        body.write_string_multimap(&[] as &[(&str, Vec<&str>)]);
        write_frame_raw(&mut stream, 1, ResponseOpcode::Supported as u8, &body.into_bytes()).await;

        let _startup = read_frame_raw(&mut stream).await;
        write_frame_raw(&mut stream, 1, ResponseOpcode::Ready as u8, &[]).await;

        let query = read_frame_raw(&mut stream).await;
        let mut result_body = W::new();
        result_body.write_int(1); // RESULT kind Void
        write_frame_raw(&mut stream, query.header.stream, ResponseOpcode::Result as u8, &result_body.into_bytes()).await;
    }

    #[tokio::test]
    async fn end_to_end_query_round_trip_against_a_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_server(listener));

        let config = ConnectionConfig::default();
        let connection = Connection::connect(addr, &config, 100).await.unwrap();

        let stmt = Statement::new("select * from t", Consistency::One);
        let result = connection.query(&stmt).await.unwrap();
        assert!(matches!(result, ResultBody::Void));

        server.await.unwrap();
    }

    #[test]
    fn query_body_encodes_values_flag_only_when_values_present() {
        let stmt = Statement::new("select 1", Consistency::One);
        let body = encode_query_body(&stmt);
        let mut r = BodyReader::new(Bytes::copy_from_slice(&body));
        assert_eq!(r.read_bytes().as_deref(), Some(&b"select 1"[..]));
        assert_eq!(r.read_consistency(), Consistency::One);
        assert_eq!(r.read_byte(), 0); // no flags set
        assert_eq!(r.remaining(), 0);
        r.finish().unwrap();
    }

    #[test]
    fn query_body_encodes_bound_values() {
        let stmt = Statement::new("select 1", Consistency::Quorum).bind(vec![Some(Bytes::from_static(b"x"))]);
        let body = encode_query_body(&stmt);
        let mut r = BodyReader::new(Bytes::copy_from_slice(&body));
        assert_eq!(r.read_bytes().as_deref(), Some(&b"select 1"[..]));
        assert_eq!(r.read_consistency(), Consistency::Quorum);
        assert_eq!(r.read_byte(), QUERY_FLAG_VALUES);
        assert_eq!(r.read_short(), 1);
        assert_eq!(r.read_bytes().as_deref(), Some(&b"x"[..]));
        r.finish().unwrap();
    }

    #[test]
    fn execute_body_requires_prepared_id() {
        let stmt = Statement::new("irrelevant", Consistency::One);
        assert!(encode_execute_body(&stmt).is_err());
    }

    #[test]
    fn execute_body_encodes_prepared_id() {
        let mut stmt = Statement::new("irrelevant", Consistency::One);
        stmt.prepared_id = Some(Bytes::from_static(b"abc123"));
        let body = encode_execute_body(&stmt).unwrap();
        // [bytes] id (4 + 6) + consistency (2) + flags (1)
        assert_eq!(body.len(), 4 + 6 + 2 + 1);
    }
}
