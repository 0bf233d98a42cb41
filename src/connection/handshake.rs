//! The connection handshake state machine (§4.4):
//!
//! `INIT --OPTIONS--> SUPPORTED --STARTUP--> {READY | AUTHENTICATE}
//! --AUTH_RESPONSE--> {AUTH_SUCCESS | AUTH_CHALLENGE(unsupported) | ERROR}
//! --[optional USE keyspace]--> SERVING`
//!
//! Runs sequentially over the bare socket, one exchange at a time; the
//! reader/writer tasks and their multiplexing only start once this
//! completes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::buffer::{BodyReader, BodyWriter};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::frame::{self, Compression, Flags, Header, RequestOpcode, ResponseOpcode, Version, HEADER_LEN};
use crate::stream_id::StreamIdAllocator;

use super::{parse_error_body, reader, writer, Connection, Shared, Streams};

/// Stream id used for the handshake's own sequential exchanges. Distinct
/// from [`crate::frame::EVENT_STREAM_ID`] purely so a stray frame from a
/// server that starts pushing events early can't be mistaken for one.
const HANDSHAKE_STREAM: i16 = 1;

/// The three password authenticators this driver understands (§4.4); any
/// other `AUTHENTICATE` name fails fast with `UnsupportedAuthenticator`.
const SUPPORTED_AUTHENTICATORS: &[&str] = &[
    "org.apache.cassandra.auth.PasswordAuthenticator",
    "com.scylladb.auth.SaslauthdAuthenticator",
    "com.scylladb.auth.TransitionalAuthenticator",
];

struct SupportedOptions {
    compression: Vec<String>,
    shard: Option<u16>,
    nr_shards: Option<u16>,
}

async fn write_frame(stream: &mut TcpStream, opcode: u8, body: &[u8]) -> Result<()> {
    let encoded = frame::encode(
        Version::PROTOCOL_V4_REQUEST,
        HANDSHAKE_STREAM,
        opcode,
        Flags::default(),
        body,
        None,
    )?;
    stream.write_all(&encoded).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<frame::Frame> {
    let mut header_buf = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_buf).await?;
    let header = Header::decode(&header_buf);
    let mut body_buf = vec![0u8; header.body_len as usize];
    stream.read_exact(&mut body_buf).await?;
    frame::decode_body(header, Bytes::from(body_buf), None)
}

fn parse_supported(body: Bytes) -> Result<SupportedOptions> {
    let mut r = BodyReader::new(body);
    let map = r.read_string_multimap();
    r.finish_with(())?;

    let single_u16 = |key: &str| -> Option<u16> { map.get(key)?.first()?.parse().ok() };

    Ok(SupportedOptions {
        compression: map.get("COMPRESSION").cloned().unwrap_or_default(),
        shard: single_u16("SCYLLA_SHARD"),
        nr_shards: single_u16("SCYLLA_NR_SHARDS"),
    })
}

async fn authenticate(stream: &mut TcpStream, config: &ConnectionConfig, authenticate_body: Bytes) -> Result<()> {
    let mut r = BodyReader::new(authenticate_body);
    let authenticator = r.read_string();
    r.finish_with(())?;

    if !SUPPORTED_AUTHENTICATORS.contains(&authenticator.as_str()) {
        return Err(Error::UnsupportedAuthenticator(authenticator));
    }

    let username = config
        .username
        .as_deref()
        .ok_or_else(|| Error::AuthError("server requires authentication but no username was configured".into()))?;
    let password = config.password.as_deref().unwrap_or("");

    // SASL PLAIN: {\0, authzid/username, \0, password}, authzid left empty.
    let mut token = Vec::with_capacity(username.len() + password.len() + 2);
    token.push(0);
    token.extend_from_slice(username.as_bytes());
    token.push(0);
    token.extend_from_slice(password.as_bytes());

    let mut w = BodyWriter::new();
    w.write_bytes(Some(&token));
    write_frame(stream, RequestOpcode::AuthResponse as u8, &w.into_bytes()).await?;

    let response = read_frame(stream).await?;
    match ResponseOpcode::from_byte(response.header.opcode)? {
        ResponseOpcode::AuthSuccess => Ok(()),
        ResponseOpcode::AuthChallenge => {
            Err(Error::AuthError("authentication challenge is not supported".into()))
        }
        ResponseOpcode::Error => Err(parse_error_body(response.body)),
        other => Err(Error::protocol(format!("expected AUTH_SUCCESS, got {other:?}"))),
    }
}

pub(crate) async fn run(
    mut stream: TcpStream,
    address: SocketAddr,
    config: &ConnectionConfig,
    send_controller_target: usize,
) -> Result<Arc<Connection>> {
    stream.set_nodelay(config.tcp_nodelay)?;

    write_frame(&mut stream, RequestOpcode::Options as u8, &[]).await?;
    let supported_frame = read_frame(&mut stream).await?;
    match ResponseOpcode::from_byte(supported_frame.header.opcode)? {
        ResponseOpcode::Supported => {}
        ResponseOpcode::Error => return Err(parse_error_body(supported_frame.body)),
        other => return Err(Error::protocol(format!("expected SUPPORTED, got {other:?}"))),
    }
    let supported = parse_supported(supported_frame.body)?;
    let compression = Compression::negotiate(config.compression, &supported.compression);

    let mut startup_options = vec![("CQL_VERSION".to_string(), "3.0.0".to_string())];
    if let Some(compression) = compression {
        startup_options.push(("COMPRESSION".to_string(), compression.as_str().to_string()));
    }
    let mut w = BodyWriter::new();
    w.write_string_map(&startup_options);
    write_frame(&mut stream, RequestOpcode::Startup as u8, &w.into_bytes()).await?;

    let response = read_frame(&mut stream).await?;
    match ResponseOpcode::from_byte(response.header.opcode)? {
        ResponseOpcode::Ready => {}
        ResponseOpcode::Authenticate => authenticate(&mut stream, config, response.body).await?,
        ResponseOpcode::Error => return Err(parse_error_body(response.body)),
        other => return Err(Error::protocol(format!("expected READY or AUTHENTICATE, got {other:?}"))),
    }

    let (read_half, write_half) = stream.into_split();
    let shared = Arc::new(Shared {
        streams: Mutex::new(Streams {
            allocator: StreamIdAllocator::new(),
            handlers: HashMap::new(),
        }),
        in_queue: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        on_close: Mutex::new(None),
    });

    // Channel capacity tracks the backpressure target: the writer never sees
    // more pending work than `send_controller` would have allowed in anyway.
    let (writer_tx, writer_rx) = mpsc::channel(send_controller_target.max(1) * 2);
    tokio::spawn(writer::run(write_half, writer_rx, shared.clone()));
    tokio::spawn(reader::run(read_half, shared.clone(), compression, None));

    let connection = Arc::new(Connection {
        shared,
        writer_tx,
        version: Version::PROTOCOL_V4_REQUEST,
        compression,
        compr_buffer_size: config.compr_buffer_size,
        send_controller_target,
        address,
        shard: supported.shard,
        nr_shards: supported.nr_shards,
    });

    if let Some(keyspace) = config.keyspace() {
        connection.use_keyspace(keyspace).await?;
    }

    tracing::info!(%address, shard = ?connection.shard, "connection handshake complete");
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BodyWriter as W;
    use tokio::net::TcpListener;

    async fn fake_server_ready_no_auth(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();

        // OPTIONS -> SUPPORTED
        let _options = read_frame(&mut stream).await.unwrap();
        let mut body = W::new();
        body.write_string_multimap(&[("COMPRESSION", vec!["lz4", "snappy"])]);
        let encoded = frame::encode(
            Version::PROTOCOL_V4_RESPONSE,
            HANDSHAKE_STREAM,
            ResponseOpcode::Supported as u8,
            Flags::default(),
            &body.into_bytes(),
            None,
        )
        .unwrap();
        stream.write_all(&encoded).await.unwrap();

        // STARTUP -> READY
        let _startup = read_frame(&mut stream).await.unwrap();
        let encoded = frame::encode(
            Version::PROTOCOL_V4_RESPONSE,
            HANDSHAKE_STREAM,
            ResponseOpcode::Ready as u8,
            Flags::default(),
            &[],
            None,
        )
        .unwrap();
        stream.write_all(&encoded).await.unwrap();
    }

    #[tokio::test]
    async fn handshake_without_auth_reaches_serving() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_server_ready_no_auth(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let config = ConnectionConfig::default();
        let connection = run(stream, addr, &config, 100).await.unwrap();

        assert_eq!(connection.address, addr);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_authenticator_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _options = read_frame(&mut stream).await.unwrap();
            let body = W::new();
            let encoded = frame::encode(
                Version::PROTOCOL_V4_RESPONSE,
                HANDSHAKE_STREAM,
                ResponseOpcode::Supported as u8,
                Flags::default(),
                &body.into_bytes(),
                None,
            )
            .unwrap();
            stream.write_all(&encoded).await.unwrap();

            let _startup = read_frame(&mut stream).await.unwrap();
            let mut body = W::new();
            body.write_string("com.example.NotARealAuthenticator");
            let encoded = frame::encode(
                Version::PROTOCOL_V4_RESPONSE,
                HANDSHAKE_STREAM,
                ResponseOpcode::Authenticate as u8,
                Flags::default(),
                &body.into_bytes(),
                None,
            )
            .unwrap();
            stream.write_all(&encoded).await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let config = ConnectionConfig::default();
        let result = run(stream, addr, &config, 100).await;
        assert!(matches!(result, Err(Error::UnsupportedAuthenticator(_))));
        server.await.unwrap();
    }
}
