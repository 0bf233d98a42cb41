//! The reader task: decodes frames off the incoming half and dispatches each
//! to its waiting response sink by stream id, or to the event channel for
//! server-initiated pushes on stream 0 (§4.4, §4.9).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::event::{self, Event};
use crate::frame::{self, Compression, Header, EVENT_STREAM_ID, HEADER_LEN};

use super::Shared;

pub(crate) async fn run<R>(
    mut read_half: R,
    shared: Arc<Shared>,
    decompressor: Option<Compression>,
    event_tx: Option<mpsc::Sender<Event>>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(error) = read_half.read_exact(&mut header_buf).await {
            tracing::warn!(%error, "reader task: header read failed, connection lost");
            break;
        }
        let header = Header::decode(&header_buf);

        let mut body_buf = vec![0u8; header.body_len as usize];
        if let Err(error) = read_half.read_exact(&mut body_buf).await {
            tracing::warn!(%error, "reader task: short body read, connection lost");
            break;
        }

        let frame = match frame::decode_body(header, Bytes::from(body_buf), decompressor) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, stream = header.stream, "reader task: malformed frame, connection lost");
                break;
            }
        };

        if frame.header.stream == EVENT_STREAM_ID {
            match event::parse(frame.body) {
                Ok(ev) => {
                    if let Some(tx) = &event_tx {
                        let _ = tx.try_send(ev);
                    }
                }
                Err(error) => tracing::warn!(%error, "reader task: malformed EVENT frame, dropping"),
            }
            continue;
        }

        let sink = {
            let mut streams = shared.streams.lock().unwrap();
            let sink = streams.handlers.remove(&frame.header.stream);
            if sink.is_some() {
                streams.allocator.free(frame.header.stream);
            }
            sink
        };

        match sink {
            Some(sink) => {
                let _ = sink.send(Ok(frame)).await;
            }
            None => {
                tracing::warn!(
                    stream = frame.header.stream,
                    "reader task: response for unknown stream id, dropping"
                );
            }
        }
    }

    drain_and_close(&shared).await;
}

/// Walks the handler table delivering a synthetic `ConnectionClosed` to every
/// pending sink (§4.4 close semantics). Idempotent: once `shared.closed` is
/// set, a later call (or the reader hitting EOF after an explicit
/// `Connection::close`) is a no-op.
pub(crate) async fn drain_and_close(shared: &Arc<Shared>) {
    if shared.closed.swap(true, Ordering::AcqRel) {
        return;
    }

    let handlers = {
        let mut streams = shared.streams.lock().unwrap();
        std::mem::take(&mut streams.handlers)
    };
    for (_, sink) in handlers {
        let _ = sink.send(Err(Error::ConnectionClosed)).await;
    }

    if let Some(hook) = shared.on_close.lock().unwrap().take() {
        hook();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Flags, ResponseOpcode, Version};
    use crate::stream_id::StreamIdAllocator;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn empty_shared() -> Arc<Shared> {
        Arc::new(Shared {
            streams: Mutex::new(super::super::Streams {
                allocator: StreamIdAllocator::new(),
                handlers: HashMap::new(),
            }),
            in_queue: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn delivers_response_to_waiting_sink_by_stream_id() {
        let shared = empty_shared();
        let (tx, mut rx) = mpsc::channel(2);
        let stream_id = {
            let mut streams = shared.streams.lock().unwrap();
            let id = streams.allocator.alloc().unwrap();
            streams.handlers.insert(id, tx);
            id
        };

        let body = b"ok";
        let encoded = frame::encode(
            Version::PROTOCOL_V4_RESPONSE,
            stream_id,
            ResponseOpcode::Ready as u8,
            Flags::default(),
            body,
            None,
        )
        .unwrap();

        run(&encoded[..], shared.clone(), None, None).await;

        let delivered = rx.recv().await.unwrap().unwrap();
        assert_eq!(&delivered.body[..], body);
        assert_eq!(shared.streams.lock().unwrap().allocator.outstanding(), 0);
    }

    #[tokio::test]
    async fn eof_drains_pending_sinks_with_connection_closed() {
        let shared = empty_shared();
        let (tx, mut rx) = mpsc::channel(2);
        {
            let mut streams = shared.streams.lock().unwrap();
            let id = streams.allocator.alloc().unwrap();
            streams.handlers.insert(id, tx);
        }

        run(&b""[..], shared.clone(), None, None).await;

        assert!(matches!(rx.recv().await, Some(Err(Error::ConnectionClosed))));
        assert!(shared.closed.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn response_on_event_stream_is_routed_to_event_channel() {
        let shared = empty_shared();
        let (event_tx, mut event_rx) = mpsc::channel(4);

        let mut body = crate::buffer::BodyWriter::new();
        body.write_string("STATUS_CHANGE");
        body.write_string("UP");
        body.write_inet("10.0.0.9:9042".parse().unwrap());

        let encoded = frame::encode(
            Version::PROTOCOL_V4_RESPONSE,
            EVENT_STREAM_ID,
            ResponseOpcode::Event as u8,
            Flags::default(),
            &body.into_bytes(),
            None,
        )
        .unwrap();

        run(&encoded[..], shared, None, Some(event_tx)).await;

        let ev = event_rx.recv().await.unwrap();
        assert!(matches!(ev, Event::StatusChange { .. }));
    }
}
