//! Streaming wire plumbing between upstream and client.
//!
//! A single pump task per streaming response reads the upstream byte stream,
//! optionally re-frames it through a [`StreamTransformer`], and fans every
//! outbound frame into two pipes: the client body and the log-recorder tee.
//! Every client write is checked; a failed write (client gone) or a fatal
//! parse error tears the pump down, which in turn drops the upstream
//! receiver and aborts the upstream copy. A single chunk the transformer
//! cannot decode is logged here and skipped.

use bytes::Bytes;
use modelmux_protocol::sse::SseParser;
use modelmux_transform::stream::StreamTransformer;
use tokio::sync::mpsc;
use tracing::warn;

use crate::upstream::ByteStream;

/// Client-facing frame pipe; an `Err` item closes the body with that error.
pub type FrameReceiver = mpsc::Receiver<Result<Bytes, std::io::Error>>;
pub type FrameSender = mpsc::Sender<Result<Bytes, std::io::Error>>;

pub fn spawn_stream_pump(
    mut upstream: ByteStream,
    mut transformer: Option<StreamTransformer>,
    client_tx: FrameSender,
    recorder_tx: mpsc::Sender<Bytes>,
) {
    tokio::spawn(async move {
        let mut parser = SseParser::new();

        while let Some(chunk) = upstream.recv().await {
            match &mut transformer {
                None => {
                    // Pass-through: bytes flow untouched; only the tee copies.
                    let _ = recorder_tx.send(chunk.clone()).await;
                    if client_tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                Some(transformer) => {
                    let events = match parser.push_bytes(&chunk) {
                        Ok(events) => events,
                        Err(err) => {
                            warn!(event = "sse_stream_fatal", error = %err);
                            let _ = client_tx.send(Err(std::io::Error::other(err))).await;
                            return;
                        }
                    };
                    for event in events {
                        let frames = match transformer.push(&event) {
                            Ok(frames) => frames,
                            Err(failure) => {
                                warn!(
                                    event = "sse_chunk_skipped",
                                    sse_event = ?failure.event,
                                    error = %failure.error,
                                );
                                continue;
                            }
                        };
                        for frame in frames {
                            let frame = Bytes::from(frame);
                            let _ = recorder_tx.send(frame.clone()).await;
                            if client_tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }

        if let Some(transformer) = &mut transformer {
            let mut tail = Vec::new();
            for event in parser.finish() {
                match transformer.push(&event) {
                    Ok(frames) => tail.extend(frames),
                    Err(failure) => {
                        warn!(
                            event = "sse_chunk_skipped",
                            sse_event = ?failure.event,
                            error = %failure.error,
                        );
                    }
                }
            }
            tail.extend(transformer.finish());
            for frame in tail {
                let frame = Bytes::from(frame);
                let _ = recorder_tx.send(frame.clone()).await;
                if client_tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        }
        // Both senders drop here: the client body sees EOF and the recorder
        // tee flushes its log row.
    });
}
