//! Local-socket endpoint accepting calls from the peer process.
//!
//! Each side of a session runs one endpoint. The peer opens a connection,
//! writes request lines and reads one reply line per request; the endpoint
//! routes every call to its [`CallHandler`].

use std::future::Future;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::StreamExt;
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ipc::codec::FrameCodec;
use crate::ipc::protocol::{parse_request, Call, Response};
use crate::{ForkError, Result};

/// Receiver of calls arriving on an endpoint.
pub trait CallHandler: Send + Sync + 'static {
    /// Handle one call and produce its result.
    fn handle(&self, call: Call) -> impl Future<Output = Result<serde_json::Value>> + Send;
}

/// Start listening on `endpoint` and serve calls until `cancel` fires.
///
/// The listener is bound before this returns, so the endpoint may be
/// published in the naming directory immediately afterwards.
///
/// # Errors
///
/// Returns `ForkError::Io` if the socket name is invalid or the listener
/// cannot be created.
pub fn spawn_endpoint<H: CallHandler>(
    endpoint: &str,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = endpoint.to_owned();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| ForkError::Io(format!("invalid endpoint name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| ForkError::Io(format!("failed to listen on '{name}': {err}")))?;

    debug!(endpoint = %name, "endpoint listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("endpoint", endpoint = %name);
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("endpoint shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let handler = Arc::clone(&handler);
                                tokio::spawn(handle_connection(stream, handler).in_current_span());
                            }
                            Err(err) => {
                                warn!(%err, "endpoint accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Serve one peer connection until it closes.
async fn handle_connection<H: CallHandler>(
    stream: interprocess::local_socket::tokio::Stream,
    handler: Arc<H>,
) {
    let (reader, mut writer) = stream.split();
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    let mut codec = FrameCodec::new();

    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "connection read failed");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match parse_request(trimmed) {
            Ok(request) => {
                let method = request.call.method();
                let result = handler
                    .handle(request.call)
                    .instrument(info_span!("call", method))
                    .await;
                if let Err(ref err) = result {
                    debug!(method, %err, "call failed");
                }
                Response::from_result(request.id, result)
            }
            Err(err) => Response::from_result(request_id_of(trimmed), Err(err)),
        };

        let encoded = serde_json::to_string(&response)
            .map_err(ForkError::from)
            .and_then(|text| {
                let mut buf = BytesMut::new();
                codec.encode(text, &mut buf).map(|()| buf)
            });

        let buf = match encoded {
            Ok(buf) => buf,
            Err(err) => {
                warn!(%err, "failed to encode reply");
                break;
            }
        };

        // The caller may have stopped waiting; the work already happened.
        if let Err(err) = writer.write_all(&buf).await {
            info!(%err, "peer went away before the reply was written");
            break;
        }
    }

    debug!("connection closed");
}

/// Best-effort correlation id for a request that failed to decode.
fn request_id_of(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(serde_json::Value::as_str).map(str::to_owned))
        .unwrap_or_default()
}
