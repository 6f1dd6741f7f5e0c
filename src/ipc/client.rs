//! Calling side of the control channel.
//!
//! Every call opens a fresh connection to the peer's endpoint, writes one
//! request and waits for one reply. Failing to connect, write or read a
//! reply within the wait bound all mean the same thing to the caller: the
//! peer is unreachable.

use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use interprocess::local_socket::{
    tokio::{prelude::*, Stream},
    GenericNamespaced,
};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::trace;

use crate::ipc::codec::FrameCodec;
use crate::ipc::protocol::{Call, Request, Response};
use crate::{ForkError, Result};

/// Local-socket name for a directory name.
#[must_use]
pub fn endpoint_name(directory_name: &str) -> String {
    format!("fork-{directory_name}.sock")
}

/// Handle for calling a peer's endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerClient {
    endpoint: String,
}

impl PeerClient {
    /// Client for the endpoint published under a directory entry.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `call` and wait up to `wait` for its reply.
    ///
    /// # Errors
    ///
    /// - `ForkError::ConnectivityLost` if the peer cannot be reached, drops
    ///   the connection, or does not reply within `wait`.
    /// - `ForkError::Protocol` if the reply is malformed.
    /// - The peer's own error, rebuilt from the reply, if the call failed.
    pub async fn call(&self, call: Call, wait: Duration) -> Result<serde_json::Value> {
        let request = Request::new(call);
        let method = request.call.method();

        let response = tokio::time::timeout(wait, self.round_trip(&request))
            .await
            .map_err(|_| {
                ForkError::ConnectivityLost(format!(
                    "no reply to '{method}' from {} within {wait:?}",
                    self.endpoint
                ))
            })??;

        trace!(endpoint = %self.endpoint, method, "reply received");
        response.into_result(&request.id)
    }

    async fn round_trip(&self, request: &Request) -> Result<Response> {
        let unreachable = |what: &str, err: &dyn std::fmt::Display| {
            ForkError::ConnectivityLost(format!("{what} {}: {err}", self.endpoint))
        };

        let name = self
            .endpoint
            .clone()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| ForkError::Io(format!("invalid endpoint name '{}': {err}", self.endpoint)))?;

        let stream = Stream::connect(name)
            .await
            .map_err(|err| unreachable("cannot connect to", &err))?;
        let (reader, mut writer) = stream.split();

        let mut buf = BytesMut::new();
        FrameCodec::new().encode(serde_json::to_string(request)?, &mut buf)?;
        writer
            .write_all(&buf)
            .await
            .map_err(|err| unreachable("cannot write to", &err))?;
        writer
            .flush()
            .await
            .map_err(|err| unreachable("cannot write to", &err))?;

        let mut frames = FramedRead::new(reader, FrameCodec::new());
        loop {
            match frames.next().await {
                None => {
                    return Err(ForkError::ConnectivityLost(format!(
                        "{} closed the connection before replying",
                        self.endpoint
                    )));
                }
                Some(Err(ForkError::Io(err))) => {
                    return Err(ForkError::ConnectivityLost(format!(
                        "lost connection to {}: {err}",
                        self.endpoint
                    )));
                }
                Some(Err(err)) => return Err(err),
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    return serde_json::from_str(line.trim()).map_err(|err| {
                        ForkError::Protocol(format!("malformed reply: {err}"))
                    });
                }
            }
        }
    }
}
