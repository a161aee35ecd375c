//! Newline-delimited JSON link to a runtime bridge over TCP.
//!
//! Handshake: the client sends `hello`, the node answers `welcome` or
//! `denied`. Afterwards the client sends `call` frames and the node streams
//! `output` frames (tagged with the call's capture id) followed by one `reply`
//! per call. A single reader task owns the read half; EOF or a read error
//! closes the link and fails every pending call with [`DistributionError::NodeDown`].

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::capture::CaptureRegistry;
use super::error::DistributionError;
use super::link::{ConnectTarget, Connector, NodeLink, RemoteCall};
use super::node_name::host_of;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Hello {
        node: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cookie: Option<String>,
    },
    Welcome {
        node: String,
    },
    Denied {
        reason: String,
    },
    Call {
        id: u64,
        module: String,
        function: String,
        args: Vec<Value>,
        capture: Uuid,
    },
    Output {
        capture: Uuid,
        text: String,
    },
    Reply {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<String, DistributionError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| DistributionError::Protocol(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, DistributionError> {
        serde_json::from_str(line).map_err(|e| DistributionError::Protocol(e.to_string()))
    }
}

type PendingCalls = Arc<DashMap<u64, oneshot::Sender<Result<Value, DistributionError>>>>;

/// Connects to `host:port`, where the host is taken from the node name.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    port: u16,
}

impl TcpConnector {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
        captures: CaptureRegistry,
    ) -> Result<Arc<dyn NodeLink>, DistributionError> {
        let host = host_of(&target.node).unwrap_or("localhost");
        let stream = TcpStream::connect((host, self.port)).await.map_err(|e| {
            trace!("Connect to {}:{} failed: {}", host, self.port, e);
            match e.kind() {
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::NotFound
                | io::ErrorKind::TimedOut
                | io::ErrorKind::AddrNotAvailable => DistributionError::Unreachable(target.node.clone()),
                _ => DistributionError::Io(e),
            }
        })?;
        let link = TcpLink::handshake(stream, target, captures).await?;
        Ok(Arc::new(link))
    }
}

pub struct TcpLink {
    node: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingCalls,
    next_id: AtomicU64,
    closed: watch::Receiver<bool>,
    reader: JoinHandle<()>,
}

impl TcpLink {
    async fn handshake(
        stream: TcpStream,
        target: &ConnectTarget,
        captures: CaptureRegistry,
    ) -> Result<Self, DistributionError> {
        let (read, mut write) = stream.into_split();
        let hello = Frame::Hello {
            node: target.local.clone(),
            cookie: target.cookie.clone(),
        };
        write.write_all(hello.encode()?.as_bytes()).await?;

        let mut reader = BufReader::new(read);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(DistributionError::NodeDown);
        }
        let node = match Frame::decode(&line)? {
            Frame::Welcome { node } => node,
            Frame::Denied { reason } => return Err(DistributionError::Remote(reason)),
            other => {
                return Err(DistributionError::Protocol(format!(
                    "expected welcome, got {other:?}"
                )));
            }
        };
        debug!("Handshake with {} complete", node);

        let pending: PendingCalls = Arc::new(DashMap::new());
        let (closed_tx, closed) = watch::channel(false);
        let reader = tokio::spawn(read_frames(reader, pending.clone(), captures, closed_tx));

        Ok(Self {
            node,
            writer: Mutex::new(write),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        })
    }
}

async fn read_frames(
    mut reader: BufReader<OwnedReadHalf>,
    pending: PendingCalls,
    captures: CaptureRegistry,
    closed: watch::Sender<bool>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Runtime link closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Runtime link read failed: {}", e);
                break;
            }
        }
        match Frame::decode(line.trim_end()) {
            Ok(Frame::Output { capture, text }) => {
                captures.deliver(capture, text);
            }
            Ok(Frame::Reply { id, ok, error }) => {
                let Some((_, waiter)) = pending.remove(&id) else {
                    trace!("Reply for abandoned call {}", id);
                    continue;
                };
                let result = match error {
                    Some(reason) => Err(DistributionError::Remote(reason)),
                    None => Ok(ok.unwrap_or(Value::Null)),
                };
                let _ = waiter.send(result);
            }
            Ok(other) => warn!("Unexpected frame from runtime: {:?}", other),
            Err(e) => warn!("Malformed frame from runtime: {}", e),
        }
    }
    // Flag first so a call registered after the clear sees the link as down.
    closed.send_replace(true);
    // Dropping the senders fails every outstanding call.
    pending.clear();
}

/// Removes a pending call when its caller stops waiting.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[async_trait]
impl NodeLink for TcpLink {
    fn node(&self) -> &str {
        &self.node
    }

    async fn call(&self, call: RemoteCall) -> Result<Value, DistributionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        if *self.closed.borrow() {
            return Err(DistributionError::NodeDown);
        }

        let frame = Frame::Call {
            id,
            module: call.module,
            function: call.function,
            args: call.args,
            capture: call.capture,
        };
        self.writer
            .lock()
            .await
            .write_all(frame.encode()?.as_bytes())
            .await?;

        rx.await.map_err(|_| DistributionError::NodeDown)?
    }

    async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|down| *down).await;
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn fake_node(listener: TcpListener, reply_with_output: bool) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let hello = Frame::decode(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(hello, Frame::Hello { ref cookie, .. } if cookie.as_deref() == Some("c")));
        let welcome = Frame::Welcome { node: "rt@127.0.0.1".into() };
        write.write_all(welcome.encode().unwrap().as_bytes()).await.unwrap();

        while let Some(line) = lines.next_line().await.unwrap() {
            let Frame::Call { id, function, capture, .. } = Frame::decode(&line).unwrap() else {
                panic!("expected call");
            };
            if reply_with_output {
                let output = Frame::Output { capture, text: format!("{function} ran\n") };
                write.write_all(output.encode().unwrap().as_bytes()).await.unwrap();
            }
            let reply = Frame::Reply { id, ok: Some(json!(function)), error: None };
            write.write_all(reply.encode().unwrap().as_bytes()).await.unwrap();
        }
    }

    fn target() -> ConnectTarget {
        ConnectTarget {
            node: "rt@127.0.0.1".into(),
            local: "els@127.0.0.1".into(),
            cookie: Some("c".into()),
        }
    }

    #[test]
    fn test_frame_wire_format() {
        let frame = Frame::Reply { id: 7, ok: None, error: Some("badarg".into()) };
        assert_eq!(frame.encode().unwrap(), "{\"type\":\"reply\",\"id\":7,\"error\":\"badarg\"}\n");
    }

    #[test]
    fn test_capture_id_travels_as_hyphenated_string() {
        let capture = Uuid::parse_str("0b6e0a9c-4d1e-4f5a-9a57-3c2f1d0e8b7a").unwrap();
        let line = r#"{"type":"output","capture":"0b6e0a9c-4d1e-4f5a-9a57-3c2f1d0e8b7a","text":"hi\n"}"#;
        assert_eq!(Frame::decode(line).unwrap(), Frame::Output { capture, text: "hi\n".into() });

        let call = Frame::Call {
            id: 1,
            module: "els_bridge".into(),
            function: "render_docs".into(),
            args: vec![json!("lists")],
            capture,
        };
        let encoded: Value = serde_json::from_str(&call.encode().unwrap()).unwrap();
        assert_eq!(encoded["capture"], json!("0b6e0a9c-4d1e-4f5a-9a57-3c2f1d0e8b7a"));
    }

    #[tokio::test]
    async fn test_call_with_output() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(fake_node(listener, true));

        let captures = CaptureRegistry::new();
        let link = TcpConnector::new(port).connect(&target(), captures.clone()).await.unwrap();
        assert_eq!(link.node(), "rt@127.0.0.1");

        let sink = captures.open();
        let value = link
            .call(RemoteCall {
                module: "m".into(),
                function: "f".into(),
                args: vec![],
                capture: sink.id(),
            })
            .await
            .unwrap();
        assert_eq!(value, json!("f"));
        assert_eq!(sink.finish(), "f ran\n");
    }

    #[tokio::test]
    async fn test_peer_close_marks_link_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap();
            let welcome = Frame::Welcome { node: "rt".into() };
            write.write_all(welcome.encode().unwrap().as_bytes()).await.unwrap();
        });

        let link = TcpConnector::new(port)
            .connect(&target(), CaptureRegistry::new())
            .await
            .unwrap();
        server.await.unwrap();
        link.closed().await;

        let sink = CaptureRegistry::new().open();
        let err = link
            .call(RemoteCall { module: "m".into(), function: "f".into(), args: vec![], capture: sink.id() })
            .await
            .unwrap_err();
        assert!(matches!(err, DistributionError::NodeDown));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = match TcpConnector::new(port).connect(&target(), CaptureRegistry::new()).await {
            Ok(_) => panic!("connect should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, DistributionError::Unreachable(ref node) if node == "rt@127.0.0.1"));
    }
}
