//! Single-node Redis client: one connection, one request in flight at a time.
//!
//! The cluster router owns one [`NodeClient`] per cluster endpoint. Each
//! client runs a background pump task that serializes requests FIFO over its
//! connection; callers from any task submit a command and await the reply.

pub mod command;
pub mod connection;

cfg_if::cfg_if! {
    if #[cfg(feature = "tls")] {
        mod tls;
    }
}

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::node::command::Cmd;
use crate::node::connection::Connection;
use crate::resp::Frame;

/// Per-node connection options, applied uniformly to every discovered node.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    /// Username for ACL-style AUTH.
    pub username: Option<String>,
    /// Password; presence triggers the AUTH handshake.
    pub password: Option<String>,
    /// Database selected after connecting.
    pub db: Option<u32>,
    /// Connect over TLS (requires the `tls` feature).
    pub tls: bool,
    /// Limit on establishing the TCP connection.
    pub connect_timeout: Option<Duration>,
    /// Per-read timeout on the connection.
    pub read_timeout: Option<Duration>,
    /// Per-write timeout on the connection.
    pub write_timeout: Option<Duration>,
}

type Request = (Frame, oneshot::Sender<Result<Frame>>);

/// Asynchronous request/response client for one Redis node.
#[derive(Debug)]
pub struct NodeClient {
    sender: mpsc::UnboundedSender<Request>,
    pump: JoinHandle<()>,
    closed: AtomicBool,
}

impl NodeClient {
    /// Connects to `host:port`, runs the AUTH/SELECT handshake from
    /// `options`, and spawns the request pump.
    pub async fn connect(host: &str, port: u16, options: &NodeOptions) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let connect = TcpStream::connect(&addr);
        let stream = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| timed_out("connect timeout"))??,
            None => connect.await?,
        };
        let _ = stream.set_nodelay(true);

        if options.tls {
            #[cfg(feature = "tls")]
            {
                let stream = tls::wrap(stream, host).await?;
                return Self::handshake_and_start(stream, options).await;
            }
            #[cfg(not(feature = "tls"))]
            {
                return Err(Error::InvalidClientConfig {
                    message: "rediss:// endpoint requires the `tls` feature".to_string(),
                });
            }
        }
        Self::handshake_and_start(stream, options).await
    }

    async fn handshake_and_start<S>(stream: S, options: &NodeOptions) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut conn =
            Connection::new(stream).with_timeouts(options.read_timeout, options.write_timeout);

        if let Some(password) = &options.password {
            let auth = command::auth(options.username.as_deref(), password);
            conn.write_frame(&auth.into_frame()).await?;
            if let Frame::Error(_) = conn.read_frame().await? {
                return Err(Error::Auth);
            }
        }
        if let Some(db) = options.db {
            conn.write_frame(&command::select(db).into_frame()).await?;
            if let Frame::Error(text) = conn.read_frame().await? {
                return Err(Error::Server {
                    message: String::from_utf8_lossy(&text).into_owned(),
                });
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(conn, receiver));
        Ok(Self {
            sender,
            pump,
            closed: AtomicBool::new(false),
        })
    }

    /// Sends a command and waits for its reply.
    ///
    /// Server error replies come back as `Ok(Frame::Error(..))`; classifying
    /// them (redirects included) is the router's concern.
    pub async fn call(&self, cmd: Cmd) -> Result<Frame> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send((cmd.into_frame(), reply_tx))
            .map_err(|_| closed_error())?;
        reply_rx.await.map_err(|_| closed_error())?
    }

    /// Like [`call`](Self::call), but gives up after `limit`.
    pub async fn call_with_timeout(&self, limit: Duration, cmd: Cmd) -> Result<Frame> {
        tokio::time::timeout(limit, self.call(cmd))
            .await
            .map_err(|_| timed_out("command timeout"))?
    }

    /// Shuts the connection down. Idempotent; in-flight callers observe a
    /// connection-closed error.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pump.abort();
        }
    }
}

impl Drop for NodeClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump<S>(mut conn: Connection<S>, mut requests: mpsc::UnboundedReceiver<Request>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some((frame, reply)) = requests.recv().await {
        if let Err(err) = conn.write_frame(&frame).await {
            let _ = reply.send(Err(err));
            break;
        }
        match conn.read_frame().await {
            Ok(response) => {
                let _ = reply.send(Ok(response));
            }
            Err(err) => {
                let _ = reply.send(Err(err));
                break;
            }
        }
    }
    // Connection is unusable; fail whatever is still queued.
    requests.close();
    while let Ok((_, reply)) = requests.try_recv() {
        let _ = reply.send(Err(closed_error()));
    }
}

fn closed_error() -> Error {
    Error::Io {
        source: io::Error::new(io::ErrorKind::BrokenPipe, "node connection closed"),
    }
}

fn timed_out(what: &str) -> Error {
    Error::Io {
        source: io::Error::new(io::ErrorKind::TimedOut, what),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::resp::{Decoder, Encoder};

    async fn echo_server() -> (std::net::SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream);
            while let Ok(frame) = conn.read_frame().await {
                if conn.write_frame(&frame).await.is_err() {
                    break;
                }
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn call_round_trips() {
        let (addr, server) = echo_server().await;
        let client = NodeClient::connect(&addr.ip().to_string(), addr.port(), &NodeOptions::default())
            .await
            .unwrap();

        let reply = client.call(Cmd::new("PING")).await.unwrap();
        assert_eq!(reply, Frame::Array(vec![Frame::bulk("PING")]));

        client.close();
        server.abort();
    }

    #[tokio::test]
    async fn calls_serialize_in_order() {
        let (addr, server) = echo_server().await;
        let client = NodeClient::connect(&addr.ip().to_string(), addr.port(), &NodeOptions::default())
            .await
            .unwrap();

        for i in 0..10 {
            let reply = client.call(Cmd::new("ECHO").arg(i.to_string())).await.unwrap();
            assert_eq!(
                reply,
                Frame::Array(vec![Frame::bulk("ECHO"), Frame::bulk(i.to_string())])
            );
        }

        client.close();
        server.abort();
    }

    #[tokio::test]
    async fn close_fails_pending_calls() {
        let (addr, server) = echo_server().await;
        let client = NodeClient::connect(&addr.ip().to_string(), addr.port(), &NodeOptions::default())
            .await
            .unwrap();

        client.close();
        client.close(); // idempotent

        let err = client.call(Cmd::new("PING")).await.unwrap_err();
        assert!(err.is_connection_error());
        server.abort();
    }

    #[tokio::test]
    async fn auth_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                decoder.feed(&buf[..n]);
                if decoder.decode().unwrap().is_some() {
                    break;
                }
            }
            let mut encoder = Encoder::new();
            encoder.encode(&Frame::Error(b"WRONGPASS invalid password".to_vec()));
            stream.write_all(&encoder.take()).await.unwrap();
        });

        let options = NodeOptions {
            password: Some("nope".to_string()),
            ..Default::default()
        };
        let err = NodeClient::connect(&addr.ip().to_string(), addr.port(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth));
        server.await.unwrap();
    }
}
