//! Connection Handler
//!
//! Each client gets its own task running a decode, execute, reply loop.
//!
//! ```text
//!   TcpStream ──into_split──┬── read half ──> FrameDecoder ──> tokens
//!                           │                                   │
//!                           │                       Engine::exec(session, tokens)
//!                           │                                   │
//!                           └── write half <── BufWriter <── RespValue
//! ```
//!
//! Frames are handled strictly in order, so pipelined commands get their
//! replies in the order they were sent. A malformed frame gets one
//! `-ERR Protocol error` reply and the connection is closed; the decoder
//! never tries to resynchronise.

use super::session::Session;
use crate::engine::Engine;
use crate::protocol::{FrameDecoder, ParseError, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Drives one client connection.
pub struct ConnectionHandler {
    decoder: FrameDecoder<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    addr: SocketAddr,
    session: Session,
    engine: Arc<Engine>,
    stats: Arc<ConnectionStats>,
    out: Vec<u8>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<Engine>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        let (read, write) = stream.into_split();

        Self {
            decoder: FrameDecoder::new(read),
            writer: BufWriter::new(write),
            addr,
            session: Session::new(),
            engine,
            stats,
            out: Vec::with_capacity(4096),
        }
    }

    /// Runs until the client disconnects, sends QUIT, or breaks the protocol.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;
        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(err)) if err.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(err) => warn!(client = %self.addr, error = %err, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        while let Some(frame) = self.decoder.next_frame().await {
            let args = match frame {
                Ok(args) => args,
                Err(err) => {
                    let reply = RespValue::error(format!("ERR Protocol error: {}", err));
                    self.send(&reply).await?;
                    return Err(ConnectionError::Parse(err));
                }
            };

            let quit = args[0].eq_ignore_ascii_case(b"quit");
            let reply = self.engine.exec(&mut self.session, &args);
            self.stats.command_processed();
            self.send(&reply).await?;

            if quit {
                trace!(client = %self.addr, "QUIT received");
                break;
            }
        }
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        self.out.clear();
        reply.serialize_into(&mut self.out);
        self.writer.write_all(&self.out).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(self.out.len());
        trace!(client = %self.addr, bytes = self.out.len(), "Sent reply");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),
}

/// Accept-loop entry point: runs a handler and swallows expected errors.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<Engine>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, engine, stats);
    if let Err(err) = handler.run().await {
        debug!(client = %addr, error = %err, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn start_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let stats = Arc::new(ConnectionStats::new());

        let server_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    client,
                    Arc::clone(&engine),
                    Arc::clone(&server_stats),
                ));
            }
        });

        (addr, stats)
    }

    /// Reads until `expected` bytes arrived or the stream goes quiet.
    async fn read_exact_len(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        let mut total = 0;
        while total < expected {
            match timeout(Duration::from_secs(2), client.read(&mut buf[total..])).await {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }
        buf.truncate(total);
        buf
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 7).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (addr, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        let expected = b"+OK\r\n$2\r\nv1\r\n$-1\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let (addr, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nhe").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"llo\r\n").await.unwrap();

        assert_eq!(read_exact_len(&mut client, 11).await, b"$5\r\nhello\r\n");
    }

    #[tokio::test]
    async fn test_protocol_error_closes_connection() {
        let (addr, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"+PING\r\n").await.unwrap();
        let reply = read_exact_len(&mut client, 1024).await;
        assert!(reply.starts_with(b"-ERR Protocol error"));

        let mut rest = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, stats) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
        assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");

        let mut rest = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_subscribe_replies_back_to_back() {
        let (addr, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$9\r\nSUBSCRIBE\r\n$1\r\na\r\n$1\r\nb\r\n")
            .await
            .unwrap();

        let expected = b"*3\r\n$9\r\nsubscribe\r\n$1\r\na\r\n:1\r\n*3\r\n$9\r\nsubscribe\r\n$1\r\nb\r\n:2\r\n";
        assert_eq!(read_exact_len(&mut client, expected.len()).await, expected);
    }
}
