//! Line-oriented test client for the socket transport.
//!
//! Speaks the plain newline-framed protocol: one token line to
//! authenticate, then chat lines in both directions.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// A socket chat client under test.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TestClient {
    /// Connect to a test server.
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        })
    }

    /// Send one line, newline appended.
    pub async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive a single line from the server.
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Receive a line with a timeout. Errors on timeout or closed socket.
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(dur, self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("connection closed by server");
        }
        Ok(line.trim_end().to_string())
    }

    /// Receive lines until the predicate matches, returning every line
    /// seen including the matching one.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut lines = Vec::new();
        loop {
            let line = self.recv().await?;
            let done = predicate(&line);
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    }

    /// Present a token as the handshake line and expect the `[OK]` reply.
    pub async fn authenticate(&mut self, token: &str) -> anyhow::Result<String> {
        self.send_line(token).await?;
        let reply = self.recv().await?;
        if !reply.starts_with("[OK]") {
            anyhow::bail!("authentication rejected: {reply}");
        }
        Ok(reply)
    }

    /// Drain whatever the server still has queued, then expect it to close
    /// the connection within `dur`. Returns the drained lines.
    pub async fn wait_closed(&mut self, dur: Duration) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        let deadline = tokio::time::Instant::now() + dur;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let mut line = String::new();
            match timeout(remaining, self.reader.read_line(&mut line)).await {
                Err(_) => anyhow::bail!("connection still open after {dur:?}"),
                Ok(Ok(0)) => return Ok(lines),
                Ok(Ok(_)) => lines.push(line.trim_end().to_string()),
                // A reset also counts as closed.
                Ok(Err(_)) => return Ok(lines),
            }
        }
    }
}
