//! Scripted FCP node.
//!
//! The node listens on an ephemeral TCP port. Tests accept the client's
//! connection explicitly and then play the node's side of each exchange
//! from the test thread, which keeps the interleaving deterministic.

use std::io::{self, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail, ensure};
use fcp_config::{Config, NodeEndpoint};

use crate::codec::{FrameReader, encode};
use crate::frame::Frame;

use super::WAIT;

const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Listening side of the fake node.
pub(in crate::tests) struct FakeNode {
    listener: TcpListener,
    port: u16,
}

impl FakeNode {
    pub(in crate::tests) fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake node")?;
        listener
            .set_nonblocking(true)
            .context("fake node nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        Ok(Self { listener, port })
    }

    /// Client configuration pointing at this node.
    pub(in crate::tests) fn config(&self) -> Config {
        Config::default()
            .with_node_endpoint(NodeEndpoint::tcp("127.0.0.1", self.port))
            .with_client_name("engine-tests")
            .with_handshake_timeout(WAIT)
    }

    /// Waits for the next client connection.
    pub(in crate::tests) fn accept(&self) -> Result<NodeSession> {
        let deadline = Instant::now() + WAIT;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => return NodeSession::new(stream),
                Err(ref error)
                    if error.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline =>
                {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(error) => return Err(error).context("accept client connection"),
            }
        }
    }

    /// True when a connection is queued that nobody accepted yet.
    pub(in crate::tests) fn has_waiting_connection(&self) -> bool {
        self.listener.accept().is_ok()
    }
}

/// The node's end of one client connection.
pub(in crate::tests) struct NodeSession {
    reader: FrameReader<BufReader<TcpStream>>,
    writer: TcpStream,
}

impl NodeSession {
    fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(false).context("blocking session")?;
        stream
            .set_read_timeout(Some(WAIT))
            .context("session read timeout")?;
        let writer = stream.try_clone().context("clone session stream")?;
        Ok(Self {
            reader: FrameReader::new(BufReader::new(stream)),
            writer,
        })
    }

    /// Reads the next frame the client sent.
    pub(in crate::tests) fn read_message(&mut self) -> Result<Frame> {
        match self.reader.read_frame().context("read client frame")? {
            Some(frame) => Ok(frame),
            None => bail!("client closed the connection"),
        }
    }

    /// Reads the next frame and checks its type.
    pub(in crate::tests) fn expect(&mut self, name: &str) -> Result<Frame> {
        let frame = self.read_message()?;
        ensure!(frame.is(name), "expected {name}, client sent {frame}");
        Ok(frame)
    }

    /// Plays the node's half of the handshake; returns the `ClientHello`.
    pub(in crate::tests) fn greet(&mut self) -> Result<Frame> {
        let hello = self.expect("ClientHello")?;
        self.send(&[
            "NodeHello",
            "FCPVersion=2.0",
            "Node=Fred",
            "Version=Fred,0.7,1.0,1466",
            "ConnectionIdentifier=fake-node-connection",
            "EndMessage",
        ])?;
        Ok(hello)
    }

    /// Writes raw lines, each followed by a newline.
    pub(in crate::tests) fn send(&mut self, lines: &[&str]) -> Result<()> {
        for line in lines {
            self.writer
                .write_all(line.as_bytes())
                .and_then(|()| self.writer.write_all(b"\n"))
                .context("write node line")?;
        }
        self.writer.flush().context("flush node lines")
    }

    /// Writes an encoded frame, payload included.
    pub(in crate::tests) fn reply(&mut self, frame: &Frame) -> Result<()> {
        let bytes = encode(frame).context("encode node frame")?;
        self.writer.write_all(&bytes).context("write node frame")?;
        self.writer.flush().context("flush node frame")
    }

    /// Drops the connection as a crashing node would.
    pub(in crate::tests) fn close(self) -> Result<()> {
        self.writer
            .shutdown(Shutdown::Both)
            .context("shut down session")
    }
}
