//! Test support for end-to-end engine coverage.
//!
//! Supplies the scripted node and a few helpers so the engine tests and the
//! behaviour steps stay focused on the exchange they describe.

mod fake_node;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

use crate::{Connection, FcpClient, SequentialIdentifiers};

pub(in crate::tests) use fake_node::{FakeNode, NodeSession};

/// Upper bound for anything a test waits on.
pub(in crate::tests) const WAIT: Duration = Duration::from_secs(5);

const POLL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or [`WAIT`] runs out.
pub(in crate::tests) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL);
    }
    condition()
}

/// A client already greeted by `node`, with identifiers `<prefix>-<n>`.
pub(in crate::tests) fn connected_client(
    node: &FakeNode,
    prefix: &str,
) -> Result<(FcpClient, Arc<Connection>, NodeSession)> {
    let client = FcpClient::with_identifiers(&node.config(), SequentialIdentifiers::new(prefix));
    let connecting = {
        let client = client.clone();
        thread::spawn(move || client.ensure_connected())
    };
    let mut session = node.accept()?;
    session.greet()?;
    let connection = connecting
        .join()
        .map_err(|_| anyhow!("connecting thread panicked"))?
        .context("client connects")?;
    Ok((client, connection, session))
}
