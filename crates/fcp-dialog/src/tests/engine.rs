//! End-to-end engine tests against the scripted node.

use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use fcp_config::{Config, NodeEndpoint};
use rstest::rstest;
use tempfile::TempDir;

use super::support::{FakeNode, WAIT, connected_client, wait_until};
use crate::requests::{generate_ssk, subscribe_usk};
use crate::{
    FcpClient, FcpError, Frame, GetRequest, NoticeListeners, PutRequest, PutSource,
    SequentialIdentifiers, SubscriptionSpec, TerminalFold,
};

fn keypair_reply(identifier: &str) -> Frame {
    Frame::new("SSKKeypair")
        .with_field("Identifier", identifier)
        .with_field("InsertURI", format!("SSK@insert-{identifier}/"))
        .with_field("RequestURI", format!("SSK@request-{identifier}/"))
}

#[rstest]
fn sequential_commands_share_one_connection() -> Result<()> {
    let node = FakeNode::bind()?;
    let counter = Arc::new(AtomicU64::new(0));
    let tokens = {
        let counter = Arc::clone(&counter);
        move || format!("ssk-{}", counter.fetch_add(1, Ordering::SeqCst) + 1)
    };
    let client = FcpClient::with_identifiers(&node.config(), tokens);

    let first = client.generate_ssk();
    let mut session = node.accept()?;
    let hello = session.greet()?;
    ensure!(hello.field("Name") == Some("engine-tests"));
    ensure!(hello.field("ExpectedVersion") == Some("2.0"));

    let request = session.expect("GenerateSSK")?;
    ensure!(request.identifier() == Some("ssk-1"));
    session.reply(&keypair_reply("ssk-1"))?;
    let keypair = first.wait_timeout(WAIT)?;
    ensure!(keypair.field("InsertURI") == Some("SSK@insert-ssk-1/"));

    let second = client.generate_ssk();
    let request = session.expect("GenerateSSK")?;
    ensure!(request.identifier() == Some("ssk-2"));
    session.reply(&keypair_reply("ssk-2"))?;
    second.wait_timeout(WAIT)?;

    let connection = client.connection().context("connection still alive")?;
    ensure!(connection.id() == 1);
    ensure!(connection.greeting().version == "Fred,0.7,1.0,1466");
    ensure!(!node.has_waiting_connection(), "a second connection was opened");
    Ok(())
}

#[rstest]
fn handshake_requires_node_hello() -> Result<()> {
    let node = FakeNode::bind()?;
    let client = FcpClient::new(&node.config());

    let handle = client.generate_ssk();
    let mut session = node.accept()?;
    session.expect("ClientHello")?;
    session.send(&["ProtocolError", "Code=1", "CodeDescription=Client hello missing", "EndMessage"])?;

    let error = handle.wait_timeout(WAIT).expect_err("handshake must fail");
    ensure!(
        matches!(&error, FcpError::Handshake { reason, .. } if reason.contains("ProtocolError")),
        "unexpected error {error}"
    );
    ensure!(client.connection().is_none());
    Ok(())
}

#[rstest]
fn silent_node_times_out_the_handshake() -> Result<()> {
    let node = FakeNode::bind()?;
    let config = node.config().with_handshake_timeout(Duration::from_millis(200));
    let client = FcpClient::new(&config);

    let handle = client.generate_ssk();
    let mut session = node.accept()?;
    session.expect("ClientHello")?;

    let error = handle.wait_timeout(WAIT).expect_err("handshake must time out");
    ensure!(matches!(error, FcpError::Handshake { .. }), "unexpected error {error}");
    ensure!(client.connection().is_none());
    drop(session);
    Ok(())
}

#[rstest]
fn zero_timeouts_wait_without_deadline() -> Result<()> {
    let node = FakeNode::bind()?;
    let config = node
        .config()
        .with_connect_timeout(Duration::ZERO)
        .with_handshake_timeout(Duration::ZERO);
    let client = FcpClient::new(&config);

    let connecting = {
        let client = client.clone();
        thread::spawn(move || client.ensure_connected())
    };
    let mut session = node.accept()?;
    session.greet()?;
    let connection = connecting
        .join()
        .map_err(|_| anyhow!("connecting thread panicked"))??;
    ensure!(connection.is_alive());
    Ok(())
}

#[rstest]
fn concurrent_callers_share_one_connection() -> Result<()> {
    const CALLERS: usize = 4;
    let node = FakeNode::bind()?;
    let client = FcpClient::new(&node.config());
    let start = Arc::new(Barrier::new(CALLERS));

    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let client = client.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                client.ensure_connected()
            })
        })
        .collect();
    let mut session = node.accept()?;
    session.greet()?;

    for caller in callers {
        let connection = caller
            .join()
            .map_err(|_| anyhow!("caller thread panicked"))??;
        ensure!(connection.id() == 1);
    }
    ensure!(!node.has_waiting_connection(), "a second connection was opened");
    Ok(())
}

#[rstest]
fn unreachable_node_fails_the_command() -> Result<()> {
    let port = {
        let reserved = TcpListener::bind(("127.0.0.1", 0))?;
        reserved.local_addr()?.port()
    };
    let config = Config::default().with_node_endpoint(NodeEndpoint::tcp("127.0.0.1", port));
    let client = FcpClient::new(&config);

    let error = client
        .generate_ssk()
        .wait_timeout(WAIT)
        .expect_err("connect must fail");

    ensure!(matches!(error, FcpError::Connect { .. }), "unexpected error {error}");
    Ok(())
}

#[rstest]
fn request_without_identifier_is_refused_before_connecting() -> Result<()> {
    let node = FakeNode::bind()?;
    let client = FcpClient::new(&node.config());

    let handle = client.execute(
        Frame::new("GenerateSSK"),
        TerminalFold::new(&["SSKKeypair"]),
        NoticeListeners::new(),
    );

    ensure!(matches!(
        handle.wait_timeout(WAIT),
        Err(FcpError::MissingIdentifier { .. })
    ));
    ensure!(!node.has_waiting_connection());
    Ok(())
}

#[rstest]
fn foreign_tokens_leave_pending_dialogs_alone() -> Result<()> {
    let node = FakeNode::bind()?;
    let (_client, connection, mut session) = connected_client(&node, "iso")?;

    let handle = connection.open_dialog("X", TerminalFold::new(&["SSKKeypair"]), NoticeListeners::new())?;
    connection.send(&generate_ssk("X"))?;
    session.expect("GenerateSSK")?;

    session.send(&["ProtocolError", "Identifier=not-test", "Code=7", "EndMessage"])?;
    session.reply(&keypair_reply("not-test"))?;
    session.send(&["SimpleProgress", "Total=1", "EndMessage"])?;
    session.reply(&keypair_reply("X"))?;

    let keypair = handle.wait_timeout(WAIT)?;
    ensure!(keypair.identifier() == Some("X"));
    ensure!(connection.is_alive());
    Ok(())
}

#[rstest]
fn duplicate_identifier_on_a_connection_is_refused() -> Result<()> {
    let node = FakeNode::bind()?;
    let (_client, connection, _session) = connected_client(&node, "dup")?;

    let _first = connection.open_dialog("same", TerminalFold::new(&["SSKKeypair"]), NoticeListeners::new())?;
    let second = connection.open_dialog("same", TerminalFold::new(&["SSKKeypair"]), NoticeListeners::new());

    ensure!(matches!(second, Err(FcpError::DuplicateIdentifier { .. })));
    Ok(())
}

#[rstest]
fn connection_loss_fails_dialogs_and_subscriptions() -> Result<()> {
    let node = FakeNode::bind()?;
    let (client, connection, mut session) = connected_client(&node, "loss")?;

    let dialogs: Vec<_> = (0..3).map(|_| client.generate_ssk()).collect();
    let pending_subscription = client.subscribe_usk("USK@key/pending/0");
    let active_subscription = client.subscribe_usk("USK@key/active/0");
    for _ in 0..5 {
        session.read_message()?;
    }

    session.send(&[
        "SubscribedUSK",
        &format!("Identifier={}", active_subscription.identifier()),
        "URI=USK@key/active/0",
        "EndMessage",
    ])?;
    let subscription = active_subscription.wait_timeout(WAIT)?;
    ensure!(subscription.is_active());

    session.close()?;

    for dialog in dialogs {
        ensure!(matches!(
            dialog.wait_timeout(WAIT),
            Err(FcpError::ConnectionClosed { .. })
        ));
    }
    ensure!(matches!(
        pending_subscription.wait_timeout(WAIT),
        Err(FcpError::ConnectionClosed { .. })
    ));
    ensure!(wait_until(|| !subscription.is_active()));
    ensure!(!connection.is_alive());
    ensure!(connection.registry().len() == 0);
    Ok(())
}

#[rstest]
fn next_command_after_failure_reconnects() -> Result<()> {
    let node = FakeNode::bind()?;
    let client = FcpClient::with_identifiers(&node.config(), SequentialIdentifiers::new("re"));

    let doomed = client.generate_ssk();
    let mut session = node.accept()?;
    session.greet()?;
    session.expect("GenerateSSK")?;
    session.close()?;
    ensure!(matches!(
        doomed.wait_timeout(WAIT),
        Err(FcpError::ConnectionClosed { .. })
    ));

    let retry = client.generate_ssk();
    let mut session = node.accept()?;
    let hello = session.greet()?;
    ensure!(hello.field("Name") == Some("engine-tests"));
    let request = session.expect("GenerateSSK")?;
    let identifier = request.identifier().context("request identifier")?.to_owned();
    session.reply(&keypair_reply(&identifier))?;

    retry.wait_timeout(WAIT)?;
    ensure!(client.connection().map(|connection| connection.id()) == Some(2));
    Ok(())
}

#[rstest]
fn duplicate_client_name_shuts_the_connection() -> Result<()> {
    let node = FakeNode::bind()?;
    let client = FcpClient::new(&node.config());

    let handle = client.generate_ssk();
    let mut session = node.accept()?;
    session.greet()?;
    session.expect("GenerateSSK")?;
    session.send(&["CloseConnectionDuplicateClientName", "EndMessage"])?;

    let error = handle.wait_timeout(WAIT).expect_err("dialog must fail");
    ensure!(
        matches!(&error, FcpError::ConnectionClosed { reason } if reason.contains("same name")),
        "unexpected error {error}"
    );
    ensure!(wait_until(|| client.connection().is_none()));
    Ok(())
}

#[rstest]
fn malformed_frame_kills_the_connection() -> Result<()> {
    let node = FakeNode::bind()?;
    let (client, connection, mut session) = connected_client(&node, "junk")?;

    let handle = client.generate_ssk();
    session.expect("GenerateSSK")?;
    session.send(&["SSKKeypair", "this line has no separator", "EndMessage"])?;

    ensure!(matches!(
        handle.wait_timeout(WAIT),
        Err(FcpError::MalformedFrame { .. })
    ));
    ensure!(!connection.is_alive());
    Ok(())
}

#[rstest]
fn fetch_follows_redirect_chain() -> Result<()> {
    let node = FakeNode::bind()?;
    let (client, _connection, mut session) = connected_client(&node, "get")?;
    let redirects = Arc::new(Mutex::new(Vec::new()));
    let listeners = NoticeListeners::new().on_redirect({
        let redirects = Arc::clone(&redirects);
        move |uri| redirects.lock().expect("redirect log").push(uri.to_owned())
    });

    let handle = client.get(GetRequest::new("USK@site/1"), listeners);
    let identifier = handle.identifier().to_owned();
    let request = session.expect("ClientGet")?;
    ensure!(request.field("URI") == Some("USK@site/1"));

    for (from, to) in [("USK@site/1", "USK@site/2"), ("USK@site/2", "USK@site/3")] {
        session.send(&[
            "GetFailed",
            &format!("Identifier={identifier}"),
            "Code=27",
            &format!("RedirectURI={to}"),
            "EndMessage",
        ])?;
        let resent = session.expect("ClientGet")?;
        ensure!(resent.identifier() == Some(identifier.as_str()), "redirect from {from} changed identifier");
        ensure!(resent.field("URI") == Some(to));
    }
    session.reply(
        &Frame::new("AllData")
            .with_field("Identifier", identifier.as_str())
            .with_field("Metadata.ContentType", "text/plain")
            .with_payload(b"Hello".to_vec()),
    )?;

    let fetched = handle.wait_timeout(WAIT)?;
    ensure!(fetched.data == b"Hello");
    ensure!(fetched.mime_type == "text/plain");
    ensure!(*redirects.lock().expect("redirect log") == ["USK@site/2", "USK@site/3"]);
    Ok(())
}

#[rstest]
fn listener_may_close_the_connection() -> Result<()> {
    let node = FakeNode::bind()?;
    let (client, connection, mut session) = connected_client(&node, "stop")?;
    let listeners = NoticeListeners::new().on_redirect({
        let connection = Arc::clone(&connection);
        move |_| connection.close()
    });

    let handle = client.get(GetRequest::new("USK@site/1"), listeners);
    let identifier = handle.identifier().to_owned();
    session.expect("ClientGet")?;
    session.send(&[
        "GetFailed",
        &format!("Identifier={identifier}"),
        "Code=27",
        "RedirectURI=USK@site/2",
        "EndMessage",
    ])?;

    ensure!(matches!(
        handle.wait_timeout(WAIT),
        Err(FcpError::ConnectionClosed { .. })
    ));
    ensure!(!connection.is_alive());
    ensure!(connection.registry().len() == 0);
    Ok(())
}

#[rstest]
fn disk_insert_completes_access_handshake() -> Result<()> {
    let node = FakeNode::bind()?;
    let (client, _connection, mut session) = connected_client(&node, "put")?;
    let upload = TempDir::new()?;
    let file = upload.path().join("data.txt");
    std::fs::write(&file, "Hello")?;
    let directory = upload.path().to_string_lossy().into_owned();
    let challenge = upload.path().join("challenge");
    std::fs::write(&challenge, "test-content\n")?;

    let keys = Arc::new(Mutex::new(Vec::new()));
    let listeners = NoticeListeners::new().on_key_generated({
        let keys = Arc::clone(&keys);
        move |uri| keys.lock().expect("key log").push(uri.to_owned())
    });
    let handle = client.put(PutRequest::new("KSK@test", PutSource::Disk(file.clone())), listeners);
    let identifier = handle.identifier().to_owned();

    let request = session.expect("ClientPut")?;
    ensure!(request.field("UploadFrom") == Some("disk"));
    let file_name = file.to_string_lossy().into_owned();
    ensure!(request.field("Filename") == Some(file_name.as_str()));
    session.send(&[
        "ProtocolError",
        &format!("Identifier={identifier}"),
        "Code=25",
        "EndMessage",
    ])?;

    let dda_request = session.expect("TestDDARequest")?;
    ensure!(dda_request.field("Directory") == Some(directory.as_str()));
    ensure!(dda_request.field("WantReadDirectory") == Some("true"));

    session.send(&[
        "TestDDAReply",
        "Directory=/somewhere/else",
        "ReadFilename=/somewhere/else/challenge",
        "EndMessage",
    ])?;
    session.send(&[
        "TestDDAReply",
        &format!("Directory={directory}"),
        &format!("ReadFilename={}", challenge.to_string_lossy()),
        "EndMessage",
    ])?;
    let answer = session.expect("TestDDAResponse")?;
    ensure!(answer.field("ReadContent") == Some("test-content"));

    session.send(&[
        "TestDDAComplete",
        "Directory=/somewhere/else",
        "ReadDirectoryAllowed=true",
        "EndMessage",
    ])?;
    session.send(&[
        "TestDDAComplete",
        &format!("Directory={directory}"),
        "ReadDirectoryAllowed=true",
        "EndMessage",
    ])?;
    let resent = session.expect("ClientPut")?;
    ensure!(resent.identifier() == Some(identifier.as_str()));

    session.send(&["URIGenerated", &format!("Identifier={identifier}"), "URI=KSK@test", "EndMessage"])?;
    session.send(&["PutSuccessful", &format!("Identifier={identifier}"), "URI=KSK@test", "EndMessage"])?;

    ensure!(handle.wait_timeout(WAIT)? == "KSK@test");
    ensure!(*keys.lock().expect("key log") == ["KSK@test"]);
    Ok(())
}

#[rstest]
fn subscription_fans_out_until_cancelled() -> Result<()> {
    let node = FakeNode::bind()?;
    let (client, connection, mut session) = connected_client(&node, "usk")?;

    let handle = client.subscribe_usk("USK@key/site/0");
    let request = session.expect("SubscribeUSK")?;
    let identifier = request.identifier().context("subscription identifier")?.to_owned();
    session.send(&["SubscribedUSK", &format!("Identifier={identifier}"), "EndMessage"])?;
    let subscription = handle.wait_timeout(WAIT)?;

    let (first_tx, first_rx) = mpsc::channel();
    let (second_tx, second_rx) = mpsc::channel();
    subscription.on_usk_update(move |update| {
        let _ = first_tx.send(update.edition);
    });
    subscription.on_usk_update(move |update| {
        let _ = second_tx.send(update.edition);
    });

    let update = |edition: u64| {
        vec![
            String::from("SubscribedUSKUpdate"),
            format!("Identifier={identifier}"),
            format!("URI=USK@key/site/{edition}"),
            format!("Edition={edition}"),
            String::from("EndMessage"),
        ]
    };
    for edition in [1, 2] {
        let lines = update(edition);
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        session.send(&lines)?;
    }
    for receiver in [&first_rx, &second_rx] {
        ensure!(receiver.recv_timeout(WAIT)? == 1);
        ensure!(receiver.recv_timeout(WAIT)? == 2);
    }

    subscription.cancel()?;
    let unsubscribe = session.expect("UnsubscribeUSK")?;
    ensure!(unsubscribe.identifier() == Some(identifier.as_str()));
    ensure!(!subscription.is_active());
    ensure!(!connection.registry().contains(&identifier));

    let sentinel = client.generate_ssk();
    let request = session.expect("GenerateSSK")?;
    let lines = update(3);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    session.send(&lines)?;
    session.reply(&keypair_reply(request.identifier().context("sentinel identifier")?))?;
    sentinel.wait_timeout(WAIT)?;

    ensure!(first_rx.recv_timeout(Duration::from_millis(50)).is_err());
    ensure!(second_rx.recv_timeout(Duration::from_millis(50)).is_err());
    Ok(())
}

#[rstest]
fn registered_subscription_activates_on_acknowledgement() -> Result<()> {
    let node = FakeNode::bind()?;
    let (_client, connection, mut session) = connected_client(&node, "reg")?;

    let handle = connection.open_subscription("sub-x", SubscriptionSpec::usk("sub-x"))?;
    connection.send(&subscribe_usk("USK@key/site/0", "sub-x"))?;
    let request = session.expect("SubscribeUSK")?;
    ensure!(request.identifier() == Some("sub-x"));
    session.send(&["SubscribedUSK", "Identifier=sub-x", "URI=USK@key/site/0", "EndMessage"])?;

    let subscription = handle.wait_timeout(WAIT)?;
    ensure!(subscription.identifier() == "sub-x");
    ensure!(subscription.is_active());

    let (updates_tx, updates_rx) = mpsc::channel();
    subscription.on_usk_update(move |update| {
        let _ = updates_tx.send(update.edition);
    });
    session.send(&[
        "SubscribedUSKUpdate",
        "Identifier=sub-x",
        "URI=USK@key/site/4",
        "Edition=4",
        "EndMessage",
    ])?;
    ensure!(updates_rx.recv_timeout(WAIT)? == 4);
    Ok(())
}
