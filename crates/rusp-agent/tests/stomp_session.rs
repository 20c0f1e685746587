// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MTP-thread integration against a minimal in-process STOMP broker:
//! real sockets, the real poll loop, the full
//! STOMP/CONNECTED/SUBSCRIBE/RECEIPT handshake, then records in both
//! directions.

use crossbeam::channel::bounded;
use rusp_agent::mtp::runtime::{
    InboundUspRecord, MtpCommand, MtpRuntime, OutboundMtp, OutboundUspRecord,
};
use rusp_agent::mtp::stomp::StompConnParams;
use rusp_agent::mtp::StatusBoard;
use rusp_agent::retry::RetryPolicy;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Read one NUL-terminated STOMP frame as text.
fn read_frame(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(1) if byte[0] == 0 => break,
            Ok(1) => buf.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn write_frame(stream: &mut TcpStream, text: &str) {
    stream.write_all(text.as_bytes()).unwrap();
    stream.write_all(&[0]).unwrap();
}

#[test]
fn stomp_handshake_and_record_exchange() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (cmd_tx, cmd_rx) = bounded(64);
    let (in_tx, in_rx) = bounded::<InboundUspRecord>(64);
    let board = Arc::new(StatusBoard::new());
    let mut runtime = MtpRuntime::new(cmd_rx, in_tx, Arc::clone(&board)).unwrap();
    let waker = runtime.waker();
    let runtime_thread = std::thread::spawn(move || runtime.run());

    cmd_tx
        .send(MtpCommand::ConfigureStomp(StompConnParams {
            instance: 1,
            enable: true,
            host: "127.0.0.1".into(),
            port,
            agent_queue: "/agent/q".into(),
            retry: RetryPolicy::new(1, 2000, 4),
            ..Default::default()
        }))
        .unwrap();
    waker.wake().unwrap();

    // Broker side of the handshake.
    let (mut broker, _) = listener.accept().unwrap();
    broker
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let stomp = read_frame(&mut broker);
    assert!(stomp.starts_with("STOMP\n"), "got: {stomp}");
    assert!(stomp.contains("accept-version:1.2"));
    write_frame(&mut broker, "CONNECTED\nversion:1.2\nsession:sess-9\n\n");

    let subscribe = read_frame(&mut broker);
    assert!(subscribe.starts_with("SUBSCRIBE\n"), "got: {subscribe}");
    assert!(subscribe.contains("destination:/agent/q"));
    let receipt_id = subscribe
        .lines()
        .find_map(|l| l.strip_prefix("receipt:"))
        .expect("SUBSCRIBE requests a receipt")
        .to_string();
    write_frame(&mut broker, &format!("RECEIPT\nreceipt-id:{receipt_id}\n\n"));

    // Inbound: broker delivers a record to the agent queue.
    let payload = b"\x0a\x03\x31\x2e\x30"; // any bytes; transport is payload-agnostic
    let mut message = format!(
        "MESSAGE\ndestination:/agent/q\ncontent-type:application/vnd.bbf.usp.msg\nreply-to-dest:/ctrl/q\ncontent-length:{}\n\n",
        payload.len()
    )
    .into_bytes();
    message.extend_from_slice(payload);
    message.push(0);
    broker.write_all(&message).unwrap();

    let inbound = in_rx.recv_timeout(Duration::from_secs(5)).expect("inbound record");
    assert_eq!(inbound.payload, payload);
    assert_eq!(inbound.stomp_conn_instance, Some(1));
    assert_eq!(inbound.reply_to.as_deref(), Some("/ctrl/q"));

    // Outbound: the agent sends a record to the controller queue.
    cmd_tx
        .send(MtpCommand::Send(OutboundUspRecord {
            payload: vec![1, 2, 3, 4],
            mtp: OutboundMtp::Stomp {
                conn_instance: 1,
                controller_queue: "/ctrl/q".into(),
                agent_queue: "/agent/q".into(),
            },
        }))
        .unwrap();
    waker.wake().unwrap();

    let send = read_frame(&mut broker);
    assert!(send.starts_with("SEND\n"), "got: {send}");
    assert!(send.contains("destination:/ctrl/q"));
    assert!(send.contains("content-type:application/vnd.bbf.usp.msg"));
    assert!(send.contains("content-length:4"));
    let send_receipt = send
        .lines()
        .find_map(|l| l.strip_prefix("receipt:"))
        .expect("SEND requests a receipt")
        .to_string();
    write_frame(&mut broker, &format!("RECEIPT\nreceipt-id:{send_receipt}\n\n"));

    // The connection reports Enabled on the status board.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, _) = board.stomp_status(1);
        if status == rusp_agent::mtp::StompConnStatus::Enabled {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "never reached Enabled");
        std::thread::sleep(Duration::from_millis(20));
    }

    cmd_tx.send(MtpCommand::Shutdown { hard: true }).unwrap();
    waker.wake().unwrap();
    runtime_thread.join().unwrap();
}

#[test]
fn disconnect_is_sent_on_graceful_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (cmd_tx, cmd_rx) = bounded(64);
    let (in_tx, _in_rx) = bounded::<InboundUspRecord>(64);
    let board = Arc::new(StatusBoard::new());
    let mut runtime = MtpRuntime::new(cmd_rx, in_tx, Arc::clone(&board)).unwrap();
    let waker = runtime.waker();
    let runtime_thread = std::thread::spawn(move || runtime.run());

    cmd_tx
        .send(MtpCommand::ConfigureStomp(StompConnParams {
            instance: 1,
            enable: true,
            host: "127.0.0.1".into(),
            port,
            agent_queue: "/agent/q".into(),
            retry: RetryPolicy::new(1, 2000, 4),
            ..Default::default()
        }))
        .unwrap();
    waker.wake().unwrap();

    let (mut broker, _) = listener.accept().unwrap();
    broker
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let _stomp = read_frame(&mut broker);
    write_frame(&mut broker, "CONNECTED\nversion:1.2\n\n");
    let subscribe = read_frame(&mut broker);
    let receipt_id = subscribe
        .lines()
        .find_map(|l| l.strip_prefix("receipt:"))
        .unwrap()
        .to_string();
    write_frame(&mut broker, &format!("RECEIPT\nreceipt-id:{receipt_id}\n\n"));

    // Wait for the session to reach Running before asking for the
    // goodbye; the DISCONNECT is only owed on a live session.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if board.stomp_status(1).0 == rusp_agent::mtp::StompConnStatus::Enabled {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "never reached Enabled");
        std::thread::sleep(Duration::from_millis(20));
    }

    cmd_tx.send(MtpCommand::Shutdown { hard: false }).unwrap();
    waker.wake().unwrap();

    // The goodbye lands before the socket closes.
    let disconnect = read_frame(&mut broker);
    assert!(
        disconnect.starts_with("DISCONNECT"),
        "expected DISCONNECT, got: {disconnect}"
    );
    runtime_thread.join().unwrap();
}
