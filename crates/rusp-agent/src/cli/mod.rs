// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local CLI over a Unix domain stream socket.
//!
//! The daemon runs a small accept loop that forwards one command line
//! per connection to the DM thread and relays the reply. The client
//! side connects, sends its command, prints the reply body and exits 0
//! on success, non-zero on transport or handler failure.
//!
//! Commands: `ver`, `get <expr>`, `set <path> <value>`, `add <obj>`,
//! `del <obj>`, `instances <obj>`, `dbget <path>`, `dbset <path>
//! <value>`, `dbdel <path>`, `dump`, `stop`.

use crossbeam::channel::{bounded, Sender};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread::JoinHandle;
use std::time::Duration;

/// Reply terminator for successful commands.
const OK_MARKER: &str = "OK";
/// Reply terminator prefix for failed commands.
const ERR_MARKER: &str = "ERR:";

/// How long a CLI connection waits for the DM thread.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// One command forwarded to the DM thread.
pub struct CliRequest {
    pub line: String,
    pub reply: Sender<CliResponse>,
}

/// The DM thread's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliResponse {
    pub body: String,
    pub ok: bool,
    /// The command asked the daemon to stop.
    pub stop: bool,
}

impl CliResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ok: true,
            stop: false,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            body: message.into(),
            ok: false,
            stop: false,
        }
    }
}

/// Spawn the accept loop. Stops when the listener socket is removed
/// and a final connection shakes it loose, or when the process exits.
pub fn spawn_server(socket_path: &str, requests: Sender<CliRequest>) -> std::io::Result<JoinHandle<()>> {
    // A stale socket file from a previous run would fail the bind.
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    log::info!("[CLI] listening on {}", socket_path);

    let path = socket_path.to_string();
    Ok(std::thread::Builder::new()
        .name("usp-cli".into())
        .spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("[CLI] accept failed: {}", e);
                        continue;
                    }
                };
                if !serve_connection(stream, &requests) {
                    break;
                }
            }
            let _ = std::fs::remove_file(&path);
            log::info!("[CLI] server stopped");
        })?)
}

/// Handle one connection. Returns false when the daemon should stop
/// accepting (a `stop` command went through).
fn serve_connection(stream: UnixStream, requests: &Sender<CliRequest>) -> bool {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("[CLI] failed to clone stream: {}", e);
            return true;
        }
    });
    let mut stream = stream;

    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return true;
    }
    let line = line.trim().to_string();
    if line.is_empty() {
        return true;
    }

    let (reply_tx, reply_rx) = bounded(1);
    if requests
        .send(CliRequest {
            line,
            reply: reply_tx,
        })
        .is_err()
    {
        let _ = writeln!(stream, "{ERR_MARKER} agent is shutting down");
        return false;
    }

    let response = match reply_rx.recv_timeout(REPLY_TIMEOUT) {
        Ok(r) => r,
        Err(_) => CliResponse::err("timed out waiting for the agent"),
    };

    if !response.body.is_empty() {
        let _ = write!(stream, "{}", response.body);
        if !response.body.ends_with('\n') {
            let _ = writeln!(stream);
        }
    }
    if response.ok {
        let _ = writeln!(stream, "{OK_MARKER}");
    } else {
        let _ = writeln!(stream, "{ERR_MARKER} {}", response.body.lines().next().unwrap_or(""));
    }
    !response.stop
}

/// Run one command against a running daemon. Returns the process exit
/// code: 0 on success, 1 on handler failure, 2 on transport failure.
pub fn run_client(socket_path: &str, command: &str) -> i32 {
    let mut stream = match UnixStream::connect(socket_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot connect to agent at {socket_path}: {e}");
            return 2;
        }
    };
    if writeln!(stream, "{command}").is_err() {
        eprintln!("failed to send command");
        return 2;
    }

    let reader = BufReader::new(stream);
    let mut code = 2; // no terminator seen
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line == OK_MARKER {
            code = 0;
            break;
        }
        if let Some(msg) = line.strip_prefix(ERR_MARKER) {
            eprintln!("error:{msg}");
            code = 1;
            break;
        }
        println!("{line}");
    }
    code
}
