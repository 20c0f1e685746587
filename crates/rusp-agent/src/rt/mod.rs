// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Readiness-driven event loop plumbing for the MTP thread.
//!
//! Wraps a `mio::Poll` with a cross-thread waker and a timer heap.
//! One iteration waits for the earliest of: socket readiness, the next
//! timer deadline, or a wake from another thread (command enqueued).
//! Handlers never block beyond a single syscall.

pub mod timer;

pub use timer::TimerHeap;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token reserved for the cross-thread waker.
pub const WAKE_TOKEN: Token = Token(0);

/// First token handed out to transport sockets.
pub const FIRST_SOCKET_TOKEN: usize = 1;

/// Readiness of one socket after a poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// The MTP thread's poll loop core.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    next_token: usize,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(64),
            waker,
            next_token: FIRST_SOCKET_TOKEN,
        })
    }

    /// Handle other threads use to interrupt a blocked poll.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Allocate a token for a new socket.
    pub fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn register(
        &mut self,
        source: &mut impl Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    pub fn reregister(
        &mut self,
        source: &mut impl Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn deregister(&mut self, source: &mut impl Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Wait until I/O readiness, `deadline`, or a wake. Returns the
    /// ready sockets (the wake token is filtered out) and whether a wake
    /// occurred.
    pub fn wait(&mut self, deadline: Option<Instant>) -> io::Result<(Vec<Readiness>, bool)> {
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok((Vec::new(), false));
            }
            Err(e) => return Err(e),
        }

        let mut ready = Vec::new();
        let mut woken = false;
        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                woken = true;
                continue;
            }
            ready.push(Readiness {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable() || event.is_write_closed(),
            });
        }
        Ok((ready, woken))
    }
}

/// Clamp a poll deadline so a missing timer never blocks shutdown
/// indefinitely.
pub fn bounded_deadline(next_timer: Option<Instant>, max_wait: Duration) -> Instant {
    let cap = Instant::now() + max_wait;
    match next_timer {
        Some(t) if t < cap => t,
        _ => cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wake_interrupts_a_blocked_poll() {
        let mut el = EventLoop::new().unwrap();
        let waker = el.waker();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake().unwrap();
        });

        let start = Instant::now();
        let (ready, woken) = el
            .wait(Some(Instant::now() + Duration::from_secs(5)))
            .unwrap();
        assert!(woken);
        assert!(ready.is_empty());
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn deadline_expires_without_events() {
        let mut el = EventLoop::new().unwrap();
        let start = Instant::now();
        let (ready, woken) = el
            .wait(Some(Instant::now() + Duration::from_millis(30)))
            .unwrap();
        assert!(!woken);
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn tokens_are_unique() {
        let mut el = EventLoop::new().unwrap();
        let a = el.allocate_token();
        let b = el.allocate_token();
        assert_ne!(a, b);
        assert_ne!(a, WAKE_TOKEN);
    }

    #[test]
    fn bounded_deadline_prefers_earlier_timer() {
        let soon = Instant::now() + Duration::from_millis(10);
        let capped = bounded_deadline(Some(soon), Duration::from_secs(60));
        assert_eq!(capped, soon);

        let far = Instant::now() + Duration::from_secs(600);
        let capped = bounded_deadline(Some(far), Duration::from_secs(60));
        assert!(capped < far);
    }
}
