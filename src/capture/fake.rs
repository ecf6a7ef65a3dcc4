//! Scripted capture backend for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::{CaptureBackend, CaptureError, CaptureSource, NextPacket, OpenOptions};
use crate::packet::Packet;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Packet(Packet),
    Timeout,
    Fail(&'static str),
    Exhausted,
}

/// Plays `steps` on every open, then idles (returns `Timeout` after a short
/// sleep) until stopped.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
    pub steps: Vec<Step>,
    pub fail_open: Option<&'static str>,
    /// Packets queued at runtime, delivered before idling.
    pub feed: Arc<Mutex<VecDeque<Packet>>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn with_packets(packets: Vec<Packet>) -> Self {
        ScriptedBackend {
            steps: packets.into_iter().map(Step::Packet).collect(),
            ..ScriptedBackend::default()
        }
    }

    pub fn push(&self, packet: Packet) {
        self.feed.lock().unwrap().push_back(packet);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for ScriptedBackend {
    fn list_interfaces(&self) -> Result<Vec<String>, CaptureError> {
        Ok(vec!["fake0".into(), "lo".into()])
    }

    fn open(
        &self,
        device: &str,
        options: &OpenOptions,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        if let Some(reason) = self.fail_open {
            return Err(CaptureError::Open {
                device: device.to_string(),
                reason: reason.to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            steps: self.steps.clone().into(),
            feed: self.feed.clone(),
            poll: Duration::from_millis(options.timeout_ms.max(1) as u64),
            closes: self.closes.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSource {
    steps: VecDeque<Step>,
    feed: Arc<Mutex<VecDeque<Packet>>>,
    poll: Duration,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl CaptureSource for ScriptedSource {
    fn next_packet(&mut self) -> Result<NextPacket, CaptureError> {
        assert!(!self.closed, "poll after close");
        match self.steps.pop_front() {
            Some(Step::Packet(p)) => Ok(NextPacket::Packet(p)),
            Some(Step::Timeout) => Ok(NextPacket::Timeout),
            Some(Step::Fail(msg)) => Err(CaptureError::Runtime(msg.to_string())),
            Some(Step::Exhausted) => Ok(NextPacket::Exhausted),
            None => {
                if let Some(p) = self.feed.lock().unwrap().pop_front() {
                    return Ok(NextPacket::Packet(p));
                }
                thread::sleep(self.poll);
                Ok(NextPacket::Timeout)
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
