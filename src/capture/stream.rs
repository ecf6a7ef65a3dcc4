//! Producer thread that pulls packets from an open [`CaptureSource`] and
//! streams them, in arrival order, over a bounded channel.
//!
//! ```text
//! native source --next_packet()--> producer thread --[crossbeam]--> session pump
//! ```
//!
//! The producer closes the source before it drops its sender, so a
//! disconnected channel always means the native handle has been released.

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CaptureBackend, CaptureError, CaptureSource, NextPacket, OpenOptions};
use crate::packet::Packet;

/// Items delivered by a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Packet(Packet),
    /// The source failed; it has already been closed. Always the last event.
    Failed(CaptureError),
    /// The source ran out of packets (capture file); already closed.
    Finished,
}

/// Handle to one running producer.
pub struct CaptureStream {
    device: String,
    stop: Arc<AtomicBool>,
    /// Set by the producer once the source is released, before the final
    /// event is delivered.
    ended: Arc<AtomicBool>,
    events: Receiver<CaptureEvent>,
    producer: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Open `device` and spawn its producer. Open failures are returned
    /// immediately and no thread is started.
    pub fn start(
        backend: &dyn CaptureBackend,
        device: &str,
        options: &OpenOptions,
    ) -> Result<Self, CaptureError> {
        let source = backend.open(device, options)?;

        let (tx, rx) = bounded::<CaptureEvent>(options.channel_capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        let producer = Producer {
            source,
            tx,
            stop: stop.clone(),
            ended: ended.clone(),
            poll: Duration::from_millis(options.timeout_ms.max(1) as u64),
        };

        let handle = thread::Builder::new()
            .name(format!("ws-capture-{}", device))
            .spawn(move || producer.run())
            .map_err(|e| CaptureError::Runtime(format!("failed to spawn producer: {}", e)))?;

        tracing::debug!(interface = %device, "capture producer started");

        Ok(CaptureStream {
            device: device.to_string(),
            stop,
            ended,
            events: rx,
            producer: Some(handle),
        })
    }

    /// Receiving end of the stream. The channel disconnects once the
    /// producer has closed the source and exited.
    pub fn events(&self) -> Receiver<CaptureEvent> {
        self.events.clone()
    }

    /// True until the stream is stopped or its source has ended. Turns
    /// false before a `Failed` or `Finished` event becomes visible.
    pub fn is_running(&self) -> bool {
        self.producer.is_some() && !self.ended.load(Ordering::Acquire)
    }

    /// Signal the producer and wait for it to release the source. Returns
    /// within roughly one poll interval. Calling it again is a no-op.
    pub fn stop(&mut self) {
        let Some(handle) = self.producer.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        if handle.join().is_err() {
            tracing::error!(interface = %self.device, "capture producer panicked");
        }
        tracing::info!(interface = %self.device, "capture stopped");
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Producer {
    source: Box<dyn CaptureSource>,
    tx: Sender<CaptureEvent>,
    stop: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    poll: Duration,
}

impl Producer {
    fn run(mut self) {
        let mut delivered: u64 = 0;

        let last = loop {
            if self.stop.load(Ordering::Acquire) {
                break None;
            }
            match self.source.next_packet() {
                Ok(NextPacket::Packet(packet)) => {
                    if !self.deliver(CaptureEvent::Packet(packet)) {
                        break None;
                    }
                    delivered += 1;
                }
                Ok(NextPacket::Timeout) => {}
                Ok(NextPacket::Exhausted) => break Some(CaptureEvent::Finished),
                Err(e) => {
                    tracing::error!(error = %e, "capture error");
                    break Some(CaptureEvent::Failed(e));
                }
            }
        };

        self.source.close();
        self.ended.store(true, Ordering::Release);
        tracing::debug!(delivered, "capture source released");

        if let Some(event) = last {
            self.deliver(event);
        }
    }

    /// Send one event, re-checking the stop flag every poll interval so a
    /// full channel cannot block shutdown.
    fn deliver(&self, mut event: CaptureEvent) -> bool {
        loop {
            match self.tx.send_timeout(event, self.poll) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(ev)) => {
                    if self.stop.load(Ordering::Acquire) {
                        return false;
                    }
                    event = ev;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Owns at most one running [`CaptureStream`].
pub struct Capturer {
    backend: Arc<dyn CaptureBackend>,
    options: OpenOptions,
    active: Option<CaptureStream>,
}

impl Capturer {
    pub fn new(backend: Arc<dyn CaptureBackend>, options: OpenOptions) -> Self {
        Capturer {
            backend,
            options,
            active: None,
        }
    }

    pub fn interfaces(&self) -> Result<Vec<String>, CaptureError> {
        self.backend.list_interfaces()
    }

    /// Start capturing on `device`.
    ///
    /// Returns `Ok(None)` without touching the running stream if one is
    /// already active. A stream that ended on its own (error or end of file)
    /// is reaped and replaced.
    pub fn start(&mut self, device: &str) -> Result<Option<Receiver<CaptureEvent>>, CaptureError> {
        if self.is_running() {
            tracing::debug!(interface = %device, "capture already running");
            return Ok(None);
        }
        if let Some(mut finished) = self.active.take() {
            finished.stop();
        }
        let stream = CaptureStream::start(self.backend.as_ref(), device, &self.options)?;
        let events = stream.events();
        self.active = Some(stream);
        Ok(Some(events))
    }

    /// Stop the active stream. Returns `false` if there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(mut stream) => {
                stream.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().map_or(false, CaptureStream::is_running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::{wait_until, ScriptedBackend, Step};

    fn options() -> OpenOptions {
        OpenOptions {
            timeout_ms: 5,
            channel_capacity: 4,
            ..OpenOptions::default()
        }
    }

    fn pkt(n: usize) -> Packet {
        Packet::new(format!("UDP pkt {}", n), "")
    }

    #[test]
    fn delivers_packets_in_order_across_timeouts() {
        let backend = ScriptedBackend {
            steps: vec![
                Step::Packet(pkt(1)),
                Step::Timeout,
                Step::Packet(pkt(2)),
                Step::Timeout,
                Step::Timeout,
                Step::Packet(pkt(3)),
            ],
            ..ScriptedBackend::default()
        };
        let mut stream = CaptureStream::start(&backend, "fake0", &options()).unwrap();
        let rx = stream.events();
        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            got,
            vec![
                CaptureEvent::Packet(pkt(1)),
                CaptureEvent::Packet(pkt(2)),
                CaptureEvent::Packet(pkt(3)),
            ]
        );
        assert!(stream.is_running(), "timeouts must not end the stream");
        stream.stop();
        assert!(!stream.is_running());
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn open_failure_starts_nothing() {
        let backend = ScriptedBackend {
            fail_open: Some("permission denied"),
            ..ScriptedBackend::default()
        };
        let err = CaptureStream::start(&backend, "eth9", &options())
            .err()
            .expect("open must fail");
        assert_eq!(
            err,
            CaptureError::Open {
                device: "eth9".into(),
                reason: "permission denied".into()
            }
        );
        assert_eq!(backend.opens(), 0);
    }

    #[test]
    fn stop_twice_releases_once() {
        let backend = ScriptedBackend::default();
        let mut stream = CaptureStream::start(&backend, "fake0", &options()).unwrap();
        stream.stop();
        stream.stop();
        drop(stream);
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn source_closed_before_channel_disconnects() {
        let backend = ScriptedBackend::default();
        let mut stream = CaptureStream::start(&backend, "fake0", &options()).unwrap();
        let rx = stream.events();
        stream.stop();
        assert!(rx.recv().is_err());
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn stop_does_not_hang_on_full_channel() {
        let backend = ScriptedBackend::with_packets((0..64).map(pkt).collect());
        let mut stream = CaptureStream::start(&backend, "fake0", &options()).unwrap();
        let rx = stream.events();
        assert!(wait_until(Duration::from_secs(2), || rx.is_full()));
        stream.stop();
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn runtime_error_is_last_event_and_closes_source() {
        let backend = ScriptedBackend {
            steps: vec![Step::Packet(pkt(1)), Step::Fail("device went away")],
            ..ScriptedBackend::default()
        };
        let stream = CaptureStream::start(&backend, "fake0", &options()).unwrap();
        let events: Vec<_> = stream.events().iter().collect();
        assert_eq!(
            events,
            vec![
                CaptureEvent::Packet(pkt(1)),
                CaptureEvent::Failed(CaptureError::Runtime("device went away".into())),
            ]
        );
        assert_eq!(backend.closes(), 1);
        assert!(wait_until(Duration::from_secs(1), || !stream.is_running()));
    }

    #[test]
    fn exhausted_source_finishes() {
        let backend = ScriptedBackend {
            steps: vec![Step::Packet(pkt(1)), Step::Exhausted],
            ..ScriptedBackend::default()
        };
        let stream = CaptureStream::start(&backend, "trace.pcap", &options()).unwrap();
        let events: Vec<_> = stream.events().iter().collect();
        assert_eq!(events, vec![CaptureEvent::Packet(pkt(1)), CaptureEvent::Finished]);
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn capturer_second_start_is_noop() {
        let backend = ScriptedBackend::default();
        let mut capturer = Capturer::new(Arc::new(backend.clone()), options());
        assert!(capturer.start("fake0").unwrap().is_some());
        assert!(capturer.start("fake0").unwrap().is_none());
        assert_eq!(backend.opens(), 1);

        assert!(capturer.stop());
        assert!(!capturer.stop());
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn capturer_restarts_after_stream_ended() {
        let backend = ScriptedBackend {
            steps: vec![Step::Fail("boom")],
            ..ScriptedBackend::default()
        };
        let mut capturer = Capturer::new(Arc::new(backend.clone()), options());
        let rx = capturer.start("fake0").unwrap().unwrap();
        assert!(rx.iter().last().is_some());
        assert!(wait_until(Duration::from_secs(1), || !capturer.is_running()));
        assert!(capturer.start("fake0").unwrap().is_some());
        assert_eq!(backend.opens(), 2);
    }

    #[test]
    fn final_event_is_seen_after_stream_ends() {
        let backend = ScriptedBackend {
            steps: vec![Step::Packet(pkt(1)), Step::Exhausted],
            ..ScriptedBackend::default()
        };
        let mut capturer = Capturer::new(Arc::new(backend.clone()), options());
        for round in 1..=50 {
            let rx = capturer.start("trace.pcap").unwrap().expect("idle capturer must start");
            assert_eq!(rx.recv().unwrap(), CaptureEvent::Packet(pkt(1)));
            assert_eq!(rx.recv().unwrap(), CaptureEvent::Finished);
            // no waiting: the producer thread may still be alive here
            assert!(!capturer.is_running());
            assert_eq!(backend.opens(), round);
        }
    }
}
