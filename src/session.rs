//! Session controller: owns the accumulated packet list and the filtered
//! view, and serializes the three things that change them.
//!
//! ```text
//! capture pump ──append──┐
//! set_criteria ──────────┼──> [state mutex] all / visible / criteria ──> observer
//! translate ─snapshot──> assistant ──result─┘
//! ```
//!
//! Locks are always taken control → state. The state lock is never held
//! across an assistant request or an observer callback.

use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crate::capture::{CaptureError, CaptureEvent, Capturer};
use crate::filter;
use crate::packet::{FilterCriteria, Packet};
use crate::translate::{TranslateError, Translator};

/// How the filtered view changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    /// Rows before `from` are unchanged; rows from `from` on are new.
    Appended { from: usize },
    /// The whole view was recomputed or replaced.
    Replaced,
}

/// Receives view and status notifications. Called from the capture pump and
/// translator threads, never while the session lock is held.
pub trait SessionObserver: Send + Sync {
    fn view_changed(&self, change: ViewChange);
    fn status(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
}

/// Result of a successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateOutcome {
    /// The view was replaced by this many packets.
    Applied(usize),
    /// The translated filter kept nothing; the view was left as it was.
    NoMatch,
    /// A new capture started while the assistant was answering; the result
    /// was discarded.
    Stale,
}

struct State {
    all: Vec<Packet>,
    visible: Vec<Packet>,
    criteria: FilterCriteria,
    phase: Phase,
    /// Bumped on every start; pump threads and translator results carrying an
    /// older value are ignored.
    generation: u64,
    /// The view currently holds an assistant result rather than the
    /// structured criteria applied to `all`.
    narrowed: bool,
}

impl State {
    fn refilter(&mut self) {
        self.visible = filter::apply(&self.all, &self.criteria);
        self.narrowed = false;
    }

    fn showing(&self) -> String {
        if self.visible.len() == self.all.len() {
            format!("Showing {} packets", self.visible.len())
        } else {
            format!("Showing {} of {} packets", self.visible.len(), self.all.len())
        }
    }
}

struct Inner {
    control: Mutex<Capturer>,
    state: Mutex<State>,
    translator: Mutex<Option<Arc<Translator>>>,
    observer: Arc<dyn SessionObserver>,
}

/// Shared handle to one capture session. Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        capturer: Capturer,
        criteria: FilterCriteria,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Session {
            inner: Arc::new(Inner {
                control: Mutex::new(capturer),
                state: Mutex::new(State {
                    all: Vec::new(),
                    visible: Vec::new(),
                    criteria,
                    phase: Phase::Idle,
                    generation: 0,
                    narrowed: false,
                }),
                translator: Mutex::new(None),
                observer,
            }),
        }
    }

    pub fn interfaces(&self) -> Result<Vec<String>, CaptureError> {
        self.inner.control.lock().unwrap().interfaces()
    }

    /// Start capturing on `device` (empty for the default device).
    ///
    /// Clears both lists on success. Returns `Ok(false)` and changes nothing
    /// when a capture is already running.
    pub fn start(&self, device: &str) -> Result<bool, CaptureError> {
        let observer = &self.inner.observer;
        let mut control = self.inner.control.lock().unwrap();

        let events = match control.start(device) {
            Ok(Some(events)) => events,
            Ok(None) => return Ok(false),
            Err(e) => {
                drop(control);
                tracing::warn!(interface = %device, error = %e, "capture start failed");
                observer.status(&e.to_string());
                return Err(e);
            }
        };

        let generation = {
            let mut state = self.inner.state.lock().unwrap();
            state.all.clear();
            state.visible.clear();
            state.narrowed = false;
            state.generation += 1;
            state.phase = Phase::Capturing;
            state.generation
        };

        let inner = Arc::downgrade(&self.inner);
        let spawned = thread::Builder::new()
            .name("ws-session-pump".into())
            .spawn(move || pump(inner, events, generation));
        if let Err(e) = spawned {
            control.stop();
            drop(control);
            self.inner.state.lock().unwrap().phase = Phase::Idle;
            let err = CaptureError::Runtime(format!("failed to spawn pump: {}", e));
            observer.status(&err.to_string());
            return Err(err);
        }
        drop(control);

        let name = if device.is_empty() { "default device" } else { device };
        observer.view_changed(ViewChange::Replaced);
        observer.status(&format!("Capturing on {}…", name));
        Ok(true)
    }

    /// Stop the running capture, keeping the current view. Returns `false`
    /// when nothing was running, including a capture that already ended on
    /// its own.
    pub fn stop(&self) -> bool {
        let mut control = self.inner.control.lock().unwrap();
        control.stop();
        let stopped = {
            let mut state = self.inner.state.lock().unwrap();
            std::mem::replace(&mut state.phase, Phase::Idle) == Phase::Capturing
        };
        drop(control);

        if stopped {
            self.inner.observer.status("Stopped");
        }
        stopped
    }

    /// Replace the structured criteria and recompute the view from the full
    /// list.
    pub fn set_criteria(&self, criteria: FilterCriteria) {
        let status = {
            let mut state = self.inner.state.lock().unwrap();
            state.criteria = criteria;
            state.refilter();
            state.showing()
        };
        tracing::debug!(%status, "filter changed");
        self.inner.observer.view_changed(ViewChange::Replaced);
        self.inner.observer.status(&status);
    }

    pub fn clear_filters(&self) {
        self.set_criteria(FilterCriteria::default());
    }

    /// Install a translator, replacing any previous one (and its sticky
    /// init error).
    pub fn set_translator(&self, translator: Translator) {
        *self.inner.translator.lock().unwrap() = Some(Arc::new(translator));
        self.inner.observer.status("API key saved – ready!");
    }

    /// Narrow the current view with a natural-language question.
    ///
    /// Runs on the calling thread and blocks for the assistant round trip.
    /// Errors leave the view unchanged and are reported as status.
    pub fn translate(&self, prompt: &str) -> Result<TranslateOutcome, TranslateError> {
        let observer = &self.inner.observer;
        let translator = self.inner.translator.lock().unwrap().clone();
        let Some(translator) = translator else {
            let err = TranslateError::NotConfigured;
            observer.status(&err.to_string());
            return Err(err);
        };

        let (snapshot, generation) = {
            let state = self.inner.state.lock().unwrap();
            (state.visible.clone(), state.generation)
        };

        observer.status("Contacting assistant…");
        let narrowed = match translator.narrow(prompt, &snapshot) {
            Ok(narrowed) => narrowed,
            Err(e) => {
                tracing::warn!(error = %e, "translation failed");
                observer.status(&e.to_string());
                return Err(e);
            }
        };

        if narrowed.is_empty() {
            observer.status("No packets matched.");
            return Ok(TranslateOutcome::NoMatch);
        }

        let count = narrowed.len();
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.generation != generation {
                tracing::debug!(
                    asked = generation,
                    current = state.generation,
                    "discarding stale translator result"
                );
                return Ok(TranslateOutcome::Stale);
            }
            state.visible = narrowed;
            state.narrowed = true;
        }
        observer.view_changed(ViewChange::Replaced);
        observer.status(&format!("Filtered to {} packets.", count));
        Ok(TranslateOutcome::Applied(count))
    }

    /// Run [`Session::translate`] on a background thread.
    pub fn ask(
        &self,
        prompt: impl Into<String>,
    ) -> std::io::Result<JoinHandle<Result<TranslateOutcome, TranslateError>>> {
        let session = self.clone();
        let prompt = prompt.into();
        thread::Builder::new()
            .name("ws-translate".into())
            .spawn(move || session.translate(&prompt))
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().unwrap().phase
    }

    pub fn criteria(&self) -> FilterCriteria {
        self.inner.state.lock().unwrap().criteria.clone()
    }

    pub fn row_count(&self) -> usize {
        self.inner.state.lock().unwrap().visible.len()
    }

    pub fn row_at(&self, index: usize) -> Option<Packet> {
        self.inner.state.lock().unwrap().visible.get(index).cloned()
    }

    /// Snapshot of the filtered view.
    pub fn visible(&self) -> Vec<Packet> {
        self.inner.state.lock().unwrap().visible.clone()
    }

    /// Visible rows from `from` on.
    pub fn rows_from(&self, from: usize) -> Vec<Packet> {
        let state = self.inner.state.lock().unwrap();
        state.visible.get(from..).map(<[Packet]>::to_vec).unwrap_or_default()
    }

    /// Number of packets captured in the current session.
    pub fn total(&self) -> usize {
        self.inner.state.lock().unwrap().all.len()
    }

    pub fn detail(&self, index: usize) -> Option<String> {
        self.row_at(index).map(|p| p.detail().to_string())
    }
}

/// Move capture events into the session. Holds only a weak reference so a
/// dropped session does not keep its capture alive.
fn pump(inner: Weak<Inner>, events: Receiver<CaptureEvent>, generation: u64) {
    for event in events {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let observer = &inner.observer;
        match event {
            CaptureEvent::Packet(packet) => {
                let change = {
                    let mut state = inner.state.lock().unwrap();
                    if state.generation != generation || state.phase != Phase::Capturing {
                        tracing::trace!(generation, "dropping packet from stale capture");
                        continue;
                    }
                    let was_narrowed = state.narrowed;
                    let before = state.visible.len();
                    state.all.push(packet);
                    state.refilter();
                    if was_narrowed {
                        ViewChange::Replaced
                    } else {
                        ViewChange::Appended { from: before }
                    }
                };
                observer.view_changed(change);
            }
            CaptureEvent::Failed(e) => {
                if end_capture(&inner, generation) {
                    observer.status(&e.to_string());
                }
            }
            CaptureEvent::Finished => {
                if end_capture(&inner, generation) {
                    observer.status("Capture finished");
                }
            }
        }
    }
    tracing::debug!(generation, "session pump exited");
}

fn end_capture(inner: &Inner, generation: u64) -> bool {
    let mut state = inner.state.lock().unwrap();
    if state.generation != generation || state.phase != Phase::Capturing {
        return false;
    }
    state.phase = Phase::Idle;
    true
}
