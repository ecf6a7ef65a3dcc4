//! Line-oriented console front end.
//!
//! Session notifications arrive from capture and translator threads; the
//! [`ChannelObserver`] forwards them over a channel so that all printing
//! happens on the console thread, interleaved with commands read from stdin.

use crossbeam_channel::{never, select, unbounded, Receiver, Sender};
use std::io::{self, BufRead, Write};
use std::thread;

use crate::config::AssistantConfig;
use crate::packet::Packet;
use crate::session::{Phase, Session, SessionObserver, ViewChange};
use crate::translate::GeminiAssistant;

const HELP: &str = "\
commands:
  start [iface]          start capturing (default interface if omitted)
  stop                   stop capturing, keep the current view
  filter field=value ... set structured filters (protocol, src_ip, dst_ip,
                         src_port, dst_port, free_text, limit); empty value clears
  clear                  clear all structured filters
  ask <question>         narrow the visible packets with the assistant
  key <api-key>          set the assistant API key
  show [n]               print the last n visible rows
  detail <row>           print the detail view of a row
  ifaces                 list capture interfaces
  help                   show this help
  quit                   exit";

/// Notification forwarded to the console thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    View(ViewChange),
    Status(String),
}

/// Observer that queues notifications for the console thread.
pub struct ChannelObserver {
    tx: Sender<Event>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<Event>) {
        let (tx, rx) = unbounded();
        (ChannelObserver { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn view_changed(&self, change: ViewChange) {
        let _ = self.tx.send(Event::View(change));
    }

    fn status(&self, message: &str) {
        tracing::debug!(status = %message, "session status");
        let _ = self.tx.send(Event::Status(message.to_string()));
    }
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(Option<String>),
    Stop,
    Filter(Vec<(String, String)>),
    Clear,
    Ask(String),
    Key(String),
    Show(Option<usize>),
    Detail(usize),
    Interfaces,
    Help,
    Quit,
    Empty,
}

/// Parse one input line. Errors are short usage messages.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "" => Command::Empty,
        "start" => Command::Start((!rest.is_empty()).then(|| rest.to_string())),
        "stop" => Command::Stop,
        "filter" | "f" => Command::Filter(parse_assignments(rest)?),
        "clear" => Command::Clear,
        "ask" | "?" => {
            if rest.is_empty() {
                return Err("usage: ask <question>".into());
            }
            Command::Ask(rest.to_string())
        }
        "key" => {
            if rest.is_empty() {
                return Err("usage: key <api-key>".into());
            }
            Command::Key(rest.to_string())
        }
        "show" | "ls" => {
            if rest.is_empty() {
                Command::Show(None)
            } else {
                let n = rest.parse().map_err(|_| "usage: show [n]".to_string())?;
                Command::Show(Some(n))
            }
        }
        "detail" | "d" => {
            let row = rest.parse().map_err(|_| "usage: detail <row>".to_string())?;
            Command::Detail(row)
        }
        "ifaces" => Command::Interfaces,
        "help" | "h" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(command)
}

/// `field=value` pairs. Words without `=` continue the previous value, so
/// `free_text=dns query` keeps the space.
fn parse_assignments(text: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for word in text.split_whitespace() {
        match word.split_once('=') {
            Some((field, value)) => pairs.push((field.to_string(), value.to_string())),
            None => match pairs.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(word);
                }
                None => return Err("usage: filter field=value ...".into()),
            },
        }
    }
    if pairs.is_empty() {
        return Err("usage: filter field=value ...".into());
    }
    Ok(pairs)
}

/// Read stdin lines on a background thread. The channel disconnects at EOF.
pub fn spawn_stdin_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("ws-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

/// Console state bound to one session.
pub struct Console<W: Write> {
    session: Session,
    assistant: AssistantConfig,
    default_device: String,
    max_rows: usize,
    /// Rows of the current view already printed.
    printed: usize,
    out: W,
}

impl<W: Write> Console<W> {
    pub fn new(
        session: Session,
        assistant: AssistantConfig,
        default_device: impl Into<String>,
        max_rows: usize,
        out: W,
    ) -> Self {
        Console {
            session,
            assistant,
            default_device: default_device.into(),
            max_rows: max_rows.max(1),
            printed: 0,
            out,
        }
    }

    /// Run until `quit`, a shutdown signal, or end of input once no capture
    /// is running.
    pub fn run(
        &mut self,
        events: Receiver<Event>,
        lines: Receiver<String>,
        shutdown: Receiver<()>,
    ) -> io::Result<()> {
        let closed = never();
        let mut input_closed = false;
        loop {
            let input = if input_closed { &closed } else { &lines };
            select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        self.on_event(event)?;
                        if input_closed && self.session.phase() == Phase::Idle {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(input) -> line => match line {
                    Ok(line) => {
                        if !self.execute(&line)? {
                            break;
                        }
                    }
                    Err(_) => {
                        if self.session.phase() == Phase::Idle {
                            break;
                        }
                        input_closed = true;
                    }
                },
                recv(shutdown) -> _ => break,
            }
        }
        self.out.flush()
    }

    pub fn on_event(&mut self, event: Event) -> io::Result<()> {
        match event {
            Event::Status(message) => writeln!(self.out, "-- {}", message)?,
            Event::View(ViewChange::Appended { .. }) => {
                let rows = self.session.rows_from(self.printed);
                for (offset, packet) in rows.iter().enumerate() {
                    self.print_row(self.printed + offset, packet)?;
                }
                self.printed += rows.len();
            }
            Event::View(ViewChange::Replaced) => self.redraw(self.max_rows)?,
        }
        self.out.flush()
    }

    /// Execute one command line. Returns `false` when the console should exit.
    pub fn execute(&mut self, line: &str) -> io::Result<bool> {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(usage) => {
                writeln!(self.out, "-- {}", usage)?;
                return Ok(true);
            }
        };

        match command {
            Command::Empty => {}
            Command::Start(device) => {
                let device = device.unwrap_or_else(|| self.default_device.clone());
                if let Ok(false) = self.session.start(&device) {
                    writeln!(self.out, "-- already capturing")?;
                }
            }
            Command::Stop => {
                if !self.session.stop() {
                    writeln!(self.out, "-- not capturing")?;
                }
            }
            Command::Filter(pairs) => {
                let mut criteria = self.session.criteria();
                for (field, value) in &pairs {
                    if !criteria.set_field(field, value) {
                        writeln!(self.out, "-- invalid filter '{}={}'", field, value)?;
                        return Ok(true);
                    }
                }
                self.session.set_criteria(criteria);
            }
            Command::Clear => self.session.clear_filters(),
            Command::Ask(question) => {
                if let Err(e) = self.session.ask(question) {
                    writeln!(self.out, "-- cannot start assistant request: {}", e)?;
                }
            }
            Command::Key(key) => {
                let config = AssistantConfig {
                    api_key: Some(key),
                    ..self.assistant.clone()
                };
                self.assistant = config.clone();
                self.session.set_translator(GeminiAssistant::translator(config));
            }
            Command::Show(n) => {
                writeln!(self.out, "-- filter: {}", self.session.criteria())?;
                self.redraw(n.unwrap_or(self.max_rows))?;
            }
            Command::Detail(row) => match self.session.row_at(row) {
                Some(packet) => {
                    writeln!(self.out, "{}", "=".repeat(80))?;
                    self.print_row(row, &packet)?;
                    writeln!(self.out, "{}", "-".repeat(80))?;
                    writeln!(self.out, "{}", packet.detail().trim_end())?;
                }
                None => writeln!(self.out, "-- no row {}", row)?,
            },
            Command::Interfaces => match self.session.interfaces() {
                Ok(names) if names.is_empty() => {
                    writeln!(self.out, "  (no interfaces found; try running with sudo)")?
                }
                Ok(names) => {
                    for name in names {
                        writeln!(self.out, "  {}", name)?;
                    }
                }
                Err(e) => writeln!(self.out, "-- {}", e)?,
            },
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Quit => return Ok(false),
        }
        self.out.flush()?;
        Ok(true)
    }

    /// Reprint the tail of the current view.
    fn redraw(&mut self, limit: usize) -> io::Result<()> {
        let rows = self.session.visible();
        let skip = rows.len().saturating_sub(limit);
        writeln!(
            self.out,
            "== {} rows{} ==",
            rows.len(),
            if skip > 0 {
                format!(", last {}", rows.len() - skip)
            } else {
                String::new()
            }
        )?;
        for (index, packet) in rows.iter().enumerate().skip(skip) {
            self.print_row(index, packet)?;
        }
        self.printed = rows.len();
        Ok(())
    }

    fn print_row(&mut self, index: usize, packet: &Packet) -> io::Result<()> {
        writeln!(self.out, "{:>6}  {}", index, packet.summary())
    }

    #[cfg(test)]
    fn output(&self) -> &W {
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::{wait_until, ScriptedBackend};
    use crate::capture::{Capturer, OpenOptions};
    use crate::packet::FilterCriteria;
    use std::sync::Arc;
    use std::time::Duration;

    fn console(backend: &ScriptedBackend) -> (Console<Vec<u8>>, Receiver<Event>) {
        let (observer, events) = ChannelObserver::new();
        let options = OpenOptions {
            timeout_ms: 5,
            ..OpenOptions::default()
        };
        let capturer = Capturer::new(Arc::new(backend.clone()), options);
        let session = Session::new(capturer, FilterCriteria::default(), Arc::new(observer));
        let console = Console::new(session, AssistantConfig::default(), "fake0", 10, Vec::new());
        (console, events)
    }

    fn text(console: &Console<Vec<u8>>) -> String {
        String::from_utf8_lossy(console.output()).into_owned()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("start"), Ok(Command::Start(None)));
        assert_eq!(
            parse_command("  start eth0 "),
            Ok(Command::Start(Some("eth0".into())))
        );
        assert_eq!(
            parse_command("ask only dns traffic"),
            Ok(Command::Ask("only dns traffic".into()))
        );
        assert_eq!(parse_command("show 5"), Ok(Command::Show(Some(5))));
        assert_eq!(parse_command("detail 3"), Ok(Command::Detail(3)));
        assert_eq!(parse_command(""), Ok(Command::Empty));
        assert!(parse_command("ask").is_err());
        assert!(parse_command("detail x").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn filter_values_keep_spaces() {
        assert_eq!(
            parse_command("filter protocol=udp free_text=dns query"),
            Ok(Command::Filter(vec![
                ("protocol".into(), "udp".into()),
                ("free_text".into(), "dns query".into()),
            ]))
        );
        assert!(parse_command("filter udp").is_err());
    }

    #[test]
    fn appended_rows_print_once() {
        let backend = ScriptedBackend::default();
        let (mut console, events) = console(&backend);
        backend.push(Packet::new("TCP a→b", ""));
        backend.push(Packet::new("UDP c→d", ""));
        assert!(console.execute("start").unwrap());
        assert!(wait_until(Duration::from_secs(2), || console.session.total() == 2));
        console.session.stop();

        for event in events.try_iter() {
            console.on_event(event).unwrap();
        }
        let out = text(&console);
        assert!(out.contains("-- Capturing on fake0…"));
        assert_eq!(out.matches("TCP a→b").count(), 1);
        assert_eq!(out.matches("UDP c→d").count(), 1);
        assert!(out.contains("-- Stopped"));
    }

    #[test]
    fn filter_command_redraws_view() {
        let backend = ScriptedBackend::default();
        let (mut console, events) = console(&backend);
        backend.push(Packet::new("TCP a→b", ""));
        backend.push(Packet::new("UDP c→d", ""));
        console.execute("start").unwrap();
        assert!(wait_until(Duration::from_secs(2), || console.session.total() == 2));
        console.session.stop();
        events.try_iter().for_each(drop);

        console.execute("filter protocol=udp").unwrap();
        for event in events.try_iter() {
            console.on_event(event).unwrap();
        }
        let out = text(&console);
        assert!(out.contains("== 1 rows =="));
        assert!(out.contains("     0  UDP c→d"));
        assert!(out.contains("-- Showing 1 of 2 packets"));
    }

    #[test]
    fn bad_filter_field_is_reported() {
        let backend = ScriptedBackend::default();
        let (mut console, _events) = console(&backend);
        console.execute("filter colour=blue").unwrap();
        assert!(text(&console).contains("-- invalid filter 'colour=blue'"));
        assert!(console.session.criteria().is_wildcard());
    }

    #[test]
    fn stop_when_idle_and_quit() {
        let backend = ScriptedBackend::default();
        let (mut console, _events) = console(&backend);
        assert!(console.execute("stop").unwrap());
        assert!(text(&console).contains("-- not capturing"));
        assert!(!console.execute("quit").unwrap());
    }

    #[test]
    fn ask_without_key_reports_status() {
        let backend = ScriptedBackend::default();
        let (mut console, events) = console(&backend);
        console.execute("ask show tcp").unwrap();
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, Event::Status("Set your API key first.".into()));
    }

    #[test]
    fn run_exits_on_closed_input_when_idle() {
        let backend = ScriptedBackend::default();
        let (mut console, events) = console(&backend);
        let (line_tx, lines) = unbounded();
        let (_shutdown_tx, shutdown) = unbounded();
        line_tx.send("ifaces".to_string()).unwrap();
        drop(line_tx);
        console.run(events, lines, shutdown).unwrap();
        assert!(text(&console).contains("  fake0\n  lo\n"));
    }
}
