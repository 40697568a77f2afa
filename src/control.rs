//! Host bridge: line-oriented control commands in, JSON-line events out.
//!
//! ```text
//! start
//! stop
//! regime 5000 {"pace": 6}
//! stage 2
//! quit
//! ```

use crate::connection::SessionHandle;
use crate::session::{AgentEvent, StageError};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::io::{self, Write};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Start,
    Stop,
    Regime {
        session_start_offset_ms: u64,
        descriptor: serde_json::Value,
    },
    Stage(i64),
    Quit,
}

#[derive(Debug)]
pub enum ControlError {
    Empty,
    Unknown(String),
    MissingArgument(&'static str),
    InvalidArgument(String),
    Stage(StageError),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::Empty => write!(f, "empty command"),
            ControlError::Unknown(cmd) => write!(f, "unknown command '{cmd}'"),
            ControlError::MissingArgument(arg) => write!(f, "missing argument: {arg}"),
            ControlError::InvalidArgument(e) => write!(f, "invalid argument: {e}"),
            ControlError::Stage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<StageError> for ControlError {
    fn from(e: StageError) -> Self {
        ControlError::Stage(e)
    }
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_lowercase().as_str() {
            "" => Err(ControlError::Empty),
            "start" => Ok(ControlCommand::Start),
            "stop" => Ok(ControlCommand::Stop),
            "quit" | "exit" => Ok(ControlCommand::Quit),
            "stage" => {
                if rest.is_empty() {
                    return Err(ControlError::MissingArgument("stage"));
                }
                rest.parse::<i64>()
                    .map(ControlCommand::Stage)
                    .map_err(|e| ControlError::InvalidArgument(format!("stage '{rest}': {e}")))
            }
            "regime" => {
                let (offset, descriptor) = match rest.split_once(char::is_whitespace) {
                    Some((offset, descriptor)) => (offset, descriptor.trim()),
                    None if rest.is_empty() => {
                        return Err(ControlError::MissingArgument("offset_ms"))
                    }
                    None => return Err(ControlError::MissingArgument("descriptor")),
                };
                let session_start_offset_ms = offset.parse::<u64>().map_err(|e| {
                    ControlError::InvalidArgument(format!("offset '{offset}': {e}"))
                })?;
                let descriptor = serde_json::from_str(descriptor)
                    .map_err(|e| ControlError::InvalidArgument(format!("descriptor: {e}")))?;
                Ok(ControlCommand::Regime {
                    session_start_offset_ms,
                    descriptor,
                })
            }
            other => Err(ControlError::Unknown(other.to_string())),
        }
    }
}

impl ControlCommand {
    /// Apply the command to a running session.
    pub fn apply(self, handle: &SessionHandle) -> Result<(), ControlError> {
        match self {
            ControlCommand::Start => handle.start_collection(),
            ControlCommand::Stop => {
                handle.stop_collection();
            }
            ControlCommand::Regime {
                session_start_offset_ms,
                descriptor,
            } => handle.regime_changed(session_start_offset_ms, descriptor),
            ControlCommand::Stage(stage) => handle.set_stage(stage)?,
            ControlCommand::Quit => handle.shutdown(),
        }
        Ok(())
    }
}

/// Write one event as a JSON line and flush it to the host.
pub fn write_event<W: Write>(out: &mut W, event: &AgentEvent) -> io::Result<()> {
    match serde_json::to_string(event) {
        Ok(json) => {
            writeln!(out, "{json}")?;
            out.flush()
        }
        Err(e) => {
            warn!(error = %e, "could not serialize event");
            Ok(())
        }
    }
}

/// Forward events to `out` until `stop` fires or every sender is gone.
///
/// Events already queued when `stop` fires are still written before this
/// returns. Returns the number of events written.
pub fn forward_events<W: Write>(
    events: &Receiver<AgentEvent>,
    stop: &Receiver<()>,
    out: &mut W,
) -> io::Result<usize> {
    let mut written = 0;
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => {
                    write_event(out, &event)?;
                    written += 1;
                }
                Err(_) => return Ok(written),
            },
            recv(stop) -> _ => break,
        }
    }

    for event in events.try_iter() {
        write_event(out, &event)?;
        written += 1;
    }
    Ok(written)
}

/// Background thread that prints the event stream for the host.
///
/// Session handles keep the event sender alive, so the thread cannot rely on
/// channel disconnection to end. [`EventPrinter::finish`] stops it explicitly
/// after draining.
pub struct EventPrinter<W> {
    stop: Sender<()>,
    thread: JoinHandle<io::Result<W>>,
}

impl<W: Write + Send + 'static> EventPrinter<W> {
    pub fn spawn(events: Receiver<AgentEvent>, mut out: W) -> Self {
        let (stop, stop_rx) = bounded(1);
        let thread = thread::spawn(move || {
            let written = forward_events(&events, &stop_rx, &mut out)?;
            debug!(written, "event printer finished");
            Ok(out)
        });
        Self { stop, thread }
    }

    /// Write every event emitted so far, then stop and hand back the writer.
    pub fn finish(self) -> io::Result<W> {
        if self.stop.send(()).is_err() {
            debug!("event printer already stopped");
        }
        self.thread
            .join()
            .map_err(|_| io::Error::other("event printer panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionStatus;
    use crossbeam_channel::unbounded;
    use serde_json::json;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("start".parse::<ControlCommand>().unwrap(), ControlCommand::Start);
        assert_eq!(" STOP \n".parse::<ControlCommand>().unwrap(), ControlCommand::Stop);
        assert_eq!("quit".parse::<ControlCommand>().unwrap(), ControlCommand::Quit);
        assert_eq!("stage 2".parse::<ControlCommand>().unwrap(), ControlCommand::Stage(2));
    }

    #[test]
    fn test_parse_regime() {
        let cmd: ControlCommand = r#"regime 5000 {"pace": 6, "label": "slow"}"#.parse().unwrap();
        assert_eq!(
            cmd,
            ControlCommand::Regime {
                session_start_offset_ms: 5000,
                descriptor: json!({"pace": 6, "label": "slow"}),
            }
        );
    }

    #[test]
    fn test_printer_flushes_event_sent_right_before_finish() {
        let (tx, rx) = unbounded();
        let printer = EventPrinter::spawn(rx, Vec::new());

        tx.send(AgentEvent::Status(ConnectionStatus::Connected)).unwrap();
        tx.send(AgentEvent::Status(ConnectionStatus::ConnectionFailure))
            .unwrap();
        // The sender stays alive, as a session handle would keep it
        let out = printer.finish().unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            r#"{"type":"Status","data":"ConnectionFailure"}"#
        );
        drop(tx);
    }

    #[test]
    fn test_forward_events_drains_queue_after_stop() {
        let (tx, rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(1);
        for _ in 0..3 {
            tx.send(AgentEvent::Status(ConnectionStatus::SensorError)).unwrap();
        }
        stop_tx.send(()).unwrap();

        let mut out = Vec::new();
        assert_eq!(forward_events(&rx, &stop_rx, &mut out).unwrap(), 3);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_forward_events_ends_when_senders_gone() {
        let (tx, rx) = unbounded();
        let (_stop_tx, stop_rx) = bounded::<()>(1);
        tx.send(AgentEvent::Status(ConnectionStatus::SessionEnded)).unwrap();
        drop(tx);

        let mut out = Vec::new();
        assert_eq!(forward_events(&rx, &stop_rx, &mut out).unwrap(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("".parse::<ControlCommand>(), Err(ControlError::Empty)));
        assert!(matches!("jump".parse::<ControlCommand>(), Err(ControlError::Unknown(_))));
        assert!(matches!(
            "stage".parse::<ControlCommand>(),
            Err(ControlError::MissingArgument("stage"))
        ));
        assert!(matches!(
            "stage two".parse::<ControlCommand>(),
            Err(ControlError::InvalidArgument(_))
        ));
        assert!(matches!(
            "regime 5000".parse::<ControlCommand>(),
            Err(ControlError::MissingArgument("descriptor"))
        ));
        assert!(matches!(
            "regime abc {}".parse::<ControlCommand>(),
            Err(ControlError::InvalidArgument(_))
        ));
        assert!(matches!(
            "regime 10 {not json".parse::<ControlCommand>(),
            Err(ControlError::InvalidArgument(_))
        ));
    }
}
