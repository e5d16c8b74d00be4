//! Protocol state machine
//!
//! Consumes controller lines, drives the session lifecycle and emits
//! acknowledgments:
//!
//! ```text
//!            alive ──► (log, remember station)
//!   IDLE ──billing-start──► AWAITING_TAG ──tag──► AWAITING_CONFIRM ──confirm──► open session, OK_Lader<n>!
//!     │                          │                       │
//!     │                   timeout/other             timeout/other
//!     │                          ▼                       ▼
//!     │                        IDLE                    IDLE (tag discarded)
//!     └──tag──► AWAITING_COMPLETE ──complete──► close session
//!                     │
//!              timeout/other ──► IDLE
//! ```
//!
//! The machine itself is sans-I/O: [`ProtocolEngine::handle_line`] and
//! [`ProtocolEngine::handle_timeout`] return the commands to send.
//! [`ProtocolEngine::run`] feeds it from the inbound queue, bounding every
//! lookahead wait with the response timeout.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{Command, EngineEnds};
use crate::config::LinkConfig;
use crate::error::{FrameError, LinkError, ProtocolError};
use crate::frame::{FrameDecoder, FrameProgress, MeteringDecoder, PendingFrame};
use crate::grammar::{Grammar, LineKind, LineMatch};
use crate::registry::{RegistryView, SessionRegistry};
use crate::session::Session;
use crate::types::{StationId, Tag};

/// Receives sessions after they are closed
pub trait SessionSink: Send {
    fn completed(&mut self, session: Session);
}

/// Default sink: records the completed session in the log
#[derive(Debug, Default)]
pub struct LogSink;

impl SessionSink for LogSink {
    fn completed(&mut self, session: Session) {
        let id = session.id().map(|id| id.to_string()).unwrap_or_default();
        let minutes = session.duration().map(|d| d.num_minutes()).unwrap_or_default();
        info!(
            "Session {} completed: tag={}, station={}, duration={}min",
            id,
            session.tag(),
            session.station(),
            minutes
        );
    }
}

/// Engine state between lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    AwaitingTag,
    AwaitingConfirm { tag: Tag },
    AwaitingComplete { tag: Tag },
    ReadingFrame { decoder: usize, pending: PendingFrame },
}

impl EngineState {
    /// Whether the next line is a bounded lookahead
    pub fn is_waiting(&self) -> bool {
        !matches!(self, EngineState::Idle)
    }
}

/// Next input for the engine
enum Input {
    Line(String),
    Timeout,
}

/// The protocol state machine, sole writer of the session registry
pub struct ProtocolEngine {
    grammar: Grammar,
    decoders: Vec<Box<dyn FrameDecoder>>,
    registry: SessionRegistry,
    sink: Box<dyn SessionSink>,
    state: EngineState,
    station: StationId,
    response_timeout: Duration,
}

impl ProtocolEngine {
    /// Create an engine with the controller grammar and an empty registry
    pub fn new(config: &LinkConfig) -> Result<Self, LinkError> {
        let mut engine = Self {
            grammar: Grammar::controller()?,
            decoders: Vec::new(),
            registry: SessionRegistry::new(),
            sink: Box::new(LogSink),
            state: EngineState::Idle,
            station: config.default_station.clone(),
            response_timeout: config.response_timeout,
        };

        if config.structured_frames {
            engine.decoders.push(Box::new(MeteringDecoder::new()));
        }
        Ok(engine)
    }

    /// Register a frame decoder, consulted before the line grammar
    pub fn with_decoder(mut self, decoder: Box<dyn FrameDecoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    /// Replace the completed-session sink
    pub fn with_sink(mut self, sink: Box<dyn SessionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Station addressed by the next acknowledgment
    pub fn station(&self) -> &StationId {
        &self.station
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> RegistryView {
        self.registry.view()
    }

    /// Feed one line; returns the commands to send
    pub fn handle_line(&mut self, line: &str) -> Vec<Command> {
        let state = std::mem::replace(&mut self.state, EngineState::Idle);

        match state {
            EngineState::Idle => self.on_idle(line),

            EngineState::AwaitingTag => {
                match self.grammar.classify(line) {
                    Some(LineMatch::Tag(tag)) => {
                        info!("Ready for charging with tag {}, waiting for confirmation", tag);
                        self.state = EngineState::AwaitingConfirm { tag };
                    }
                    _ => self.protocol_error(ProtocolError::UnexpectedLine {
                        expected: LineKind::Tag,
                        got: line.to_string(),
                    }),
                }
                Vec::new()
            }

            EngineState::AwaitingConfirm { tag } => match self.grammar.classify(line) {
                Some(LineMatch::Confirm) => self.open_session(tag),
                _ => {
                    self.protocol_error(ProtocolError::UnexpectedLine {
                        expected: LineKind::Confirm,
                        got: line.to_string(),
                    });
                    warn!("Discarding tag {} without confirmation", tag);
                    Vec::new()
                }
            },

            EngineState::AwaitingComplete { tag } => {
                match self.grammar.classify(line) {
                    Some(LineMatch::Complete) => self.close_session(&tag),
                    _ => self.protocol_error(ProtocolError::UnexpectedLine {
                        expected: LineKind::Complete,
                        got: line.to_string(),
                    }),
                }
                Vec::new()
            }

            EngineState::ReadingFrame { decoder, pending } => match pending.feed(line) {
                Ok(FrameProgress::Incomplete(pending)) => {
                    self.state = EngineState::ReadingFrame { decoder, pending };
                    Vec::new()
                }
                Ok(FrameProgress::Complete(frame)) => {
                    let outcome = self.decoders[decoder].dispatch(&frame, &mut self.registry);
                    if let Some(session) = outcome.closed {
                        self.sink.completed(session);
                    }
                    outcome.replies.into_iter().map(Command::Frame).collect()
                }
                Err(e) => self.reject_frame(decoder, &e),
            },
        }
    }

    /// The lookahead wait ran out; returns the commands to send
    pub fn handle_timeout(&mut self) -> Vec<Command> {
        let state = std::mem::replace(&mut self.state, EngineState::Idle);

        match state {
            EngineState::Idle => {}
            EngineState::AwaitingTag => {
                self.protocol_error(ProtocolError::Timeout { expected: LineKind::Tag });
            }
            EngineState::AwaitingConfirm { tag } => {
                self.protocol_error(ProtocolError::Timeout { expected: LineKind::Confirm });
                warn!("Discarding tag {} without confirmation", tag);
            }
            EngineState::AwaitingComplete { tag } => {
                self.protocol_error(ProtocolError::Timeout { expected: LineKind::Complete });
                debug!("Tag {} was not followed by completion marker", tag);
            }
            EngineState::ReadingFrame { decoder, .. } => {
                return self.reject_frame(decoder, &FrameError::Timeout);
            }
        }
        Vec::new()
    }

    fn on_idle(&mut self, line: &str) -> Vec<Command> {
        for (index, decoder) in self.decoders.iter().enumerate() {
            match decoder.parse_request(line) {
                None => continue,
                Some(Ok(request)) => {
                    debug!("PROCESS>Frame request {:?}, reading headers", request);
                    self.state = EngineState::ReadingFrame {
                        decoder: index,
                        pending: PendingFrame::new(request),
                    };
                    return Vec::new();
                }
                Some(Err(e)) => return self.reject_frame(index, &e),
            }
        }

        match self.grammar.classify(line) {
            Some(LineMatch::Alive { station }) => {
                info!("Charger {} is alive", station);
                self.station = station;
            }
            Some(LineMatch::BillingStart) => {
                debug!("PROCESS>Wait for Tag ID");
                self.state = EngineState::AwaitingTag;
            }
            Some(LineMatch::Tag(tag)) => {
                debug!("PROCESS>Tag {} presented, waiting for completion marker", tag);
                self.state = EngineState::AwaitingComplete { tag };
            }
            Some(other) => {
                debug!("Ignoring {} line outside of an exchange", other.kind());
            }
            None => {
                debug!("Ignoring unrecognized line {:?}", line);
            }
        }
        Vec::new()
    }

    fn open_session(&mut self, tag: Tag) -> Vec<Command> {
        let mut session = Session::new(self.station.clone(), tag.clone());
        let id = match session.open() {
            Ok(id) => id,
            Err(e) => {
                error!("Could not open session for tag {}: {}", tag, e);
                return Vec::new();
            }
        };

        match self.registry.put(session) {
            Ok(()) => {
                info!(
                    "Charging has been started with tag {} on station {} (session {})",
                    tag, self.station, id
                );
                vec![Command::Accept(self.station.clone())]
            }
            Err(e) => {
                error!("Rejecting confirmation: {}", e);
                Vec::new()
            }
        }
    }

    fn close_session(&mut self, tag: &Tag) {
        let mut session = match self.registry.take(tag) {
            Ok(session) => session,
            Err(e) => {
                error!("Could not find session initiated with tag {}: {}", tag, e);
                return;
            }
        };

        if let Err(e) = session.close() {
            error!("Session for tag {} was not open: {}", tag, e);
        }
        info!("Charging has been stopped with tag {}", tag);
        self.sink.completed(session);
    }

    fn reject_frame(&self, decoder: usize, error: &FrameError) -> Vec<Command> {
        self.decoders[decoder]
            .reject(error)
            .into_iter()
            .map(Command::Frame)
            .collect()
    }

    fn protocol_error(&self, error: ProtocolError) {
        warn!("Protocol error: {}", error);
    }

    /// Run until cancelled or until the transport drops its ends
    pub async fn run(mut self, mut ends: EngineEnds, cancel: CancellationToken) {
        info!("Protocol engine started");

        loop {
            let wait = self.state.is_waiting().then_some(self.response_timeout);

            let input = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Engine shutdown requested in state {:?}", self.state);
                    break;
                }
                input = next_input(&mut ends.lines, wait) => input,
            };

            let commands = match input {
                Some(Input::Line(line)) => {
                    debug!("PROCESS>{}", line);
                    self.handle_line(&line)
                }
                Some(Input::Timeout) => self.handle_timeout(),
                None => {
                    debug!("Line queue closed");
                    break;
                }
            };

            for command in commands {
                if ends.commands.send(command).is_err() {
                    warn!("Transport gone, dropping outbound commands");
                    return;
                }
            }
        }

        if !self.registry.is_empty() {
            info!("Engine stopped with {} open session(s)", self.registry.len());
        }
    }
}

async fn next_input(lines: &mut mpsc::UnboundedReceiver<String>, wait: Option<Duration>) -> Option<Input> {
    match wait {
        None => lines.recv().await.map(Input::Line),
        Some(limit) => match tokio::time::timeout(limit, lines.recv()).await {
            Ok(line) => line.map(Input::Line),
            Err(_) => Some(Input::Timeout),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::link_channels;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CollectSink(Arc<Mutex<Vec<Session>>>);

    impl SessionSink for CollectSink {
        fn completed(&mut self, session: Session) {
            self.0.lock().push(session);
        }
    }

    fn engine() -> ProtocolEngine {
        ProtocolEngine::new(&LinkConfig::default()).unwrap()
    }

    fn feed(engine: &mut ProtocolEngine, lines: &[&str]) -> Vec<Command> {
        lines.iter().flat_map(|line| engine.handle_line(line)).collect()
    }

    fn tag(raw: &str) -> Tag {
        Tag::normalize(raw)
    }

    #[test]
    fn test_open_and_close_session() {
        let sink = CollectSink::default();
        let mut engine = engine().with_sink(Box::new(sink.clone()));

        let commands = feed(
            &mut engine,
            &["LADER 1 lebt", "Abrechnung auf", "Tag ID = 04 A1 B2", "Verstanden"],
        );
        assert_eq!(commands, vec![Command::Accept(StationId::new("1"))]);
        assert_eq!(commands[0].to_string(), "OK_Lader1!");
        assert_eq!(engine.state(), &EngineState::Idle);

        let session = engine.sessions().get(&tag("04A1B2")).unwrap();
        assert!(session.is_open());
        assert!(session.id().is_some());
        assert_eq!(session.station().as_str(), "1");

        let commands = feed(&mut engine, &["Tag ID = 04 A1 B2", "total FERTIG"]);
        assert!(commands.is_empty());
        assert!(engine.registry().is_empty());

        let completed = sink.0.lock();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].tag(), &tag("04A1B2"));
        assert!(!completed[0].is_open());
        assert_eq!(completed[0].id(), session.id());
    }

    #[test]
    fn test_acknowledges_heartbeat_station() {
        let mut engine = engine();

        let commands = feed(
            &mut engine,
            &["LADER 4 lebt", "Abrechnung auf", "Tag ID = 0A 0B", "Verstanden"],
        );
        assert_eq!(commands, vec![Command::Accept(StationId::new("4"))]);
        assert_eq!(engine.station().as_str(), "4");
        assert_eq!(
            engine.sessions().get(&tag("0A0B")).unwrap().station().as_str(),
            "4"
        );
    }

    #[test]
    fn test_default_station_before_heartbeat() {
        let config = LinkConfig::default().with_default_station("9");
        let mut engine = ProtocolEngine::new(&config).unwrap();

        let commands = feed(&mut engine, &["Abrechnung auf", "Tag ID = 01", "Verstanden"]);
        assert_eq!(commands, vec![Command::Accept(StationId::new("9"))]);
    }

    #[test]
    fn test_duplicate_tag_keeps_original_session() {
        let mut engine = engine();
        let open = ["Abrechnung auf", "Tag ID = 04 A1 B2", "Verstanden"];

        assert_eq!(feed(&mut engine, &open).len(), 1);
        let original = engine.sessions().get(&tag("04A1B2")).unwrap();

        let commands = feed(&mut engine, &open);
        assert!(commands.is_empty());
        assert_eq!(engine.registry().len(), 1);

        let kept = engine.sessions().get(&tag("04A1B2")).unwrap();
        assert_eq!(kept.id(), original.id());
        assert!(kept.is_open());
    }

    #[test]
    fn test_confirm_timeout_discards_tag() {
        let mut engine = engine();

        feed(&mut engine, &["Abrechnung auf", "Tag ID = 04 A1 B2"]);
        assert_eq!(
            engine.state(),
            &EngineState::AwaitingConfirm { tag: tag("04A1B2") }
        );

        assert!(engine.handle_timeout().is_empty());
        assert_eq!(engine.state(), &EngineState::Idle);
        assert!(engine.registry().is_empty());

        // a late confirmation is ignored in IDLE
        assert!(engine.handle_line("Verstanden").is_empty());
        assert!(engine.registry().is_empty());

        let commands = feed(&mut engine, &["Abrechnung auf", "Tag ID = 04 A1 B2", "Verstanden"]);
        assert_eq!(commands.len(), 1);
        assert!(engine.sessions().contains(&tag("04A1B2")));
    }

    #[test]
    fn test_unexpected_lines_reset_to_idle() {
        let mut engine = engine();

        feed(&mut engine, &["Abrechnung auf", "LADER 1 lebt"]);
        assert_eq!(engine.state(), &EngineState::Idle);

        feed(&mut engine, &["Abrechnung auf", "Tag ID = 01", "garbage"]);
        assert_eq!(engine.state(), &EngineState::Idle);
        assert!(engine.registry().is_empty());

        feed(&mut engine, &["Tag ID = 01", "Verstanden"]);
        assert_eq!(engine.state(), &EngineState::Idle);
    }

    #[test]
    fn test_tag_timeout_then_fresh_start() {
        let mut engine = engine();

        engine.handle_line("Abrechnung auf");
        assert_eq!(engine.state(), &EngineState::AwaitingTag);
        engine.handle_timeout();
        assert_eq!(engine.state(), &EngineState::Idle);

        engine.handle_line("Tag ID = 01");
        assert!(engine.state().is_waiting());
        engine.handle_timeout();
        assert!(!engine.state().is_waiting());
    }

    #[test]
    fn test_close_unknown_tag_leaves_registry() {
        let sink = CollectSink::default();
        let mut engine = engine().with_sink(Box::new(sink.clone()));
        feed(&mut engine, &["Abrechnung auf", "Tag ID = AA", "Verstanden"]);

        let commands = feed(&mut engine, &["Tag ID = BB", "total FERTIG"]);
        assert!(commands.is_empty());
        assert_eq!(engine.registry().len(), 1);
        assert!(engine.sessions().contains(&tag("AA")));
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_garbage_is_ignored() {
        let mut engine = engine();

        for line in ["", "\u{fffd}\u{fffd}", "Verstanden", "total FERTIG", "OK_Lader1!"] {
            assert!(engine.handle_line(line).is_empty());
            assert_eq!(engine.state(), &EngineState::Idle);
        }
    }

    #[test]
    fn test_frame_start_and_timeout() {
        let mut engine = engine();

        let commands = feed(
            &mut engine,
            &["MMETERING/1.0 START", "Content-Length: 2", "Id: 1", "Key: 04A1B2"],
        );
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], Command::Frame("MMETERING/1.0 OK".into()));
        assert!(commands[1].to_string().starts_with("Session-Id: "));
        assert!(engine.sessions().contains(&tag("04A1B2")));

        feed(&mut engine, &["MMETERING/1.0 END", "Content-Length: 1"]);
        assert!(matches!(engine.state(), EngineState::ReadingFrame { .. }));
        assert_eq!(
            engine.handle_timeout(),
            vec![Command::Frame("MMETERING/1.0 ERROR".into())]
        );
        assert_eq!(engine.state(), &EngineState::Idle);
        assert_eq!(engine.registry().len(), 1);
    }

    #[test]
    fn test_frames_disabled() {
        let config = LinkConfig::default().without_structured_frames();
        let mut engine = ProtocolEngine::new(&config).unwrap();

        assert!(engine.handle_line("MMETERING/1.0 START").is_empty());
        assert_eq!(engine.state(), &EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bounds_lookahead() {
        let (transport, engine_ends) = link_channels();
        let cancel = CancellationToken::new();
        let engine = engine();
        let sessions = engine.sessions();
        let handle = tokio::spawn(engine.run(engine_ends, cancel.clone()));
        let mut commands = transport.commands;

        transport.lines.send("Abrechnung auf".into()).unwrap();
        transport.lines.send("Tag ID = 04 A1 B2".into()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        transport.lines.send("Verstanden".into()).unwrap();

        for line in ["Abrechnung auf", "Tag ID = 04 A1 B2", "Verstanden"] {
            transport.lines.send(line.into()).unwrap();
        }
        assert_eq!(commands.recv().await, Some(Command::Accept(StationId::new("1"))));
        assert_eq!(sessions.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_preempts_confirm_wait() {
        let (transport, engine_ends) = link_channels();
        let cancel = CancellationToken::new();
        let engine = engine();
        let sessions = engine.sessions();
        let handle = tokio::spawn(engine.run(engine_ends, cancel.clone()));
        let mut commands = transport.commands;

        transport.lines.send("Abrechnung auf".into()).unwrap();
        transport.lines.send("Tag ID = 04 A1 B2".into()).unwrap();
        // Let the engine reach the confirmation wait
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cancelled_at = tokio::time::Instant::now();
        cancel.cancel();
        handle.await.unwrap();

        assert!(cancelled_at.elapsed() < LinkConfig::default().response_timeout);
        assert!(sessions.is_empty());
        assert!(commands.try_recv().is_err());
    }
}
