//! Structured request/response frames
//!
//! Some controller firmwares speak a header-based framing instead of the
//! free-text grammar:
//!
//! ```text
//! MMETERING/1.0 START
//! Content-Length: 2
//! Id: 1
//! Key: 04A1B2
//! ```
//!
//! The request line names a version and an action, `Content-Length` declares
//! how many `Key: Value` header lines follow. Decoders implement
//! [`FrameDecoder`] and are consulted by the engine before the line grammar.
//! Header collection is shared in [`PendingFrame`]; the engine bounds every
//! header read with the response timeout.

use tracing::{info, warn};

use crate::error::FrameError;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::types::{SessionId, StationId, Tag};

/// Upper bound on declared header lines
pub const MAX_FRAME_HEADERS: usize = 32;

/// Version token prefix of the metering protocol
pub const METERING_PREFIX: &str = "MMETERING/";

/// Version used in metering responses
pub const METERING_RESPONSE_VERSION: &str = "1.0";

/// Action verb of a frame request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAction {
    Start,
    /// Anything that is not `START` closes a session
    Other(String),
}

impl FrameAction {
    pub fn parse(verb: &str) -> Self {
        match verb {
            "START" => FrameAction::Start,
            other => FrameAction::Other(other.to_string()),
        }
    }
}

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    pub version: String,
    pub action: FrameAction,
}

/// Ordered header block; lookups ignore ASCII case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Parse and append one `Key: Value` line
    pub fn push_line(&mut self, line: &str) -> Result<(), FrameError> {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::BadHeader(line.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(FrameError::BadHeader(line.to_string()));
        }
        self.entries.push((key.to_string(), value.trim().to_string()));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A fully assembled frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request: FrameRequest,
    pub headers: Headers,
}

/// Frame whose header block is still being read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFrame {
    request: FrameRequest,
    declared: Option<usize>,
    headers: Headers,
}

/// Result of feeding a line to a [`PendingFrame`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameProgress {
    Incomplete(PendingFrame),
    Complete(Frame),
}

impl PendingFrame {
    pub fn new(request: FrameRequest) -> Self {
        Self {
            request,
            declared: None,
            headers: Headers::default(),
        }
    }

    /// Consume the next line: first the `Content-Length` count, then headers
    pub fn feed(mut self, line: &str) -> Result<FrameProgress, FrameError> {
        match self.declared {
            None => {
                let count = parse_content_length(line)?;
                self.declared = Some(count);
            }
            Some(_) => self.headers.push_line(line)?,
        }

        if self.declared == Some(self.headers.len()) {
            Ok(FrameProgress::Complete(Frame {
                request: self.request,
                headers: self.headers,
            }))
        } else {
            Ok(FrameProgress::Incomplete(self))
        }
    }

    pub fn request(&self) -> &FrameRequest {
        &self.request
    }
}

fn parse_content_length(line: &str) -> Result<usize, FrameError> {
    let bad = || FrameError::BadContentLength(line.to_string());

    let (key, value) = line.split_once(':').ok_or_else(bad)?;
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Err(bad());
    }
    let count: usize = value.trim().parse().map_err(|_| bad())?;
    if count > MAX_FRAME_HEADERS {
        return Err(bad());
    }
    Ok(count)
}

/// What a dispatched frame produced
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Response lines, in order
    pub replies: Vec<String>,
    /// Session closed by this frame, for the completed-session sink
    pub closed: Option<Session>,
}

/// A decoder for a structured framing registered ahead of the line grammar
pub trait FrameDecoder: Send {
    /// Parse a request line. `None` if this decoder does not own the line.
    fn parse_request(&self, line: &str) -> Option<Result<FrameRequest, FrameError>>;

    /// Act on a complete frame
    fn dispatch(&self, frame: &Frame, registry: &mut SessionRegistry) -> FrameOutcome;

    /// Response lines for a frame that could not be assembled
    fn reject(&self, error: &FrameError) -> Vec<String>;
}

/// Decoder for `MMETERING/<version> <ACTION>` frames
#[derive(Debug, Clone, Default)]
pub struct MeteringDecoder;

impl MeteringDecoder {
    pub fn new() -> Self {
        Self
    }

    fn status(ok: bool) -> String {
        format!(
            "{}{} {}",
            METERING_PREFIX,
            METERING_RESPONSE_VERSION,
            if ok { "OK" } else { "ERROR" }
        )
    }

    fn accepted(id: SessionId) -> Vec<String> {
        vec![Self::status(true), format!("Session-Id: {}", id)]
    }

    fn start(&self, frame: &Frame, registry: &mut SessionRegistry) -> Result<SessionId, FrameError> {
        let station = frame
            .headers
            .get("Id")
            .or_else(|| frame.headers.get("Name"))
            .ok_or(FrameError::MissingHeader("Id"))?;
        let tag = frame
            .headers
            .get("Key")
            .map(Tag::normalize)
            .filter(|tag| !tag.as_str().is_empty())
            .ok_or(FrameError::MissingHeader("Key"))?;

        let mut session = Session::new(StationId::new(station), tag.clone());
        let id = session.open()?;
        registry.put(session)?;

        info!("Frame START opened session {} for tag {} on station {}", id, tag, station);
        Ok(id)
    }

    fn close(&self, frame: &Frame, registry: &mut SessionRegistry) -> Result<(SessionId, Session), FrameError> {
        let raw = frame
            .headers
            .get("Session-Id")
            .ok_or(FrameError::MissingHeader("Session-Id"))?;
        let id: SessionId = raw
            .parse()
            .map_err(|_| FrameError::InvalidSessionId(raw.to_string()))?;

        let tag = registry.find_by_id(id).ok_or(FrameError::UnknownSession(id))?;
        let mut session = registry.take(&tag)?;
        session.close()?;

        info!("Frame closed session {} for tag {}", id, tag);
        Ok((id, session))
    }
}

impl FrameDecoder for MeteringDecoder {
    fn parse_request(&self, line: &str) -> Option<Result<FrameRequest, FrameError>> {
        let rest = line.strip_prefix(METERING_PREFIX)?;
        let mut parts = rest.split_whitespace();

        let request = match (parts.next(), parts.next(), parts.next()) {
            (Some(version), Some(action), None) => Ok(FrameRequest {
                version: version.to_string(),
                action: FrameAction::parse(action),
            }),
            _ => Err(FrameError::BadRequestLine(line.to_string())),
        };
        Some(request)
    }

    fn dispatch(&self, frame: &Frame, registry: &mut SessionRegistry) -> FrameOutcome {
        match &frame.request.action {
            FrameAction::Start => match self.start(frame, registry) {
                Ok(id) => FrameOutcome {
                    replies: Self::accepted(id),
                    closed: None,
                },
                Err(e) => FrameOutcome {
                    replies: self.reject(&e),
                    closed: None,
                },
            },
            FrameAction::Other(_) => match self.close(frame, registry) {
                Ok((id, session)) => FrameOutcome {
                    replies: Self::accepted(id),
                    closed: Some(session),
                },
                Err(e) => FrameOutcome {
                    replies: self.reject(&e),
                    closed: None,
                },
            },
        }
    }

    fn reject(&self, error: &FrameError) -> Vec<String> {
        warn!("Rejecting frame: {}", error);
        vec![Self::status(false)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    fn assemble(decoder: &MeteringDecoder, lines: &[&str]) -> Frame {
        let request = decoder.parse_request(lines[0]).unwrap().unwrap();
        let mut pending = PendingFrame::new(request);
        for (i, line) in lines[1..].iter().enumerate() {
            match pending.feed(line).unwrap() {
                FrameProgress::Incomplete(next) => pending = next,
                FrameProgress::Complete(frame) => {
                    assert_eq!(i + 2, lines.len(), "frame completed early");
                    return frame;
                }
            }
        }
        panic!("frame incomplete");
    }

    fn session_id(replies: &[String]) -> SessionId {
        replies[1].strip_prefix("Session-Id: ").unwrap().parse().unwrap()
    }

    #[test]
    fn test_parse_request_line() {
        let decoder = MeteringDecoder::new();

        assert_eq!(
            decoder.parse_request("MMETERING/1.0 START"),
            Some(Ok(FrameRequest {
                version: "1.0".into(),
                action: FrameAction::Start,
            }))
        );
        assert_eq!(
            decoder.parse_request("MMETERING/2.1 END").unwrap().unwrap().action,
            FrameAction::Other("END".into())
        );
        assert!(matches!(
            decoder.parse_request("MMETERING/1.0"),
            Some(Err(FrameError::BadRequestLine(_)))
        ));
        assert_eq!(decoder.parse_request("LADER 1 lebt"), None);
    }

    #[test]
    fn test_pending_frame_content_length() {
        let request = FrameRequest {
            version: "1.0".into(),
            action: FrameAction::Start,
        };

        let frame = PendingFrame::new(request.clone()).feed("Content-Length: 0").unwrap();
        assert!(matches!(frame, FrameProgress::Complete(f) if f.headers.is_empty()));

        assert!(matches!(
            PendingFrame::new(request.clone()).feed("Id: 1"),
            Err(FrameError::BadContentLength(_))
        ));
        assert!(matches!(
            PendingFrame::new(request.clone()).feed("Content-Length: many"),
            Err(FrameError::BadContentLength(_))
        ));
        assert!(matches!(
            PendingFrame::new(request).feed("Content-Length: 1000"),
            Err(FrameError::BadContentLength(_))
        ));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::default();
        headers.push_line("session-id:  abc ").unwrap();
        assert_eq!(headers.get("Session-Id"), Some("abc"));
        assert!(matches!(headers.push_line("no colon"), Err(FrameError::BadHeader(_))));
        assert!(matches!(headers.push_line(": value"), Err(FrameError::BadHeader(_))));
    }

    #[test]
    fn test_start_then_end_by_session_id() {
        let decoder = MeteringDecoder::new();
        let mut registry = SessionRegistry::new();

        let start = assemble(
            &decoder,
            &["MMETERING/1.0 START", "Content-Length: 2", "Id: 3", "Key: 04 A1 B2"],
        );
        let outcome = decoder.dispatch(&start, &mut registry);
        assert_eq!(outcome.replies[0], "MMETERING/1.0 OK");
        let id = session_id(&outcome.replies);

        let session = registry.view().get(&Tag::normalize("04A1B2")).unwrap();
        assert_eq!(session.id(), Some(id));
        assert_eq!(session.station().as_str(), "3");

        let end_lines = [
            "MMETERING/1.0 END".to_string(),
            "Content-Length: 1".to_string(),
            format!("Session-Id: {}", id),
        ];
        let end_refs: Vec<&str> = end_lines.iter().map(String::as_str).collect();
        let end = assemble(&decoder, &end_refs);
        let outcome = decoder.dispatch(&end, &mut registry);

        assert_eq!(outcome.replies, vec!["MMETERING/1.0 OK".to_string(), format!("Session-Id: {}", id)]);
        let closed = outcome.closed.unwrap();
        assert!(!closed.is_open());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_start_uses_name_header() {
        let decoder = MeteringDecoder::new();
        let mut registry = SessionRegistry::new();

        let start = assemble(
            &decoder,
            &["MMETERING/1.0 START", "Content-Length: 2", "Name: Lader2", "Key: 0A0B"],
        );
        let outcome = decoder.dispatch(&start, &mut registry);
        assert_eq!(outcome.replies[0], "MMETERING/1.0 OK");
        assert_eq!(
            registry.view().get(&Tag::normalize("0A0B")).unwrap().station().as_str(),
            "Lader2"
        );
    }

    #[test]
    fn test_start_errors() {
        let decoder = MeteringDecoder::new();
        let mut registry = SessionRegistry::new();

        let missing_key = assemble(&decoder, &["MMETERING/1.0 START", "Content-Length: 1", "Id: 1"]);
        let outcome = decoder.dispatch(&missing_key, &mut registry);
        assert_eq!(outcome.replies, vec!["MMETERING/1.0 ERROR".to_string()]);
        assert!(registry.is_empty());

        let start = assemble(
            &decoder,
            &["MMETERING/1.0 START", "Content-Length: 2", "Id: 1", "Key: 04A1B2"],
        );
        decoder.dispatch(&start, &mut registry);
        let duplicate = decoder.dispatch(&start, &mut registry);
        assert_eq!(duplicate.replies, vec!["MMETERING/1.0 ERROR".to_string()]);
        assert_eq!(registry.len(), 1);

        assert!(matches!(
            decoder.start(&start, &mut registry),
            Err(FrameError::Registry(RegistryError::DuplicateSession(_)))
        ));
    }

    #[test]
    fn test_end_unknown_or_invalid_id() {
        let decoder = MeteringDecoder::new();
        let mut registry = SessionRegistry::new();

        let unknown = format!("Session-Id: {}", SessionId::new_v4());
        let frame = assemble(&decoder, &["MMETERING/1.0 END", "Content-Length: 1", unknown.as_str()]);
        let outcome = decoder.dispatch(&frame, &mut registry);
        assert_eq!(outcome.replies, vec!["MMETERING/1.0 ERROR".to_string()]);
        assert!(outcome.closed.is_none());

        let frame = assemble(&decoder, &["MMETERING/1.0 END", "Content-Length: 1", "Session-Id: 42"]);
        assert!(matches!(
            decoder.close(&frame, &mut registry),
            Err(FrameError::InvalidSessionId(_))
        ));
    }
}
