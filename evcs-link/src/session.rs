//! Charging session entity
//!
//! One charge cycle from tag authorization to completion:
//! - Created for a tag presented during a billing-start exchange
//! - Opened on controller confirmation (id and start time assigned)
//! - Closed when the tag is re-presented with the completion marker

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::SessionError;
use crate::types::{SessionId, StationId, Tag};

/// A charging session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    id: Option<SessionId>,
    station: StationId,
    tag: Tag,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl Session {
    /// Create an unopened session for a tag presented at a station
    pub fn new(station: StationId, tag: Tag) -> Self {
        Self {
            id: None,
            station,
            tag,
            start_time: None,
            end_time: None,
        }
    }

    /// Open the session, assigning its id and start time
    pub fn open(&mut self) -> Result<SessionId, SessionError> {
        if self.start_time.is_some() {
            return Err(SessionError::AlreadyOpen);
        }

        let id = SessionId::new_v4();
        self.id = Some(id);
        self.start_time = Some(Utc::now());
        Ok(id)
    }

    /// Close the session and return the tag it was registered under
    pub fn close(&mut self) -> Result<&Tag, SessionError> {
        let Some(start) = self.start_time else {
            return Err(SessionError::NotOpen);
        };
        if self.end_time.is_some() {
            return Err(SessionError::NotOpen);
        }

        // Wall clock can step backwards; keep end >= start
        self.end_time = Some(Utc::now().max(start));
        Ok(&self.tag)
    }

    pub fn is_open(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_none()
    }

    pub fn id(&self) -> Option<SessionId> {
        self.id
    }

    pub fn station(&self) -> &StationId {
        &self.station
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Charging duration, once the session is closed
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
