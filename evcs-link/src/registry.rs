//! Registry of open charging sessions
//!
//! Sessions are keyed by their normalized tag for their whole open lifetime.
//! [`SessionRegistry`] is the single writer and is owned by the protocol
//! engine; it is deliberately not `Clone`. Monitoring code gets a
//! [`RegistryView`], which only hands out copies taken under the read lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::session::Session;
use crate::types::{SessionId, Tag};

type SessionMap = HashMap<Tag, Session>;

/// Writer handle to the session registry
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only handle sharing the same sessions
    pub fn view(&self) -> RegistryView {
        RegistryView {
            sessions: self.sessions.clone(),
        }
    }

    /// Register a session under its tag. Never overwrites an open session.
    pub fn put(&mut self, session: Session) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write();
        let tag = session.tag().clone();
        if sessions.contains_key(&tag) {
            return Err(RegistryError::DuplicateSession(tag));
        }
        sessions.insert(tag, session);
        Ok(())
    }

    /// Remove and return the session registered under `tag`
    pub fn take(&mut self, tag: &Tag) -> Result<Session, RegistryError> {
        self.sessions
            .write()
            .remove(tag)
            .ok_or_else(|| RegistryError::SessionNotFound(tag.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.sessions.read().contains_key(tag)
    }

    /// Find the tag of the session holding `id`.
    ///
    /// Linear scan: the id is an attribute of the session, not a key.
    pub fn find_by_id(&self, id: SessionId) -> Option<Tag> {
        self.sessions
            .read()
            .values()
            .find(|s| s.id() == Some(id))
            .map(|s| s.tag().clone())
    }
}

/// Read-only, cloneable view of the session registry
#[derive(Debug, Clone)]
pub struct RegistryView {
    sessions: Arc<RwLock<SessionMap>>,
}

impl RegistryView {
    /// Copy of every open session, oldest first
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.start_time());
        sessions
    }

    pub fn get(&self, tag: &Tag) -> Option<Session> {
        self.sessions.read().get(tag).cloned()
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.sessions.read().contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StationId;

    fn open_session(tag: &str) -> Session {
        let mut session = Session::new(StationId::new("1"), Tag::normalize(tag));
        session.open().unwrap();
        session
    }

    #[test]
    fn test_put_take_empties_registry() {
        let mut registry = SessionRegistry::new();
        assert!(registry.is_empty());

        registry.put(open_session("04 A1 B2")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&Tag::normalize("04A1B2")));

        let mut session = registry.take(&Tag::normalize("04A1B2")).unwrap();
        session.close().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_put_keeps_original() {
        let mut registry = SessionRegistry::new();
        let original = open_session("04A1B2");
        let original_id = original.id();
        registry.put(original).unwrap();

        let err = registry.put(open_session("04A1B2")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateSession(Tag::normalize("04A1B2")));

        let kept = registry.view().get(&Tag::normalize("04A1B2")).unwrap();
        assert_eq!(kept.id(), original_id);
        assert!(kept.is_open());
    }

    #[test]
    fn test_take_missing_tag() {
        let mut registry = SessionRegistry::new();
        registry.put(open_session("AA")).unwrap();

        let err = registry.take(&Tag::normalize("BB")).unwrap_err();
        assert_eq!(err, RegistryError::SessionNotFound(Tag::normalize("BB")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_by_id() {
        let mut registry = SessionRegistry::new();
        let session = open_session("0A 0B");
        let id = session.id().unwrap();
        registry.put(session).unwrap();
        registry.put(open_session("0C 0D")).unwrap();

        assert_eq!(registry.find_by_id(id), Some(Tag::normalize("0A0B")));
        assert_eq!(registry.find_by_id(SessionId::new_v4()), None);
    }

    #[test]
    fn test_view_tracks_writer() {
        let mut registry = SessionRegistry::new();
        let view = registry.view();

        registry.put(open_session("01")).unwrap();
        registry.put(open_session("02")).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.snapshot().len(), 2);

        registry.take(&Tag::normalize("01")).unwrap();
        assert!(!view.contains(&Tag::normalize("01")));
        assert!(view.contains(&Tag::normalize("02")));
    }
}
