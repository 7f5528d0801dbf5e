use crate::proto::RecordStructure;
use crate::state::SessionState;
use crate::{Error, X25519PublicKey};
use prost::Message;
use std::collections::VecDeque;

/// Archived states kept per record; the oldest is evicted first.
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

/// Everything known about the session with one remote device: the current
/// ratchet state and a bounded list of archived ones.
///
/// Archived states stay around so that messages encrypted under a session
/// that has since been replaced can still be decrypted.
#[derive(Clone)]
pub struct SessionRecord {
    current: Option<SessionState>,
    previous: VecDeque<SessionState>,
    fresh: bool,
}

impl SessionRecord {
    /// An empty record that has never been persisted.
    pub fn new_fresh() -> Self {
        Self {
            current: None,
            previous: VecDeque::new(),
            fresh: true,
        }
    }

    pub fn new(state: SessionState) -> Self {
        Self {
            current: Some(state),
            previous: VecDeque::new(),
            fresh: false,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn session_state(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    pub(crate) fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous.iter()
    }

    pub fn previous_session_count(&self) -> usize {
        self.previous.len()
    }

    /// Whether the current or any archived state was built from this handshake.
    pub fn has_session_state(&self, version: u32, alice_base_key: &X25519PublicKey) -> bool {
        self.current
            .iter()
            .chain(self.previous.iter())
            .any(|state| {
                state.session_version() == version && state.alice_base_key() == alice_base_key
            })
    }

    /// Archives the current state (if any) and installs `state` as current.
    pub fn promote_state(&mut self, state: SessionState) {
        self.archive_current_state();
        self.current = Some(state);
    }

    /// Moves the current state to the front of the archive.
    pub fn archive_current_state(&mut self) {
        if let Some(current) = self.current.take() {
            self.previous.push_front(current);
            self.previous.truncate(ARCHIVED_STATES_MAX_LENGTH);
        }
    }

    /// Replaces the current state without archiving it.
    pub(crate) fn set_session_state(&mut self, state: SessionState) {
        self.current = Some(state);
    }

    /// Drops archived state `index` and promotes `updated` in its place.
    pub(crate) fn promote_old_session(&mut self, index: usize, updated: SessionState) {
        self.previous.remove(index);
        self.promote_state(updated);
    }

    pub fn serialize(&self) -> Vec<u8> {
        RecordStructure {
            current_session: self.current.as_ref().map(SessionState::to_proto),
            previous_sessions: self.previous.iter().map(SessionState::to_proto).collect(),
        }
        .encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = RecordStructure::decode(bytes)?;

        Ok(Self {
            current: proto.current_session.map(SessionState::from_proto).transpose()?,
            previous: proto
                .previous_sessions
                .into_iter()
                .map(SessionState::from_proto)
                .collect::<Result<_, Error>>()?,
            fresh: false,
        })
    }
}
