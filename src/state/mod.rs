mod session_record;
mod session_state;

pub use session_record::{ARCHIVED_STATES_MAX_LENGTH, SessionRecord};
pub use session_state::{MAX_MESSAGE_KEYS, MAX_RECEIVER_CHAINS, PendingPreKey, SessionState};
