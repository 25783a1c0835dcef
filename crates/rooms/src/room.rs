use std::collections::BTreeSet;

use domain::ClientId;

/// Room record. `version` never decreases and is incremented by exactly 1
/// per accepted update; `members` holds client ids rather than connection
/// handles so the registry remains the single owner of connection state.
pub struct Room {
    pub version: u64,
    pub text: String,
    pub members: BTreeSet<ClientId>,
}

impl Room {
    pub fn new() -> Self {
        Self { version: 0, text: String::new(), members: BTreeSet::new() }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}
