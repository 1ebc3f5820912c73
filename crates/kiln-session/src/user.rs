//! The narrow seam to the per-channel user database.
//!
//! User and channel access data live outside this daemon (the host IPMI
//! stack owns them). RAKP1 needs exactly four facts: does the user exist,
//! is it enabled, what is its password, and what privilege ceilings apply.
//! [`UserStore`] carries those and nothing else. [`MemoryUserStore`] is the
//! in-process implementation used by tests and the demo binary.

use std::collections::HashMap;

use kiln_types::Privilege;
use zeroize::Zeroizing;

/// One user as seen by the RAKP handshake.
#[derive(Debug, Clone)]
pub struct UserEntry {
    pub user_id: u8,
    pub enabled: bool,
    /// Password bytes; wiped on drop.
    pub password: Zeroizing<Vec<u8>>,
    /// Highest privilege this user may hold on this channel.
    pub privilege_limit: Privilege,
    /// Whether the SOL payload is enabled for this user on this channel.
    pub sol_payload_enabled: bool,
}

/// Channel access data consulted during RAKP1.
#[derive(Debug, Clone, Copy)]
pub struct ChannelAccess {
    /// False when the channel access mode is disabled; RAKP is rejected.
    pub enabled: bool,
    /// Highest privilege any session may hold on this channel.
    pub privilege_limit: Privilege,
    /// Whether IPMI messaging is enabled for sessions on this channel.
    pub ipmi_enabled: bool,
}

impl Default for ChannelAccess {
    fn default() -> Self {
        Self {
            enabled: true,
            privilege_limit: Privilege::Admin,
            ipmi_enabled: true,
        }
    }
}

/// User lookup consumed by the handshake.
pub trait UserStore {
    /// Finds a user by name. `None` covers both "no such user" and lookup
    /// infrastructure failures; RAKP reports them identically.
    fn lookup(&self, user_name: &[u8]) -> Option<UserEntry>;

    /// Access data for the given channel.
    fn channel_access(&self, channel: u8) -> ChannelAccess;
}

/// In-memory user store.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: HashMap<Vec<u8>, UserEntry>,
    access: ChannelAccess,
    next_user_id: u8,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
            access: ChannelAccess::default(),
            next_user_id: 1,
        }
    }

    /// Adds an enabled user and returns its assigned id.
    pub fn add_user(
        &mut self,
        name: &[u8],
        password: &[u8],
        privilege_limit: Privilege,
    ) -> u8 {
        let user_id = self.next_user_id;
        self.next_user_id += 1;
        self.users.insert(
            name.to_vec(),
            UserEntry {
                user_id,
                enabled: true,
                password: Zeroizing::new(password.to_vec()),
                privilege_limit,
                sol_payload_enabled: true,
            },
        );
        user_id
    }

    /// Enables or disables the SOL payload for an existing user.
    pub fn set_sol_payload_enabled(&mut self, name: &[u8], enabled: bool) {
        if let Some(user) = self.users.get_mut(name) {
            user.sol_payload_enabled = enabled;
        }
    }

    /// Enables or disables an existing user.
    pub fn set_enabled(&mut self, name: &[u8], enabled: bool) {
        if let Some(user) = self.users.get_mut(name) {
            user.enabled = enabled;
        }
    }

    pub fn set_channel_access(&mut self, access: ChannelAccess) {
        self.access = access;
    }
}

impl UserStore for MemoryUserStore {
    fn lookup(&self, user_name: &[u8]) -> Option<UserEntry> {
        self.users.get(user_name).cloned()
    }

    fn channel_access(&self, _channel: u8) -> ChannelAccess {
        self.access
    }
}
