//! Privilege model.
//!
//! Permissions form a strict hierarchy in which a *smaller* rank means
//! *more* privilege. `Banned` sits at the bottom and is terminal: a banned
//! account can neither log in nor send on any transport until an
//! administrator lifts the ban.

use std::fmt;

/// Privilege level attached to every account and live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Admin = 0,
    Moderator = 1,
    User = 2,
    Guest = 3,
    Banned = 4,
}

impl Permission {
    /// Numeric rank as carried on the wire and in the database.
    pub fn rank(self) -> i32 {
        self as i32
    }

    /// Parse a wire/database rank. Out-of-range values are rejected rather
    /// than mapped to a default so callers can surface the error.
    pub fn from_rank(rank: i32) -> Option<Self> {
        match rank {
            0 => Some(Self::Admin),
            1 => Some(Self::Moderator),
            2 => Some(Self::User),
            3 => Some(Self::Guest),
            4 => Some(Self::Banned),
            _ => None,
        }
    }

    /// True when this level grants at least the privilege of `required`.
    pub fn satisfies(self, required: Permission) -> bool {
        self.rank() <= required.rank()
    }

    /// Canonical upper-case name, as shown in handshake replies.
    pub fn name(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Moderator => "MODERATOR",
            Self::User => "USER",
            Self::Guest => "GUEST",
            Self::Banned => "BANNED",
        }
    }

    /// Bracketed privilege tag prepended to socket broadcasts. Plain users
    /// get no tag; guests and banned accounts never reach the broadcast
    /// path.
    pub fn socket_tag(self) -> &'static str {
        match self {
            Self::Admin => "[ADMIN] ",
            Self::Moderator => "[MODERATOR] ",
            _ => "",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
