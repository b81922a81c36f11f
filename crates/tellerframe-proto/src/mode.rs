//! Endpoint roles and session modes.
//!
//! Each endpoint announces itself during the handshake with a literal that
//! encodes both what it is and whether it still needs provisioning:
//!
//! | Role            | Provisioning | Normal   |
//! |-----------------|--------------|----------|
//! | Card            | `CARD_P`     | `CARD_N` |
//! | SecurityModule  | `HSM_P`      | `HSM_N`  |

use std::fmt;

use crate::literals::cstr;

/// Which endpoint is on the responder side of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Identity token holding the PIN and account UUID
    Card,
    /// Cash vault holding the bill stack
    SecurityModule,
}

/// Mode fixed for the duration of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// First boot, secrets and inventory are being loaded
    Provisioning,
    /// Repeating operational exchanges
    Normal,
}

impl Role {
    /// Every role, in announcement-table order.
    pub const ALL: [Self; 2] = [Self::Card, Self::SecurityModule];

    /// Literal this role sends after `READY` in the given mode.
    pub fn announcement(self, mode: SessionMode) -> &'static [u8] {
        match (self, mode) {
            (Self::Card, SessionMode::Provisioning) => b"CARD_P",
            (Self::Card, SessionMode::Normal) => b"CARD_N",
            (Self::SecurityModule, SessionMode::Provisioning) => b"HSM_P",
            (Self::SecurityModule, SessionMode::Normal) => b"HSM_N",
        }
    }

    /// Recognise a mode announcement from any role.
    pub fn parse_announcement(payload: &[u8]) -> Option<(Self, SessionMode)> {
        let text = cstr(payload);
        Self::ALL.into_iter().find_map(|role| {
            [SessionMode::Provisioning, SessionMode::Normal]
                .into_iter()
                .find(|&mode| role.announcement(mode) == text)
                .map(|mode| (role, mode))
        })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Card => f.write_str("card"),
            Self::SecurityModule => f.write_str("security-module"),
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => f.write_str("provisioning"),
            Self::Normal => f.write_str("normal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcements_round_trip() {
        for role in Role::ALL {
            for mode in [SessionMode::Provisioning, SessionMode::Normal] {
                assert_eq!(Role::parse_announcement(role.announcement(mode)), Some((role, mode)));
            }
        }
    }

    #[test]
    fn unknown_announcement() {
        assert_eq!(Role::parse_announcement(b"READY"), None);
        assert_eq!(Role::parse_announcement(b"HSM_X"), None);
    }

    #[test]
    fn announcement_with_terminator() {
        assert_eq!(
            Role::parse_announcement(b"HSM_N\0"),
            Some((Role::SecurityModule, SessionMode::Normal))
        );
    }
}
