use std::fmt;
use std::str::FromStr;

/// Separator between the two usernames in a room name.
pub const ROOM_SEPARATOR: char = '_';

/// Canonical key for the pair `{a, b}`: both usernames sorted and joined,
/// so either participant reaches the same room from either direction.
pub fn canonical_room_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}{ROOM_SEPARATOR}{b}")
    } else {
        format!("{b}{ROOM_SEPARATOR}{a}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room name '{0}': expected exactly two usernames joined by '_'")]
pub struct RoomNameError(pub String);

/// A two-party room name as supplied by a caller, in path order.
///
/// `first`/`second` keep the order the caller used (the history cache is
/// keyed on it); [`RoomName::canonical_key`] is order-independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomName {
    first: String,
    second: String,
}

impl RoomName {
    pub fn parse(raw: &str) -> Result<Self, RoomNameError> {
        let mut parts = raw.split(ROOM_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(first), Some(second), None) if !first.is_empty() && !second.is_empty() => {
                Ok(Self {
                    first: first.to_string(),
                    second: second.to_string(),
                })
            }
            _ => Err(RoomNameError(raw.to_string())),
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    pub fn canonical_key(&self) -> String {
        canonical_room_key(&self.first, &self.second)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.first == username || self.second == username
    }
}

impl FromStr for RoomName {
    type Err = RoomNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ROOM_SEPARATOR}{}", self.first, self.second)
    }
}
