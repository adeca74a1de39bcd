//! Node status flags
use serde::{Deserialize, Serialize};

/// Independent status facets of a node. Packed into an integer on the
/// wire; each facet owns exactly one bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Status(u32);

impl Status {
    /// active / planned
    pub const ACTIVE: Status = Status(1 << 0);
    /// physical / virtual server
    pub const PHYSICAL: Status = Status(1 << 7);
    /// internet access / none
    pub const INTERNET: Status = Status(1 << 8);
    pub const WIRELESS: Status = Status(1 << 9);
    pub const WIRED: Status = Status(1 << 10);
    /// pingable / down
    pub const PINGABLE: Status = Status(1 << 24);

    pub const fn empty() -> Self {
        Status(0)
    }

    /// Bits without a name here are kept as-is, so a peer's extra
    /// flags survive being cached and served again.
    pub const fn from_bits(bits: u32) -> Self {
        Status(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: Status, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub fn with(mut self, flag: Status, on: bool) -> Self {
        self.set(flag, on);
        self
    }

    pub fn is_active(&self) -> bool {
        self.contains(Self::ACTIVE)
    }

    pub fn is_physical(&self) -> bool {
        self.contains(Self::PHYSICAL)
    }

    pub fn has_internet(&self) -> bool {
        self.contains(Self::INTERNET)
    }

    pub fn is_wireless(&self) -> bool {
        self.contains(Self::WIRELESS)
    }

    pub fn is_wired(&self) -> bool {
        self.contains(Self::WIRED)
    }

    pub fn is_pingable(&self) -> bool {
        self.contains(Self::PINGABLE)
    }
}

impl std::ops::BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Self) -> Self::Output {
        Status(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Status {
    type Output = Status;

    fn bitand(self, rhs: Self) -> Self::Output {
        Status(self.0 & rhs.0)
    }
}

impl From<u32> for Status {
    fn from(bits: u32) -> Self {
        Status::from_bits(bits)
    }
}

impl From<Status> for u32 {
    fn from(status: Status) -> Self {
        status.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_do_not_collide() {
        let all = [
            Status::ACTIVE,
            Status::PHYSICAL,
            Status::INTERNET,
            Status::WIRELESS,
            Status::WIRED,
            Status::PINGABLE,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_eq!(a.bits().count_ones(), 1);
            for b in all.iter().skip(i + 1) {
                assert_eq!((*a & *b).bits(), 0);
            }
        }
    }

    #[test]
    fn test_wireless_leaves_others() {
        let mut status = Status::ACTIVE | Status::PINGABLE;
        status.set(Status::WIRELESS, true);
        assert!(status.is_active());
        assert!(status.is_pingable());
        assert!(status.is_wireless());
        status.set(Status::WIRELESS, false);
        assert_eq!(status, Status::ACTIVE | Status::PINGABLE);
    }

    #[test]
    fn test_wire_form() {
        let status = Status::ACTIVE | Status::WIRED;
        assert_eq!(serde_json::to_string(&status).unwrap(), "1025");
        let back: Status = serde_json::from_str("1025").unwrap();
        assert!(back.is_wired());
    }

    #[test]
    fn test_unnamed_bits_survive() {
        let status: Status = serde_json::from_str("1073741825").unwrap();
        assert!(status.is_active());
        assert!(!status.is_wired());
        assert_eq!(status.bits(), (1 << 30) | 1);
        assert_eq!(serde_json::to_string(&status).unwrap(), "1073741825");
        assert_eq!(Status::from_bits(0b10).bits(), 0b10);
    }
}
