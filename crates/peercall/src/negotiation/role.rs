//! Offer/answer role selection

use crate::signaling::{LocalIdentity, PeerIdentity};
use crate::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// Which side of a pairing produces the initial offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the offer as soon as the transport exists
    Offerer,
    /// Waits for the remote offer
    Answerer,
}

impl Role {
    /// Decide the local role for a pairing
    ///
    /// The side whose identity sorts first (plain string comparison) offers.
    /// Both sides evaluate the same total order, so exactly one of them
    /// offers. Identical identities cannot be ordered and are rejected.
    pub fn for_pair(local: &LocalIdentity, peer: &PeerIdentity) -> Result<Role> {
        match local.cmp(peer) {
            Ordering::Less => Ok(Role::Offerer),
            Ordering::Greater => Ok(Role::Answerer),
            Ordering::Equal => Err(Error::InvalidState(format!(
                "peer identity {} equals the local identity",
                peer
            ))),
        }
    }

    /// Whether this side sends the initial offer
    pub fn is_offerer(self) -> bool {
        self == Role::Offerer
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offerer => f.write_str("offerer"),
            Role::Answerer => f.write_str("answerer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::ConnectionId;

    #[test]
    fn test_smaller_identity_offers() {
        let aa = ConnectionId::from("aa");
        let bb = ConnectionId::from("bb");
        assert_eq!(Role::for_pair(&aa, &bb).unwrap(), Role::Offerer);
        assert_eq!(Role::for_pair(&bb, &aa).unwrap(), Role::Answerer);
    }

    #[test]
    fn test_exactly_one_side_offers() {
        let ids = ["aa", "ab", "b", "Ba", "a10", "a9", "", "zz-1"];
        for x in ids {
            for y in ids {
                if x == y {
                    continue;
                }
                let (x, y) = (ConnectionId::from(x), ConnectionId::from(y));
                let x_offers = Role::for_pair(&x, &y).unwrap().is_offerer();
                let y_offers = Role::for_pair(&y, &x).unwrap().is_offerer();
                assert!(x_offers ^ y_offers, "{} vs {}", x, y);
            }
        }
    }

    #[test]
    fn test_identical_identities_rejected() {
        let id = ConnectionId::from("aa");
        assert!(matches!(
            Role::for_pair(&id, &id),
            Err(Error::InvalidState(_))
        ));
    }
}
