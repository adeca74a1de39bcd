//! Anti-abuse checks run before any mutating operation
pub mod captcha;
pub mod tokens;

pub use captcha::{CaptchaGate, Challenge, ChallengeMedia, CAPTCHA_GRACE};
pub use tokens::{TokenTable, TOKEN_TTL};

use crate::error::Result;
use crate::model::Address;

/// Who is making a request, as far as the gate is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub address: Address,
    pub is_admin: bool,
}

impl Caller {
    /// Whether the caller may act on the node at `addr`.
    pub fn may_modify(&self, addr: &Address) -> bool {
        self.is_admin || self.address == *addr
    }
}

/// Reject the request unless it presents a valid token for the
/// caller's address. Admin callers are exempt.
pub fn require_token(tokens: &TokenTable, caller: &Caller, token: Option<u32>) -> Result<()> {
    if caller.is_admin {
        return Ok(());
    }
    match token {
        Some(token) if tokens.consume(&caller.address, token) => Ok(()),
        _ => Err(policy_error!("tokenInvalid")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_token() {
        let tokens = TokenTable::new();
        let caller = Caller {
            address: Address::parse("fc00::1").unwrap(),
            is_admin: false,
        };
        assert!(require_token(&tokens, &caller, None).is_err());
        let token = tokens.issue(caller.address);
        require_token(&tokens, &caller, Some(token)).unwrap();
        assert!(require_token(&tokens, &caller, Some(token)).is_err());

        let admin = Caller { is_admin: true, ..caller };
        require_token(&tokens, &admin, None).unwrap();
    }

    #[test]
    fn test_may_modify() {
        let a = Address::parse("fc00::1").unwrap();
        let b = Address::parse("fc00::2").unwrap();
        let caller = Caller { address: a, is_admin: false };
        assert!(caller.may_modify(&a));
        assert!(!caller.may_modify(&b));
        assert!(Caller { is_admin: true, ..caller }.may_modify(&b));
    }
}
