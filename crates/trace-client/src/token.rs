//! Bearer token cache: a single cached token with the source's renewal
//! rule ("renew iff cached `exp` is within 1s of now"), serialized through
//! a `tokio::sync::Mutex` so concurrent callers singleflight the login.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

/// How far ahead of expiry a token is considered stale.
const RENEWAL_SKEW_SECS: i64 = 1;

#[derive(Debug, Clone)]
pub(crate) struct CachedToken {
    pub token: String,
    pub exp: i64,
}

impl CachedToken {
    pub fn is_stale(&self, now: i64) -> bool {
        self.exp <= now + RENEWAL_SKEW_SECS
    }
}

#[derive(Deserialize)]
struct UnverifiedClaims {
    exp: i64,
}

/// Parse the `exp` claim out of a JWT's payload segment without verifying
/// its signature — the client trusts the account service that just handed
/// it the token over TLS. Falls back to `now + 5min` for tokens that are
/// not a three-segment JWT (e.g. an opaque token in a test double), since
/// the login round trip always requests a 5 minute lifetime.
pub(crate) fn exp_of(token: &str, now: i64) -> i64 {
    token
        .split('.')
        .nth(1)
        .and_then(|payload| URL_SAFE_NO_PAD.decode(payload).ok())
        .and_then(|bytes| serde_json::from_slice::<UnverifiedClaims>(&bytes).ok())
        .map(|claims| claims.exp)
        .unwrap_or(now + 300)
}

#[cfg(test)]
mod test {
    use super::*;

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn extracts_exp_from_jwt() {
        assert_eq!(exp_of(&jwt_with_exp(12345), 0), 12345);
    }

    #[test]
    fn falls_back_for_opaque_tokens() {
        assert_eq!(exp_of("opaque-test-token", 1000), 1300);
    }

    #[test]
    fn stale_exactly_at_one_second_skew() {
        let tok = CachedToken { token: "t".into(), exp: 101 };
        assert!(tok.is_stale(100));
        assert!(!tok.is_stale(99));
    }
}
