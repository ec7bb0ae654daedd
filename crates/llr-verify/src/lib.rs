//! One-time verification service.
//!
//! Issues and checks the 6-digit code that gates seller confirmation. The
//! code is bound to one BuyRequest, expires after ten minutes, and is
//! single-use. Expiry is an explicit timestamp on the entity checked at
//! verification time. No background timer exists, and an expired code never
//! drives a state transition by itself.

use chrono::{DateTime, Utc};
use llr_schemas::{code_ttl, BuyRequest};
use rand::Rng;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock seam. Production uses [`SystemClock`]; tests substitute a
/// manually stepped clock so expiry can be simulated without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Code generation
// ---------------------------------------------------------------------------

/// Draw a fresh 6-digit code. Leading zeros are preserved ("004829" is a
/// valid code), so the keyspace is exactly 10^6.
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

// ---------------------------------------------------------------------------
// Issue / verify
// ---------------------------------------------------------------------------

/// Issue a code for this request, invalidating any prior unconsumed code.
///
/// Returns the issued code so the caller can hand it to the out-of-band
/// notification channel (and so tests can assert against it). The code must
/// never be logged on production paths.
pub fn issue(req: &mut BuyRequest, now: DateTime<Utc>) -> String {
    let code = generate_code();
    req.two_factor_code = Some(code.clone());
    req.two_factor_expires_at = Some(now + code_ttl());
    req.two_factor_verified = false;
    code
}

/// Check a submitted code against the request.
///
/// Returns `false` (never errors) when no code is pending, the code has
/// expired, or the code mismatches. On success the code is consumed: the
/// stored code and expiry are cleared and `two_factor_verified` is set, so a
/// second `verify` with the same code is idempotently `false`.
pub fn verify(req: &mut BuyRequest, submitted: &str, now: DateTime<Utc>) -> bool {
    let Some(stored) = req.two_factor_code.as_deref() else {
        return false;
    };
    if req.code_expired(now) {
        return false;
    }
    if stored != submitted {
        return false;
    }
    req.two_factor_code = None;
    req.two_factor_expires_at = None;
    req.two_factor_verified = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use llr_schemas::ActorId;
    use uuid::Uuid;

    fn make_request(now: DateTime<Utc>) -> BuyRequest {
        BuyRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ActorId(Uuid::new_v4()),
            ActorId(Uuid::new_v4()),
            500_000,
            now,
        )
    }

    #[test]
    fn generated_code_is_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()), "code: {code}");
        }
    }

    #[test]
    fn issue_sets_code_and_expiry() {
        let now = Utc::now();
        let mut req = make_request(now);
        let code = issue(&mut req, now);
        assert_eq!(req.two_factor_code.as_deref(), Some(code.as_str()));
        assert_eq!(req.two_factor_expires_at, Some(now + code_ttl()));
        assert!(!req.two_factor_verified);
    }

    #[test]
    fn verify_correct_code_consumes_it() {
        let now = Utc::now();
        let mut req = make_request(now);
        let code = issue(&mut req, now);

        assert!(verify(&mut req, &code, now));
        assert!(req.two_factor_verified);
        assert!(req.two_factor_code.is_none());
        assert!(req.two_factor_expires_at.is_none());

        // Replay with the same code: nothing left to check.
        assert!(!verify(&mut req, &code, now));
    }

    #[test]
    fn verify_wrong_code_fails_and_leaves_code_pending() {
        let now = Utc::now();
        let mut req = make_request(now);
        let code = issue(&mut req, now);
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert!(!verify(&mut req, wrong, now));
        assert!(!req.two_factor_verified);
        // Original code remains usable.
        assert!(verify(&mut req, &code, now));
    }

    #[test]
    fn verify_expired_code_fails() {
        let now = Utc::now();
        let mut req = make_request(now);
        let code = issue(&mut req, now);

        // 11 simulated minutes later.
        let later = now + Duration::minutes(11);
        assert!(!verify(&mut req, &code, later));
        assert!(!req.two_factor_verified);
    }

    #[test]
    fn verify_at_exact_expiry_still_passes() {
        // Expiry is `now > expires_at`; the boundary instant is accepted.
        let now = Utc::now();
        let mut req = make_request(now);
        let code = issue(&mut req, now);
        assert!(verify(&mut req, &code, now + code_ttl()));
    }

    #[test]
    fn reissue_invalidates_prior_code() {
        let now = Utc::now();
        let mut req = make_request(now);
        let first = issue(&mut req, now);
        let second = issue(&mut req, now + Duration::minutes(1));

        // The stale code must not verify even if it differs from the fresh one.
        if first != second {
            assert!(!verify(&mut req, &first, now + Duration::minutes(2)));
        }
        assert!(verify(&mut req, &second, now + Duration::minutes(2)));
    }

    #[test]
    fn verify_without_issued_code_fails() {
        let now = Utc::now();
        let mut req = make_request(now);
        assert!(!verify(&mut req, "123456", now));
    }
}
