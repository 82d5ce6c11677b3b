//! Tests for the completion term protocol.

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::*;

const PIN_TTL_MINUTES: u32 = 10;
const MAX_ATTEMPTS: u32 = 5;

fn pending_term(pin: &str) -> CompletionTerm {
    CompletionTerm::new_pending(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Visit completion".to_owned(),
        pin,
        PIN_TTL_MINUTES,
        Utc::now(),
    )
}

#[test]
fn generated_pins_are_six_digits() {
    let mut rng = rand::thread_rng();
    for _ in 0..50 {
        let pin = generate_pin(&mut rng);
        assert!(pin_is_well_formed(&pin), "bad pin: {pin}");
    }
}

#[test]
fn pin_hash_is_stable_and_not_the_pin() {
    let hash = hash_pin("123456");
    assert_eq!(hash, hash_pin("123456"));
    assert_ne!(hash, "123456");
    assert_eq!(hash.len(), 64);
}

#[test]
fn correct_pin_accepts_and_clears_the_hash() {
    let mut term = pending_term("482910");
    term.validate_pin("482910", MAX_ATTEMPTS, Utc::now()).expect("valid pin");

    assert_eq!(term.status, TermStatus::AcceptedByClient);
    assert_eq!(term.accepted_with, Some(AcceptanceMethod::Pin));
    assert!(term.accepted_at_utc.is_some());
    assert!(term.pin_hash.is_none());
}

#[test]
fn accepted_term_rejects_replay() {
    let mut term = pending_term("482910");
    term.validate_pin("482910", MAX_ATTEMPTS, Utc::now()).expect("valid pin");

    let err = term
        .validate_pin("482910", MAX_ATTEMPTS, Utc::now())
        .expect_err("replay must fail");
    assert_eq!(err.error_code(), "invalid_state");
}

#[test]
fn mismatches_increment_and_then_lock() {
    let mut term = pending_term("482910");
    let now = Utc::now();

    for attempt in 1..MAX_ATTEMPTS {
        let err = term.validate_pin("000000", MAX_ATTEMPTS, now).expect_err("wrong pin");
        assert_eq!(err.error_code(), "invalid_pin", "attempt {attempt}");
        assert_eq!(term.pin_failed_attempts, attempt);
    }

    // The Nth consecutive mismatch locks the term.
    let err = term.validate_pin("000000", MAX_ATTEMPTS, now).expect_err("lock");
    assert_eq!(err.error_code(), "pin_locked");
    assert_eq!(term.pin_failed_attempts, MAX_ATTEMPTS);

    // Even the correct PIN is refused once locked.
    let err = term.validate_pin("482910", MAX_ATTEMPTS, now).expect_err("locked");
    assert_eq!(err.error_code(), "pin_locked");
    assert_eq!(term.status, TermStatus::PendingClientAcceptance);
}

#[test]
fn expired_pin_fails_even_when_correct() {
    let mut term = pending_term("482910");
    let late = Utc::now() + Duration::minutes(i64::from(PIN_TTL_MINUTES) + 1);

    let err = term.validate_pin("482910", MAX_ATTEMPTS, late).expect_err("expired");
    assert_eq!(err.error_code(), "pin_expired");
}

#[test]
fn malformed_pins_are_rejected_before_comparison() {
    let mut term = pending_term("482910");
    for bad in ["12345", "1234567", "12a456", "", "12 456"] {
        let err = term.validate_pin(bad, MAX_ATTEMPTS, Utc::now()).expect_err("malformed");
        assert_eq!(err.error_code(), "invalid_pin_format");
    }
    // Format rejections do not consume attempts.
    assert_eq!(term.pin_failed_attempts, 0);
}

#[test]
fn reissue_resets_expiry_and_attempts() {
    let mut term = pending_term("482910");
    let now = Utc::now();
    let _ = term.validate_pin("000000", MAX_ATTEMPTS, now);
    assert_eq!(term.pin_failed_attempts, 1);

    term.reissue_pin("915263", PIN_TTL_MINUTES, now);
    assert_eq!(term.pin_failed_attempts, 0);
    term.validate_pin("915263", MAX_ATTEMPTS, now).expect("new pin works");
}

#[test]
fn signature_acceptance_requires_a_name() {
    let mut term = pending_term("482910");
    let err = term.accept_with_signature("   ", Utc::now()).expect_err("empty name");
    assert_eq!(err.error_code(), "signature_required");

    term.accept_with_signature("Alex Souza", Utc::now()).expect("signed");
    assert_eq!(term.status, TermStatus::AcceptedByClient);
    assert_eq!(term.accepted_with, Some(AcceptanceMethod::Signature));
    assert_eq!(term.accepted_signature_name.as_deref(), Some("Alex Souza"));
    assert!(term.pin_hash.is_none());
}

#[test]
fn contest_requires_reason_and_blocks_acceptance() {
    let mut term = pending_term("482910");
    let err = term.contest("", Utc::now()).expect_err("empty reason");
    assert_eq!(err.error_code(), "contest_reason_required");

    term.contest("Work left unfinished", Utc::now()).expect("contested");
    assert_eq!(term.status, TermStatus::Contested);
    assert!(term.contested_at_utc.is_some());

    let err = term.validate_pin("482910", MAX_ATTEMPTS, Utc::now()).expect_err("contested");
    assert_eq!(err.error_code(), "invalid_state");
}

#[test]
fn escalation_only_from_contested() {
    let mut term = pending_term("482910");
    let err = term.escalate(Utc::now()).expect_err("not contested yet");
    assert_eq!(err.error_code(), "invalid_state");

    term.contest("Damage to property", Utc::now()).expect("contested");
    term.escalate(Utc::now()).expect("escalated");
    assert_eq!(term.status, TermStatus::Escalated);
    assert!(term.status.is_terminal());

    let err = term.escalate(Utc::now()).expect_err("terminal");
    assert_eq!(err.error_code(), "invalid_state");
}
