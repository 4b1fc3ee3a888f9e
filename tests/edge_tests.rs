//! Edge case tests for the trust and integrity layer
//!
//! Covers races the happy-path tests cannot reach:
//! - Concurrent submissions of the same CSRF token
//! - Concurrent duplicate ballots from one voter
//! - Challenge single-use and answer normalization
//! - Identifier uniqueness at scale
//! - Event log retention bounds

use castguard::{
    Result,
    security::{
        ChallengeResponse, LoginOutcome, SessionValidation, TrustLayer, VoteCategory, VoteOutcome,
    },
};
use std::collections::HashSet;
use std::sync::Arc;

fn login(layer: &TrustLayer, principal: &str) -> (castguard::security::SessionHandle, String) {
    match layer.login(principal, true, "10.0.0.1", None).unwrap() {
        LoginOutcome::Success { handle, csrf_token } => (handle, csrf_token),
        other => panic!("Expected login success, got {other:?}"),
    }
}

// =============================================================================
// CONCURRENT OPERATIONS
// =============================================================================

#[tokio::test]
async fn test_concurrent_same_token_submission_accepts_exactly_one() -> Result<()> {
    println!("🏁 Testing concurrent double-submit of one CSRF token...");

    let layer = Arc::new(TrustLayer::for_testing());
    let (handle, csrf_token) = login(&layer, "racer");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let layer = Arc::clone(&layer);
        let handle = handle.clone();
        let token = csrf_token.clone();
        tasks.push(tokio::spawn(async move {
            layer
                .submit_vote(&handle, &token, VoteCategory::Language, b"Rust")
                .unwrap()
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            VoteOutcome::Accepted { .. } => accepted += 1,
            VoteOutcome::Rejected | VoteOutcome::AlreadyVoted => rejected += 1,
        }
    }

    // The consume is atomic: one winner, and one ledger entry
    assert_eq!(accepted, 1);
    assert_eq!(rejected, 7);
    assert_eq!(layer.ledger().ledger_stats()?.total_entries, 1);
    assert_eq!(layer.ledger().tally(VoteCategory::Language)?, 1);

    println!("✅ Concurrent double-submit passed");
    Ok(())
}

#[tokio::test]
async fn test_concurrent_duplicate_ballots_single_entry() -> Result<()> {
    println!("🏁 Testing concurrent duplicate ballots with distinct tokens...");

    let layer = Arc::new(TrustLayer::for_testing());
    let (handle, first_token) = login(&layer, "dupe");

    // Distinct valid tokens, one per task, so only the ledger can arbitrate
    let mut tokens = vec![first_token];
    for _ in 0..7 {
        tokens.push(layer.csrf().issue(handle.id())?);
    }

    let mut tasks = Vec::new();
    for token in tokens {
        let layer = Arc::clone(&layer);
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            layer
                .submit_vote(&handle, &token, VoteCategory::Team, b"Infra")
                .unwrap()
        }));
    }

    let mut accepted = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), VoteOutcome::Accepted { .. }) {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(layer.ledger().ledger_stats()?.total_entries, 1);
    assert_eq!(layer.ledger().tally(VoteCategory::Team)?, 1);
    assert!(layer.reconcile()?.is_consistent());

    println!("✅ Concurrent duplicate ballots passed");
    Ok(())
}

#[tokio::test]
async fn test_concurrent_failure_recording_is_complete() -> Result<()> {
    println!("🏁 Testing concurrent failure recording...");

    let layer = Arc::new(TrustLayer::for_testing());

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let layer = Arc::clone(&layer);
        tasks.push(tokio::spawn(async move {
            layer.login("burst", false, "203.0.113.50", None).unwrap()
        }));
    }
    for task in tasks {
        // Late arrivals may already be challenged instead of plainly denied
        assert!(matches!(
            task.await.unwrap(),
            LoginOutcome::Denied | LoginOutcome::ChallengeRequired(_)
        ));
    }

    // No failure lost to a race: the gate must now challenge
    assert!(layer.gate().should_challenge("burst", "203.0.113.50")?);

    println!("✅ Concurrent failure recording passed");
    Ok(())
}

#[test]
fn test_concurrent_session_starts_complete() {
    println!("🏁 Testing concurrent session starts over shared principals...");

    let layer = Arc::new(TrustLayer::for_testing());

    // Mixed start and regenerate traffic drives both lock acquisition
    // paths in the store at once
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let layer = Arc::clone(&layer);
            std::thread::spawn(move || {
                for i in 0..200usize {
                    let principal = format!("shared_{}", (i + t) % 8);
                    if i % 2 == 0 {
                        let _ = layer.sessions().start(&principal);
                    } else {
                        let _ = layer.sessions().start_regenerated(&principal);
                    }
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    // Every principal ends with at most one live session
    let stats = layer.sessions().session_stats().unwrap();
    assert!(stats.active_sessions <= 8);

    println!("✅ Concurrent session starts passed");
}

#[test]
fn test_multibyte_forged_cookie_rejected() -> Result<()> {
    println!("🧨 Testing forged cookie with multi-byte characters...");

    let layer = TrustLayer::for_testing();

    // An adversarial cookie whose ninth byte sits inside a multi-byte
    // character must degrade to a rejection, never a crash
    let forged = layer.sessions().handle_from_cookie("aaaaaaaé-偽造クッキー");

    let outcome = layer.submit_vote(&forged, "token", VoteCategory::Language, b"x")?;
    assert!(matches!(outcome, VoteOutcome::Rejected));
    assert_eq!(layer.ledger().ledger_stats()?.total_entries, 0);

    // Logout with the forged handle is a no-op, not a panic
    layer.logout(&forged)?;

    println!("✅ Forged multi-byte cookie passed");
    Ok(())
}

// =============================================================================
// CHALLENGE SEMANTICS
// =============================================================================

#[test]
fn test_challenge_is_single_use() -> Result<()> {
    println!("🧩 Testing challenge single-use...");

    let layer = TrustLayer::for_testing();
    let payload = layer.gate().issue_challenge()?;

    // First verification consumes the challenge regardless of the verdict
    assert!(!layer.gate().verify_challenge(&payload.challenge_id, "no")?);
    assert!(!layer.gate().verify_challenge(&payload.challenge_id, "no")?);

    println!("✅ Challenge single-use passed");
    Ok(())
}

#[test]
fn test_challenge_answer_whitespace_normalized() -> Result<()> {
    println!("🧩 Testing challenge answer normalization...");

    let layer = TrustLayer::for_testing();
    for _ in 0..3 {
        layer.login("pad", false, "10.9.9.9", None)?;
    }

    let payload = match layer.login("pad", true, "10.9.9.9", None)? {
        LoginOutcome::ChallengeRequired(payload) => payload,
        other => panic!("Expected challenge, got {other:?}"),
    };

    let numbers: Vec<u64> = payload
        .question
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().unwrap())
        .collect();
    let answer = format!("  {}  ", numbers[0] + numbers[1]);

    let outcome = layer.login(
        "pad",
        true,
        "10.9.9.9",
        Some(ChallengeResponse {
            challenge_id: payload.challenge_id,
            answer,
        }),
    )?;
    assert!(matches!(outcome, LoginOutcome::Success { .. }));

    println!("✅ Challenge answer normalization passed");
    Ok(())
}

// =============================================================================
// IDENTIFIER PROPERTIES
// =============================================================================

#[test]
fn test_session_and_token_identifiers_unique_at_scale() -> Result<()> {
    println!("🎲 Testing identifier uniqueness...");

    let layer = TrustLayer::for_testing();
    let (handle, first_token) = login(&layer, "scale");

    let mut seen = HashSet::new();
    seen.insert(first_token);
    for _ in 0..500 {
        assert!(seen.insert(layer.csrf().issue(handle.id())?));
    }

    // Opaque, fixed-width hex
    for token in &seen {
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    println!("✅ Identifier uniqueness passed");
    Ok(())
}

#[test]
fn test_regeneration_preserves_principal_and_kills_old_id() -> Result<()> {
    println!("🔄 Testing in-place session regeneration...");

    let layer = TrustLayer::for_testing();
    let (old, _) = login(&layer, "walker");

    let fresh = layer.sessions().regenerate(&old)?;
    assert_ne!(old.id(), fresh.id());

    assert!(matches!(
        layer.sessions().validate(&old)?,
        SessionValidation::Revoked
    ));
    match layer.sessions().validate(&fresh)? {
        SessionValidation::Valid { principal } => assert_eq!(principal, "walker"),
        other => panic!("Expected valid session, got {other:?}"),
    }

    println!("✅ Session regeneration passed");
    Ok(())
}

#[test]
fn test_logout_is_idempotent() -> Result<()> {
    println!("🚪 Testing idempotent logout...");

    let layer = TrustLayer::for_testing();
    let (handle, _) = login(&layer, "leaver");

    layer.logout(&handle)?;
    // Second logout of the same handle must not error
    layer.logout(&handle)?;

    assert!(matches!(
        layer.sessions().validate(&handle)?,
        SessionValidation::Revoked
    ));

    println!("✅ Idempotent logout passed");
    Ok(())
}

// =============================================================================
// RESOURCE BOUNDS
// =============================================================================

#[test]
fn test_event_log_retention_is_bounded() -> Result<()> {
    println!("📚 Testing event log retention bound...");

    use castguard::security::{EventCategory, Severity};

    let layer = TrustLayer::for_testing();

    // Testing profile retains 1000 events; generate well past that
    for i in 0..1200 {
        layer.events().log(
            EventCategory::Authentication,
            Severity::Info,
            "login denied",
            &[("principal", &format!("flood_{i}"))],
        );
    }

    let recent = layer.events().recent_events(usize::MAX);
    assert_eq!(recent.len(), 1000);

    // Oldest events were evicted, newest survive
    assert_eq!(
        recent.last().and_then(|e| e.context.get("principal")).map(String::as_str),
        Some("flood_1199")
    );

    println!("✅ Event log retention bound passed");
    Ok(())
}

#[test]
fn test_verify_range_beyond_chain_end() -> Result<()> {
    println!("🔍 Testing integrity verification past the chain end...");

    let layer = TrustLayer::for_testing();
    let (handle, token) = login(&layer, "ranger");
    layer.submit_vote(&handle, &token, VoteCategory::Both, b"ballot")?;

    // Range far beyond the last sequence audits what exists, cleanly
    let report = layer.verify_integrity(1..=10_000)?;
    assert!(report.is_clean());
    assert_eq!(report.audited_count, 1);

    println!("✅ Range verification passed");
    Ok(())
}
