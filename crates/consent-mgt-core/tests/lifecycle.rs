// crates/consent-mgt-core/tests/lifecycle.rs
// ============================================================================
// Module: Lifecycle State Machine Tests
// Description: Transition table, lazy expiry, and approval mapping.
// Purpose: Pin the legal consent and authorization transitions.
// ============================================================================

//! Lifecycle rule tests.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use consent_mgt_core::ApprovalOutcome;
use consent_mgt_core::AuthorizationStatus;
use consent_mgt_core::Clock;
use consent_mgt_core::ConsentError;
use consent_mgt_core::ConsentStatus;
use consent_mgt_core::FixedClock;
use consent_mgt_core::LifecycleStateMachine;

// ============================================================================
// SECTION: Consent Transitions
// ============================================================================

#[test]
fn consent_transition_table_is_exact() {
    use consent_mgt_core::ConsentStatus::AwaitingAuthorization;
    use consent_mgt_core::ConsentStatus::Authorized;
    use consent_mgt_core::ConsentStatus::Created;
    use consent_mgt_core::ConsentStatus::Expired;
    use consent_mgt_core::ConsentStatus::Rejected;
    use consent_mgt_core::ConsentStatus::Revoked;

    let legal = [
        (Created, AwaitingAuthorization),
        (Created, Expired),
        (AwaitingAuthorization, Authorized),
        (AwaitingAuthorization, Rejected),
        (AwaitingAuthorization, Expired),
        (Authorized, Revoked),
        (Authorized, Expired),
        (Rejected, Revoked),
        (Rejected, Expired),
    ];
    for from in ConsentStatus::ALL {
        for to in ConsentStatus::ALL {
            let expected = legal.contains(&(from, to));
            assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            assert_eq!(LifecycleStateMachine::check_consent(from, to).is_ok(), expected);
        }
    }
}

#[test]
fn illegal_transition_reports_both_states() {
    let err =
        LifecycleStateMachine::check_consent(ConsentStatus::Authorized, ConsentStatus::Created)
            .unwrap_err();
    assert_eq!(
        err,
        ConsentError::InvalidStateTransition {
            from: "AUTHORIZED".to_string(),
            to: "CREATED".to_string(),
        }
    );
    assert_eq!(err.kind(), "invalid_state_transition");
    assert!(!err.is_retryable());
}

#[test]
fn terminal_states_have_no_exits() {
    for status in [ConsentStatus::Revoked, ConsentStatus::Expired] {
        assert!(status.is_terminal());
        assert!(ConsentStatus::ALL.iter().all(|target| !status.can_transition_to(*target)));
    }
}

// ============================================================================
// SECTION: Authorization Transitions
// ============================================================================

#[test]
fn authorization_decides_once() {
    assert!(
        LifecycleStateMachine::check_authorization(
            AuthorizationStatus::Created,
            AuthorizationStatus::Authorized
        )
        .is_ok()
    );
    assert!(
        LifecycleStateMachine::check_authorization(
            AuthorizationStatus::Created,
            AuthorizationStatus::Rejected
        )
        .is_ok()
    );
    let err = LifecycleStateMachine::check_authorization(
        AuthorizationStatus::Authorized,
        AuthorizationStatus::Rejected,
    )
    .unwrap_err();
    assert_eq!(
        err,
        ConsentError::InvalidStateTransition {
            from: "authorization AUTHORIZED".to_string(),
            to: "authorization REJECTED".to_string(),
        }
    );
}

#[test]
fn approval_maps_to_matching_labels() {
    let approved = ApprovalOutcome::from_approval(true);
    assert_eq!(approved.auth_status, AuthorizationStatus::Authorized);
    assert_eq!(approved.consent_status, ConsentStatus::Authorized);
    let rejected = ApprovalOutcome::from_approval(false);
    assert_eq!(rejected.auth_status, AuthorizationStatus::Rejected);
    assert_eq!(rejected.consent_status, ConsentStatus::Rejected);
}

// ============================================================================
// SECTION: Lazy Expiry
// ============================================================================

#[test]
fn lapsed_consents_read_as_expired() {
    let clock = FixedClock::new(1_000);
    assert_eq!(
        LifecycleStateMachine::effective_status(ConsentStatus::Authorized, 999, clock.now()),
        ConsentStatus::Expired
    );
    assert_eq!(
        LifecycleStateMachine::effective_status(ConsentStatus::Authorized, 1_000, clock.now()),
        ConsentStatus::Authorized
    );
    clock.advance(1);
    assert_eq!(
        LifecycleStateMachine::effective_status(ConsentStatus::Authorized, 1_000, clock.now()),
        ConsentStatus::Expired
    );
}

#[test]
fn zero_validity_never_lapses() {
    assert!(!LifecycleStateMachine::is_lapsed(0, i64::MAX));
    assert_eq!(
        LifecycleStateMachine::effective_status(ConsentStatus::Created, 0, i64::MAX),
        ConsentStatus::Created
    );
}

#[test]
fn terminal_status_is_kept_after_lapse() {
    assert_eq!(
        LifecycleStateMachine::effective_status(ConsentStatus::Revoked, 10, 1_000),
        ConsentStatus::Revoked
    );
}

#[test]
fn status_labels_round_trip() {
    for status in ConsentStatus::ALL {
        assert_eq!(ConsentStatus::from_label(status.as_str()), Some(status));
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, format!("\"{}\"", status.as_str()));
    }
    assert_eq!(ConsentStatus::from_label("authorized"), None);
}
