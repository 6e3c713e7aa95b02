//! End-to-end lifecycle behavior over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use sessionward_auth::prelude::*;
use sessionward_auth::{
    ChannelAuditSink, NoopAuditSink, RotationPolicy, fingerprint, generate_refresh_id,
};

const SECRET: &str = "lifecycle-test-secret-lifecycle-test";

fn test_config() -> LifecycleConfig {
    let mut config = LifecycleConfig {
        issuer: "https://auth.example.com".to_string(),
        ..LifecycleConfig::default()
    };
    config.signing.current = SigningKeyConfig::hmac("2026-10", SECRET);
    config
}

fn manager() -> (Arc<MemoryTokenStore>, LifecycleManager) {
    let store = Arc::new(MemoryTokenStore::new());
    let manager =
        LifecycleManager::from_config(test_config(), store.clone(), Arc::new(NoopAuditSink))
            .expect("valid config");
    (store, manager)
}

fn short_lived_manager(refresh_ttl: Duration) -> LifecycleManager {
    let key = SigningKeyPair::from_secret("k1", SigningAlgorithm::HS256, SECRET.as_bytes())
        .expect("hmac key");
    LifecycleManager::from_parts(
        Arc::new(MemoryTokenStore::new()),
        Arc::new(TokenCodec::new("https://auth.example.com", key)),
        Arc::new(NoopAuditSink),
        RotationPolicy {
            access_ttl: Duration::from_secs(60),
            refresh_ttl,
            session_max_age: None,
            store_timeout: Duration::from_millis(300),
        },
    )
}

#[tokio::test]
async fn example_scenario_forces_relogin() {
    let (_, manager) = manager();

    let first = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();
    let second = manager.refresh(&first.refresh_token).await.unwrap();

    let replay = manager.refresh(&first.refresh_token).await.unwrap_err();
    assert!(replay.is_replay());
    assert_eq!(replay.status_code(), 401);

    let err = manager.refresh(&second.refresh_token).await.unwrap_err();
    assert!(matches!(err, LifecycleError::AuthRevoked));

    // The access token itself stays valid until expiry.
    assert!(manager.verify_access_token(&second.access_token).is_ok());
}

#[tokio::test]
async fn single_use_sequential() {
    let (_, manager) = manager();
    let pair = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();

    assert!(manager.refresh(&pair.refresh_token).await.is_ok());
    for _ in 0..3 {
        let err = manager.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::AuthReplay { .. } | LifecycleError::AuthRevoked
        ));
    }
}

#[tokio::test]
async fn lineage_forms_single_chain() {
    let (_, manager) = manager();
    const ROTATIONS: usize = 8;

    let mut pair = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();
    let family_id = pair.family_id.clone();
    let mut issued = vec![pair.refresh_token.clone()];

    for _ in 0..ROTATIONS {
        pair = manager.refresh(&pair.refresh_token).await.unwrap();
        assert_eq!(pair.family_id, family_id);
        issued.push(pair.refresh_token.clone());
    }

    let lineage = manager.family_lineage(&family_id).await.unwrap();
    assert_eq!(lineage.len(), ROTATIONS + 1);

    // Oldest first, each record's parent is its predecessor.
    assert!(lineage[0].parent_id.is_none());
    for window in lineage.windows(2) {
        assert_eq!(
            window[1].parent_id.as_deref(),
            Some(window[0].token_id.as_str())
        );
    }
    let ids: Vec<&str> = lineage.iter().map(|r| r.token_id.as_str()).collect();
    let expected: Vec<&str> = issued.iter().map(String::as_str).collect();
    assert_eq!(ids, expected);

    // Every record but the head is consumed.
    let (head, rest) = lineage.split_last().unwrap();
    assert_eq!(head.status, TokenStatus::Active);
    assert!(rest.iter().all(|r| r.status == TokenStatus::Consumed));
}

#[tokio::test]
async fn replay_revokes_descendants() {
    let (store, manager) = manager();
    let first = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();
    let second = manager.refresh(&first.refresh_token).await.unwrap();
    let third = manager.refresh(&second.refresh_token).await.unwrap();

    // An attacker replays the oldest token.
    assert!(manager.refresh(&first.refresh_token).await.unwrap_err().is_replay());

    assert!(matches!(
        manager.refresh(&third.refresh_token).await,
        Err(LifecycleError::AuthRevoked)
    ));
    let head = store.get(&third.refresh_token).await.unwrap().unwrap();
    assert_eq!(head.status, TokenStatus::Revoked);

    // Consumed records keep their terminal state.
    let root = store.get(&first.refresh_token).await.unwrap().unwrap();
    assert_eq!(root.status, TokenStatus::Consumed);
    assert!(root.revoked_at.is_none());
}

#[tokio::test]
async fn replay_leaves_other_sessions_alone() {
    let (_, manager) = manager();
    let laptop = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();
    let phone = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();

    manager.refresh(&laptop.refresh_token).await.unwrap();
    let _ = manager.refresh(&laptop.refresh_token).await;

    assert!(manager.refresh(&phone.refresh_token).await.is_ok());
}

#[tokio::test]
async fn expired_refresh_token_is_invalid() {
    let manager = short_lived_manager(Duration::from_millis(200));
    let pair = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(matches!(
        manager.refresh(&pair.refresh_token).await,
        Err(LifecycleError::AuthInvalid)
    ));
    assert!(matches!(
        manager.revoke(&pair.refresh_token).await,
        Err(LifecycleError::AuthInvalid)
    ));
}

#[tokio::test]
async fn revoke_is_idempotent() {
    let (_, manager) = manager();
    let pair = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();

    manager.revoke(&pair.refresh_token).await.unwrap();
    manager.revoke(&pair.refresh_token).await.unwrap();

    assert!(matches!(
        manager.refresh(&pair.refresh_token).await,
        Err(LifecycleError::AuthRevoked)
    ));
}

#[tokio::test]
async fn unknown_and_malformed_tokens_are_invalid() {
    let (_, manager) = manager();
    let unknown = generate_refresh_id();
    let long = "x".repeat(10_000);

    for token in [unknown.as_str(), "", "not a token", long.as_str(), "🦀🦀🦀"] {
        assert!(matches!(
            manager.refresh(token).await,
            Err(LifecycleError::AuthInvalid)
        ));
        assert!(matches!(
            manager.revoke(token).await,
            Err(LifecycleError::AuthInvalid)
        ));
    }
}

#[tokio::test]
async fn log_out_all_devices() {
    let (_, manager) = manager();
    let sessions: Vec<TokenPair> = {
        let mut pairs = Vec::new();
        for _ in 0..3 {
            pairs.push(
                manager
                    .issue("alice", SessionClaims::default())
                    .await
                    .unwrap(),
            );
        }
        pairs
    };
    let bob = manager
        .issue("bob", SessionClaims::default())
        .await
        .unwrap();

    assert_eq!(manager.active_sessions("alice").await.unwrap().len(), 3);

    let revoked = manager
        .revoke_all_sessions(SessionScope::User("alice".to_string()))
        .await
        .unwrap();
    assert_eq!(revoked, 3);

    for pair in &sessions {
        assert!(matches!(
            manager.refresh(&pair.refresh_token).await,
            Err(LifecycleError::AuthRevoked)
        ));
    }
    assert!(manager.active_sessions("alice").await.unwrap().is_empty());
    assert!(manager.refresh(&bob.refresh_token).await.is_ok());
}

#[tokio::test]
async fn revoke_session_from_access_token() {
    let (_, manager) = manager();
    let pair = manager
        .issue("alice", SessionClaims::with_role("admin"))
        .await
        .unwrap();

    let claims = manager.verify_access_token(&pair.access_token).unwrap();
    manager
        .revoke_all_sessions(SessionScope::Family(claims.sid))
        .await
        .unwrap();

    assert!(matches!(
        manager.refresh(&pair.refresh_token).await,
        Err(LifecycleError::AuthRevoked)
    ));
}

#[tokio::test]
async fn claims_survive_rotation() {
    let (_, manager) = manager();
    let claims = SessionClaims::with_role("clinician").claim("tenant", "north");
    let mut pair = manager.issue("alice", claims).await.unwrap();

    for _ in 0..3 {
        pair = manager.refresh(&pair.refresh_token).await.unwrap();
    }

    let verified = manager.verify_access_token(&pair.access_token).unwrap();
    assert_eq!(verified.sub, "alice");
    assert_eq!(verified.role.as_deref(), Some("clinician"));
    assert_eq!(verified.session_claims().extra["tenant"], "north");
}

#[tokio::test]
async fn signing_key_rotation_keeps_sessions_alive() {
    let store = Arc::new(MemoryTokenStore::new());

    let old = LifecycleManager::from_config(test_config(), store.clone(), Arc::new(NoopAuditSink))
        .unwrap();
    let pair = old.issue("alice", SessionClaims::default()).await.unwrap();

    let mut rotated = test_config();
    rotated.signing.previous = Some(rotated.signing.current.clone());
    rotated.signing.current =
        SigningKeyConfig::hmac("2026-11", "rotated-secret-rotated-secret-rotated");
    let new = LifecycleManager::from_config(rotated, store, Arc::new(NoopAuditSink)).unwrap();

    // Old access tokens verify during the grace window.
    assert!(new.verify_access_token(&pair.access_token).is_ok());

    // Refresh tokens are not tied to signing keys.
    let next = new.refresh(&pair.refresh_token).await.unwrap();
    assert!(new.verify_access_token(&next.access_token).is_ok());
    assert!(old.verify_access_token(&next.access_token).is_err());
}

#[tokio::test]
async fn audit_trail_uses_fingerprints() {
    let (sink, mut rx) = ChannelAuditSink::new(32);
    let manager = LifecycleManager::from_config(
        test_config(),
        Arc::new(MemoryTokenStore::new()),
        Arc::new(sink),
    )
    .unwrap();

    let first = manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();
    let second = manager.refresh(&first.refresh_token).await.unwrap();
    manager.revoke(&second.refresh_token).await.unwrap();

    let events: Vec<AuditEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let kinds: Vec<AuditEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventKind::Issued,
            AuditEventKind::Rotated,
            AuditEventKind::Revoked
        ]
    );
    assert_eq!(
        events[2].token_fp.as_deref(),
        Some(fingerprint(&second.refresh_token).as_str())
    );
    for event in &events {
        assert_eq!(event.user_id.as_deref(), Some("alice"));
        assert_eq!(event.family_id, first.family_id);
    }
}

#[tokio::test]
async fn cleanup_removes_expired_records() {
    let store = Arc::new(MemoryTokenStore::new());
    let key = SigningKeyPair::from_secret("k1", SigningAlgorithm::HS256, SECRET.as_bytes())
        .unwrap();
    let manager = LifecycleManager::from_parts(
        store.clone(),
        Arc::new(TokenCodec::new("https://auth.example.com", key)),
        Arc::new(NoopAuditSink),
        RotationPolicy {
            access_ttl: Duration::from_secs(1),
            refresh_ttl: Duration::from_millis(100),
            session_max_age: None,
            store_timeout: Duration::from_millis(300),
        },
    );

    manager
        .issue("alice", SessionClaims::default())
        .await
        .unwrap();
    assert_eq!(store.len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let removed = sessionward_auth::CleanupWorker::sweep(store.as_ref())
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.is_empty());
}
