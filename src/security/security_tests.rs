//! Security Module Tests
//!
//! Cross-component tests for credentials, tokens, signed requests, rate
//! limiting, authorization and the admission gate.

#[cfg(test)]
mod credential_tests {
    use crate::security::auth::AuthManager;
    use crate::security::accounts::CredentialError;
    use crate::security::clock::ManualClock;
    use crate::security::config::SecuritySettings;
    use crate::security::events::{MockNotificationSink, NullSink, SecurityEvent};
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn settings() -> SecuritySettings {
        SecuritySettings {
            jwt_secret: "security-tests-secret-security-tests".into(),
            hash_iterations: 1_000,
            hash_workers: 2,
            max_concurrent_sessions: 3,
            ..SecuritySettings::default()
        }
    }

    #[tokio::test]
    async fn test_password_round_trip() {
        let clock = ManualClock::new(START);
        let auth = AuthManager::from_settings(&settings(), clock, Arc::new(NullSink));
        auth.create_account("alice", "P@ssw0rd!", "trader").await.unwrap();

        let user = auth.verify_password("alice", "P@ssw0rd!").await.unwrap();
        assert_eq!(user.role, "trader");
        assert_eq!(
            auth.verify_password("alice", "P@ssw0rd!x").await,
            Err(CredentialError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_short_password_is_rejected() {
        let clock = ManualClock::new(START);
        let auth = AuthManager::from_settings(&settings(), clock, Arc::new(NullSink));
        assert_eq!(
            auth.create_account("bob", "short", "viewer").await,
            Err(CredentialError::PasswordTooShort { min: 8 })
        );
        assert!(auth.account("bob").is_none());
    }

    #[tokio::test]
    async fn test_lockout_after_exact_attempts_and_auto_unlock() {
        let clock = ManualClock::new(START);
        let mut sink = MockNotificationSink::new();
        sink.expect_notify()
            .withf(|e| matches!(e, SecurityEvent::LoginFailed { .. }))
            .times(4)
            .return_const(());
        sink.expect_notify()
            .withf(|e| matches!(e, SecurityEvent::AccountLocked { username, .. } if username == "alice"))
            .times(1)
            .return_const(());

        let auth = AuthManager::from_settings(&settings(), clock.clone(), Arc::new(sink));
        auth.create_account("alice", "correct-horse", "trader").await.unwrap();

        for _ in 0..4 {
            assert_eq!(
                auth.verify_password("alice", "wrong").await,
                Err(CredentialError::InvalidCredentials)
            );
        }
        assert_eq!(
            auth.verify_password("alice", "wrong").await,
            Err(CredentialError::AccountLocked {
                retry_after_secs: 900
            })
        );

        // The right password does not help while locked
        assert!(matches!(
            auth.verify_password("alice", "correct-horse").await,
            Err(CredentialError::AccountLocked { .. })
        ));

        clock.advance(900_000);
        assert!(auth.verify_password("alice", "correct-horse").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let clock = ManualClock::new(START);
        let settings = settings();
        let auth = Arc::new(AuthManager::from_settings(&settings, clock, Arc::new(NullSink)));
        auth.create_account("alice", "correct-horse", "trader").await.unwrap();

        let attempts = settings.max_login_attempts as usize;
        let mut handles = Vec::new();
        for _ in 0..attempts {
            let auth = auth.clone();
            handles.push(tokio::spawn(async move {
                auth.verify_password("alice", "wrong-password").await
            }));
        }

        let mut invalid = 0;
        let mut locked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Err(CredentialError::InvalidCredentials) => invalid += 1,
                Err(CredentialError::AccountLocked { .. }) => locked += 1,
                other => panic!("unexpected result {other:?}"),
            }
        }
        assert_eq!(locked, 1);
        assert_eq!(invalid, attempts - 1);

        assert!(matches!(
            auth.verify_password("alice", "correct-horse").await,
            Err(CredentialError::AccountLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_user_is_invalid_credentials() {
        let clock = ManualClock::new(START);
        let auth = AuthManager::from_settings(&settings(), clock, Arc::new(NullSink));
        assert_eq!(
            auth.verify_password("ghost", "whatever-pass").await,
            Err(CredentialError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_create_account_overwrites_existing() {
        let clock = ManualClock::new(START);
        let auth = AuthManager::from_settings(&settings(), clock, Arc::new(NullSink));
        auth.create_account("alice", "first-password", "viewer").await.unwrap();
        auth.create_account("alice", "second-password", "trader").await.unwrap();

        assert_eq!(auth.account_count(), 1);
        assert!(auth.verify_password("alice", "first-password").await.is_err());
        let user = auth.verify_password("alice", "second-password").await.unwrap();
        assert_eq!(user.role, "trader");
    }
}

#[cfg(test)]
mod token_tests {
    use crate::security::auth::AuthManager;
    use crate::security::clock::ManualClock;
    use crate::security::config::SecuritySettings;
    use crate::security::events::NullSink;
    use crate::security::token::TokenError;
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn manager(clock: &Arc<ManualClock>) -> AuthManager {
        let settings = SecuritySettings {
            jwt_secret: "security-tests-secret-security-tests".into(),
            hash_iterations: 1_000,
            ..SecuritySettings::default()
        };
        AuthManager::from_settings(&settings, clock.clone(), Arc::new(NullSink))
    }

    #[test]
    fn test_issue_verify_round_trip_and_expiry() {
        let clock = ManualClock::new(START);
        let auth = manager(&clock);

        let token = auth.issue_token("alice", "trader").unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, "trader");
        assert_eq!(claims.exp - claims.iat, 900);

        clock.advance(899_000);
        assert!(auth.verify_token(&token).is_ok());
        clock.advance(1_000);
        assert_eq!(auth.verify_token(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_payload_tampering_breaks_signature() {
        let clock = ManualClock::new(START);
        let auth = manager(&clock);

        let trader = auth.issue_token("alice", "trader").unwrap();
        let admin = auth.issue_token("alice", "admin").unwrap();
        let trader_parts: Vec<&str> = trader.split('.').collect();
        let admin_parts: Vec<&str> = admin.split('.').collect();

        let tampered = format!("{}.{}.{}", trader_parts[0], admin_parts[1], trader_parts[2]);
        assert_eq!(auth.verify_token(&tampered), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_malformed_token() {
        let clock = ManualClock::new(START);
        let auth = manager(&clock);
        assert_eq!(auth.verify_token("not-a-token"), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn test_revocation_wins_over_validity() {
        let clock = ManualClock::new(START);
        let auth = manager(&clock);

        let token = auth.issue_token("alice", "trader").unwrap();
        auth.revoke(&token, None);
        assert_eq!(auth.verify_token(&token), Err(TokenError::Revoked));
        assert_eq!(auth.revoked_count(), 1);

        // Undecodable tokens are still held
        auth.revoke("garbage", None);
        assert_eq!(auth.verify_token("garbage"), Err(TokenError::Revoked));

        // Entries leave the blacklist once the token could no longer verify
        clock.advance(900_001);
        assert_eq!(auth.sweep(100), 2);
        assert_eq!(auth.revoked_count(), 0);
    }
}

#[cfg(test)]
mod session_tests {
    use crate::error::AppError;
    use crate::security::auth::AuthManager;
    use crate::security::clock::ManualClock;
    use crate::security::config::SecuritySettings;
    use crate::security::events::{MockNotificationSink, NullSink, SecurityEvent};
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn settings() -> SecuritySettings {
        SecuritySettings {
            jwt_secret: "security-tests-secret-security-tests".into(),
            hash_iterations: 1_000,
            max_concurrent_sessions: 3,
            ..SecuritySettings::default()
        }
    }

    #[tokio::test]
    async fn test_session_cap_evicts_oldest() {
        let clock = ManualClock::new(START);
        let auth = AuthManager::from_settings(&settings(), clock.clone(), Arc::new(NullSink));
        auth.create_account("alice", "alice-password", "trader").await.unwrap();

        let tokens: Vec<String> = (0..4)
            .map(|_| {
                clock.advance(10);
                auth.issue_refresh_token("alice", "10.0.0.1")
            })
            .collect();

        assert_eq!(auth.active_sessions("alice"), 3);
        let valid = tokens
            .iter()
            .filter(|t| auth.refresh_access_token(t, "10.0.0.1").is_ok())
            .count();
        assert_eq!(valid, 3);
        assert!(auth.refresh_access_token(&tokens[0], "10.0.0.1").is_err());
    }

    #[tokio::test]
    async fn test_refresh_uses_current_role() {
        let clock = ManualClock::new(START);
        let auth = AuthManager::from_settings(&settings(), clock, Arc::new(NullSink));
        auth.create_account("alice", "alice-password", "viewer").await.unwrap();

        let login = auth.login("alice", "alice-password", "10.0.0.1").await.unwrap();
        auth.create_account("alice", "alice-password", "trader").await.unwrap();

        let grant = auth
            .refresh_access_token(&login.refresh_token, "10.0.0.1")
            .unwrap();
        let claims = auth.verify_token(&grant.access_token).unwrap();
        assert_eq!(claims.role, "trader");
    }

    #[test]
    fn test_refresh_ip_pinning() {
        let clock = ManualClock::new(START);
        let settings = SecuritySettings {
            refresh_ip_pinning: true,
            ..settings()
        };
        let auth = AuthManager::from_settings(&settings, clock, Arc::new(NullSink));
        let token = auth.issue_refresh_token("alice", "10.0.0.1");

        let err = auth.refresh_access_token(&token, "10.0.0.2").unwrap_err();
        assert_eq!(err.code(), "INVALID_REFRESH_TOKEN");
    }

    #[tokio::test]
    async fn test_change_password_revokes_every_session() {
        let clock = ManualClock::new(START);
        let mut sink = MockNotificationSink::new();
        sink.expect_notify()
            .withf(|e| matches!(e, SecurityEvent::PasswordChanged { username } if username == "alice"))
            .times(1)
            .return_const(());
        sink.expect_notify()
            .withf(|e| matches!(e, SecurityEvent::SessionsRevoked { count: 2, .. }))
            .times(1)
            .return_const(());

        let auth = AuthManager::from_settings(&settings(), clock, Arc::new(sink));
        auth.create_account("alice", "alice-password", "trader").await.unwrap();
        let first = auth.login("alice", "alice-password", "10.0.0.1").await.unwrap();
        let second = auth.login("alice", "alice-password", "10.0.0.2").await.unwrap();

        let revoked = auth
            .change_password("alice", "alice-password", "alice-password-2")
            .await
            .unwrap();
        assert_eq!(revoked, 2);
        assert_eq!(auth.active_sessions("alice"), 0);
        for token in [&first.refresh_token, &second.refresh_token] {
            assert!(matches!(
                auth.refresh_access_token(token, "10.0.0.1"),
                Err(AppError::AuthInvalid { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_delete_account_drops_sessions() {
        let clock = ManualClock::new(START);
        let auth = AuthManager::from_settings(&settings(), clock, Arc::new(NullSink));
        auth.create_account("alice", "alice-password", "trader").await.unwrap();
        let login = auth.login("alice", "alice-password", "10.0.0.1").await.unwrap();

        assert!(auth.delete_account("alice"));
        assert!(!auth.delete_account("alice"));
        assert!(auth.refresh_access_token(&login.refresh_token, "10.0.0.1").is_err());
    }
}

#[cfg(test)]
mod signature_tests {
    use crate::security::clock::ManualClock;
    use crate::security::events::NullSink;
    use crate::security::signature::{SignatureError, SignatureGuard, sign};
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    fn guard() -> SignatureGuard {
        let guard = SignatureGuard::new(300_000, ManualClock::new(NOW), Arc::new(NullSink));
        guard.register_key("desk-1", "desk-secret", "trader", vec![]);
        guard
    }

    #[test]
    fn test_replay_is_detected() {
        let guard = guard();
        let ts = NOW.to_string();
        let body = br#"{"symbol":"BTC-USD","qty":1}"#;
        let sig = sign("desk-secret", "desk-1", &ts, "n-1", body);

        assert!(guard.verify("desk-1", &ts, "n-1", &sig, body).is_ok());
        assert_eq!(
            guard.verify("desk-1", &ts, "n-1", &sig, body),
            Err(SignatureError::ReplayDetected)
        );
    }

    #[test]
    fn test_body_tampering_is_detected() {
        let guard = guard();
        let ts = NOW.to_string();
        let sig = sign("desk-secret", "desk-1", &ts, "n-2", br#"{"qty":1}"#);

        assert_eq!(
            guard.verify("desk-1", &ts, "n-2", &sig, br#"{"qty":100}"#),
            Err(SignatureError::InvalidSignature)
        );
        // A failed attempt does not burn the nonce
        assert!(guard.verify("desk-1", &ts, "n-2", &sig, br#"{"qty":1}"#).is_ok());
    }
}

#[cfg(test)]
mod rate_limit_tests {
    use crate::security::clock::ManualClock;
    use crate::security::events::NullSink;
    use crate::security::ip_filter::IpAllowList;
    use crate::security::rate_limit::{DEFAULT_RULE, RateLimiter, RouteLimit, WindowStrategy};
    use std::collections::HashMap;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    fn limiter(clock: &Arc<ManualClock>, limit: RouteLimit) -> RateLimiter {
        let rules = HashMap::from([(DEFAULT_RULE.to_string(), limit)]);
        let multipliers = HashMap::from([("trader".to_string(), 1.5)]);
        RateLimiter::new(
            rules,
            multipliers,
            IpAllowList::new::<&str>(&[]).unwrap(),
            true,
            clock.clone(),
            Arc::new(NullSink),
        )
    }

    #[test]
    fn test_sliding_window_denies_sixth_and_recovers() {
        let clock = ManualClock::new(NOW);
        let limiter = limiter(&clock, RouteLimit::new(1_000, 5, None, WindowStrategy::Sliding));

        for _ in 0..5 {
            assert!(limiter.check("ip:1.2.3.4", "/api/orders", None, "1.2.3.4").allowed);
        }
        let denied = limiter.check("ip:1.2.3.4", "/api/orders", None, "1.2.3.4");
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs > 0);

        clock.advance(1_000);
        assert!(limiter.check("ip:1.2.3.4", "/api/orders", None, "1.2.3.4").allowed);
    }

    #[test]
    fn test_trader_multiplier() {
        let clock = ManualClock::new(NOW);
        let limiter = limiter(&clock, RouteLimit::new(60_000, 10, None, WindowStrategy::Fixed));

        let allowed = (0..20)
            .filter(|_| limiter.check("user:alice", "/api/trades", Some("trader"), "10.0.0.1").allowed)
            .count();
        assert_eq!(allowed, 15);
    }

    #[test]
    fn test_identities_are_independent() {
        let clock = ManualClock::new(NOW);
        let limiter = limiter(&clock, RouteLimit::new(1_000, 1, None, WindowStrategy::Sliding));

        assert!(limiter.check("user:alice", "/api", None, "10.0.0.1").allowed);
        assert!(!limiter.check("user:alice", "/api", None, "10.0.0.1").allowed);
        assert!(limiter.check("user:bob", "/api", None, "10.0.0.1").allowed);
    }
}

#[cfg(test)]
mod rbac_tests {
    use crate::security::auth::{AuthContext, AuthMethod};
    use crate::security::config::RbacSettings;
    use crate::security::rbac::{Authorizer, RoleAuthorizer};

    fn ctx(role: &str) -> AuthContext {
        AuthContext {
            subject: "someone".into(),
            role: role.into(),
            method: AuthMethod::Bearer,
            permissions: vec![],
        }
    }

    #[test]
    fn test_admin_passes_any_permission() {
        let authz = RoleAuthorizer::new(&RbacSettings::default());
        for permission in ["trades:delete", "users:manage", "anything:at-all"] {
            assert!(authz.has_permission(&ctx("admin"), permission));
        }
        assert!(!authz.has_permission(&ctx("viewer"), "trades:delete"));
    }

    #[test]
    fn test_unlisted_route_is_allowed() {
        let authz = RoleAuthorizer::new(&RbacSettings::default());
        assert_eq!(authz.required_permission("GET", "/api/unlisted"), None);
        assert!(authz.authorize(&ctx("viewer"), "GET", "/api/unlisted").is_ok());
    }

    #[test]
    fn test_parameterised_route_permission() {
        let authz = RoleAuthorizer::new(&RbacSettings::default());
        assert_eq!(
            authz.required_permission("POST", "/api/positions/ETH-USD/close").as_deref(),
            Some("positions:write")
        );
        assert!(authz.authorize(&ctx("trader"), "POST", "/api/positions/ETH-USD/close").is_ok());
        assert!(authz.authorize(&ctx("analyst"), "POST", "/api/positions/ETH-USD/close").is_err());
    }
}

#[cfg(test)]
mod gate_tests {
    use axum::body::Bytes;
    use std::sync::Arc;

    use crate::error::AppError;
    use crate::security::auth::{AuthMethod, Credentials, SignedCredentials};
    use crate::security::clock::ManualClock;
    use crate::security::config::{ApiKeySettings, SecuritySettings};
    use crate::security::events::{MockNotificationSink, NullSink, SecurityEvent};
    use crate::security::gate::{Gate, RequestMeta};
    use crate::security::rate_limit::{RouteLimit, WindowStrategy};
    use crate::security::signature::sign;

    const NOW: i64 = 1_700_000_000_000;

    fn settings() -> SecuritySettings {
        let mut settings = SecuritySettings {
            jwt_secret: "security-tests-secret-security-tests".into(),
            hash_iterations: 1_000,
            api_keys: vec![ApiKeySettings {
                key: "desk-1".into(),
                secret: "desk-secret".into(),
                role: "viewer".into(),
                permissions: vec![],
                rate_limit_multiplier: None,
            }],
            ..SecuritySettings::default()
        };
        settings.rate_limits.insert(
            "default".into(),
            RouteLimit::new(60_000, 2, None, WindowStrategy::Sliding),
        );
        settings
    }

    fn meta(method: &str, path: &str, ip: &str, credentials: Credentials) -> RequestMeta {
        RequestMeta {
            method: method.into(),
            path: path.into(),
            client_ip: ip.into(),
            credentials,
            body: Bytes::new(),
        }
    }

    fn bearer(token: &str) -> Credentials {
        Credentials::from_authorization_header(Some(&format!("Bearer {token}")))
    }

    #[test]
    fn test_ip_check_runs_first_and_notifies() {
        let mut settings = settings();
        settings.ip_whitelist = vec!["10.0.0.0/8".into()];
        let mut sink = MockNotificationSink::new();
        sink.expect_notify()
            .withf(|e| matches!(e, SecurityEvent::IpRejected { ip } if ip == "192.168.1.5"))
            .times(3)
            .return_const(());

        let gate = Gate::from_settings(&settings, ManualClock::new(NOW), Arc::new(sink)).unwrap();
        for _ in 0..3 {
            let rejection = gate
                .admit(&meta("GET", "/api/trades", "192.168.1.5", Credentials::default()))
                .unwrap_err();
            assert!(matches!(rejection.error, AppError::IpBlocked(_)));
            assert!(rejection.rate_limit.is_none());
        }
    }

    #[test]
    fn test_rate_limit_runs_before_credentials() {
        let gate = Gate::from_settings(&settings(), ManualClock::new(NOW), Arc::new(NullSink)).unwrap();
        let request = meta("GET", "/api/dashboard", "10.0.0.9", Credentials::default());

        for _ in 0..2 {
            let rejection = gate.admit(&request).unwrap_err();
            assert!(matches!(rejection.error, AppError::AuthRequired(_)));
            assert!(rejection.rate_limit.is_some());
        }
        let rejection = gate.admit(&request).unwrap_err();
        assert!(matches!(rejection.error, AppError::RateLimited { .. }));
    }

    #[test]
    fn test_public_route_skips_credentials() {
        let gate = Gate::from_settings(&settings(), ManualClock::new(NOW), Arc::new(NullSink)).unwrap();
        let admission = gate
            .admit(&meta("POST", "/api/auth/login", "10.0.0.9", Credentials::default()))
            .unwrap();
        assert!(admission.context.is_none());
        assert_eq!(admission.rate_limit.limit, 10);
    }

    #[test]
    fn test_bearer_identity_gets_role_multiplier() {
        let gate = Gate::from_settings(&settings(), ManualClock::new(NOW), Arc::new(NullSink)).unwrap();
        let token = gate.auth().issue_token("alice", "trader").unwrap();

        let admission = gate
            .admit(&meta("GET", "/api/dashboard", "10.0.0.9", bearer(&token)))
            .unwrap();
        let context = admission.context.unwrap();
        assert_eq!(context.subject, "alice");
        assert_eq!(context.method, AuthMethod::Bearer);
        assert_eq!(admission.rate_limit.limit, 3);
    }

    #[test]
    fn test_bearer_is_preferred_over_signature() {
        let gate = Gate::from_settings(&settings(), ManualClock::new(NOW), Arc::new(NullSink)).unwrap();
        let token = gate.auth().issue_token("alice", "trader").unwrap();
        let ts = NOW.to_string();
        let credentials = bearer(&token).with_signed(Some(SignedCredentials {
            api_key: "desk-1".into(),
            signature: sign("desk-secret", "desk-1", &ts, "n-1", b""),
            timestamp: ts,
            nonce: "n-1".into(),
        }));

        let admission = gate
            .admit(&meta("GET", "/api/dashboard", "10.0.0.9", credentials))
            .unwrap();
        assert_eq!(admission.context.unwrap().method, AuthMethod::Bearer);
        // The signature path never ran, so the nonce is still unused
        assert_eq!(gate.signatures().nonce_count(), 0);
    }

    fn signed(api_key: &str, secret: &str, nonce: &str) -> Credentials {
        let ts = NOW.to_string();
        Credentials::default().with_signed(Some(SignedCredentials {
            api_key: api_key.into(),
            signature: sign(secret, api_key, &ts, nonce, b""),
            timestamp: ts,
            nonce: nonce.into(),
        }))
    }

    #[test]
    fn test_signed_callers_are_limited_per_key() {
        let mut settings = settings();
        settings.api_keys.push(ApiKeySettings {
            key: "desk-2".into(),
            secret: "desk-2-secret".into(),
            role: "viewer".into(),
            permissions: vec![],
            rate_limit_multiplier: Some(2.0),
        });
        let gate = Gate::from_settings(&settings, ManualClock::new(NOW), Arc::new(NullSink)).unwrap();

        // Both keys sit behind the same address
        let first = gate
            .admit(&meta("GET", "/api/dashboard", "10.0.0.9", signed("desk-2", "desk-2-secret", "a")))
            .unwrap();
        assert_eq!(first.rate_limit.limit, 4);
        assert_eq!(first.context.unwrap().subject, "desk-2");

        for nonce in ["b", "c"] {
            let admission = gate
                .admit(&meta("GET", "/api/dashboard", "10.0.0.9", signed("desk-1", "desk-secret", nonce)))
                .unwrap();
            assert_eq!(admission.rate_limit.limit, 2);
        }
        let rejection = gate
            .admit(&meta("GET", "/api/dashboard", "10.0.0.9", signed("desk-1", "desk-secret", "d")))
            .unwrap_err();
        assert!(matches!(rejection.error, AppError::RateLimited { .. }));

        let other_key = gate
            .admit(&meta("GET", "/api/dashboard", "10.0.0.9", signed("desk-2", "desk-2-secret", "e")))
            .unwrap();
        assert_eq!(other_key.rate_limit.remaining, 2);

        let anonymous = gate
            .admit(&meta("GET", "/api/dashboard", "10.0.0.9", Credentials::default()))
            .unwrap_err();
        assert!(matches!(anonymous.error, AppError::AuthRequired(_)));
    }

    #[test]
    fn test_rate_limited_signed_request_keeps_its_nonce() {
        let gate = Gate::from_settings(&settings(), ManualClock::new(NOW), Arc::new(NullSink)).unwrap();
        for nonce in ["a", "b"] {
            gate.admit(&meta("GET", "/api/dashboard", "10.0.0.9", signed("desk-1", "desk-secret", nonce)))
                .unwrap();
        }
        assert_eq!(gate.signatures().nonce_count(), 2);

        let rejection = gate
            .admit(&meta("GET", "/api/dashboard", "10.0.0.9", signed("desk-1", "desk-secret", "c")))
            .unwrap_err();
        assert!(matches!(rejection.error, AppError::RateLimited { .. }));
        assert_eq!(gate.signatures().nonce_count(), 2);
    }

    #[test]
    fn test_permission_check_runs_last() {
        let gate = Gate::from_settings(&settings(), ManualClock::new(NOW), Arc::new(NullSink)).unwrap();
        let ts = NOW.to_string();
        let credentials = Credentials::default().with_signed(Some(SignedCredentials {
            api_key: "desk-1".into(),
            signature: sign("desk-secret", "desk-1", &ts, "n-9", b""),
            timestamp: ts,
            nonce: "n-9".into(),
        }));

        let rejection = gate
            .admit(&meta("DELETE", "/api/trades/42", "10.0.0.9", credentials))
            .unwrap_err();
        assert!(matches!(rejection.error, AppError::Forbidden(_)));
        assert!(rejection.rate_limit.unwrap().allowed);
    }
}
