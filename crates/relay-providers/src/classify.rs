use std::time::Duration;

/// Outcome of a single key-checker probe, before it's translated into a
/// `KeyUpdate`. Mirrors §4.2's `handleAxiosError` classification tiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckFailure {
    /// 401/403, `DeploymentNotFound`, `UnrecognizedClientException`, or an
    /// OpenAI `access_terminated` payload.
    Revoked,
    /// 400/429 with a quota-exhaustion payload (`insufficient_quota`,
    /// `billing_not_active`, Anthropic "credit balance too low", a trial key
    /// hitting its request cap).
    OverQuota,
    /// 429 with a rate-limit subtype that doesn't indicate quota exhaustion;
    /// the checker should retry sooner than its normal period.
    RateLimited { retry_in: Duration },
    /// 429 on the `tokens` dimension: treated as alive, no reschedule.
    TokensRateLimited,
    /// DNS/connect failure; retry in about a minute.
    Network,
    /// Anything else: logged, left enabled, `lastChecked` still advances.
    Unexpected(String),
}

/// Shared HTTP-status/body classifier used by every provider's
/// `test_key`/`handleAxiosError` path. `body` is scanned case-insensitively
/// for the quota/revocation substrings each provider's error payload uses.
pub fn classify_http_error(status: u16, body: &str) -> CheckFailure {
    let lower = body.to_ascii_lowercase();

    if status == 401 || status == 403 {
        return CheckFailure::Revoked;
    }
    if lower.contains("deploymentnotfound") || lower.contains("unrecognizedclientexception") {
        return CheckFailure::Revoked;
    }
    if lower.contains("access_terminated") {
        return CheckFailure::Revoked;
    }

    if status == 400 && is_quota_payload(&lower) {
        return CheckFailure::OverQuota;
    }

    if status == 429 {
        if lower.contains("\"tokens\"") || lower.contains("'tokens'") {
            return CheckFailure::TokensRateLimited;
        }
        if is_quota_payload(&lower) {
            return CheckFailure::OverQuota;
        }
        return CheckFailure::RateLimited { retry_in: Duration::from_secs(12) };
    }

    CheckFailure::Unexpected(format!("unexpected status {status}: {body}"))
}

fn is_quota_payload(lower_body: &str) -> bool {
    const QUOTA_MARKERS: &[&str] = &[
        "insufficient_quota",
        "billing_not_active",
        "usage blocked until",
        "credit balance too low",
    ];
    QUOTA_MARKERS.iter().any(|m| lower_body.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_revoked() {
        assert_eq!(classify_http_error(401, "unauthorized"), CheckFailure::Revoked);
        assert_eq!(classify_http_error(403, "forbidden"), CheckFailure::Revoked);
    }

    #[test]
    fn azure_deployment_not_found_is_revoked() {
        assert_eq!(
            classify_http_error(404, r#"{"error": {"code": "DeploymentNotFound"}}"#),
            CheckFailure::Revoked
        );
    }

    #[test]
    fn aws_unrecognized_client_is_revoked() {
        assert_eq!(
            classify_http_error(403, "UnrecognizedClientException: invalid credentials"),
            CheckFailure::Revoked
        );
    }

    #[test]
    fn openai_access_terminated_is_revoked() {
        assert_eq!(
            classify_http_error(400, r#"{"error":{"code":"access_terminated"}}"#),
            CheckFailure::Revoked
        );
    }

    #[test]
    fn openai_insufficient_quota_is_over_quota() {
        assert_eq!(
            classify_http_error(400, r#"{"error":{"code":"insufficient_quota"}}"#),
            CheckFailure::OverQuota
        );
    }

    #[test]
    fn anthropic_credit_balance_is_over_quota() {
        assert_eq!(
            classify_http_error(400, "Your credit balance too low to access the API"),
            CheckFailure::OverQuota
        );
    }

    #[test]
    fn plain_429_is_rate_limited() {
        assert_eq!(
            classify_http_error(429, "rate limit exceeded"),
            CheckFailure::RateLimited { retry_in: Duration::from_secs(12) }
        );
    }

    #[test]
    fn tokens_429_is_treated_as_alive() {
        assert_eq!(
            classify_http_error(429, r#"{"error":{"type":"tokens"}}"#),
            CheckFailure::TokensRateLimited
        );
    }

    #[test]
    fn quota_429_is_over_quota() {
        assert_eq!(
            classify_http_error(429, "insufficient_quota on requests"),
            CheckFailure::OverQuota
        );
    }

    #[test]
    fn unknown_status_is_unexpected() {
        assert!(matches!(classify_http_error(418, "teapot"), CheckFailure::Unexpected(_)));
    }
}
