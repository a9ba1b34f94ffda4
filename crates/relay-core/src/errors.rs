use std::time::Duration;

use crate::model::Service;

/// Typed error hierarchy for gateway request servicing.
///
/// Variants map onto one of six semantic tiers: client-caused, no-key-available,
/// transient upstream, fatal upstream, unexpected upstream, or internal bug.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    ClientInvalid(String),

    #[error("no available key for service {service:?}")]
    NoKeyAvailable { service: Service },

    #[error("upstream transient error ({service:?}, status {status:?}): {message}")]
    UpstreamTransient {
        service: Service,
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("upstream fatal error ({service:?}, status {status:?}): {message}")]
    UpstreamFatal {
        service: Service,
        status: Option<u16>,
        message: String,
    },

    #[error("unexpected upstream response ({service:?}, status {status:?}): {message}")]
    UpstreamUnexpected {
        service: Service,
        status: Option<u16>,
        message: String,
    },

    #[error("internal proxy error: {0}")]
    ProxyInternal(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTransient { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UpstreamFatal { .. } | Self::ClientInvalid(_))
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::UpstreamTransient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ClientInvalid(_) => "client_invalid",
            Self::NoKeyAvailable { .. } => "no_key_available",
            Self::UpstreamTransient { .. } => "upstream_transient",
            Self::UpstreamFatal { .. } => "upstream_fatal",
            Self::UpstreamUnexpected { .. } => "upstream_unexpected",
            Self::ProxyInternal(_) => "proxy_internal",
        }
    }

    /// Classify an upstream HTTP status/body into the appropriate error kind.
    /// `quota_signal` is true when the body matches a provider's quota-exhaustion
    /// payload shape (checked by the caller, which knows the provider's dialect).
    pub fn from_status(service: Service, status: u16, body: &str, quota_signal: bool) -> Self {
        match status {
            401 | 403 => Self::UpstreamFatal {
                service,
                status: Some(status),
                message: body.to_string(),
            },
            400 if quota_signal => Self::UpstreamFatal {
                service,
                status: Some(status),
                message: body.to_string(),
            },
            429 if quota_signal => Self::UpstreamFatal {
                service,
                status: Some(status),
                message: body.to_string(),
            },
            429 => Self::UpstreamTransient {
                service,
                status: Some(status),
                message: body.to_string(),
                retry_after: None,
            },
            500..=599 => Self::UpstreamTransient {
                service,
                status: Some(status),
                message: body.to_string(),
                retry_after: None,
            },
            _ => Self::UpstreamUnexpected {
                service,
                status: Some(status),
                message: body.to_string(),
            },
        }
    }
}
