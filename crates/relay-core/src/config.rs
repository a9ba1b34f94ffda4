use std::time::Duration;

/// Gateway-wide configuration loaded once at startup from environment
/// variables. Parsing failures are a startup-time error, not a runtime one.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_port: u16,

    /// Comma-delimited raw secrets, one env var per service.
    pub openai_keys: Vec<String>,
    pub anthropic_keys: Vec<String>,
    pub google_ai_keys: Vec<String>,
    pub mistral_keys: Vec<String>,
    /// Composite `accessKey:secretKey:region`.
    pub aws_credentials: Vec<String>,
    /// Composite `resource:deployment:apiKey`.
    pub azure_credentials: Vec<String>,
    /// Composite `projectId:clientEmail:region:base64PrivateKey`.
    pub gcp_credentials: Vec<String>,

    /// Client IPs treated as the `shared-ip` identifier (e.g. known aggregators).
    pub shared_ip_addrs: Vec<String>,

    pub reuse_delay: Duration,
    pub stall_reaper_period: Duration,
    pub stall_timeout: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed composite credential for {field}: {value:?} (expected {expected} colon-delimited parts)")]
    MalformedComposite {
        field: &'static str,
        value: String,
        expected: usize,
    },
    #[error("invalid value for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 7860,
            openai_keys: Vec::new(),
            anthropic_keys: Vec::new(),
            google_ai_keys: Vec::new(),
            mistral_keys: Vec::new(),
            aws_credentials: Vec::new(),
            azure_credentials: Vec::new(),
            gcp_credentials: Vec::new(),
            shared_ip_addrs: Vec::new(),
            reuse_delay: Duration::from_millis(750),
            stall_reaper_period: Duration::from_secs(20),
            stall_timeout: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load from environment variables, falling back to `Default::default()`
    /// tuning knobs where an override isn't set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PORT") {
            cfg.bind_port = v
                .parse()
                .map_err(|source| ConfigError::InvalidNumber { field: "PORT", source })?;
        }

        cfg.openai_keys = split_csv("OPENAI_KEY");
        cfg.anthropic_keys = split_csv("ANTHROPIC_KEY");
        cfg.google_ai_keys = split_csv("GOOGLE_AI_KEY");
        cfg.mistral_keys = split_csv("MISTRAL_AI_KEY");
        cfg.shared_ip_addrs = split_csv("SHARED_IP_ADDRESSES");

        cfg.aws_credentials = validate_composite("AWS_CREDENTIALS", 3)?;
        cfg.azure_credentials = validate_composite("AZURE_CREDENTIALS", 3)?;
        cfg.gcp_credentials = validate_composite("GCP_CREDENTIALS", 4)?;

        Ok(cfg)
    }
}

fn split_csv(var: &str) -> Vec<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_composite(var: &'static str, expected_parts: usize) -> Result<Vec<String>, ConfigError> {
    let raw = split_csv(var);
    for entry in &raw {
        if entry.split(':').count() != expected_parts {
            return Err(ConfigError::MalformedComposite {
                field: var,
                value: entry.clone(),
                expected: expected_parts,
            });
        }
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_sane_tuning_knobs() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_port, 7860);
        assert_eq!(cfg.reuse_delay, Duration::from_millis(750));
        assert_eq!(cfg.stall_timeout, Duration::from_secs(300));
    }

    #[test]
    fn validate_composite_accepts_well_formed_entries() {
        let result = validate_composite_from_value(
            "field",
            3,
            "AKIA123:secretpart:us-east-1,AKIA456:otherpart:eu-west-1",
        );
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 2);
    }

    #[test]
    fn validate_composite_rejects_wrong_part_count() {
        let result = validate_composite_from_value("field", 3, "AKIA123:secretpart");
        assert!(result.is_err());
    }

    // Test helper: exercises the same validation logic as `validate_composite`
    // without touching process environment variables (which are shared mutable
    // global state and unsafe to race across parallel tests).
    fn validate_composite_from_value(
        field: &'static str,
        expected_parts: usize,
        raw: &str,
    ) -> Result<Vec<String>, ConfigError> {
        let entries: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        for entry in &entries {
            if entry.split(':').count() != expected_parts {
                return Err(ConfigError::MalformedComposite {
                    field,
                    value: entry.clone(),
                    expected: expected_parts,
                });
            }
        }
        Ok(entries)
    }
}
