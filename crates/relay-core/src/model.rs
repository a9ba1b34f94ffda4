use serde::{Deserialize, Serialize};

/// One of the backend LLM providers a key can belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    OpenAi,
    Anthropic,
    GoogleAi,
    Mistral,
    Aws,
    Azure,
    Gcp,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::GoogleAi => "google-ai",
            Self::Mistral => "mistral-ai",
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }
}

/// Closed enumeration of model families. Each family belongs to exactly one
/// service and is the queue's partitioning unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFamily {
    Turbo,
    Gpt4,
    Gpt4_32k,
    Gpt4Turbo,
    DallE,
    Claude,
    ClaudeOpus,
    GeminiPro,
    MistralTiny,
    MistralSmall,
    MistralMedium,
    MistralLarge,
    AwsClaude,
    AwsClaudeOpus,
    AzureGpt4,
    AzureGpt4Turbo,
    AzureTurbo,
    GcpClaudeInstant,
    GcpClaude,
    GcpClaudeOpus,
}

impl ModelFamily {
    pub fn service(&self) -> Service {
        match self {
            Self::Turbo | Self::Gpt4 | Self::Gpt4_32k | Self::Gpt4Turbo | Self::DallE => {
                Service::OpenAi
            }
            Self::Claude | Self::ClaudeOpus => Service::Anthropic,
            Self::GeminiPro => Service::GoogleAi,
            Self::MistralTiny | Self::MistralSmall | Self::MistralMedium | Self::MistralLarge => {
                Service::Mistral
            }
            Self::AwsClaude | Self::AwsClaudeOpus => Service::Aws,
            Self::AzureGpt4 | Self::AzureGpt4Turbo | Self::AzureTurbo => Service::Azure,
            Self::GcpClaudeInstant | Self::GcpClaude | Self::GcpClaudeOpus => Service::Gcp,
        }
    }
}

/// A single `(prefix, family)` rule. The table is ordered most-specific-first;
/// the first prefix match wins.
struct FamilyRule {
    prefix: &'static str,
    family: ModelFamily,
}

const OPENAI_RULES: &[FamilyRule] = &[
    FamilyRule { prefix: "gpt-4-32k", family: ModelFamily::Gpt4_32k },
    FamilyRule { prefix: "gpt-4-turbo", family: ModelFamily::Gpt4Turbo },
    FamilyRule { prefix: "gpt-4-1106", family: ModelFamily::Gpt4Turbo },
    FamilyRule { prefix: "gpt-4-0125", family: ModelFamily::Gpt4Turbo },
    FamilyRule { prefix: "gpt-4", family: ModelFamily::Gpt4 },
    FamilyRule { prefix: "dall-e", family: ModelFamily::DallE },
    FamilyRule { prefix: "gpt-3.5", family: ModelFamily::Turbo },
    FamilyRule { prefix: "text-embedding", family: ModelFamily::Turbo },
];

const ANTHROPIC_RULES: &[FamilyRule] = &[
    FamilyRule { prefix: "claude-3-opus", family: ModelFamily::ClaudeOpus },
    FamilyRule { prefix: "claude-opus", family: ModelFamily::ClaudeOpus },
    FamilyRule { prefix: "claude", family: ModelFamily::Claude },
];

const MISTRAL_RULES: &[FamilyRule] = &[
    FamilyRule { prefix: "mistral-tiny", family: ModelFamily::MistralTiny },
    FamilyRule { prefix: "mistral-small", family: ModelFamily::MistralSmall },
    FamilyRule { prefix: "mistral-medium", family: ModelFamily::MistralMedium },
    FamilyRule { prefix: "mistral-large", family: ModelFamily::MistralLarge },
];

const AWS_RULES: &[FamilyRule] = &[
    FamilyRule { prefix: "anthropic.claude-3-opus", family: ModelFamily::AwsClaudeOpus },
    FamilyRule { prefix: "anthropic.claude", family: ModelFamily::AwsClaude },
];

const GCP_RULES: &[FamilyRule] = &[
    FamilyRule { prefix: "claude-3-opus", family: ModelFamily::GcpClaudeOpus },
    FamilyRule { prefix: "claude-instant", family: ModelFamily::GcpClaudeInstant },
    FamilyRule { prefix: "claude", family: ModelFamily::GcpClaude },
];

/// Resolve a model name to its family within a known service. Deterministic
/// and table-driven: longest matching prefix wins within the service's table.
pub fn model_family_for(service: Service, model: &str) -> Option<ModelFamily> {
    let model = model.to_ascii_lowercase();
    let table: &[FamilyRule] = match service {
        Service::OpenAi => OPENAI_RULES,
        Service::Anthropic => ANTHROPIC_RULES,
        Service::GoogleAi => return model.starts_with("gemini").then_some(ModelFamily::GeminiPro),
        Service::Mistral => MISTRAL_RULES,
        Service::Aws => AWS_RULES,
        Service::Azure => return azure_family_for(&model),
        Service::Gcp => GCP_RULES,
    };
    table
        .iter()
        .filter(|rule| model.starts_with(rule.prefix))
        .max_by_key(|rule| rule.prefix.len())
        .map(|rule| rule.family)
}

fn azure_family_for(model: &str) -> Option<ModelFamily> {
    if model.contains("gpt-4-turbo") || model.contains("gpt-4-1106") {
        Some(ModelFamily::AzureGpt4Turbo)
    } else if model.contains("gpt-4") {
        Some(ModelFamily::AzureGpt4)
    } else if model.contains("gpt-3.5") || model.contains("turbo") {
        Some(ModelFamily::AzureTurbo)
    } else {
        None
    }
}

/// Resolve which service a model name belongs to, from the bare model-name
/// prefix convention (no explicit service tag on the request).
pub fn service_for_model_name(model: &str) -> Option<Service> {
    let model = model.to_ascii_lowercase();
    if model.starts_with("gpt-") || model.starts_with("dall-e") || model.starts_with("text-embedding") {
        Some(Service::OpenAi)
    } else if model.starts_with("claude-") || model == "claude" {
        Some(Service::Anthropic)
    } else if model.starts_with("gemini") {
        Some(Service::GoogleAi)
    } else if model.starts_with("mistral") {
        Some(Service::Mistral)
    } else if model.starts_with("anthropic.") {
        Some(Service::Aws)
    } else if model.starts_with("azure-") {
        Some(Service::Azure)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_prefix_resolution() {
        assert_eq!(
            model_family_for(Service::OpenAi, "gpt-3.5-turbo"),
            Some(ModelFamily::Turbo)
        );
        assert_eq!(
            model_family_for(Service::OpenAi, "gpt-4-32k-0314"),
            Some(ModelFamily::Gpt4_32k)
        );
        assert_eq!(
            model_family_for(Service::OpenAi, "gpt-4-turbo-preview"),
            Some(ModelFamily::Gpt4Turbo)
        );
        assert_eq!(model_family_for(Service::OpenAi, "gpt-4"), Some(ModelFamily::Gpt4));
    }

    #[test]
    fn anthropic_opus_takes_priority_over_generic_claude() {
        assert_eq!(
            model_family_for(Service::Anthropic, "claude-3-opus-20240229"),
            Some(ModelFamily::ClaudeOpus)
        );
        assert_eq!(
            model_family_for(Service::Anthropic, "claude-3-sonnet"),
            Some(ModelFamily::Claude)
        );
    }

    #[test]
    fn gcp_variants_are_distinct_families() {
        assert_eq!(
            model_family_for(Service::Gcp, "claude-3-opus@001"),
            Some(ModelFamily::GcpClaudeOpus)
        );
        assert_eq!(
            model_family_for(Service::Gcp, "claude-instant-1"),
            Some(ModelFamily::GcpClaudeInstant)
        );
        assert_eq!(
            model_family_for(Service::Gcp, "claude-2.1"),
            Some(ModelFamily::GcpClaude)
        );
    }

    #[test]
    fn unknown_model_resolves_to_none() {
        assert_eq!(model_family_for(Service::OpenAi, "not-a-model"), None);
    }

    #[test]
    fn family_service_mapping_is_total() {
        let families = [
            ModelFamily::Turbo,
            ModelFamily::Gpt4,
            ModelFamily::Gpt4_32k,
            ModelFamily::Gpt4Turbo,
            ModelFamily::DallE,
            ModelFamily::Claude,
            ModelFamily::ClaudeOpus,
            ModelFamily::GeminiPro,
            ModelFamily::MistralTiny,
            ModelFamily::MistralSmall,
            ModelFamily::MistralMedium,
            ModelFamily::MistralLarge,
            ModelFamily::AwsClaude,
            ModelFamily::AwsClaudeOpus,
            ModelFamily::AzureGpt4,
            ModelFamily::AzureGpt4Turbo,
            ModelFamily::AzureTurbo,
            ModelFamily::GcpClaudeInstant,
            ModelFamily::GcpClaude,
            ModelFamily::GcpClaudeOpus,
        ];
        for f in families {
            let _ = f.service();
        }
    }

    #[test]
    fn service_for_model_name_resolves_common_prefixes() {
        assert_eq!(service_for_model_name("gpt-4"), Some(Service::OpenAi));
        assert_eq!(service_for_model_name("claude-3-opus"), Some(Service::Anthropic));
        assert_eq!(service_for_model_name("gemini-pro"), Some(Service::GoogleAi));
        assert_eq!(service_for_model_name("mistral-large"), Some(Service::Mistral));
        assert_eq!(service_for_model_name("anthropic.claude-v2"), Some(Service::Aws));
        assert_eq!(service_for_model_name("azure-gpt4"), Some(Service::Azure));
        assert_eq!(service_for_model_name("unknown-thing"), None);
    }
}
