//! Builds the pre-authorized outbound [`SignedRequest`] for a resolved key
//! (§6's outbound URL/header table): a plain bearer/API-key header for
//! OpenAI/Anthropic/Azure/Mistral/Google AI, SigV4 for AWS, and a minted
//! OAuth bearer token for GCP.

use base64::Engine;
use relay_core::{GatewayError, KeyRecord, ModelFamily, ProviderState, Service, SignedRequest};
use relay_providers::GcpOps;

/// True for every streaming request except the ones whose wire protocol has
/// no streaming verb at all (kept as a seam for future non-streaming-only
/// services rather than hardcoded at each call site).
pub fn streaming_path_suffix(streaming: bool) -> &'static str {
    if streaming {
        "stream"
    } else {
        "invoke"
    }
}

pub async fn build_signed_request(
    key: &KeyRecord,
    family: ModelFamily,
    model: &str,
    body: Vec<u8>,
    streaming: bool,
    gcp_ops: &GcpOps,
) -> Result<SignedRequest, GatewayError> {
    match key.service {
        Service::OpenAi => {
            let secret = key.expose_secret();
            Ok(SignedRequest::post("https://api.openai.com/v1/chat/completions", body)
                .with_header("Authorization", format!("Bearer {secret}"))
                .with_header("Content-Type", "application/json"))
        }
        Service::Anthropic => {
            let secret = key.expose_secret();
            Ok(SignedRequest::post("https://api.anthropic.com/v1/complete", body)
                .with_header("X-API-Key", secret)
                .with_header("anthropic-version", "2023-06-01")
                .with_header("Content-Type", "application/json"))
        }
        Service::GoogleAi => {
            let secret = key.expose_secret();
            let verb = if streaming { "streamGenerateContent" } else { "generateContent" };
            let url = format!(
                "https://generativelanguage.googleapis.com/v1/models/{model}:{verb}?key={secret}"
            );
            Ok(SignedRequest::post(url, body).with_header("Content-Type", "application/json"))
        }
        Service::Mistral => {
            let secret = key.expose_secret();
            Ok(SignedRequest::post("https://api.mistral.ai/v1/chat/completions", body)
                .with_header("Authorization", format!("Bearer {secret}"))
                .with_header("Content-Type", "application/json"))
        }
        Service::Azure => {
            let (resource, deployment) = key.with_state(|s| match &s.provider_state {
                ProviderState::Azure { resource, deployment } => (resource.clone(), deployment.clone()),
                _ => (String::new(), String::new()),
            });
            let secret = key.expose_secret();
            let url = format!(
                "https://{resource}.openai.azure.com/openai/deployments/{deployment}/chat/completions?api-version=2023-12-01-preview"
            );
            Ok(SignedRequest::post(url, body)
                .with_header("api-key", secret)
                .with_header("Content-Type", "application/json"))
        }
        Service::Aws => {
            let (access_key, secret_key, region) = {
                let raw = key.expose_secret();
                let mut parts = raw.splitn(3, ':');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(a), Some(s), Some(r)) => (a.to_string(), s.to_string(), r.to_string()),
                    _ => return Err(GatewayError::ProxyInternal("malformed aws credential".into())),
                }
            };
            let host = format!("bedrock-runtime.{region}.amazonaws.com");
            let verb = if streaming { "invoke-with-response-stream" } else { "invoke" };
            let path = format!("/model/{model}/{verb}");
            let signed = relay_providers::sigv4::sign(
                &access_key,
                &secret_key,
                &region,
                &host,
                &path,
                &body,
                chrono::Utc::now(),
            );
            Ok(SignedRequest::post(format!("https://{host}{path}"), body)
                .with_header("host", host)
                .with_header("content-type", "application/json")
                .with_header("x-amz-date", signed.x_amz_date)
                .with_header("x-amz-content-sha256", signed.x_amz_content_sha256)
                .with_header("authorization", signed.authorization))
        }
        Service::Gcp => {
            let (project_id, region, client_email) = key.with_state(|s| match &s.provider_state {
                ProviderState::Gcp { project_id, region, client_email } => {
                    (project_id.clone(), region.clone(), client_email.clone())
                }
                _ => (String::new(), String::new(), String::new()),
            });
            let private_key_pem = decode_private_key(key.expose_secret())?;
            let token = gcp_ops
                .mint_access_token(&client_email, &private_key_pem)
                .await
                .map_err(|e| GatewayError::ProxyInternal(format!("gcp token mint failed: {e:?}")))?;
            let verb = if streaming { "streamRawPredict" } else { "rawPredict" };
            let url = format!(
                "https://{region}-aiplatform.googleapis.com/v1/projects/{project_id}/locations/{region}/publishers/anthropic/models/{model}:{verb}"
            );
            Ok(SignedRequest::post(url, body)
                .with_header("Authorization", format!("Bearer {token}"))
                .with_header("Content-Type", "application/json"))
        }
    }
}

/// GCP composite credentials carry the private key as base64; decode it back
/// to PEM text. Duplicated from `relay_providers::gcp` since that module
/// keeps the decoder private to itself.
fn decode_private_key(raw: &str) -> Result<String, GatewayError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| GatewayError::ProxyInternal(format!("invalid base64 gcp private key: {e}")))?;
    String::from_utf8(bytes).map_err(|e| GatewayError::ProxyInternal(format!("gcp private key is not utf8: {e}")))
}
