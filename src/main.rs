use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{AwsLoggingStatus, Config, KeyProvider, KeyRecord, ProviderState, Service};
use relay_pool::KeyPool;
use relay_providers::{
    AnthropicOps, AwsOps, AzureOps, GcpOps, GenericProvider, GoogleAiOps, MistralOps, OpenAiOps,
};
use relay_proxy::{GatewayOrchestrator, HttpDispatcher, ProxyOrchestrator, ServerConfig};
use relay_telemetry::MetricsRecorder;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    relay_telemetry::init_tracing();
    tracing::info!("starting relay gateway");

    let config = Config::from_env().expect("invalid configuration");
    let client = reqwest::Client::new();
    let metrics = Arc::new(MetricsRecorder::new());
    let cancel = CancellationToken::new();

    let mut providers: HashMap<Service, Arc<dyn KeyProvider>> = HashMap::new();
    let mut openai_provider: Option<Arc<dyn KeyProvider>> = None;

    if !config.openai_keys.is_empty() {
        let keys = config
            .openai_keys
            .iter()
            .map(|secret| {
                Arc::new(KeyRecord::new(
                    SecretString::from(secret.clone()),
                    Service::OpenAi,
                    ProviderState::OpenAi {
                        org_id: None,
                        trial: false,
                        has_32k_access: false,
                        reset_requests_ms: None,
                        reset_tokens_ms: None,
                    },
                ))
            })
            .collect();
        let provider: Arc<dyn KeyProvider> = Arc::new(GenericProvider::new(OpenAiOps::new(client.clone()), keys));
        openai_provider = Some(provider.clone());
        providers.insert(Service::OpenAi, provider);
    }

    if !config.anthropic_keys.is_empty() {
        let keys = config
            .anthropic_keys
            .iter()
            .map(|secret| {
                Arc::new(KeyRecord::new(
                    SecretString::from(secret.clone()),
                    Service::Anthropic,
                    ProviderState::Anthropic { requires_preamble: false },
                ))
            })
            .collect();
        let provider = Arc::new(GenericProvider::new(AnthropicOps::new(client.clone()), keys));
        tokio::spawn(provider.clone().run_recheck_loop(cancel.clone()));
        providers.insert(Service::Anthropic, provider);
    }

    if !config.google_ai_keys.is_empty() {
        let keys = config
            .google_ai_keys
            .iter()
            .map(|secret| Arc::new(KeyRecord::new(SecretString::from(secret.clone()), Service::GoogleAi, ProviderState::GoogleAi)))
            .collect();
        let provider = Arc::new(GenericProvider::new(GoogleAiOps::new(client.clone()), keys));
        tokio::spawn(provider.clone().run_recheck_loop(cancel.clone()));
        providers.insert(Service::GoogleAi, provider);
    }

    if !config.mistral_keys.is_empty() {
        let keys = config
            .mistral_keys
            .iter()
            .map(|secret| Arc::new(KeyRecord::new(SecretString::from(secret.clone()), Service::Mistral, ProviderState::Mistral)))
            .collect();
        let provider = Arc::new(GenericProvider::new(MistralOps::new(client.clone()), keys));
        tokio::spawn(provider.clone().run_recheck_loop(cancel.clone()));
        providers.insert(Service::Mistral, provider);
    }

    if !config.aws_credentials.is_empty() {
        let keys = config
            .aws_credentials
            .iter()
            .map(|composite| {
                let region = composite.rsplit(':').next().unwrap_or("us-east-1").to_string();
                Arc::new(KeyRecord::new(
                    SecretString::from(composite.clone()),
                    Service::Aws,
                    ProviderState::Aws { region, logging_status: AwsLoggingStatus::Unknown },
                ))
            })
            .collect();
        let provider = Arc::new(GenericProvider::new(AwsOps::new(client.clone()), keys));
        tokio::spawn(provider.clone().run_recheck_loop(cancel.clone()));
        providers.insert(Service::Aws, provider);
    }

    if !config.azure_credentials.is_empty() {
        let keys = config
            .azure_credentials
            .iter()
            .map(|composite| {
                let mut parts = composite.splitn(3, ':');
                let resource = parts.next().unwrap_or_default().to_string();
                let deployment = parts.next().unwrap_or_default().to_string();
                let api_key = parts.next().unwrap_or_default().to_string();
                Arc::new(KeyRecord::new(
                    SecretString::from(api_key),
                    Service::Azure,
                    ProviderState::Azure { resource, deployment },
                ))
            })
            .collect();
        let provider = Arc::new(GenericProvider::new(AzureOps::new(client.clone()), keys));
        tokio::spawn(provider.clone().run_recheck_loop(cancel.clone()));
        providers.insert(Service::Azure, provider);
    }

    if !config.gcp_credentials.is_empty() {
        let keys = config
            .gcp_credentials
            .iter()
            .map(|composite| {
                let mut parts = composite.splitn(4, ':');
                let project_id = parts.next().unwrap_or_default().to_string();
                let client_email = parts.next().unwrap_or_default().to_string();
                let region = parts.next().unwrap_or_default().to_string();
                let private_key_b64 = parts.next().unwrap_or_default().to_string();
                Arc::new(KeyRecord::new(
                    SecretString::from(private_key_b64),
                    Service::Gcp,
                    ProviderState::Gcp { project_id, region, client_email },
                ))
            })
            .collect();
        let provider = Arc::new(GenericProvider::new(GcpOps::new(client.clone()), keys));
        tokio::spawn(provider.clone().run_recheck_loop(cancel.clone()));
        providers.insert(Service::Gcp, provider);
    }

    let pool = Arc::new(KeyPool::new(providers, metrics));
    pool.init_all().await.expect("key provider initialization failed");

    if let Some(provider) = openai_provider {
        tokio::spawn(relay_pool::run_openai_recheck_cron(provider, cancel.clone()));
    }

    let queue = Arc::new(relay_queue::RequestQueue::new());
    let dispatcher: Arc<dyn relay_proxy::Dispatcher> = Arc::new(HttpDispatcher::new(client.clone()));
    let gcp_ops = Arc::new(GcpOps::new(client));

    let orchestrator: Arc<dyn ProxyOrchestrator> =
        Arc::new(GatewayOrchestrator::new(pool.clone(), queue.clone(), dispatcher, gcp_ops));

    tokio::spawn(relay_queue::run_dequeue_loop(queue.clone(), pool.clone(), cancel.clone()));
    tokio::spawn(relay_queue::run_stall_reaper(queue.clone(), cancel.clone()));
    tokio::spawn(relay_queue::run_estimator_tick(queue, cancel.clone()));
    tokio::spawn(run_pool_metrics_loop(pool.clone(), cancel.clone()));

    let shared_ips = Arc::new(config.shared_ip_addrs.into_iter().collect());
    let state = relay_proxy::AppState { orchestrator, shared_ips };
    let server_config = ServerConfig { port: config.bind_port, ..Default::default() };

    let handle = relay_proxy::start(server_config, state).await.expect("failed to start gateway server");
    tracing::info!(port = handle.port, "relay gateway ready");

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    tracing::info!("shutting down");
    cancel.cancel();
    handle.shutdown();
    handle.drain().await;
}

const POOL_METRICS_TICK: std::time::Duration = std::time::Duration::from_secs(15);

async fn run_pool_metrics_loop(pool: Arc<KeyPool>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(POOL_METRICS_TICK) => {}
        }
        pool.publish_metrics();
    }
}
