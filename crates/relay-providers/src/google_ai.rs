use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use relay_core::{KeyRecord, ModelFamily, Service};

use crate::classify::{classify_http_error, CheckFailure};
use crate::service_ops::{CheckSuccess, ServiceOps};

pub struct GoogleAiOps {
    client: Client,
}

impl GoogleAiOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceOps for GoogleAiOps {
    fn service(&self) -> Service {
        Service::GoogleAi
    }

    fn check_period(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    async fn test_key(&self, key: &KeyRecord) -> Result<CheckSuccess, CheckFailure> {
        let secret = key.expose_secret().to_string();

        let resp = self
            .client
            .get("https://generativelanguage.googleapis.com/v1/models")
            .query(&[("key", secret.as_str())])
            .send()
            .await
            .map_err(|e| CheckFailure::Unexpected(e.to_string()))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        let mut families = HashSet::new();
        families.insert(ModelFamily::GeminiPro);
        Ok(CheckSuccess::families(families))
    }
}
