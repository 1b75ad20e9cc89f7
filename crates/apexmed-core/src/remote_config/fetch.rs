use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bundle::RemoteConfigBundle;
use super::distributor::{AdoptionDecision, ConfigDistributor};
use super::signature::{SignatureVerifier, SIGNATURE_HEADER};
use crate::error::ConfigError;
use crate::http_client::{HttpClient, HttpRequest};

/// Fetches signed bundles and offers verified ones to the distributor.
pub struct ConfigFetcher {
    client: Arc<dyn HttpClient>,
    endpoint: String,
    verifier: SignatureVerifier,
    timeout: Duration,
}

impl ConfigFetcher {
    pub fn new(
        client: Arc<dyn HttpClient>,
        endpoint: impl Into<String>,
        verifier: SignatureVerifier,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            verifier,
            timeout,
        }
    }

    /// Fetch, verify and parse the bundle without offering it.
    pub async fn fetch_verified(&self, distributor: &ConfigDistributor) -> Result<RemoteConfigBundle, ConfigError> {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{separator}version={}&bucket={}",
            self.endpoint,
            distributor.active_version(),
            distributor.bucket()
        );
        let response = self
            .client
            .execute(HttpRequest::get(url).with_timeout(self.timeout))
            .await
            .map_err(|e| ConfigError::Fetch(e.to_string()))?;
        if !response.is_success() {
            return Err(ConfigError::Status {
                status: response.status,
            });
        }

        let signature = response
            .header(SIGNATURE_HEADER)
            .ok_or(ConfigError::MissingSignature)?;
        self.verifier.verify(response.body.as_bytes(), signature)?;
        RemoteConfigBundle::parse(response.body.as_bytes())
    }

    /// One refresh cycle. A bundle failing verification never reaches the
    /// distributor, so the active bundle stays in effect.
    pub async fn refresh(&self, distributor: &ConfigDistributor) -> Result<AdoptionDecision, ConfigError> {
        let bundle = match self.fetch_verified(distributor).await {
            Ok(bundle) => bundle,
            Err(error) => {
                warn!(%error, active = distributor.active_version(), "discarding fetched config");
                return Err(error);
            }
        };
        distributor.offer(bundle)
    }

    /// Refresh on a fixed interval until the returned handle is aborted.
    pub fn spawn_refresh(
        self: Arc<Self>,
        distributor: Arc<ConfigDistributor>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let period = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match self.refresh(&distributor).await {
                    Ok(AdoptionDecision::Adopted { version }) => {
                        info!(version, "remote config refreshed");
                    }
                    Ok(decision) => debug!(?decision, "remote config unchanged"),
                    Err(_) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::http_client::{HttpError, HttpResponse, ScriptedHttpClient};
    use crate::remote_config::signature::sign_base64;
    use crate::remote_config::store::MemoryStore;

    const BODY: &str = r#"{"version":4,"rolloutPercent":100}"#;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[3u8; 32])
    }

    fn fetcher(client: Arc<ScriptedHttpClient>) -> ConfigFetcher {
        ConfigFetcher::new(
            client,
            "https://config.example.test/v1/bundle",
            SignatureVerifier::new(key().verifying_key()),
            Duration::from_secs(5),
        )
    }

    fn distributor() -> ConfigDistributor {
        ConfigDistributor::open(Arc::new(MemoryStore::new()), 5).expect("open")
    }

    #[tokio::test]
    async fn adopts_signed_bundle() {
        let client = Arc::new(ScriptedHttpClient::new(Err(HttpError::connect("offline"))));
        client.push(Ok(HttpResponse::ok_json(BODY)
            .with_header(SIGNATURE_HEADER, sign_base64(&key(), BODY.as_bytes()))));
        let distributor = distributor();

        let decision = fetcher(client.clone())
            .refresh(&distributor)
            .await
            .expect("refresh");

        assert_eq!(decision, AdoptionDecision::Adopted { version: 4 });
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with(&format!(
            "?version=0&bucket={}",
            distributor.bucket()
        )));
    }

    #[tokio::test]
    async fn discards_unsigned_or_forged_bundles() {
        let client = Arc::new(ScriptedHttpClient::new(Err(HttpError::connect("offline"))));
        client.push(Ok(HttpResponse::ok_json(BODY)));
        let forged = SigningKey::from_bytes(&[4u8; 32]);
        client.push(Ok(HttpResponse::ok_json(BODY)
            .with_header(SIGNATURE_HEADER, sign_base64(&forged, BODY.as_bytes()))));
        let distributor = distributor();
        let fetcher = fetcher(client);

        assert!(matches!(
            fetcher.refresh(&distributor).await,
            Err(ConfigError::MissingSignature)
        ));
        assert!(matches!(
            fetcher.refresh(&distributor).await,
            Err(ConfigError::BadSignature)
        ));
        assert!(matches!(
            fetcher.refresh(&distributor).await,
            Err(ConfigError::Fetch(_))
        ));
        assert_eq!(distributor.active_version(), 0);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let client = Arc::new(ScriptedHttpClient::new(Ok(HttpResponse::new(503, ""))));
        let distributor = distributor();

        assert!(matches!(
            fetcher(client).refresh(&distributor).await,
            Err(ConfigError::Status { status: 503 })
        ));
    }
}
