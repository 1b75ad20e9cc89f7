//! Bid requests against the auction collaborator.
//!
//! A [`BidSource`] is one demand adapter. [`AuctionClient`] is the HTTP
//! implementation: POST a [`BidRequest`], read back a [`BidDocument`] or a
//! 204 no-fill.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::CachedBid;
use crate::domain::{AdFormat, AdapterId, PlacementId};
use crate::http_client::{HttpClient, HttpRequest};
use crate::outcome::{AdapterError, VendorCodeTable};

/// Auction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionSettings {
    pub endpoint: Option<String>,
    /// Per-attempt budget when the active bundle has no override.
    #[serde(with = "crate::settings::duration_ms")]
    pub default_load_timeout: Duration,
    pub floor_cpm: f64,
}

impl Default for AuctionSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            default_load_timeout: Duration::from_secs(3),
            floor_cpm: 0.0,
        }
    }
}

/// Device facts forwarded to the auction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub os_version: String,
    pub model: String,
    pub locale: Option<String>,
}

/// Consent signals passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsentSignals {
    pub gdpr_applies: bool,
    pub tcf_string: Option<String>,
    pub us_privacy: Option<String>,
    pub coppa: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequest {
    pub request_id: Uuid,
    pub placement_id: PlacementId,
    pub ad_format: AdFormat,
    pub floor_cpm: f64,
    pub device_info: DeviceInfo,
    pub consent: ConsentSignals,
}

impl BidRequest {
    pub fn new(placement_id: PlacementId, ad_format: AdFormat, floor_cpm: f64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            placement_id,
            ad_format,
            floor_cpm,
            device_info: DeviceInfo::default(),
            consent: ConsentSignals::default(),
        }
    }

    pub fn with_device(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = device_info;
        self
    }

    pub fn with_consent(mut self, consent: ConsentSignals) -> Self {
        self.consent = consent;
        self
    }
}

/// Winning bid returned by the auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidDocument {
    pub bid_id: String,
    pub adapter: AdapterId,
    pub cpm: f64,
    pub ttl_seconds: u64,
    pub creative_ref: String,
    #[serde(default)]
    pub tracking_urls: Vec<String>,
}

impl BidDocument {
    pub fn into_cached(self, placement: PlacementId) -> CachedBid {
        CachedBid {
            placement,
            bid_id: self.bid_id,
            adapter: self.adapter,
            cpm: self.cpm,
            creative_ref: self.creative_ref,
            ttl_seconds: self.ttl_seconds,
            won_at: OffsetDateTime::now_utc(),
            tracking_urls: self.tracking_urls,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VendorErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

pub type BidFuture<'a> = Pin<Box<dyn Future<Output = Result<BidDocument, AdapterError>> + Send + 'a>>;

/// One demand adapter able to answer a bid request.
pub trait BidSource: Send + Sync {
    fn adapter(&self) -> &AdapterId;

    /// Vendor code table used to normalize this adapter's errors.
    fn codes(&self) -> VendorCodeTable {
        VendorCodeTable::http()
    }

    fn request_bid<'a>(&'a self, request: &'a BidRequest) -> BidFuture<'a>;
}

/// HTTP bid source. A 204 is a no-fill; error bodies of the form
/// `{"code": .., "message": ..}` are reported as vendor codes.
pub struct AuctionClient {
    adapter: AdapterId,
    client: Arc<dyn HttpClient>,
    endpoint: String,
    codes: VendorCodeTable,
    timeout: Duration,
}

impl AuctionClient {
    pub fn new(adapter: AdapterId, client: Arc<dyn HttpClient>, endpoint: impl Into<String>) -> Self {
        Self {
            codes: VendorCodeTable::new(adapter.as_str()).with_http_fallback(true),
            adapter,
            client,
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_codes(mut self, codes: VendorCodeTable) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl BidSource for AuctionClient {
    fn adapter(&self) -> &AdapterId {
        &self.adapter
    }

    fn codes(&self) -> VendorCodeTable {
        self.codes.clone()
    }

    fn request_bid<'a>(&'a self, request: &'a BidRequest) -> BidFuture<'a> {
        Box::pin(async move {
            let body = serde_json::to_string(request)
                .map_err(|e| AdapterError::vendor(0, format!("bid request encode failed: {e}")))?;
            let http_request = HttpRequest::post_json(&self.endpoint, body)
                .with_header("x-apexmed-adapter", self.adapter.as_str())
                .with_header("x-request-id", request.request_id.to_string())
                .with_timeout(self.timeout);

            let response = self.client.execute(http_request).await?;
            if response.status == 204 {
                return Err(AdapterError::NoFill);
            }
            if !response.is_success() {
                return Err(match serde_json::from_str::<VendorErrorBody>(&response.body) {
                    Ok(vendor) => AdapterError::vendor(vendor.code, vendor.message),
                    Err(_) => AdapterError::vendor(i64::from(response.status), response.body.trim()),
                });
            }

            serde_json::from_str::<BidDocument>(&response.body).map_err(|e| {
                AdapterError::vendor(
                    i64::from(response.status),
                    format!("invalid bid document: {e}"),
                )
            })
        })
    }
}

/// Bid source answering from a script, for simulations and tests.
///
/// Each call pops the next scripted result after `latency`; an empty
/// script answers no-fill.
pub struct ScriptedBidSource {
    adapter: AdapterId,
    latency: Duration,
    script: Mutex<Vec<Result<BidDocument, AdapterError>>>,
    calls: Mutex<u32>,
}

impl ScriptedBidSource {
    pub fn new(adapter: AdapterId) -> Self {
        Self {
            adapter,
            latency: Duration::ZERO,
            script: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, result: Result<BidDocument, AdapterError>) {
        self.script
            .lock()
            .expect("scripted bid source lock is not poisoned")
            .push(result);
    }

    pub fn calls(&self) -> u32 {
        *self
            .calls
            .lock()
            .expect("scripted bid source lock is not poisoned")
    }
}

impl BidSource for ScriptedBidSource {
    fn adapter(&self) -> &AdapterId {
        &self.adapter
    }

    fn request_bid<'a>(&'a self, _request: &'a BidRequest) -> BidFuture<'a> {
        *self
            .calls
            .lock()
            .expect("scripted bid source lock is not poisoned") += 1;
        let next = {
            let mut script = self
                .script
                .lock()
                .expect("scripted bid source lock is not poisoned");
            if script.is_empty() {
                Err(AdapterError::NoFill)
            } else {
                script.remove(0)
            }
        };
        let latency = self.latency;
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            next
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, HttpMethod, HttpResponse, ScriptedHttpClient};
    use crate::outcome::{Outcome, OutcomeClass};

    const DOC: &str = r#"{
        "bidId": "bid-1",
        "adapter": "Unity",
        "cpm": 4.2,
        "ttlSeconds": 1800,
        "creativeRef": "cr-99",
        "trackingUrls": ["https://t.example.test/imp?b=bid-1"]
    }"#;

    fn request() -> BidRequest {
        BidRequest::new(
            PlacementId::parse("rewarded").expect("valid"),
            AdFormat::Rewarded,
            1.0,
        )
    }

    fn client(response: Result<HttpResponse, HttpError>) -> (Arc<ScriptedHttpClient>, AuctionClient) {
        let http = Arc::new(ScriptedHttpClient::new(response));
        let auction = AuctionClient::new(
            AdapterId::parse("unity").expect("valid"),
            http.clone(),
            "https://auction.example.test/bid",
        );
        (http, auction)
    }

    #[tokio::test]
    async fn posts_camel_case_request_and_parses_bid() {
        let (http, auction) = client(Ok(HttpResponse::ok_json(DOC)));
        let request = request();

        let bid = auction.request_bid(&request).await.expect("bid");

        assert_eq!(bid.bid_id, "bid-1");
        assert_eq!(bid.adapter.as_str(), "unity");
        assert_eq!(bid.tracking_urls.len(), 1);

        let sent = http.requests();
        assert_eq!(sent[0].method, HttpMethod::Post);
        let body: serde_json::Value =
            serde_json::from_str(sent[0].body.as_deref().expect("body")).expect("json");
        assert_eq!(body["placementId"], "rewarded");
        assert_eq!(body["adFormat"], "rewarded");
        assert_eq!(body["requestId"], request.request_id.to_string());
    }

    #[tokio::test]
    async fn no_content_is_a_no_fill() {
        let (_, auction) = client(Ok(HttpResponse::no_content()));
        assert_eq!(
            auction.request_bid(&request()).await,
            Err(AdapterError::NoFill)
        );
    }

    #[tokio::test]
    async fn vendor_error_bodies_use_the_code_table() {
        let (_, auction) = client(Ok(HttpResponse::new(
            400,
            r#"{"code": 1022, "message": "placement paused"}"#,
        )));
        let auction = auction
            .with_codes(VendorCodeTable::new("unity").with_code(1022, OutcomeClass::NoFill));

        let error = auction.request_bid(&request()).await.expect_err("vendor error");
        assert_eq!(error, AdapterError::vendor(1022, "placement paused"));
        assert_eq!(error.normalize(&auction.codes()), Outcome::NoFill);
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let (_, auction) = client(Err(HttpError::timeout("deadline")));
        let error = auction.request_bid(&request()).await.expect_err("timeout");
        assert_eq!(error.normalize(&VendorCodeTable::http()), Outcome::Timeout);
    }
}
