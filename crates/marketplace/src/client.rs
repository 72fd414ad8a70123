//! REST client for the GPU marketplace.

use api_types::Instance;
use api_types::InstanceOffer;
use api_types::SearchCriteria;
use api_types::WorkloadSpec;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::health::HealthChecker;
use crate::readiness;
use crate::readiness::InstanceProbe;
use crate::readiness::ReadinessPolicy;
use crate::types::search_query;
use crate::types::CreateInstanceRequest;
use crate::types::CreateInstanceResponse;
use crate::types::InstanceResponse;
use crate::types::LogsResponse;
use crate::types::SearchResponse;
use crate::Marketplace;
use crate::MarketplaceConfig;
use crate::MarketplaceError;
use crate::MarketplaceResult;

/// Number of log lines requested from the vendor.
const LOG_TAIL_LINES: usize = 1000;

/// HTTP client wrapping the marketplace REST surface.
pub struct MarketplaceClient {
    config: MarketplaceConfig,
    http: Client,
    health: HealthChecker,
}

impl MarketplaceClient {
    /// create client
    pub fn new(config: MarketplaceConfig) -> MarketplaceResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Report::new(MarketplaceError::Configuration {
                message: "marketplace API key is empty".into(),
            }));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .change_context(MarketplaceError::Configuration {
                message: "Failed to create HTTP client for marketplace".into(),
            })?;
        let health = HealthChecker::new(
            http.clone(),
            config.health_path.clone(),
            config.health_timeout,
        );

        info!(base_url = %config.base_url, "Marketplace client created");

        Ok(Self {
            config,
            http,
            health,
        })
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.config.api_key)
    }

    fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            poll_interval: self.config.poll_interval,
            timeout: self.config.ready_timeout,
        }
    }

    /// Issue the lease request and return the vendor's new contract id.
    async fn request_lease(
        &self,
        offer: &InstanceOffer,
        workload: &WorkloadSpec,
    ) -> MarketplaceResult<u64> {
        let offer_id = offer.id;
        let body = CreateInstanceRequest::new(workload);

        let response = self
            .authorized(self.http.put(self.url(&format!("/asks/{offer_id}/"))))
            .json(&body)
            .send()
            .await
            .change_context(MarketplaceError::Provision {
                offer_id,
                message: "lease request failed in transport".into(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Report::new(MarketplaceError::Provision {
                offer_id,
                message: format!("vendor returned {status}"),
            })
            .attach_printable(text));
        }

        let created: CreateInstanceResponse =
            response
                .json()
                .await
                .change_context(MarketplaceError::Provision {
                    offer_id,
                    message: "invalid lease response".into(),
                })?;

        match (created.success, created.new_contract) {
            (true, Some(contract_id)) => Ok(contract_id),
            _ => Err(Report::new(MarketplaceError::Provision {
                offer_id,
                message: created
                    .msg
                    .or(created.error)
                    .unwrap_or_else(|| "lease rejected".to_string()),
            })),
        }
    }

    async fn fetch_logs(&self, instance_id: u64) -> Result<String, String> {
        let response = self
            .authorized(
                self.http
                    .put(self.url(&format!("/instances/request_logs/{instance_id}/"))),
            )
            .json(&json!({ "tail": LOG_TAIL_LINES.to_string() }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("log request returned {}", response.status()));
        }

        let logs: LogsResponse = response.json().await.map_err(|e| e.to_string())?;
        let result_url = match (logs.success, logs.result_url) {
            (true, Some(url)) => url,
            _ => return Err("vendor did not provide a log location".to_string()),
        };

        let response = self
            .http
            .get(&result_url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("log download returned {}", response.status()));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

fn not_found(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND
}

async fn ensure_success(
    response: Response,
    context: MarketplaceError,
) -> MarketplaceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(Report::new(context)
        .attach_printable(format!("status: {status}"))
        .attach_printable(text))
}

#[async_trait]
impl Marketplace for MarketplaceClient {
    async fn test_connection(&self) -> MarketplaceResult<()> {
        let response = self
            .authorized(self.http.get(self.url("/users/current/")))
            .send()
            .await
            .change_context(MarketplaceError::Auth {
                message: "marketplace unreachable".into(),
            })?;

        match response.status() {
            status if status.is_success() => {
                info!("Marketplace connection verified");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Report::new(MarketplaceError::Auth {
                    message: "API key rejected".into(),
                }))
            }
            status => Err(Report::new(MarketplaceError::Auth {
                message: format!("unexpected status {status} from current-user lookup"),
            })),
        }
    }

    #[tracing::instrument(skip(self, criteria), fields(gpu = ?criteria.gpu_name, max_price = criteria.max_price_per_hour))]
    async fn search_instances(
        &self,
        criteria: &SearchCriteria,
    ) -> MarketplaceResult<Vec<InstanceOffer>> {
        let query = search_query(criteria);
        debug!(%query, "Searching offers");

        let response = self
            .authorized(self.http.get(self.url("/bundles/")))
            .query(&[("q", query.to_string())])
            .send()
            .await
            .change_context(MarketplaceError::Search {
                message: "search request failed in transport".into(),
            })?;

        let response = ensure_success(
            response,
            MarketplaceError::Search {
                message: "search rejected by vendor".into(),
            },
        )
        .await?;

        let results: SearchResponse =
            response
                .json()
                .await
                .change_context(MarketplaceError::Search {
                    message: "failed to decode search response".into(),
                })?;

        info!(offers = results.offers.len(), "Offer search completed");
        Ok(results.offers)
    }

    #[tracing::instrument(skip(self, offer, workload, cancellation_token), fields(offer_id = offer.id, pod = %workload.pod_name))]
    async fn create_instance(
        &self,
        offer: &InstanceOffer,
        workload: &WorkloadSpec,
        cancellation_token: CancellationToken,
    ) -> MarketplaceResult<Instance> {
        let instance_id = self.request_lease(offer, workload).await?;
        info!(instance_id, "Lease accepted, waiting for instance to become ready");

        let ready = readiness::wait_for_instance_ready(
            self,
            instance_id,
            &workload.ports,
            self.readiness_policy(),
            &cancellation_token,
        )
        .await;

        match ready {
            Ok(instance) => Ok(instance),
            Err(report) => {
                // never leave a billed instance behind for an attempt we gave up on
                if let Err(e) = self.destroy_instance(instance_id).await {
                    warn!(instance_id, "Failed to destroy unready instance: {e:?}");
                }
                Err(report)
            }
        }
    }

    async fn get_instance(&self, instance_id: u64) -> MarketplaceResult<Instance> {
        let response = self
            .authorized(self.http.get(self.url(&format!("/instances/{instance_id}/"))))
            .send()
            .await
            .change_context(MarketplaceError::Request {
                message: format!("failed to fetch instance {instance_id}"),
            })?;

        if not_found(response.status()) {
            return Err(Report::new(MarketplaceError::NotFound { instance_id }));
        }
        let response = ensure_success(
            response,
            MarketplaceError::Request {
                message: format!("failed to fetch instance {instance_id}"),
            },
        )
        .await?;

        let body: InstanceResponse =
            response
                .json()
                .await
                .change_context(MarketplaceError::Request {
                    message: format!("failed to decode instance {instance_id}"),
                })?;

        body.instances
            .map(Instance::from)
            .ok_or_else(|| Report::new(MarketplaceError::NotFound { instance_id }))
    }

    async fn update_instance(
        &self,
        instance_id: u64,
        _workload: &WorkloadSpec,
    ) -> MarketplaceResult<Instance> {
        Err(Report::new(MarketplaceError::Unsupported {
            message: format!(
                "instance {instance_id} cannot be changed in place, recreate pod to get a new instance"
            ),
        }))
    }

    async fn destroy_instance(&self, instance_id: u64) -> MarketplaceResult<()> {
        let response = self
            .authorized(
                self.http
                    .delete(self.url(&format!("/instances/{instance_id}/"))),
            )
            .send()
            .await
            .change_context(MarketplaceError::Request {
                message: format!("failed to destroy instance {instance_id}"),
            })?;

        if not_found(response.status()) {
            debug!(instance_id, "Instance already gone");
            return Ok(());
        }
        ensure_success(
            response,
            MarketplaceError::Request {
                message: format!("failed to destroy instance {instance_id}"),
            },
        )
        .await?;

        info!(instance_id, "Instance destroyed");
        Ok(())
    }

    async fn get_instance_logs(&self, instance_id: u64) -> String {
        match self.fetch_logs(instance_id).await {
            Ok(logs) => logs,
            Err(reason) => {
                debug!(instance_id, "Logs unavailable: {reason}");
                format!("logs are not available for instance {instance_id}: {reason}\n")
            }
        }
    }
}

#[async_trait]
impl InstanceProbe for MarketplaceClient {
    async fn fetch_instance(&self, instance_id: u64) -> MarketplaceResult<Instance> {
        self.get_instance(instance_id).await
    }

    async fn check_health(&self, instance: &Instance, internal_ports: &[u16]) -> bool {
        self.health.check(instance, internal_ports).await
    }
}
