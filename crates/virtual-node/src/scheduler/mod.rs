//! Instance scheduling.
//!
//! Turns a pod into marketplace search criteria, ranks the offers that come
//! back and leases the best one, falling back to the next candidate when a
//! lease is rejected.

pub mod criteria;
pub mod scoring;

use core::error::Error;
use std::sync::Arc;

use api_types::Instance;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use marketplace::Marketplace;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

pub use criteria::criteria_for_pod;
pub use criteria::workload_for_pod;
pub use criteria::SchedulerPolicy;
pub use scoring::rank_offers;
pub use scoring::InstanceScore;

#[derive(Debug, derive_more::Display)]
pub enum SchedulerError {
    #[display("Invalid pod spec for {pod}: {message}")]
    InvalidPodSpec { pod: String, message: String },
    #[display("No marketplace offers satisfy the requirements of {pod}")]
    NoOffers { pod: String },
    #[display("All {} candidate offers failed: {}", reasons.len(), reasons.join("; "))]
    AllCandidatesExhausted { reasons: Vec<String> },
    #[display("Marketplace request failed")]
    Marketplace,
    #[display("Scheduling of {pod} was cancelled")]
    Cancelled { pod: String },
}

impl Error for SchedulerError {}

/// Picks and leases marketplace instances for pods.
pub struct InstanceScheduler {
    marketplace: Arc<dyn Marketplace>,
    policy: SchedulerPolicy,
}

impl InstanceScheduler {
    pub fn new(marketplace: Arc<dyn Marketplace>, policy: SchedulerPolicy) -> Self {
        Self {
            marketplace,
            policy,
        }
    }

    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    /// Search, rank and lease an instance for the pod.
    ///
    /// Candidates are tried best first. A rejected lease moves on to the next
    /// candidate; readiness failures and cancellation end the attempt.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::InvalidPodSpec`] if the pod cannot be translated
    /// - [`SchedulerError::NoOffers`] if no offer satisfies the criteria
    /// - [`SchedulerError::AllCandidatesExhausted`] if every lease was rejected
    /// - [`SchedulerError::Marketplace`] for search or readiness failures
    /// - [`SchedulerError::Cancelled`] if the token fired between attempts
    #[tracing::instrument(skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn select_and_launch_instance(
        &self,
        pod: &Pod,
        cancellation_token: CancellationToken,
    ) -> Result<Instance, Report<SchedulerError>> {
        let criteria = criteria_for_pod(pod, &self.policy.defaults)?;
        let workload = workload_for_pod(pod, &self.policy)?;

        let offers = self
            .marketplace
            .search_instances(&criteria)
            .await
            .change_context(SchedulerError::Marketplace)?;

        let ranked = rank_offers(&offers, &criteria);
        if ranked.is_empty() {
            return Err(Report::new(SchedulerError::NoOffers {
                pod: workload.pod_name.clone(),
            })
            .attach_printable(format!("{} offers returned by search", offers.len())));
        }
        info!(
            candidates = ranked.len(),
            returned = offers.len(),
            "Ranked marketplace offers"
        );

        let mut reasons = Vec::with_capacity(ranked.len());
        for candidate in &ranked {
            if cancellation_token.is_cancelled() {
                return Err(Report::new(SchedulerError::Cancelled {
                    pod: workload.pod_name.clone(),
                }));
            }

            let offer = &candidate.offer;
            info!(
                offer_id = offer.id,
                score = candidate.score,
                notes = ?candidate.notes,
                "Attempting offer"
            );

            match self
                .marketplace
                .create_instance(offer, &workload, cancellation_token.clone())
                .await
            {
                Ok(instance) => {
                    info!(
                        offer_id = offer.id,
                        instance_id = instance.id,
                        "Instance leased and ready"
                    );
                    return Ok(instance);
                }
                Err(report) if report.current_context().is_retryable_with_other_offer() => {
                    warn!(offer_id = offer.id, "Lease rejected, trying next offer: {report:?}");
                    reasons.push(format!("offer {}: {}", offer.id, report.current_context()));
                }
                Err(report) => return Err(report.change_context(SchedulerError::Marketplace)),
            }
        }

        Err(Report::new(SchedulerError::AllCandidatesExhausted { reasons }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use marketplace::MarketplaceError;

    use super::*;
    use crate::k8s::annotations::ANNOTATION_DOMAIN;
    use crate::testing;
    use crate::testing::CreateOutcome;
    use crate::testing::FakeMarketplace;

    fn scheduler(marketplace: Arc<FakeMarketplace>) -> InstanceScheduler {
        InstanceScheduler::new(marketplace, SchedulerPolicy::default())
    }

    #[tokio::test]
    async fn picks_best_offer_and_never_attempts_over_budget() {
        let marketplace = Arc::new(FakeMarketplace::with_offers(vec![
            testing::offer(1, 0.35, 0.80),
            testing::offer(2, 0.40, 0.95),
            testing::offer(3, 0.60, 0.99),
        ]));
        let instance = scheduler(marketplace.clone())
            .select_and_launch_instance(&testing::pod("default", "asr-0"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(instance.status, api_types::InstanceStatus::Running);
        assert_eq!(marketplace.attempts(), vec![2]);
    }

    #[tokio::test]
    async fn rejected_lease_falls_back_to_next_candidate() {
        let marketplace = Arc::new(FakeMarketplace::with_offers(vec![
            testing::offer(1, 0.30, 0.99),
            testing::offer(2, 0.40, 0.95),
        ]));
        marketplace.set_outcome(1, CreateOutcome::Reject);

        let instance = scheduler(marketplace.clone())
            .select_and_launch_instance(&testing::pod("default", "asr-0"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(marketplace.attempts(), vec![1, 2]);
        assert_eq!(marketplace.instance(instance.id).map(|i| i.id), Some(instance.id));
    }

    #[tokio::test]
    async fn exhausted_candidates_report_every_reason() {
        let marketplace = Arc::new(FakeMarketplace::with_offers(vec![
            testing::offer(1, 0.30, 0.99),
            testing::offer(2, 0.40, 0.95),
        ]));
        marketplace.set_outcome(1, CreateOutcome::Reject);
        marketplace.set_outcome(2, CreateOutcome::Reject);

        let err = scheduler(marketplace)
            .select_and_launch_instance(&testing::pod("default", "asr-0"), CancellationToken::new())
            .await
            .unwrap_err();

        match err.current_context() {
            SchedulerError::AllCandidatesExhausted { reasons } => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].starts_with("offer 1:"));
                assert!(reasons[1].starts_with("offer 2:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn readiness_timeout_is_terminal() {
        let marketplace = Arc::new(FakeMarketplace::with_offers(vec![
            testing::offer(1, 0.30, 0.99),
            testing::offer(2, 0.40, 0.95),
        ]));
        marketplace.set_outcome(1, CreateOutcome::Timeout);

        let err = scheduler(marketplace.clone())
            .select_and_launch_instance(&testing::pod("default", "asr-0"), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err.current_context(), SchedulerError::Marketplace));
        assert!(matches!(
            err.downcast_ref::<MarketplaceError>(),
            Some(MarketplaceError::ProvisionTimeout { .. })
        ));
        assert_eq!(marketplace.attempts(), vec![1]);
    }

    #[tokio::test]
    async fn no_admissible_offers() {
        let marketplace = Arc::new(FakeMarketplace::with_offers(vec![testing::offer(
            1, 0.90, 0.99,
        )]));
        let err = scheduler(marketplace.clone())
            .select_and_launch_instance(&testing::pod("default", "asr-0"), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            SchedulerError::NoOffers { .. }
        ));
        assert_eq!(marketplace.searches.load(Ordering::SeqCst), 1);
        assert!(marketplace.attempts().is_empty());
    }

    #[tokio::test]
    async fn partial_gpu_model_is_matched_locally() {
        let marketplace = Arc::new(FakeMarketplace::with_offers(vec![testing::offer(
            1, 0.40, 0.95,
        )]));
        let mut pod = testing::pod("default", "asr-0");
        pod.metadata.annotations = Some(
            [(format!("{ANNOTATION_DOMAIN}/gpu-type"), "4090".to_string())]
                .into_iter()
                .collect(),
        );

        scheduler(marketplace.clone())
            .select_and_launch_instance(&pod, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(marketplace.attempts(), vec![1]);

        pod.metadata.annotations = Some(
            [(format!("{ANNOTATION_DOMAIN}/gpu-type"), "a100".to_string())]
                .into_iter()
                .collect(),
        );
        let err = scheduler(marketplace.clone())
            .select_and_launch_instance(&pod, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            SchedulerError::NoOffers { .. }
        ));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_leasing() {
        let marketplace = Arc::new(FakeMarketplace::with_offers(vec![testing::offer(
            1, 0.30, 0.99,
        )]));
        let token = CancellationToken::new();
        token.cancel();

        let err = scheduler(marketplace.clone())
            .select_and_launch_instance(&testing::pod("default", "asr-0"), token)
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            SchedulerError::Cancelled { .. }
        ));
        assert!(marketplace.attempts().is_empty());
    }
}
