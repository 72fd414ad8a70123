//! In-memory stand-ins for the marketplace and the cluster.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use api_types::Instance;
use api_types::InstanceOffer;
use api_types::InstanceStatus;
use api_types::SearchCriteria;
use api_types::WorkloadSpec;
use async_trait::async_trait;
use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use marketplace::Marketplace;
use marketplace::MarketplaceError;
use marketplace::MarketplaceResult;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::endpoints::EndpointError;
use crate::endpoints::EndpointStore;
use crate::k8s::KubernetesError;
use crate::provider::NodeStatusSink;
use crate::provider::PodNotifier;

pub const IMAGE: &str = "registry.example.com/speech:1.0";
pub const PUBLIC_IP: &str = "203.0.113.10";

pub fn pod(namespace: &str, name: &str) -> Pod {
    let port = |container_port: i32| ContainerPort {
        container_port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("vnode-0".to_string()),
            containers: vec![Container {
                name: "speech".to_string(),
                image: Some(IMAGE.to_string()),
                command: Some(vec!["python".to_string(), "serve.py".to_string()]),
                args: Some(vec!["--port".to_string(), "8000".to_string()]),
                env: Some(vec![EnvVar {
                    name: "MODEL".to_string(),
                    value: Some("large-v3".to_string()),
                    ..Default::default()
                }]),
                ports: Some(vec![port(8000), port(8765)]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

pub fn offer(id: u64, price: f64, reliability: f64) -> InstanceOffer {
    InstanceOffer {
        id,
        gpu_name: "RTX 4090".to_string(),
        gpu_ram_mb: 24 * 1024,
        num_gpus: 1,
        dph_total: price,
        reliability,
        inet_up_mbps: 500.0,
        inet_down_mbps: 500.0,
        verified: true,
        rentable: true,
        geolocation: Some("Sweden, SE".to_string()),
        ..Default::default()
    }
}

/// What the fake marketplace does when an offer is leased.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Ready,
    Reject,
    Timeout,
    /// Block until the caller cancels
    WaitForCancel,
    /// Block until notified, ignoring cancellation
    ReadyAfter(Arc<Notify>),
}

pub struct FakeMarketplace {
    offers: Vec<InstanceOffer>,
    outcomes: Mutex<HashMap<u64, CreateOutcome>>,
    instances: Mutex<HashMap<u64, Instance>>,
    attempts: Mutex<Vec<u64>>,
    launched: Mutex<Vec<u64>>,
    destroyed: Mutex<Vec<u64>>,
    next_id: AtomicU64,
    get_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    pub searches: AtomicUsize,
    pub fail_destroy: AtomicBool,
    pub fail_get: AtomicBool,
}

impl FakeMarketplace {
    pub fn with_offers(offers: Vec<InstanceOffer>) -> Self {
        Self {
            offers,
            outcomes: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            launched: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
            get_gate: Mutex::new(None),
            searches: AtomicUsize::new(0),
            fail_destroy: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
        }
    }

    pub fn set_outcome(&self, offer_id: u64, outcome: CreateOutcome) {
        self.outcomes.lock().unwrap().insert(offer_id, outcome);
    }

    pub fn set_status(&self, instance_id: u64, status: InstanceStatus) {
        if let Some(instance) = self.instances.lock().unwrap().get_mut(&instance_id) {
            instance.status = status;
        }
    }

    /// Hold the next `get_instance` after signalling `entered` until `release`.
    pub fn gate_get(&self, entered: Arc<Notify>, release: Arc<Notify>) {
        *self.get_gate.lock().unwrap() = Some((entered, release));
    }

    /// Drop an instance as if the vendor reclaimed it.
    pub fn forget(&self, instance_id: u64) {
        self.instances.lock().unwrap().remove(&instance_id);
    }

    pub fn instance(&self, instance_id: u64) -> Option<Instance> {
        self.instances.lock().unwrap().get(&instance_id).cloned()
    }

    /// Offer ids in the order leases were attempted
    pub fn attempts(&self) -> Vec<u64> {
        self.attempts.lock().unwrap().clone()
    }

    /// Instance ids that reached readiness
    pub fn launched(&self) -> Vec<u64> {
        self.launched.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.destroyed.lock().unwrap().clone()
    }

    fn launch(&self, instance_id: u64, offer: &InstanceOffer, workload: &WorkloadSpec) -> Instance {
        let instance = Instance {
            id: instance_id,
            public_ip: Some(PUBLIC_IP.to_string()),
            status: InstanceStatus::Running,
            port_map: workload
                .ports
                .iter()
                .map(|port| (*port, 40000 + port % 10000))
                .collect::<BTreeMap<_, _>>(),
            created_at: Some(Utc::now()),
            gpu_name: offer.gpu_name.clone(),
            num_gpus: offer.num_gpus,
            dph_total: offer.dph_total,
            geolocation: offer.geolocation.clone(),
            label: workload.label.clone(),
            ..Default::default()
        };
        self.instances
            .lock()
            .unwrap()
            .insert(instance_id, instance.clone());
        self.launched.lock().unwrap().push(instance_id);
        instance
    }
}

#[async_trait]
impl Marketplace for FakeMarketplace {
    async fn test_connection(&self) -> MarketplaceResult<()> {
        Ok(())
    }

    async fn search_instances(
        &self,
        _criteria: &SearchCriteria,
    ) -> MarketplaceResult<Vec<InstanceOffer>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.offers.clone())
    }

    async fn create_instance(
        &self,
        offer: &InstanceOffer,
        workload: &WorkloadSpec,
        cancellation_token: CancellationToken,
    ) -> MarketplaceResult<Instance> {
        self.attempts.lock().unwrap().push(offer.id);
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&offer.id)
            .cloned()
            .unwrap_or(CreateOutcome::Ready);
        let instance_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        match outcome {
            CreateOutcome::Ready => Ok(self.launch(instance_id, offer, workload)),
            CreateOutcome::Reject => Err(Report::new(MarketplaceError::Provision {
                offer_id: offer.id,
                message: "offer no longer available".to_string(),
            })),
            CreateOutcome::Timeout => Err(Report::new(MarketplaceError::ProvisionTimeout {
                instance_id,
                seconds: 600,
            })),
            CreateOutcome::WaitForCancel => {
                cancellation_token.cancelled().await;
                Err(Report::new(MarketplaceError::Cancelled { instance_id }))
            }
            CreateOutcome::ReadyAfter(gate) => {
                gate.notified().await;
                Ok(self.launch(instance_id, offer, workload))
            }
        }
    }

    async fn get_instance(&self, instance_id: u64) -> MarketplaceResult<Instance> {
        let gate = self.get_gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Report::new(MarketplaceError::Request {
                message: "vendor unavailable".to_string(),
            }));
        }
        self.instance(instance_id)
            .ok_or_else(|| Report::new(MarketplaceError::NotFound { instance_id }))
    }

    async fn update_instance(
        &self,
        instance_id: u64,
        _workload: &WorkloadSpec,
    ) -> MarketplaceResult<Instance> {
        Err(Report::new(MarketplaceError::Unsupported {
            message: format!("instance {instance_id} cannot be changed in place"),
        }))
    }

    async fn destroy_instance(&self, instance_id: u64) -> MarketplaceResult<()> {
        self.destroyed.lock().unwrap().push(instance_id);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(Report::new(MarketplaceError::Request {
                message: "destroy rejected".to_string(),
            }));
        }
        self.forget(instance_id);
        Ok(())
    }

    async fn get_instance_logs(&self, instance_id: u64) -> String {
        match self.instance(instance_id) {
            Some(_) => "booting\nloading model\nserving on :8000\n".to_string(),
            None => format!("logs are not available for instance {instance_id}\n"),
        }
    }
}

#[derive(Default)]
pub struct MemoryEndpointStore {
    objects: Mutex<BTreeMap<(String, String), Endpoints>>,
    pub creates: AtomicUsize,
    pub replaces: AtomicUsize,
    pub fail: AtomicBool,
}

impl MemoryEndpointStore {
    pub fn insert(&self, endpoints: Endpoints) {
        let key = (
            endpoints.metadata.namespace.clone().unwrap_or_default(),
            endpoints.metadata.name.clone().unwrap_or_default(),
        );
        self.objects.lock().unwrap().insert(key, endpoints);
    }

    pub fn get_sync(&self, namespace: &str, name: &str) -> Option<Endpoints> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn check(&self) -> Result<(), Report<EndpointError>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Report::new(EndpointError::Kubernetes {
                message: "apiserver unavailable".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoints>, Report<EndpointError>> {
        self.check()?;
        Ok(self.get_sync(namespace, name))
    }

    async fn create(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>> {
        self.check()?;
        let name = endpoints.metadata.name.clone().unwrap_or_default();
        let mut objects = self.objects.lock().unwrap();
        assert!(
            !objects.contains_key(&(namespace.to_string(), name.clone())),
            "create of existing endpoints {namespace}/{name}"
        );
        objects.insert((namespace.to_string(), name), endpoints.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>> {
        self.check()?;
        let name = endpoints.metadata.name.clone().unwrap_or_default();
        let mut objects = self.objects.lock().unwrap();
        assert!(
            objects.contains_key(&(namespace.to_string(), name.clone())),
            "replace of missing endpoints {namespace}/{name}"
        );
        objects.insert((namespace.to_string(), name), endpoints.clone());
        self.replaces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Holds the first `get` until released, so a test can act mid-write.
pub struct GatedEndpointStore {
    pub inner: MemoryEndpointStore,
    armed: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl Default for GatedEndpointStore {
    fn default() -> Self {
        Self {
            inner: MemoryEndpointStore::default(),
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl EndpointStore for GatedEndpointStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoints>, Report<EndpointError>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.get(namespace, name).await
    }

    async fn create(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>> {
        self.inner.create(namespace, endpoints).await
    }

    async fn replace(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>> {
        self.inner.replace(namespace, endpoints).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pods: Mutex<Vec<Pod>>,
}

impl RecordingNotifier {
    /// `(namespace/name, phase)` for every pushed pod
    pub fn phases(&self) -> Vec<(String, String)> {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .map(|pod| {
                (
                    format!(
                        "{}/{}",
                        pod.metadata.namespace.as_deref().unwrap_or_default(),
                        pod.metadata.name.as_deref().unwrap_or_default()
                    ),
                    pod.status
                        .as_ref()
                        .and_then(|s| s.phase.clone())
                        .unwrap_or_default(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl PodNotifier for RecordingNotifier {
    async fn notify(&self, pod: Pod) -> Result<(), Report<KubernetesError>> {
        self.pods.lock().unwrap().push(pod);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNodeSink {
    nodes: Mutex<Vec<Node>>,
}

impl RecordingNodeSink {
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeStatusSink for RecordingNodeSink {
    async fn update_node(&self, node: Node) -> Result<(), Report<KubernetesError>> {
        self.nodes.lock().unwrap().push(node);
        Ok(())
    }
}
