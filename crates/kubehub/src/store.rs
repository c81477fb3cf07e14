use std::sync::Arc;

use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta};
use kube::Client;
use metrics::counter;
use parking_lot::RwLock;
use tracing::debug;
use vsync_core::{Domain, Identity, Resource, Result, StoreOp, SyncError, TrackedKind};
use vsync_store::{IndexSpec, IndexedCache, ObjectStore};

pub fn api_resource(kind: TrackedKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(kind.group(), kind.version(), kind.as_str());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

/// List and watch responses may omit `apiVersion`/`kind` on items; fill them from `kind`.
pub fn to_resource(kind: TrackedKind, mut obj: DynamicObject) -> Result<Resource> {
    obj.types = Some(TypeMeta { api_version: kind.api_version().to_string(), kind: kind.as_str().to_string() });
    let mut raw = serde_json::to_value(&obj)?;
    if let Some(meta) = raw.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
    Resource::from_json(raw)
}

pub fn from_resource(obj: &Resource) -> Result<DynamicObject> {
    Ok(serde_json::from_value(obj.to_json()?)?)
}

pub(crate) fn map_err(op: StoreOp, kind: TrackedKind, id: &Identity, err: kube::Error) -> SyncError {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => SyncError::not_found(kind, id.clone()),
        kube::Error::Api(ae) if ae.code == 409 && op == StoreOp::Create => SyncError::already_exists(kind, id.clone()),
        _ => {
            counter!("vsync_store_errors_total", 1u64, "op" => op.as_str(), "kind" => kind.as_str());
            SyncError::store(op, kind, id.clone(), anyhow::Error::new(err))
        }
    }
}

/// `ObjectStore` over one cluster's API server.
///
/// Reads and writes go to the API; `list_by_index` is answered from a local
/// cache fed by the watchers.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    domain: Domain,
    cache: Arc<RwLock<IndexedCache>>,
}

impl KubeStore {
    pub fn new(client: Client, domain: Domain, specs: Vec<IndexSpec>) -> Self {
        Self { client, domain, cache: Arc::new(RwLock::new(IndexedCache::new(specs))) }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Shared handle for watchers feeding this store's index.
    pub fn cache(&self) -> Arc<RwLock<IndexedCache>> {
        Arc::clone(&self.cache)
    }

    fn api(&self, kind: TrackedKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(kind))
    }

    /// List `kind` (in `namespace`, or everywhere) and load the result into the index cache.
    pub async fn prime(&self, kind: TrackedKind, namespace: Option<&str>) -> anyhow::Result<Vec<Resource>> {
        let ar = api_resource(kind);
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let list = api.list(&ListParams::default()).await?;
        let mut out = Vec::with_capacity(list.items.len());
        for item in list.items {
            out.push(to_resource(kind, item)?);
        }
        let mut cache = self.cache.write();
        for obj in &out {
            cache.apply(obj.clone());
        }
        debug!(domain = %self.domain, %kind, count = out.len(), "primed index cache");
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn get(&self, kind: TrackedKind, id: &Identity) -> Result<Option<Resource>> {
        let found = self
            .api(kind, &id.namespace)
            .get_opt(&id.name)
            .await
            .map_err(|e| map_err(StoreOp::Get, kind, id, e))?;
        found.map(|o| to_resource(kind, o)).transpose()
    }

    async fn create(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        let data = from_resource(obj)?;
        self.api(obj.kind, &id.namespace)
            .create(&PostParams::default(), &data)
            .await
            .map_err(|e| map_err(StoreOp::Create, obj.kind, &id, e))?;
        Ok(())
    }

    async fn update(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        let data = from_resource(obj)?;
        self.api(obj.kind, &id.namespace)
            .replace(&id.name, &PostParams::default(), &data)
            .await
            .map_err(|e| map_err(StoreOp::Update, obj.kind, &id, e))?;
        Ok(())
    }

    async fn update_status(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        let data = serde_json::to_vec(&obj.to_json()?)?;
        self.api(obj.kind, &id.namespace)
            .replace_status(&id.name, &PostParams::default(), data)
            .await
            .map_err(|e| map_err(StoreOp::UpdateStatus, obj.kind, &id, e))?;
        Ok(())
    }

    async fn delete(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        self.api(obj.kind, &id.namespace)
            .delete(&id.name, &DeleteParams::default())
            .await
            .map_err(|e| map_err(StoreOp::Delete, obj.kind, &id, e))?;
        Ok(())
    }

    async fn list_by_index(&self, kind: TrackedKind, index: &str, key: &str) -> Result<Vec<Resource>> {
        Ok(self.cache.read().list_by_index(kind, index, key))
    }
}
