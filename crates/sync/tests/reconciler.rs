#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::json;
use vsync_core::labels::{MARKER_LABEL, NAMESPACE_ANNOTATION, NAME_ANNOTATION};
use vsync_core::resource::controller_ref;
use vsync_core::{Domain, Identity, Resource, StoreOp, SyncConfig, SyncError, TrackedKind};
use vsync_store::MemStore;
use vsync_sync::index::virtual_index_specs;
use vsync_sync::{Dispatcher, Event, KindProfile, Notification, Outcome, Reconciler, SkipReason, Verb};
use vsync_translate::{NamespacedTranslator, RevisionTranslator, Translate};

const TARGET: &str = "vcluster";
const SUFFIX: &str = "vcluster";

struct Fixture {
    cfg: SyncConfig,
    v: Arc<MemStore>,
    p: Arc<MemStore>,
}

impl Fixture {
    fn new() -> Self {
        let cfg = SyncConfig::new(TARGET, SUFFIX);
        let v = Arc::new(MemStore::new(Domain::Virtual, virtual_index_specs(&cfg).unwrap()));
        let p = Arc::new(MemStore::new(Domain::Physical, vec![]));
        Self { cfg, v, p }
    }

    fn reconciler(&self, profile: KindProfile) -> Reconciler {
        Reconciler::new(profile, &self.cfg, self.v.clone(), self.p.clone()).unwrap()
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(&self.cfg, self.v.clone(), self.p.clone()).unwrap()
    }

    fn physical_name(&self, name: &str) -> String {
        NamespacedTranslator::new(&self.cfg).unwrap().physical_name(name, "default")
    }

    fn physical_revision(&self, virtual_name: &str) -> Identity {
        RevisionTranslator::new(&self.cfg).unwrap().virtual_to_physical(&Identity::new("default", virtual_name)).unwrap()
    }

    /// Virtual service plus its marked physical counterpart.
    fn service(&self, name: &str) -> (Resource, Resource) {
        let v = self.v.insert(Resource::new(TrackedKind::Service, &Identity::new("default", name)));
        let p = self.p.insert(
            Resource::new(TrackedKind::Service, &Identity::new(TARGET, self.physical_name(name)))
                .with_label(MARKER_LABEL, SUFFIX),
        );
        (v, p)
    }

    fn physical_config(&self, name: &str, owner: &Resource) -> Resource {
        self.p.insert(
            Resource::new(TrackedKind::Configuration, &Identity::new(TARGET, self.physical_name(name)))
                .with_label(MARKER_LABEL, SUFFIX)
                .with_owner(controller_ref(owner))
                .with_spec(json!({ "template": { "spec": { "image": "hello:1" } } })),
        )
    }

    fn virtual_config(&self, name: &str, latest: &str, owner: &Resource) -> Resource {
        self.v.insert(
            Resource::new(TrackedKind::Configuration, &Identity::new("default", name))
                .with_owner(controller_ref(owner))
                .with_spec(json!({ "template": { "spec": { "image": "hello:1" } } }))
                .with_status(json!({ "latestCreatedRevisionName": latest })),
        )
    }

    fn physical_revision_obj(&self, id: &Identity, owner: Option<&Resource>) -> Resource {
        let mut rev = Resource::new(TrackedKind::Revision, id)
            .with_spec(json!({ "containers": [{ "image": "hello:1" }] }))
            .with_status(json!({ "observedGeneration": 1 }));
        if let Some(owner) = owner {
            rev = rev.with_owner(controller_ref(owner));
        }
        self.p.insert(rev)
    }
}

#[tokio::test]
async fn hello_revision_is_created_under_its_configuration() {
    let f = Fixture::new();
    let (vsvc, psvc) = f.service("hello");
    let pid = f.physical_revision("hello-00001");
    assert_eq!(pid, Identity::new("vcluster", "hello-x-default-x-vcluster-00001"));
    let pconfig = f.physical_config("hello", &psvc);
    f.virtual_config("hello", &pid.name, &vsvc);
    let prev = f.physical_revision_obj(&pid, Some(&pconfig));

    let r = f.reconciler(KindProfile::REVISION);
    let vid = Identity::new("default", "hello-00001");
    assert_eq!(r.sync_up(&prev).await.unwrap(), Outcome::Created(vid.clone()));

    let created = f.v.object(TrackedKind::Revision, &vid).unwrap();
    assert_eq!(created.spec, prev.spec);
    assert_ne!(created.uid(), prev.uid());
    let owners = created.owner_references();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Configuration");
    assert_eq!(owners[0].name, "hello");
    assert_eq!(owners[0].controller, Some(true));
    assert_eq!(r.virtual_to_physical(&vid).unwrap(), pid);
}

#[tokio::test]
async fn second_sync_writes_nothing() {
    let f = Fixture::new();
    let (vsvc, psvc) = f.service("hello");
    let pid = f.physical_revision("hello-00001");
    let pconfig = f.physical_config("hello", &psvc);
    f.virtual_config("hello", &pid.name, &vsvc);
    let prev = f.physical_revision_obj(&pid, Some(&pconfig));

    let r = f.reconciler(KindProfile::REVISION);
    r.sync_up(&prev).await.unwrap();
    f.v.clear_writes();

    let vrev = f.v.object(TrackedKind::Revision, &Identity::new("default", "hello-00001")).unwrap();
    assert_eq!(r.sync(&prev, &vrev).await.unwrap(), Outcome::Noop);
    assert_eq!(r.reconcile(Some(&prev), Some(&vrev)).await.unwrap(), Outcome::Noop);
    // a replayed create is absorbed
    assert_eq!(r.sync_up(&prev).await.unwrap(), Outcome::Noop);
    assert!(f.v.writes().is_empty());
}

#[tokio::test]
async fn spec_is_written_before_status() {
    let f = Fixture::new();
    let (vsvc, psvc) = f.service("hello");
    let p = f.p.insert(
        Resource::new(TrackedKind::Configuration, &Identity::new(TARGET, f.physical_name("hello")))
            .with_owner(controller_ref(&psvc))
            .with_spec(json!({ "a": 2 }))
            .with_status(json!({ "ready": true })),
    );
    f.v.insert(
        Resource::new(TrackedKind::Configuration, &Identity::new("default", "hello"))
            .with_owner(controller_ref(&vsvc))
            .with_spec(json!({ "a": 1 }))
            .with_status(json!({ "ready": false })),
    );
    let vid = Identity::new("default", "hello");
    let r = f.reconciler(KindProfile::CONFIGURATION);

    let v = f.v.object(TrackedKind::Configuration, &vid).unwrap();
    assert_eq!(r.sync(&p, &v).await.unwrap(), Outcome::SpecUpdated);
    let v = f.v.object(TrackedKind::Configuration, &vid).unwrap();
    assert_eq!(v.spec, json!({ "a": 2 }));
    assert_eq!(v.status, json!({ "ready": false }));

    assert_eq!(r.sync(&p, &v).await.unwrap(), Outcome::StatusUpdated);
    let v = f.v.object(TrackedKind::Configuration, &vid).unwrap();
    assert_eq!(r.sync(&p, &v).await.unwrap(), Outcome::Noop);

    let ops: Vec<StoreOp> = f.v.writes().into_iter().map(|w| w.op).collect();
    assert_eq!(ops, vec![StoreOp::Update, StoreOp::UpdateStatus]);
}

#[tokio::test]
async fn sync_down_deletes_once() {
    let f = Fixture::new();
    let route = f.v.insert(Resource::new(TrackedKind::Route, &Identity::new("default", "hello")));
    let r = f.reconciler(KindProfile::ROUTE);

    assert_eq!(r.sync_down(&route).await.unwrap(), Outcome::Deleted);
    assert_eq!(r.reconcile(None, Some(&route)).await.unwrap(), Outcome::Noop);
    assert_eq!(r.reconcile(None, None).await.unwrap(), Outcome::Noop);

    let writes = f.v.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].op, StoreOp::Delete);
    assert!(f.p.writes().is_empty());
}

#[tokio::test]
async fn shortened_revision_resolves_through_configuration_index() {
    let f = Fixture::new();
    let long = "a".repeat(60);
    let (vsvc, _) = f.service(&long);
    let pid = f.physical_revision(&format!("{}-00001", long));
    assert!(!pid.name.contains("-x-"), "expected a shortened name, got {}", pid.name);
    f.virtual_config(&long, &pid.name, &vsvc);
    let prev = f.physical_revision_obj(&pid, None);
    let prev = f.p.insert(prev.with_label(MARKER_LABEL, SUFFIX));

    let r = f.reconciler(KindProfile::REVISION);
    let vid = Identity::new("default", format!("{}-00001", long));
    assert_eq!(r.physical_to_virtual(&prev).await.unwrap(), vid);
    assert_eq!(r.cache().lookup(&pid), Some(vid.clone()));
    assert_eq!(r.virtual_to_physical(&vid).unwrap(), pid);

    assert_eq!(r.sync_up(&prev).await.unwrap(), Outcome::Created(vid.clone()));
    let created = f.v.object(TrackedKind::Revision, &vid).unwrap();
    assert_eq!(created.owner_references()[0].name, long);
    assert_eq!(created.label(MARKER_LABEL), None);
}

#[tokio::test]
async fn unmanaged_owner_is_reported_and_not_cached() {
    let f = Fixture::new();
    let stranger = f.p.insert(Resource::new(TrackedKind::Service, &Identity::new(TARGET, "custom")));
    let pconfig = f.p.insert(
        Resource::new(TrackedKind::Configuration, &Identity::new(TARGET, "custom")).with_owner(controller_ref(&stranger)),
    );
    let r = f.reconciler(KindProfile::CONFIGURATION);

    let err = r.physical_to_virtual(&pconfig).await.unwrap_err();
    assert!(matches!(err, SyncError::UnmanagedObject { .. }), "err={}", err);
    assert!(r.cache().is_empty());

    assert_eq!(r.sync_up(&pconfig).await.unwrap(), Outcome::Skipped(SkipReason::Unmanaged));
    assert!(f.v.writes().is_empty());
}

#[tokio::test]
async fn revisions_only_receive_status() {
    let f = Fixture::new();
    let pid = f.physical_revision("hello-00001");
    let p = f.p.insert(
        Resource::new(TrackedKind::Revision, &pid).with_spec(json!({ "a": 2 })).with_status(json!({ "ready": true })),
    );
    let vid = Identity::new("default", "hello-00001");
    f.v.insert(Resource::new(TrackedKind::Revision, &vid).with_spec(json!({ "a": 1 })).with_status(json!({ "ready": false })));
    let r = f.reconciler(KindProfile::REVISION);

    let v = f.v.object(TrackedKind::Revision, &vid).unwrap();
    assert_eq!(r.sync(&p, &v).await.unwrap(), Outcome::StatusUpdated);
    let v = f.v.object(TrackedKind::Revision, &vid).unwrap();
    assert_eq!(r.sync(&p, &v).await.unwrap(), Outcome::Noop);
    assert_eq!(v.spec, json!({ "a": 1 }));

    let ops: Vec<StoreOp> = f.v.writes().into_iter().map(|w| w.op).collect();
    assert_eq!(ops, vec![StoreOp::UpdateStatus]);
}

#[tokio::test]
async fn revision_waits_for_its_configuration() {
    let f = Fixture::new();
    let (vsvc, psvc) = f.service("hello");
    let pid = f.physical_revision("hello-00001");
    let pconfig = f.physical_config("hello", &psvc);
    let prev = f.physical_revision_obj(&pid, Some(&pconfig));
    let r = f.reconciler(KindProfile::REVISION);

    assert_eq!(r.sync_up(&prev).await.unwrap(), Outcome::Skipped(SkipReason::ParentMissing));
    assert!(f.v.writes().is_empty());

    f.virtual_config("hello", &pid.name, &vsvc);
    assert_eq!(r.sync_up(&prev).await.unwrap(), Outcome::Created(Identity::new("default", "hello-00001")));
}

#[tokio::test]
async fn configuration_identity_from_annotations() {
    let f = Fixture::new();
    let (_, psvc) = f.service("hello");
    let pconfig = f.p.insert(
        Resource::new(TrackedKind::Configuration, &Identity::new(TARGET, "renamed-by-host"))
            .with_label(MARKER_LABEL, SUFFIX)
            .with_annotation(NAME_ANNOTATION, "hello")
            .with_annotation(NAMESPACE_ANNOTATION, "default")
            .with_owner(controller_ref(&psvc)),
    );
    let r = f.reconciler(KindProfile::CONFIGURATION);

    let vid = Identity::new("default", "hello");
    assert_eq!(r.sync_up(&pconfig).await.unwrap(), Outcome::Created(vid.clone()));
    let created = f.v.object(TrackedKind::Configuration, &vid).unwrap();
    assert_eq!(created.annotation(NAME_ANNOTATION), None);
    assert_eq!(created.owner_references()[0].kind, "Service");
    assert_eq!(created.owner_references()[0].name, "hello");
}

#[tokio::test]
async fn echo_of_annotated_configuration_keeps_it() {
    let f = Fixture::new();
    let d = f.dispatcher();
    let (_, psvc) = f.service("hello");
    let pconfig = f.p.insert(
        Resource::new(TrackedKind::Configuration, &Identity::new(TARGET, "renamed-by-host"))
            .with_label(MARKER_LABEL, SUFFIX)
            .with_annotation(NAME_ANNOTATION, "hello")
            .with_annotation(NAMESPACE_ANNOTATION, "default")
            .with_owner(controller_ref(&psvc)),
    );
    let vid = Identity::new("default", "hello");

    let added = Event { domain: Domain::Physical, notification: Notification::Added(pconfig.clone()) };
    assert_eq!(d.handle(&added).await.unwrap(), Outcome::Created(vid.clone()));
    let r = d.reconciler(TrackedKind::Configuration).unwrap();
    assert_eq!(r.virtual_to_physical(&vid).unwrap(), pconfig.identity());

    let created = f.v.object(TrackedKind::Configuration, &vid).unwrap();
    let echo = Event { domain: Domain::Virtual, notification: Notification::Added(created) };
    assert_eq!(d.handle(&echo).await.unwrap(), Outcome::Noop);
    assert!(f.v.object(TrackedKind::Configuration, &vid).is_some());

    f.p.evict(TrackedKind::Configuration, &pconfig.identity());
    let gone = Event { domain: Domain::Physical, notification: Notification::Deleted(pconfig) };
    assert_eq!(d.handle(&gone).await.unwrap(), Outcome::Deleted);
    assert!(r.cache().is_empty());
}

#[tokio::test]
async fn derivable_annotated_names_are_not_cached() {
    let f = Fixture::new();
    let pconfig = f.p.insert(
        Resource::new(TrackedKind::Configuration, &Identity::new(TARGET, f.physical_name("hello")))
            .with_annotation(NAME_ANNOTATION, "hello")
            .with_annotation(NAMESPACE_ANNOTATION, "default"),
    );
    let r = f.reconciler(KindProfile::CONFIGURATION);
    assert_eq!(r.physical_to_virtual(&pconfig).await.unwrap(), Identity::new("default", "hello"));
    assert!(r.cache().is_empty());
}

#[tokio::test]
async fn configuration_status_names_revisions_to_revisit() {
    let f = Fixture::new();
    let d = f.dispatcher();
    let (vsvc, psvc) = f.service("hello");
    let pid = f.physical_revision("hello-00002");
    let pconfig = f.physical_config("hello", &psvc);
    let prev = f.physical_revision_obj(&pid, Some(&pconfig));
    let vconfig = f.virtual_config("hello", &pid.name, &vsvc);

    let changed = Event {
        domain: Domain::Virtual,
        notification: Notification::Updated { old: None, new: vconfig.clone() },
    };
    let follow = d.dependents(&changed).await.unwrap();
    assert_eq!(follow.len(), 1);
    assert_eq!(follow[0].key(), (Domain::Physical, TrackedKind::Revision, pid.clone()));
    assert_eq!(follow[0].object(), &prev);

    // revisions not yet on the host and deletes yield nothing
    let ahead = f.virtual_config("hello", "hello-x-default-x-vcluster-00009", &vsvc);
    let ahead = Event { domain: Domain::Virtual, notification: Notification::Added(ahead) };
    assert!(d.dependents(&ahead).await.unwrap().is_empty());
    let removed = Event { domain: Domain::Virtual, notification: Notification::Deleted(vconfig) };
    assert!(d.dependents(&removed).await.unwrap().is_empty());
    let physical = Event { domain: Domain::Physical, notification: Notification::Added(prev) };
    assert!(d.dependents(&physical).await.unwrap().is_empty());
}

#[tokio::test]
async fn store_failures_propagate() {
    let f = Fixture::new();
    let (vsvc, psvc) = f.service("hello");
    let pconfig = f.physical_config("hello", &psvc);
    let r = f.reconciler(KindProfile::CONFIGURATION);

    f.v.fail_next(StoreOp::Create);
    let err = r.sync_up(&pconfig).await.unwrap_err();
    assert!(matches!(err, SyncError::StoreOperationFailed { op: StoreOp::Create, .. }), "err={}", err);

    let v = f.v.insert(
        Resource::new(TrackedKind::Configuration, &Identity::new("default", "hello"))
            .with_owner(controller_ref(&vsvc))
            .with_spec(json!({ "stale": true })),
    );
    f.v.fail_next(StoreOp::Update);
    let err = r.sync(&pconfig, &v).await.unwrap_err();
    assert!(matches!(err, SyncError::StoreOperationFailed { op: StoreOp::Update, .. }), "err={}", err);

    f.v.fail_next(StoreOp::Delete);
    assert!(r.sync_down(&v).await.is_err());
}

#[test]
fn untracked_notifications_are_rejected() {
    let err = Event::decode(
        Domain::Physical,
        Verb::Added,
        json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x", "namespace": "vcluster" } }),
    )
    .unwrap_err();
    assert!(matches!(err, SyncError::UnsupportedType { .. }), "err={}", err);

    let ok = Event::decode(
        Domain::Virtual,
        Verb::Deleted,
        json!({ "apiVersion": "serving.knative.dev/v1", "kind": "Route", "metadata": { "name": "hello", "namespace": "default" } }),
    )
    .unwrap();
    assert!(matches!(ok.notification, Notification::Deleted(_)));
    assert_eq!(ok.key(), (Domain::Virtual, TrackedKind::Route, Identity::new("default", "hello")));
}

#[tokio::test]
async fn dispatcher_follows_both_domains() {
    let f = Fixture::new();
    let d = f.dispatcher();
    let (vsvc, psvc) = f.service("hello");
    let pid = f.physical_revision("hello-00001");
    let pconfig = f.physical_config("hello", &psvc);
    f.virtual_config("hello", &pid.name, &vsvc);
    let prev = f.physical_revision_obj(&pid, Some(&pconfig));
    let vid = Identity::new("default", "hello-00001");

    let added = Event { domain: Domain::Physical, notification: Notification::Added(prev.clone()) };
    assert_eq!(d.handle(&added).await.unwrap(), Outcome::Created(vid.clone()));

    // tenant deletes the virtual copy; the physical one brings it back
    let vrev = f.v.evict(TrackedKind::Revision, &vid).unwrap();
    let removed = Event { domain: Domain::Virtual, notification: Notification::Deleted(vrev) };
    assert_eq!(d.handle(&removed).await.unwrap(), Outcome::Created(vid.clone()));

    f.p.evict(TrackedKind::Revision, &pid);
    let gone = Event { domain: Domain::Physical, notification: Notification::Deleted(prev) };
    assert_eq!(d.handle(&gone).await.unwrap(), Outcome::Deleted);
    assert!(f.v.object(TrackedKind::Revision, &vid).is_none());

    let svc = Event { domain: Domain::Virtual, notification: Notification::Added(vsvc) };
    assert_eq!(d.handle(&svc).await.unwrap(), Outcome::Noop);
}

#[tokio::test]
async fn warm_refills_name_cache() {
    let f = Fixture::new();
    let long = "b".repeat(60);
    let (vsvc, _) = f.service(&long);
    let pid = f.physical_revision(&format!("{}-00003", long));
    f.virtual_config(&long, &pid.name, &vsvc);
    let prev = f.p.insert(f.physical_revision_obj(&pid, None).with_label(MARKER_LABEL, SUFFIX));
    let orphan = f.p.insert(Resource::new(TrackedKind::Route, &Identity::new(TARGET, "orphan")));

    let d = f.dispatcher();
    assert_eq!(d.warm(vec![prev, orphan]).await, 1);
    let cached = d.reconciler(TrackedKind::Revision).unwrap().cache().lookup(&pid);
    assert_eq!(cached, Some(Identity::new("default", format!("{}-00003", long))));
}
