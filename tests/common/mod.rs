//! Common test utilities
//!
//! In-memory source and target stores, a recording event publisher and
//! certificate helpers. The target store imitates server-side apply closely
//! enough for ownership, drift and migration to behave as on a cluster.

#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ManagedFieldsEntry};
use kube::runtime::events::EventType;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use trust_bundle_controller::controller::pem::{sanitize, SanitizeOptions};
use trust_bundle_controller::controller::reconciler::selector;
use trust_bundle_controller::controller::reconciler::target::{
    applied_fields, DesiredTarget, Field, FieldSet,
};
use trust_bundle_controller::crd::{Bundle, BundleSpec, ObjectKind};
use trust_bundle_controller::prelude::{
    ControllerConfig, EventPublisher, KeyValueObject, NamespaceInfo, SourceStore, TargetObject,
    TargetStore,
};

pub const TRUST_NAMESPACE: &str = "trust-system";
pub const FIELD_MANAGER: &str = "trust-bundle-controller";
pub const BUNDLE_UID: &str = "6a1c6f2e-0d6b-4b8a-9d4e-3f1f0c2b7a11";

/// Self-signed certificate valid 2020..2040
pub fn cert_pem(common_name: &str) -> String {
    cert_pem_valid(common_name, 2020, 2040)
}

pub fn cert_pem_valid(common_name: &str, from_year: i32, to_year: i32) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.not_before = rcgen::date_time_ymd(from_year, 1, 1);
    params.not_after = rcgen::date_time_ymd(to_year, 1, 1);
    params.self_signed(&key).unwrap().pem()
}

/// Canonical form of a single certificate as the sanitizer emits it
pub fn canonical(pem: &str) -> String {
    sanitize(pem, &SanitizeOptions::keep_expired()).unwrap()
}

/// Config for a controller whose trust namespace is [`TRUST_NAMESPACE`]
pub fn config() -> ControllerConfig {
    ControllerConfig {
        trust_namespace: TRUST_NAMESPACE.to_string(),
        secret_targets_enabled: true,
        ..ControllerConfig::default()
    }
}

/// Parse YAML the way the API server hands objects over: as JSON
///
/// serde_yaml only maps externally tagged enums from `!tag` syntax, so
/// `- inLine: ...` has to go through a JSON value.
pub fn from_yaml<T: serde::de::DeserializeOwned>(yaml: &str) -> T {
    let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
    serde_json::from_value(value).unwrap()
}

pub fn bundle(name: &str, spec_yaml: &str) -> Bundle {
    let spec: BundleSpec = from_yaml(spec_yaml);
    let mut bundle = Bundle::new(name, spec);
    bundle.metadata.uid = Some(BUNDLE_UID.to_string());
    bundle.metadata.generation = Some(1);
    bundle
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SourceObject {
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MemorySourceStore {
    objects: Mutex<BTreeMap<(ObjectKind, String, String), SourceObject>>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &self,
        kind: ObjectKind,
        name: &str,
        object_labels: &[(&str, &str)],
        data: &[(&str, &str)],
    ) {
        self.put_bytes(
            kind,
            name,
            object_labels,
            data.iter()
                .map(|(k, v)| ((*k).to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
    }

    pub fn put_bytes(
        &self,
        kind: ObjectKind,
        name: &str,
        object_labels: &[(&str, &str)],
        data: BTreeMap<String, Vec<u8>>,
    ) {
        self.objects.lock().unwrap().insert(
            (kind, TRUST_NAMESPACE.to_string(), name.to_string()),
            SourceObject {
                labels: labels(object_labels),
                data,
            },
        );
    }

    pub fn remove(&self, kind: ObjectKind, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(kind, TRUST_NAMESPACE.to_string(), name.to_string()));
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KeyValueObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .map(|o| KeyValueObject {
                name: name.to_string(),
                data: o.data.clone(),
            }))
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: &str,
        label_selector: &LabelSelector,
    ) -> Result<Vec<KeyValueObject>> {
        let objects = self.objects.lock().unwrap();
        let mut matched = Vec::new();
        // Reverse order so callers cannot rely on store ordering
        for ((k, ns, name), object) in objects.iter().rev() {
            if *k == kind && ns == namespace && selector::matches(label_selector, &object.labels)? {
                matched.push(KeyValueObject {
                    name: name.clone(),
                    data: object.data.clone(),
                });
            }
        }
        Ok(matched)
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// A target object as the fake API server holds it
#[derive(Debug, Clone, Default)]
pub struct StoredTarget {
    pub meta: TargetObject,
    pub data: BTreeMap<String, String>,
    pub binary_data: BTreeMap<String, Vec<u8>>,
}

type TargetKey = (ObjectKind, String, String);

#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    namespaces: Mutex<Vec<NamespaceInfo>>,
    objects: Mutex<BTreeMap<TargetKey, StoredTarget>>,
    resource_version: AtomicUsize,
    writes: AtomicUsize,
    target_reads: AtomicUsize,
    failing_namespaces: Mutex<Vec<String>>,
}

fn key(kind: ObjectKind, namespace: &str, name: &str) -> TargetKey {
    (kind, namespace.to_string(), name.to_string())
}

pub fn managed_entry(manager: &str, operation: &str, fields: &FieldSet) -> ManagedFieldsEntry {
    ManagedFieldsEntry {
        api_version: Some("v1".to_string()),
        fields_type: Some("FieldsV1".to_string()),
        fields_v1: Some(fields.to_fields_v1()),
        manager: Some(manager.to_string()),
        operation: Some(operation.to_string()),
        subresource: None,
        time: None,
    }
}

fn entry_fields(entry: &ManagedFieldsEntry) -> FieldSet {
    entry
        .fields_v1
        .as_ref()
        .map(FieldSet::from_fields_v1)
        .unwrap_or_default()
}

/// Drop `fields` from every entry, removing entries left empty
fn release_fields(entries: &[ManagedFieldsEntry], fields: &FieldSet) -> Vec<ManagedFieldsEntry> {
    entries
        .iter()
        .filter_map(|entry| {
            let remaining: FieldSet = entry_fields(entry)
                .iter()
                .filter(|f| !fields.contains(f))
                .cloned()
                .collect();
            (!remaining.is_empty()).then(|| ManagedFieldsEntry {
                fields_v1: Some(remaining.to_fields_v1()),
                ..entry.clone()
            })
        })
        .collect()
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespaces(names: &[&str]) -> Self {
        let store = Self::new();
        for name in names {
            store.add_namespace(name, &[]);
        }
        store
    }

    pub fn add_namespace(&self, name: &str, namespace_labels: &[(&str, &str)]) {
        let mut namespaces = self.namespaces.lock().unwrap();
        namespaces.retain(|ns| ns.name != name);
        namespaces.push(NamespaceInfo {
            name: name.to_string(),
            labels: labels(namespace_labels),
            terminating: false,
        });
    }

    pub fn set_namespace_labels(&self, name: &str, namespace_labels: &[(&str, &str)]) {
        for ns in self.namespaces.lock().unwrap().iter_mut() {
            if ns.name == name {
                ns.labels = labels(namespace_labels);
            }
        }
    }

    pub fn mark_terminating(&self, name: &str) {
        for ns in self.namespaces.lock().unwrap().iter_mut() {
            if ns.name == name {
                ns.terminating = true;
            }
        }
    }

    /// Make every write to `namespace` fail
    pub fn fail_writes_in(&self, namespace: &str) {
        self.failing_namespaces
            .lock()
            .unwrap()
            .push(namespace.to_string());
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Calls to `list_targets`
    pub fn target_reads(&self) -> usize {
        self.target_reads.load(Ordering::SeqCst)
    }

    pub fn object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<StoredTarget> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(kind, namespace, name))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Insert an object directly, as another actor would have created it
    pub fn insert(&self, kind: ObjectKind, namespace: &str, name: &str, object: StoredTarget) {
        let mut object = object;
        object.meta.resource_version = Some(self.next_resource_version());
        self.objects
            .lock()
            .unwrap()
            .insert(key(kind, namespace, name), object);
    }

    /// A ConfigMap created with `kubectl create` by someone else
    pub fn insert_foreign(&self, kind: ObjectKind, namespace: &str, name: &str) {
        let fields: FieldSet = [Field::Data("ca.crt".to_string())].into_iter().collect();
        self.insert(
            kind,
            namespace,
            name,
            StoredTarget {
                meta: TargetObject {
                    managed_fields: vec![managed_entry("kubectl-create", "Update", &fields)],
                    ..TargetObject::default()
                },
                data: BTreeMap::from([("ca.crt".to_string(), "foreign".to_string())]),
                binary_data: BTreeMap::new(),
            },
        );
    }

    /// Update a data key the way `kubectl edit` does
    pub fn kubectl_edit_data(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        data_key: &str,
        value: &str,
    ) {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(&key(kind, namespace, name)).unwrap();
        object.data.insert(data_key.to_string(), value.to_string());
        let edited: FieldSet = [Field::Data(data_key.to_string())].into_iter().collect();
        object.meta.managed_fields = release_fields(&object.meta.managed_fields, &edited);
        object
            .meta
            .managed_fields
            .push(managed_entry("kubectl-edit", "Update", &edited));
        object.meta.resource_version = Some(self.next_resource_version());
    }

    /// Remove a label the way `kubectl label key-` does
    pub fn kubectl_remove_label(&self, kind: ObjectKind, namespace: &str, name: &str, label: &str) {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(&key(kind, namespace, name)).unwrap();
        object.meta.labels.remove(label);
        let removed: FieldSet = [Field::Label(label.to_string())].into_iter().collect();
        object.meta.managed_fields = release_fields(&object.meta.managed_fields, &removed);
        object.meta.resource_version = Some(self.next_resource_version());
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_writable(&self, namespace: &str) -> Result<()> {
        if self
            .failing_namespaces
            .lock()
            .unwrap()
            .iter()
            .any(|ns| ns == namespace)
        {
            bail!("admission webhook denied the request in namespace {namespace}");
        }
        Ok(())
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        Ok(self.namespaces.lock().unwrap().clone())
    }

    async fn list_targets(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> Result<BTreeMap<String, TargetObject>> {
        self.target_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _, n), _)| *k == kind && n == name)
            .map(|((_, namespace, _), object)| (namespace.clone(), object.meta.clone()))
            .collect())
    }

    async fn apply_target(&self, desired: &DesiredTarget, field_manager: &str) -> Result<()> {
        self.check_writable(&desired.namespace)?;
        let desired_fields = desired.field_set();
        let resource_version = self.next_resource_version();

        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .entry(key(desired.kind, &desired.namespace, &desired.name))
            .or_default();

        // Fields the manager applied before but no longer sets are removed
        let previously_applied = applied_fields(&object.meta.managed_fields, field_manager);
        for field in previously_applied.iter().filter(|f| !desired_fields.contains(f)) {
            match field {
                Field::Data(k) => {
                    object.data.remove(k);
                    object.binary_data.remove(k);
                }
                Field::BinaryData(k) => {
                    object.binary_data.remove(k);
                }
                Field::Label(k) => {
                    object.meta.labels.remove(k);
                }
                Field::Annotation(k) => {
                    object.meta.annotations.remove(k);
                }
                Field::OwnerReference(uid) => {
                    object.meta.owner_references.retain(|r| &r.uid != uid);
                }
            }
        }

        object.data.extend(desired.data.clone());
        object.binary_data.extend(desired.binary_data.clone());
        object.meta.labels.extend(desired.labels.clone());
        object.meta.annotations.extend(desired.annotations.clone());
        object
            .meta
            .owner_references
            .retain(|r| r.uid != desired.owner.uid);
        object.meta.owner_references.push(desired.owner.clone());

        // force: conflicting fields move to the applier
        let others: Vec<ManagedFieldsEntry> = object
            .meta
            .managed_fields
            .iter()
            .filter(|e| {
                !(e.manager.as_deref() == Some(field_manager)
                    && e.operation.as_deref() == Some("Apply"))
            })
            .cloned()
            .collect();
        let mut managed = release_fields(&others, &desired_fields);
        managed.push(managed_entry(field_manager, "Apply", &desired_fields));
        object.meta.managed_fields = managed;
        object.meta.resource_version = Some(resource_version);

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_target(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        self.check_writable(namespace)?;
        self.objects
            .lock()
            .unwrap()
            .remove(&key(kind, namespace, name));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_managed_fields(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        resource_version: &str,
        managed_fields: Vec<ManagedFieldsEntry>,
    ) -> Result<()> {
        self.check_writable(namespace)?;
        let next = self.next_resource_version();
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&key(kind, namespace, name))
            .ok_or_else(|| anyhow!("{kind} {namespace}/{name} not found"))?;
        if object.meta.resource_version.as_deref() != Some(resource_version) {
            bail!("conflict: {kind} {namespace}/{name} was modified");
        }
        object.meta.managed_fields = managed_fields;
        object.meta.resource_version = Some(next);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub object: Option<String>,
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: resource_ref.name.clone(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}
