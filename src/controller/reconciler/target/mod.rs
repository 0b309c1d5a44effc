//! # Target Synchronizer
//!
//! Writes the resolved bundle to a ConfigMap and/or Secret named after the
//! Bundle in every selected namespace, and deletes targets from namespaces
//! that are no longer selected.
//!
//! Per (namespace, kind) pair:
//!
//! | desired | existing                     | action                          |
//! |---------|------------------------------|---------------------------------|
//! | absent  | absent                       | nothing                         |
//! | absent  | controlled by this Bundle    | delete                          |
//! | absent  | anything else                | nothing                         |
//! | present | absent                       | apply (create)                  |
//! | present | foreign                      | skip, `NotOwned` warning event  |
//! | present | legacy update-managed fields | migrate managed fields, apply   |
//! | present | up to date                   | nothing                         |
//! | present | stale                        | apply (update)                  |
//!
//! Writes run concurrently up to a configured limit. A failed write does not
//! stop the others, but fails the pass.

mod fields;

pub use fields::{applied_fields, managed_by_any, upgrade_managed_fields, Field, FieldSet};

use crate::constants::{BUNDLE_HASH_ANNOTATION_KEY, BUNDLE_LABEL_KEY};
use crate::controller::error::BundleError;
use crate::controller::reconciler::events::{actions, reasons, EventPublisher};
use crate::controller::reconciler::selector;
use crate::controller::reconciler::source::ResolvedBundle;
use crate::crd::{Bundle, BundleTarget, KeyValueTarget, ObjectKind};
use crate::observability;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, OwnerReference};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A namespace as seen by the synchronizer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Namespaces being deleted receive no writes
    pub terminating: bool,
}

/// Metadata of an existing target object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetObject {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    pub managed_fields: Vec<ManagedFieldsEntry>,
    pub resource_version: Option<String>,
}

/// The complete object the controller wants at one target identity
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredTarget {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner: OwnerReference,
    /// Text entries: the PEM bundle
    pub data: BTreeMap<String, String>,
    /// Binary entries: encoded additional formats
    pub binary_data: BTreeMap<String, Vec<u8>>,
}

impl DesiredTarget {
    /// Fields this object claims when applied
    ///
    /// Secrets have a single `data` map, so binary entries land there too.
    #[must_use]
    pub fn field_set(&self) -> FieldSet {
        let binary_field: fn(String) -> Field = match self.kind {
            ObjectKind::ConfigMap => Field::BinaryData,
            ObjectKind::Secret => Field::Data,
        };

        self.data
            .keys()
            .cloned()
            .map(Field::Data)
            .chain(self.binary_data.keys().cloned().map(binary_field))
            .chain(self.labels.keys().cloned().map(Field::Label))
            .chain(self.annotations.keys().cloned().map(Field::Annotation))
            .chain(std::iter::once(Field::OwnerReference(self.owner.uid.clone())))
            .collect()
    }
}

/// Read and write access to target objects
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>>;

    /// Metadata of every object of `kind` named `name`, keyed by namespace
    ///
    /// One read per kind and pass, however many namespaces there are.
    async fn list_targets(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> Result<BTreeMap<String, TargetObject>>;

    /// Server-side apply the full desired object with `force`
    async fn apply_target(&self, desired: &DesiredTarget, field_manager: &str) -> Result<()>;

    async fn delete_target(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()>;

    /// Replace `metadata.managedFields`, guarded by `resource_version`
    async fn replace_managed_fields(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        resource_version: &str,
        managed_fields: Vec<ManagedFieldsEntry>,
    ) -> Result<()>;
}

/// What happened to one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetAction {
    Created,
    Updated,
    /// Legacy managed fields were migrated and the object re-applied
    Migrated,
    Deleted,
    Unchanged,
    /// Left untouched because another owner holds the object
    NotOwned,
}

impl TargetAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetAction::Created => "created",
            TargetAction::Updated => "updated",
            TargetAction::Migrated => "migrated",
            TargetAction::Deleted => "deleted",
            TargetAction::Unchanged => "unchanged",
            TargetAction::NotOwned => "not_owned",
        }
    }

    /// Whether the action wrote to the API server
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            TargetAction::Created
                | TargetAction::Updated
                | TargetAction::Migrated
                | TargetAction::Deleted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub namespace: String,
    pub kind: ObjectKind,
    pub action: TargetAction,
}

/// Outcome of one sync pass, sorted by namespace then kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl SyncReport {
    /// Whether any target was written
    #[must_use]
    pub fn changed(&self) -> bool {
        self.outcomes.iter().any(|o| o.action.is_write())
    }

    #[must_use]
    pub fn count(&self, action: TargetAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    /// Action taken for one target, if the pass touched it
    #[must_use]
    pub fn action_for(&self, namespace: &str, kind: ObjectKind) -> Option<TargetAction> {
        self.outcomes
            .iter()
            .find(|o| o.namespace == namespace && o.kind == kind)
            .map(|o| o.action)
    }
}

/// How an existing object relates to the Bundle being synced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    /// Carries this Bundle's controller owner reference
    Controlled,
    /// Written by this controller before but missing the owner reference
    Adoptable,
    Foreign,
}

#[derive(Debug)]
struct TargetWork {
    kind: ObjectKind,
    namespace: String,
    existing: Option<TargetObject>,
    desired: Option<DesiredTarget>,
}

/// Distributes a resolved bundle to its targets
#[derive(Clone)]
pub struct TargetSynchronizer {
    store: Arc<dyn TargetStore>,
    events: Arc<dyn EventPublisher>,
    field_manager: String,
    legacy_field_managers: Vec<String>,
    max_concurrent_writes: usize,
    /// Kinds this controller may read and write
    kinds: Vec<ObjectKind>,
}

impl std::fmt::Debug for TargetSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSynchronizer")
            .field("field_manager", &self.field_manager)
            .field("legacy_field_managers", &self.legacy_field_managers)
            .field("max_concurrent_writes", &self.max_concurrent_writes)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

impl TargetSynchronizer {
    pub fn new(
        store: Arc<dyn TargetStore>,
        events: Arc<dyn EventPublisher>,
        field_manager: impl Into<String>,
    ) -> Self {
        let field_manager = field_manager.into();
        Self {
            store,
            events,
            legacy_field_managers: vec![field_manager.clone()],
            field_manager,
            max_concurrent_writes: crate::constants::DEFAULT_MAX_CONCURRENT_TARGET_WRITES,
            kinds: ObjectKind::ALL.to_vec(),
        }
    }

    /// Restrict the kinds that are synced; other kinds are never read or written
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[ObjectKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    #[must_use]
    pub fn with_legacy_field_managers(mut self, managers: Vec<String>) -> Self {
        self.legacy_field_managers = managers;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_writes(mut self, max: usize) -> Self {
        self.max_concurrent_writes = max.max(1);
        self
    }

    /// Sync every (namespace, kind) target of `bundle`
    ///
    /// # Errors
    ///
    /// `TargetSync` lists every failed target; `InvalidSpec` for a bad
    /// namespace selector; `Store` if namespaces cannot be listed.
    pub async fn sync(
        &self,
        bundle: &Bundle,
        resolved: &ResolvedBundle,
    ) -> Result<SyncReport, BundleError> {
        let name = bundle.name_any();
        let owner = bundle
            .controller_owner_ref(&())
            .ok_or_else(|| anyhow!("Bundle {name} has no uid yet"))?;
        let bundle_ref = bundle.object_ref(&());
        let target = &bundle.spec.target;

        let mut existing_by_kind = BTreeMap::new();
        for &kind in &self.kinds {
            existing_by_kind.insert(kind, self.store.list_targets(kind, &name).await?);
        }

        let mut work = Vec::new();
        for namespace in self.store.list_namespaces().await? {
            if namespace.terminating {
                debug!(namespace = %namespace.name, "skipping terminating namespace");
                continue;
            }

            let selected = match &target.namespace_selector {
                Some(namespace_selector) => {
                    selector::matches(namespace_selector, &namespace.labels)?
                }
                None => true,
            };

            for &kind in &self.kinds {
                let desired = target
                    .for_kind(kind)
                    .filter(|_| selected)
                    .map(|kv| {
                        desired_target(kind, &namespace.name, &name, &owner, kv, target, resolved)
                    });
                let existing = existing_by_kind
                    .get_mut(&kind)
                    .and_then(|objects| objects.remove(&namespace.name));
                work.push(TargetWork {
                    kind,
                    namespace: namespace.name.clone(),
                    existing,
                    desired,
                });
            }
        }

        let results: Vec<(TargetWork, Result<Option<TargetAction>>)> = stream::iter(work)
            .map(|item| {
                let bundle_ref = &bundle_ref;
                let name = name.as_str();
                let uid = owner.uid.as_str();
                async move {
                    let result = self.sync_target(bundle_ref, uid, name, &item).await;
                    (item, result)
                }
            })
            .buffer_unordered(self.max_concurrent_writes)
            .collect()
            .await;

        let mut report = SyncReport::default();
        let mut failures = Vec::new();

        for (item, result) in results {
            match result {
                Ok(Some(action)) => {
                    observability::metrics::increment_target_operations(
                        item.kind.as_str(),
                        action.as_str(),
                    );
                    report.outcomes.push(TargetOutcome {
                        namespace: item.namespace,
                        kind: item.kind,
                        action,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    observability::metrics::increment_target_errors(item.kind.as_str());
                    warn!(
                        bundle = %name,
                        namespace = %item.namespace,
                        kind = %item.kind,
                        error = %e,
                        "failed to sync target"
                    );
                    failures.push(format!("{} {}/{name}: {e:#}", item.kind, item.namespace));
                }
            }
        }

        report
            .outcomes
            .sort_by(|a, b| (&a.namespace, a.kind).cmp(&(&b.namespace, b.kind)));

        if !failures.is_empty() {
            failures.sort();
            return Err(BundleError::TargetSync(failures));
        }

        Ok(report)
    }

    async fn sync_target(
        &self,
        bundle_ref: &ObjectReference,
        bundle_uid: &str,
        name: &str,
        item: &TargetWork,
    ) -> Result<Option<TargetAction>> {
        let kind = item.kind;
        let namespace = item.namespace.as_str();
        let existing = item.existing.as_ref();

        let Some(desired) = &item.desired else {
            return match existing {
                Some(obj) if self.ownership(obj, bundle_uid) == Ownership::Controlled => {
                    self.store.delete_target(kind, namespace, name).await?;
                    info!(%kind, namespace, name, "deleted target from unselected namespace");
                    Ok(Some(TargetAction::Deleted))
                }
                _ => Ok(None),
            };
        };

        let Some(existing) = existing else {
            self.store.apply_target(desired, &self.field_manager).await?;
            info!(%kind, namespace, name, "created target");
            return Ok(Some(TargetAction::Created));
        };

        if self.ownership(existing, bundle_uid) == Ownership::Foreign {
            warn!(
                %kind,
                namespace,
                name,
                "target exists and is not owned by this Bundle, skipping"
            );
            observability::metrics::increment_not_owned_targets();
            self.events
                .publish(
                    bundle_ref,
                    EventType::Warning,
                    reasons::NOT_OWNED,
                    actions::SYNC_TARGET,
                    Some(format!(
                        "{kind} {namespace}/{name} already exists and is not owned by \
                         Bundle {name}; it was left untouched"
                    )),
                )
                .await;
            return Ok(Some(TargetAction::NotOwned));
        }

        if let Some(managed_fields) = upgrade_managed_fields(
            &existing.managed_fields,
            &self.legacy_field_managers,
            &self.field_manager,
        ) {
            let resource_version = existing
                .resource_version
                .as_deref()
                .ok_or_else(|| anyhow!("{kind} {namespace}/{name} has no resourceVersion"))?;
            self.store
                .replace_managed_fields(kind, namespace, name, resource_version, managed_fields)
                .await?;
            self.store.apply_target(desired, &self.field_manager).await?;
            info!(%kind, namespace, name, "migrated target to server-side apply");
            return Ok(Some(TargetAction::Migrated));
        }

        if self.is_current(existing, desired, bundle_uid) {
            debug!(%kind, namespace, name, "target up to date");
            return Ok(Some(TargetAction::Unchanged));
        }

        self.store.apply_target(desired, &self.field_manager).await?;
        info!(%kind, namespace, name, "updated target");
        Ok(Some(TargetAction::Updated))
    }

    fn ownership(&self, existing: &TargetObject, bundle_uid: &str) -> Ownership {
        let controller_ref = existing
            .owner_references
            .iter()
            .find(|r| r.controller == Some(true));

        match controller_ref {
            Some(r) if r.uid == bundle_uid => Ownership::Controlled,
            Some(_) => Ownership::Foreign,
            None => {
                let mut managers = self.legacy_field_managers.clone();
                managers.push(self.field_manager.clone());
                if managed_by_any(&existing.managed_fields, &managers) {
                    Ownership::Adoptable
                } else {
                    Ownership::Foreign
                }
            }
        }
    }

    /// Controlled, same hash and metadata values, and exactly the desired fields owned
    fn is_current(
        &self,
        existing: &TargetObject,
        desired: &DesiredTarget,
        bundle_uid: &str,
    ) -> bool {
        if self.ownership(existing, bundle_uid) != Ownership::Controlled {
            return false;
        }

        let values_match = |want: &BTreeMap<String, String>, have: &BTreeMap<String, String>| {
            want.iter().all(|(k, v)| have.get(k) == Some(v))
        };
        if !values_match(&desired.annotations, &existing.annotations)
            || !values_match(&desired.labels, &existing.labels)
        {
            return false;
        }

        applied_fields(&existing.managed_fields, &self.field_manager) == desired.field_set()
    }
}

/// Build the full desired object for one namespace and kind
///
/// User metadata is applied first so the controller's label and hash
/// annotation always win.
#[must_use]
pub fn desired_target(
    kind: ObjectKind,
    namespace: &str,
    name: &str,
    owner: &OwnerReference,
    kv_target: &KeyValueTarget,
    target: &BundleTarget,
    resolved: &ResolvedBundle,
) -> DesiredTarget {
    let mut labels = BTreeMap::new();
    let mut annotations = BTreeMap::new();
    if let Some(metadata) = &kv_target.metadata {
        labels.extend(metadata.labels.clone());
        annotations.extend(metadata.annotations.clone());
    }
    labels.insert(BUNDLE_LABEL_KEY.to_string(), name.to_string());
    annotations.insert(BUNDLE_HASH_ANNOTATION_KEY.to_string(), resolved.hash.clone());

    let binary_data = match &target.additional_formats {
        Some(formats) => formats
            .keys()
            .into_iter()
            .filter_map(|key| {
                resolved
                    .binary_data
                    .get(key)
                    .map(|bytes| (key.to_string(), bytes.clone()))
            })
            .collect(),
        None => BTreeMap::new(),
    };

    DesiredTarget {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels,
        annotations,
        owner: owner.clone(),
        data: BTreeMap::from([(kv_target.key.clone(), resolved.data.clone())]),
        binary_data,
    }
}
