//! # Kubernetes Store
//!
//! `SourceStore` and `TargetStore` backed by the Kubernetes API.
//!
//! Targets are read as metadata only; their payload is never fetched
//! because drift is detected from managed fields and the hash annotation.

use crate::controller::reconciler::selector;
use crate::controller::reconciler::source::{KeyValueObject, SourceStore};
use crate::controller::reconciler::target::{
    DesiredTarget, NamespaceInfo, TargetObject, TargetStore,
};
use crate::crd::ObjectKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ManagedFieldsEntry, ObjectMeta};
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::PartialObjectMeta;
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// Store over a live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn config_map_object(cm: ConfigMap) -> KeyValueObject {
    let mut data: BTreeMap<String, Vec<u8>> = cm
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.into_bytes()))
        .collect();
    data.extend(cm.binary_data.unwrap_or_default().into_iter().map(|(k, v)| (k, v.0)));
    KeyValueObject {
        name: cm.metadata.name.unwrap_or_default(),
        data,
    }
}

fn secret_object(secret: Secret) -> KeyValueObject {
    KeyValueObject {
        name: secret.metadata.name.unwrap_or_default(),
        data: secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect(),
    }
}

fn target_object(meta: ObjectMeta) -> TargetObject {
    TargetObject {
        labels: meta.labels.unwrap_or_default(),
        annotations: meta.annotations.unwrap_or_default(),
        owner_references: meta.owner_references.unwrap_or_default(),
        managed_fields: meta.managed_fields.unwrap_or_default(),
        resource_version: meta.resource_version,
    }
}

fn target_metadata(desired: &DesiredTarget) -> ObjectMeta {
    ObjectMeta {
        name: Some(desired.name.clone()),
        namespace: Some(desired.namespace.clone()),
        labels: Some(desired.labels.clone()),
        annotations: Some(desired.annotations.clone()),
        owner_references: Some(vec![desired.owner.clone()]),
        ..ObjectMeta::default()
    }
}

fn non_empty<T>(map: BTreeMap<String, T>) -> Option<BTreeMap<String, T>> {
    (!map.is_empty()).then_some(map)
}

#[async_trait]
impl SourceStore for KubeStore {
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KeyValueObject>> {
        let object = match kind {
            ObjectKind::ConfigMap => self
                .config_maps(namespace)
                .get_opt(name)
                .await
                .with_context(|| format!("Failed to get ConfigMap {namespace}/{name}"))?
                .map(config_map_object),
            ObjectKind::Secret => self
                .secrets(namespace)
                .get_opt(name)
                .await
                .with_context(|| format!("Failed to get Secret {namespace}/{name}"))?
                .map(secret_object),
        };
        Ok(object)
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: &str,
        label_selector: &LabelSelector,
    ) -> Result<Vec<KeyValueObject>> {
        let query = selector::to_query(label_selector)?;
        let params = ListParams::default().labels(&query);
        debug!(%kind, namespace, selector = %query, "listing source objects");

        let objects = match kind {
            ObjectKind::ConfigMap => self
                .config_maps(namespace)
                .list(&params)
                .await
                .with_context(|| {
                    format!("Failed to list ConfigMaps in {namespace} matching '{query}'")
                })?
                .items
                .into_iter()
                .map(config_map_object)
                .collect(),
            ObjectKind::Secret => self
                .secrets(namespace)
                .list(&params)
                .await
                .with_context(|| {
                    format!("Failed to list Secrets in {namespace} matching '{query}'")
                })?
                .items
                .into_iter()
                .map(secret_object)
                .collect(),
        };
        Ok(objects)
    }
}

#[async_trait]
impl TargetStore for KubeStore {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .context("Failed to list namespaces")?;

        Ok(list
            .items
            .into_iter()
            .map(|ns| {
                let terminating = ns.metadata.deletion_timestamp.is_some()
                    || ns
                        .status
                        .as_ref()
                        .and_then(|s| s.phase.as_deref())
                        == Some("Terminating");
                NamespaceInfo {
                    name: ns.metadata.name.unwrap_or_default(),
                    labels: ns.metadata.labels.unwrap_or_default(),
                    terminating,
                }
            })
            .collect())
    }

    async fn list_targets(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> Result<BTreeMap<String, TargetObject>> {
        let params = ListParams::default().fields(&format!("metadata.name={name}"));
        let metas: Vec<ObjectMeta> = match kind {
            ObjectKind::ConfigMap => Api::<ConfigMap>::all(self.client.clone())
                .list_metadata(&params)
                .await
                .with_context(|| format!("Failed to list ConfigMaps named {name}"))?
                .items
                .into_iter()
                .map(|m: PartialObjectMeta<ConfigMap>| m.metadata)
                .collect(),
            ObjectKind::Secret => Api::<Secret>::all(self.client.clone())
                .list_metadata(&params)
                .await
                .with_context(|| format!("Failed to list Secrets named {name}"))?
                .items
                .into_iter()
                .map(|m: PartialObjectMeta<Secret>| m.metadata)
                .collect(),
        };
        debug!(%kind, name, found = metas.len(), "listed existing targets");

        Ok(metas
            .into_iter()
            .filter_map(|meta| Some((meta.namespace.clone()?, target_object(meta))))
            .collect())
    }

    async fn apply_target(&self, desired: &DesiredTarget, field_manager: &str) -> Result<()> {
        let params = PatchParams::apply(field_manager).force();
        let namespace = desired.namespace.as_str();
        let name = desired.name.as_str();

        match desired.kind {
            ObjectKind::ConfigMap => {
                let cm = ConfigMap {
                    metadata: target_metadata(desired),
                    data: non_empty(desired.data.clone()),
                    binary_data: non_empty(
                        desired
                            .binary_data
                            .iter()
                            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                            .collect(),
                    ),
                    ..ConfigMap::default()
                };
                self.config_maps(namespace)
                    .patch(name, &params, &Patch::Apply(&cm))
                    .await
                    .with_context(|| format!("Failed to apply ConfigMap {namespace}/{name}"))?;
            }
            ObjectKind::Secret => {
                let data: BTreeMap<String, ByteString> = desired
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone().into_bytes())))
                    .chain(
                        desired
                            .binary_data
                            .iter()
                            .map(|(k, v)| (k.clone(), ByteString(v.clone()))),
                    )
                    .collect();
                let secret = Secret {
                    metadata: target_metadata(desired),
                    data: non_empty(data),
                    ..Secret::default()
                };
                self.secrets(namespace)
                    .patch(name, &params, &Patch::Apply(&secret))
                    .await
                    .with_context(|| format!("Failed to apply Secret {namespace}/{name}"))?;
            }
        }
        Ok(())
    }

    async fn delete_target(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<()> {
        let params = DeleteParams::default();
        let result = match kind {
            ObjectKind::ConfigMap => self
                .config_maps(namespace)
                .delete(name, &params)
                .await
                .map(|_| ()),
            ObjectKind::Secret => self.secrets(namespace).delete(name, &params).await.map(|_| ()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {kind} {namespace}/{name}")),
        }
    }

    async fn replace_managed_fields(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        resource_version: &str,
        managed_fields: Vec<ManagedFieldsEntry>,
    ) -> Result<()> {
        // resourceVersion turns a concurrent write into a conflict
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": resource_version,
                "managedFields": managed_fields,
            }
        });
        let params = PatchParams::default();
        match kind {
            ObjectKind::ConfigMap => {
                self.config_maps(namespace)
                    .patch(name, &params, &Patch::Merge(&patch))
                    .await
                    .with_context(|| {
                        format!("Failed to migrate managed fields of ConfigMap {namespace}/{name}")
                    })?;
            }
            ObjectKind::Secret => {
                self.secrets(namespace)
                    .patch(name, &params, &Patch::Merge(&patch))
                    .await
                    .with_context(|| {
                        format!("Failed to migrate managed fields of Secret {namespace}/{name}")
                    })?;
            }
        }
        Ok(())
    }
}
