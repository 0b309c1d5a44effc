//! # Managed Fields
//!
//! Server-side apply ownership expressed as plain values.
//!
//! The API server records, per field manager, which fields it owns in
//! `metadata.managedFields[].fieldsV1`. This module reduces the parts the
//! synchronizer cares about (data keys, labels, annotations, owner
//! references) into a [`FieldSet`] so drift detection is a set comparison.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

const OPERATION_APPLY: &str = "Apply";
const OPERATION_UPDATE: &str = "Update";

/// A field of a ConfigMap or Secret the controller may own
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Data(String),
    BinaryData(String),
    Annotation(String),
    Label(String),
    /// Owner reference, keyed by uid
    OwnerReference(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet(BTreeSet<Field>);

impl FieldSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: Field) {
        self.0.insert(field);
    }

    #[must_use]
    pub fn contains(&self, field: &Field) -> bool {
        self.0.contains(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.0.iter()
    }

    /// Parse the fields we track out of a `fieldsV1` document
    #[must_use]
    pub fn from_fields_v1(fields: &FieldsV1) -> Self {
        let mut set = FieldSet::new();
        let root = &fields.0;

        for key in member_names(root.get("f:data")) {
            set.insert(Field::Data(key));
        }
        for key in member_names(root.get("f:binaryData")) {
            set.insert(Field::BinaryData(key));
        }

        if let Some(metadata) = root.get("f:metadata") {
            for key in member_names(metadata.get("f:annotations")) {
                set.insert(Field::Annotation(key));
            }
            for key in member_names(metadata.get("f:labels")) {
                set.insert(Field::Label(key));
            }
            if let Some(Value::Object(refs)) = metadata.get("f:ownerReferences") {
                for key in refs.keys() {
                    if let Some(uid) = owner_reference_uid(key) {
                        set.insert(Field::OwnerReference(uid));
                    }
                }
            }
        }

        set
    }

    /// Render as a `fieldsV1` document, the inverse of [`FieldSet::from_fields_v1`]
    #[must_use]
    pub fn to_fields_v1(&self) -> FieldsV1 {
        let mut data = Map::new();
        let mut binary_data = Map::new();
        let mut annotations = Map::new();
        let mut labels = Map::new();
        let mut owner_references = Map::new();

        for field in &self.0 {
            let (members, key) = match field {
                Field::Data(key) => (&mut data, format!("f:{key}")),
                Field::BinaryData(key) => (&mut binary_data, format!("f:{key}")),
                Field::Annotation(key) => (&mut annotations, format!("f:{key}")),
                Field::Label(key) => (&mut labels, format!("f:{key}")),
                Field::OwnerReference(uid) => (
                    &mut owner_references,
                    format!("k:{}", serde_json::json!({ "uid": uid })),
                ),
            };
            members.insert(key, Value::Object(Map::new()));
        }

        let mut metadata = Map::new();
        insert_non_empty(&mut metadata, "f:annotations", annotations);
        insert_non_empty(&mut metadata, "f:labels", labels);
        insert_non_empty(&mut metadata, "f:ownerReferences", owner_references);

        let mut root = Map::new();
        insert_non_empty(&mut root, "f:data", data);
        insert_non_empty(&mut root, "f:binaryData", binary_data);
        insert_non_empty(&mut root, "f:metadata", metadata);

        FieldsV1(Value::Object(root))
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn insert_non_empty(parent: &mut Map<String, Value>, key: &str, members: Map<String, Value>) {
    if !members.is_empty() {
        parent.insert(key.to_string(), Value::Object(members));
    }
}

/// `f:<name>` members of an object node, ignoring the `.` self marker
fn member_names(node: Option<&Value>) -> Vec<String> {
    match node {
        Some(Value::Object(map)) => map
            .keys()
            .filter_map(|k| k.strip_prefix("f:"))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract the uid from a `k:{"uid":"..."}` list-map key
fn owner_reference_uid(key: &str) -> Option<String> {
    let raw = key.strip_prefix("k:")?;
    let value: Value = serde_json::from_str(raw).ok()?;
    value.get("uid")?.as_str().map(str::to_string)
}

/// Fields owned by `manager` through server-side apply
#[must_use]
pub fn applied_fields(entries: &[ManagedFieldsEntry], manager: &str) -> FieldSet {
    entries
        .iter()
        .filter(|entry| {
            entry.manager.as_deref() == Some(manager)
                && entry.operation.as_deref() == Some(OPERATION_APPLY)
                && entry.subresource.is_none()
        })
        .filter_map(|entry| entry.fields_v1.as_ref())
        .flat_map(|fields| FieldSet::from_fields_v1(fields).0)
        .collect()
}

/// Whether any of `managers` appears in the managed fields, with any operation
#[must_use]
pub fn managed_by_any(entries: &[ManagedFieldsEntry], managers: &[String]) -> bool {
    entries.iter().any(|entry| {
        entry
            .manager
            .as_deref()
            .is_some_and(|m| managers.iter().any(|candidate| candidate == m))
    })
}

fn is_legacy_entry(entry: &ManagedFieldsEntry, legacy_managers: &[String]) -> bool {
    entry.operation.as_deref() == Some(OPERATION_UPDATE)
        && entry.subresource.is_none()
        && entry
            .manager
            .as_deref()
            .is_some_and(|m| legacy_managers.iter().any(|candidate| candidate == m))
}

/// Move fields owned by legacy update-based managers into the apply entry
///
/// Returns the rewritten managed fields, or `None` if there is nothing to
/// migrate. Writing the result back makes the next apply by `apply_manager`
/// own (and therefore able to remove) everything the legacy writer set.
#[must_use]
pub fn upgrade_managed_fields(
    entries: &[ManagedFieldsEntry],
    legacy_managers: &[String],
    apply_manager: &str,
) -> Option<Vec<ManagedFieldsEntry>> {
    if !entries.iter().any(|e| is_legacy_entry(e, legacy_managers)) {
        return None;
    }

    let mut merged = Value::Object(Map::new());
    let mut api_version = None;
    let mut time = None;
    let mut upgraded = Vec::with_capacity(entries.len());

    for entry in entries {
        let is_own_apply = entry.manager.as_deref() == Some(apply_manager)
            && entry.operation.as_deref() == Some(OPERATION_APPLY)
            && entry.subresource.is_none();

        if is_own_apply || is_legacy_entry(entry, legacy_managers) {
            if let Some(fields) = &entry.fields_v1 {
                merge_json(&mut merged, &fields.0);
            }
            api_version = api_version.or_else(|| entry.api_version.clone());
            time = time.or_else(|| entry.time.clone());
        } else {
            upgraded.push(entry.clone());
        }
    }

    upgraded.push(ManagedFieldsEntry {
        api_version: api_version.or_else(|| Some("v1".to_string())),
        fields_type: Some("FieldsV1".to_string()),
        fields_v1: Some(FieldsV1(merged)),
        manager: Some(apply_manager.to_string()),
        operation: Some(OPERATION_APPLY.to_string()),
        subresource: None,
        time,
    });

    Some(upgraded)
}

/// Recursive union of two `fieldsV1` trees
fn merge_json(into: &mut Value, from: &Value) {
    match (into, from) {
        (Value::Object(into), Value::Object(from)) => {
            for (key, value) in from {
                match into.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        into.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (into, from) => *into = from.clone(),
    }
}
