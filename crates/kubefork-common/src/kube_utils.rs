//! Shared Kubernetes utilities using kube-rs
//!
//! Helpers for addressing resources dynamically, converting between typed and
//! dynamic objects, and managing the controller owner reference that ties a
//! generated child to its parent.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Error;

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for CRD and foreign types to derive their `ApiResource` from
/// their constants, so serialization and API calls agree on the version.
pub trait HasApiResource {
    /// Full API version (e.g., "getambassador.io/v2", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Mapping")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); the core group is empty
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Typed <-> dynamic conversion
// =============================================================================

/// Convert a typed resource into a dynamic object
pub fn to_dynamic<T: Serialize>(obj: &T) -> Result<DynamicObject, Error> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization(format!("to dynamic object: {e}")))
}

/// Interpret a dynamic object as a typed resource
pub fn as_typed<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T, Error> {
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization_for_kind(kind, format!("from dynamic object: {e}")))
}

/// Interpret every object of a list as a typed resource
pub fn as_typed_all<T: DeserializeOwned>(objs: &[DynamicObject]) -> Result<Vec<T>, Error> {
    objs.iter().map(as_typed).collect()
}

// =============================================================================
// NamespacedName
// =============================================================================

/// A `namespace/name` pair addressing one namespaced object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl NamespacedName {
    /// Create a new namespaced name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Address of a namespaced resource; cluster-scoped objects get an empty namespace
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for NamespacedName {
    type Err = Error;

    /// Parse `namespace/name`; exactly two non-empty segments are accepted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::new(ns, name))
            }
            _ => Err(Error::validation(format!(
                "expected a reference of the form namespace/name, got {s:?}"
            ))),
        }
    }
}

// =============================================================================
// Ownership
// =============================================================================

/// The parent side of a controller owner reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRef {
    /// apiVersion of the parent
    pub api_version: String,
    /// Kind of the parent
    pub kind: String,
    /// Name of the parent
    pub name: String,
    /// Namespace of the parent; children are reconciled here
    pub namespace: String,
    /// UID assigned by the API server
    pub uid: String,
}

impl ParentRef {
    /// Capture a persisted, namespaced resource as a parent
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<Self, Error> {
        let name = obj.name_any();
        let namespace = obj.namespace().ok_or_else(|| {
            Error::owner_reference(&name, format!("{} {name} is not namespaced", K::kind(&())))
        })?;
        let uid = obj.uid().ok_or_else(|| {
            Error::owner_reference(&name, format!("{} {name} has no uid", K::kind(&())))
        })?;
        Ok(Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            name,
            namespace,
            uid,
        })
    }

    /// Controller owner reference pointing at this parent
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn is(&self, owner: &OwnerReference) -> bool {
        owner.api_version == self.api_version && owner.kind == self.kind && owner.name == self.name
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Check whether an object carries an owner reference to `parent`
///
/// Only (apiVersion, kind, name) are compared; the owner chain is not walked.
pub fn owned_by(obj: &DynamicObject, parent: &ParentRef) -> bool {
    obj.owner_references().iter().any(|o| parent.is(o))
}

/// Set `parent` as the controlling owner of `child`
///
/// Replaces an existing reference to the same parent, so repeated calls leave
/// the object unchanged. Fails when the namespaces differ or another owner
/// already controls the child.
pub fn set_controller_reference(child: &mut DynamicObject, parent: &ParentRef) -> Result<(), Error> {
    let child_name = child.name_any();
    if child.namespace().as_deref() != Some(parent.namespace.as_str()) {
        return Err(Error::owner_reference(
            child_name,
            format!(
                "cross-namespace owner reference to {parent} from namespace {:?}",
                child.namespace().unwrap_or_default()
            ),
        ));
    }

    let refs = child.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|o| o.controller == Some(true) && !parent.is(o))
    {
        return Err(Error::owner_reference(
            child_name,
            format!("already controlled by {} {}", other.kind, other.name),
        ));
    }

    let owner = parent.owner_reference();
    match refs.iter_mut().find(|o| parent.is(o)) {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
    Ok(())
}
