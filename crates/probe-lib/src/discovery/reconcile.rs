//! Attribute reconciliation
//!
//! Maps one sample's label set to an entity identity and an attribute map.
//! Everything here is pure and safe to call from many tasks at once.
//!
//! A non-identifier attribute whose pattern does not match is skipped: the
//! attribute is left out and the sample is kept. Only identifier failures
//! drop the sample.

use super::definition::{AttributeDef, EntityDef};
use crate::error::SampleError;
use crate::models::attrs;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Cluster and runtime identity used to disambiguate container-hosted entities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityContext {
    pub cluster_id: Option<String>,
    pub runtime_service_id: Option<String>,
}

impl IdentityContext {
    pub fn new(cluster_id: Option<String>, runtime_service_id: Option<String>) -> Self {
        Self {
            cluster_id: cluster_id.filter(|s| !s.is_empty()),
            runtime_service_id: runtime_service_id.filter(|s| !s.is_empty()),
        }
    }

    /// Suffix appended to container-hosted identities
    pub fn scope(&self) -> Option<&str> {
        self.cluster_id
            .as_deref()
            .or(self.runtime_service_id.as_deref())
    }
}

/// Result of reconciling one sample
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Expanded identifier value
    pub raw_id: String,
    /// Identity after namespace and scope suffixing
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

impl AttributeDef {
    /// Derive this attribute's value from a label set
    ///
    /// Returns `Ok(None)` when a non-identifier attribute's labels are absent.
    pub fn extract(&self, labels: &HashMap<String, String>) -> Result<Option<String>, SampleError> {
        let Some(value) = self.join_labels(labels) else {
            if self.is_identifier {
                return Err(SampleError::MissingIdentifierSource {
                    attribute: self.name.clone(),
                    labels: self.labels.clone(),
                });
            }
            return Ok(None);
        };

        self.expand(&value).map(Some)
    }

    fn join_labels(&self, labels: &HashMap<String, String>) -> Option<String> {
        let values = self
            .labels
            .iter()
            .map(|key| labels.get(key).map(String::as_str))
            .collect::<Option<Vec<&str>>>()?;
        Some(values.join(&self.delimiter))
    }

    fn expand(&self, value: &str) -> Result<String, SampleError> {
        let Some(pattern) = &self.pattern else {
            return Ok(value.to_string());
        };

        let Some(captures) = pattern.captures(value) else {
            return Err(if self.is_identifier {
                SampleError::IdentifierMismatch {
                    attribute: self.name.clone(),
                    value: value.to_string(),
                }
            } else {
                SampleError::AttributeMismatch {
                    attribute: self.name.clone(),
                    value: value.to_string(),
                }
            });
        };

        if let Some(template) = &self.template {
            let mut expanded = String::new();
            captures.expand(template, &mut expanded);
            return Ok(expanded);
        }

        // Without a template: whole match for no groups, the group for one.
        let group = if pattern.captures_len() > 1 { 1 } else { 0 };
        Ok(captures
            .get(group)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default())
    }
}

/// Reconcile a label set against an entity definition
pub fn reconcile(
    def: &EntityDef,
    labels: &HashMap<String, String>,
    context: &IdentityContext,
) -> Result<Reconciled, SampleError> {
    let mut attributes = BTreeMap::new();

    for attribute in def.attributes() {
        match attribute.extract(labels) {
            Ok(Some(value)) => {
                attributes.insert(attribute.name.clone(), value);
            }
            Ok(None) => {}
            Err(SampleError::AttributeMismatch { attribute, value }) => {
                debug!(attribute = %attribute, value = %value, "Skipping unmatched attribute");
            }
            Err(e) => return Err(e),
        }
    }

    let identifier = def.identifier();
    let raw_id = attributes
        .get(&identifier.name)
        .cloned()
        .unwrap_or_default();
    if raw_id.is_empty() {
        return Err(SampleError::EmptyIdentifier {
            attribute: identifier.name.clone(),
        });
    }

    let id = if def.hosted_on_vm() {
        raw_id.clone()
    } else {
        scoped_identity(&raw_id, attributes.get(attrs::NAMESPACE), context)
    };

    Ok(Reconciled {
        raw_id,
        id,
        attributes,
    })
}

fn scoped_identity(raw_id: &str, namespace: Option<&String>, context: &IdentityContext) -> String {
    let mut id = raw_id.to_string();
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        id.push('-');
        id.push_str(ns);
    }
    if let Some(scope) = context.scope() {
        id.push('-');
        id.push_str(scope);
    }
    id
}
