//! Compiled entity definitions
//!
//! These are built from the raw configuration tree once at load time and
//! shared read-only by every task afterwards.

use crate::error::ConfigError;
use crate::models::{EntityType, MetricType, QueryKind};
use regex::Regex;
use std::collections::BTreeMap;

/// Delimiter used to join several source labels
pub const DEFAULT_DELIMITER: &str = ":";

/// Rule deriving one attribute from a sample's labels
#[derive(Debug, Clone)]
pub struct AttributeDef {
    pub(crate) name: String,
    pub(crate) labels: Vec<String>,
    pub(crate) delimiter: String,
    pub(crate) pattern: Option<Regex>,
    pub(crate) template: Option<String>,
    pub(crate) is_identifier: bool,
}

impl AttributeDef {
    /// Attribute taking the raw value of one label
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: vec![label.into()],
            delimiter: DEFAULT_DELIMITER.to_string(),
            pattern: None,
            template: None,
            is_identifier: false,
        }
    }

    /// Join several labels instead of reading one
    pub fn with_labels<I, S>(mut self, labels: I, delimiter: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self.delimiter = delimiter.into();
        self
    }

    /// Apply a pattern, and optionally a replacement template, to the value
    pub fn with_pattern(
        mut self,
        pattern: &str,
        template: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            attribute: self.name.clone(),
            source,
        })?;

        // captures_len counts the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups > 1 && template.is_none() {
            return Err(ConfigError::MissingTemplate {
                attribute: self.name.clone(),
                groups,
            });
        }

        self.pattern = Some(regex);
        self.template = template.map(str::to_string);
        Ok(self)
    }

    pub fn identifier(mut self) -> Self {
        self.is_identifier = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_identifier(&self) -> bool {
        self.is_identifier
    }
}

/// One metric category and its queries
#[derive(Debug, Clone)]
pub struct MetricDef {
    pub(crate) metric_type: MetricType,
    pub(crate) queries: BTreeMap<QueryKind, String>,
}

impl MetricDef {
    pub fn new(metric_type: MetricType) -> Self {
        Self {
            metric_type,
            queries: BTreeMap::new(),
        }
    }

    pub fn query(mut self, kind: QueryKind, text: impl Into<String>) -> Self {
        self.queries.insert(kind, text.into());
        self
    }

    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    pub fn queries(&self) -> impl Iterator<Item = (QueryKind, &str)> {
        self.queries.iter().map(|(kind, text)| (*kind, text.as_str()))
    }
}

/// One category of entity to discover
#[derive(Debug, Clone)]
pub struct EntityDef {
    entity_type: EntityType,
    hosted_on_vm: bool,
    metrics: Vec<MetricDef>,
    attributes: BTreeMap<String, AttributeDef>,
    identifier: String,
}

impl EntityDef {
    /// Validate and assemble a definition
    ///
    /// Exactly one attribute must be the identifier and every metric needs a
    /// non-empty `used` query.
    pub fn new(
        entity_type: EntityType,
        hosted_on_vm: bool,
        metrics: Vec<MetricDef>,
        attributes: Vec<AttributeDef>,
    ) -> Result<Self, ConfigError> {
        if metrics.is_empty() {
            return Err(ConfigError::NoMetrics { entity_type });
        }

        for metric in &metrics {
            if !metric.queries.contains_key(&QueryKind::Used) {
                return Err(ConfigError::MissingUsedQuery {
                    entity_type,
                    metric: metric.metric_type,
                });
            }
            if let Some((kind, _)) = metric.queries.iter().find(|(_, q)| q.trim().is_empty()) {
                return Err(ConfigError::EmptyQuery {
                    entity_type,
                    metric: metric.metric_type,
                    kind: *kind,
                });
            }
        }

        for attribute in &attributes {
            if attribute.labels.is_empty() || attribute.labels.iter().any(|l| l.is_empty()) {
                return Err(ConfigError::MissingLabel {
                    attribute: attribute.name.clone(),
                });
            }
        }

        let identifiers: Vec<String> = attributes
            .iter()
            .filter(|a| a.is_identifier)
            .map(|a| a.name.clone())
            .collect();

        let identifier = match identifiers.len() {
            0 => return Err(ConfigError::MissingIdentifier { entity_type }),
            1 => identifiers[0].clone(),
            _ => {
                return Err(ConfigError::DuplicateIdentifier {
                    entity_type,
                    names: identifiers,
                })
            }
        };

        Ok(Self {
            entity_type,
            hosted_on_vm,
            metrics,
            attributes: attributes
                .into_iter()
                .map(|a| (a.name.clone(), a))
                .collect(),
            identifier,
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn hosted_on_vm(&self) -> bool {
        self.hosted_on_vm
    }

    pub fn metrics(&self) -> &[MetricDef] {
        &self.metrics
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.values()
    }

    pub fn identifier(&self) -> &AttributeDef {
        &self.attributes[&self.identifier]
    }
}
