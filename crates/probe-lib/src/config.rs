//! Discovery configuration tree
//!
//! The raw tree is deserialized by the binary and compiled here into the
//! typed definitions the tasks run with. All validation happens at load
//! time; the discovery core trusts what it is given.

use crate::discovery::{AttributeDef, EntityDef, IdentityContext, MetricDef, DEFAULT_DELIMITER};
use crate::error::ConfigError;
use crate::models::{EntityType, MetricType, QueryKind};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Top-level probe configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub exporters: BTreeMap<String, ExporterConfig>,

    #[serde(default)]
    pub business_apps: Vec<BusinessAppConfig>,

    /// Size of the worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between discovery cycles
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    #[serde(default)]
    pub cluster_id: Option<String>,

    #[serde(default)]
    pub runtime_service_id: Option<String>,
}

fn default_workers() -> usize {
    10
}

fn default_discovery_interval() -> u64 {
    600
}

/// One metrics backend and the exporters it scrapes
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub exporters: Vec<String>,
    #[serde(default = "default_query_timeout")]
    pub timeout_secs: u64,
}

fn default_query_timeout() -> u64 {
    30
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Entity definitions published by one exporter
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub hosted_on_vm: bool,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub queries: BTreeMap<QueryKind, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeConfig {
    /// Single source label
    #[serde(default)]
    pub label: Option<String>,
    /// Several source labels joined with `delimiter`
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub matches: Option<String>,
    /// Replacement template applied to the match, e.g. `$2-$1`
    #[serde(default, rename = "as")]
    pub template: Option<String>,
    #[serde(default)]
    pub is_identifier: bool,
}

/// Business application declared in static configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessAppConfig {
    pub name: String,
    /// Originating source of the services, usually a server name
    pub from: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub transactions: Vec<TransactionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfig {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub depend_on: Vec<String>,
}

impl AttributeConfig {
    fn compile(&self, name: &str) -> Result<AttributeDef, ConfigError> {
        let mut labels: Vec<String> = self.label.iter().cloned().collect();
        labels.extend(self.labels.iter().cloned());
        if labels.is_empty() {
            return Err(ConfigError::MissingLabel {
                attribute: name.to_string(),
            });
        }

        let delimiter = self
            .delimiter
            .clone()
            .unwrap_or_else(|| DEFAULT_DELIMITER.to_string());
        let mut def = AttributeDef::new(name, labels[0].clone()).with_labels(labels, delimiter);

        if let Some(pattern) = &self.matches {
            def = def.with_pattern(pattern, self.template.as_deref())?;
        }
        if self.is_identifier {
            def = def.identifier();
        }
        Ok(def)
    }
}

impl EntityConfig {
    /// Compile into a validated entity definition
    pub fn compile(&self) -> Result<EntityDef, ConfigError> {
        let metrics = self
            .metrics
            .iter()
            .map(|m| {
                m.queries
                    .iter()
                    .fold(MetricDef::new(m.metric_type), |def, (kind, query)| {
                        def.query(*kind, query.clone())
                    })
            })
            .collect();

        let attributes = self
            .attributes
            .iter()
            .map(|(name, attribute)| attribute.compile(name))
            .collect::<Result<Vec<_>, _>>()?;

        EntityDef::new(self.entity_type, self.hosted_on_vm, metrics, attributes)
    }
}

impl ProbeConfig {
    /// Check cross-references that single sections cannot check alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        for server in &self.servers {
            url::Url::parse(&server.url).map_err(|e| ConfigError::InvalidServerUrl {
                server: server.name.clone(),
                reason: e.to_string(),
            })?;

            if let Some(missing) = server
                .exporters
                .iter()
                .find(|e| !self.exporters.contains_key(*e))
            {
                return Err(ConfigError::UnknownExporter {
                    server: server.name.clone(),
                    exporter: missing.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for app in &self.business_apps {
            if !seen.insert((app.name.as_str(), app.from.as_str())) {
                return Err(ConfigError::DuplicateBusinessApp {
                    name: app.name.clone(),
                    from: app.from.clone(),
                });
            }
        }

        Ok(())
    }

    /// Validate and compile every exporter's entity definitions
    pub fn compile_exporters(&self) -> Result<BTreeMap<String, Vec<Arc<EntityDef>>>, ConfigError> {
        self.validate()?;

        self.exporters
            .iter()
            .map(|(name, exporter)| {
                let defs = exporter
                    .entities
                    .iter()
                    .map(|e| e.compile().map(Arc::new))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((name.clone(), defs))
            })
            .collect()
    }

    pub fn identity_context(&self) -> IdentityContext {
        IdentityContext::new(self.cluster_id.clone(), self.runtime_service_id.clone())
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "servers": [
            {"name": "prom-1", "url": "http://prometheus:9090", "exporters": ["istio"]}
        ],
        "exporters": {
            "istio": {
                "entities": [{
                    "type": "application",
                    "metrics": [
                        {"type": "responseTime", "queries": {"used": "rt_query", "capacity": "rt_cap"}},
                        {"type": "transaction", "queries": {"used": "tx_query"}}
                    ],
                    "attributes": {
                        "ip": {"label": "instance", "matches": "^([^:]+)", "isIdentifier": true},
                        "service": {"label": "destination_service"},
                        "version": {"labels": ["major", "minor"], "delimiter": ".", "matches": "(\\d+)\\.(\\d+)", "as": "$2-$1"}
                    }
                }]
            }
        },
        "businessApps": [
            {"name": "shop", "from": "prom-1", "services": ["cart"],
             "transactions": [{"name": "checkout", "path": "/checkout", "dependOn": ["cart"]}]}
        ],
        "workers": 4,
        "clusterId": "prod"
    }"#;

    fn parse(json: &str) -> ProbeConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_and_compile() {
        let config = parse(CONFIG);
        assert_eq!(config.workers, 4);
        assert_eq!(config.discovery_interval_secs, 600);
        assert_eq!(config.servers[0].timeout(), Duration::from_secs(30));
        assert_eq!(config.business_apps[0].transactions[0].depend_on, vec!["cart"]);

        let exporters = config.compile_exporters().unwrap();
        let defs = &exporters["istio"];
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].entity_type(), EntityType::Application);
        assert_eq!(defs[0].identifier().name(), "ip");
        assert_eq!(defs[0].metrics().len(), 2);

        let version = defs[0]
            .attributes()
            .find(|a| a.name() == "version")
            .unwrap();
        assert_eq!(version.labels(), ["major", "minor"]);
    }

    #[test]
    fn test_unknown_exporter_is_rejected() {
        let mut config = parse(CONFIG);
        config.servers[0].exporters.push("kepler".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownExporter { exporter, .. }) if exporter == "kepler"
        ));
    }

    #[test]
    fn test_duplicate_business_app_is_rejected() {
        let mut config = parse(CONFIG);
        let duplicate = config.business_apps[0].clone();
        config.business_apps.push(duplicate);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateBusinessApp { .. })
        ));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let mut config = parse(CONFIG);
        config.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));
    }

    #[test]
    fn test_unknown_metric_type_fails_to_parse() {
        let json = r#"{"type": "application", "metrics": [{"type": "bogus", "queries": {"used": "q"}}]}"#;
        assert!(serde_json::from_str::<EntityConfig>(json).is_err());
    }

    #[test]
    fn test_attribute_without_label_is_rejected() {
        let entity: EntityConfig = serde_json::from_str(
            r#"{"type": "application",
                "metrics": [{"type": "cpu", "queries": {"used": "q"}}],
                "attributes": {"ip": {"isIdentifier": true}}}"#,
        )
        .unwrap();
        assert!(matches!(
            entity.compile(),
            Err(ConfigError::MissingLabel { .. })
        ));
    }

    #[test]
    fn test_identity_context_from_config() {
        let config = parse(CONFIG);
        let context = config.identity_context();
        assert_eq!(context.scope(), Some("prod"));
    }
}
