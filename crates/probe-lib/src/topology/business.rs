//! Business topology: services, business transactions and applications
//!
//! Every application or database server gets a synthetic service. Services
//! are then stitched into the business applications and transactions
//! declared in static configuration.

use crate::config::{BusinessAppConfig, TransactionConfig};
use crate::models::{EntityType, HostedOn, NormalizedEntity, PartOf, ProviderRef};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Builds the business layer on top of discovered entities
pub struct TopologyBuilder<'a> {
    apps: &'a [BusinessAppConfig],
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(apps: &'a [BusinessAppConfig]) -> Self {
        Self { apps }
    }

    /// Return the input entities plus services, transactions and applications
    pub fn build(&self, entities: Vec<NormalizedEntity>) -> Vec<NormalizedEntity> {
        let mut discovered = entities;
        let mut services = ServiceIndex::from_entities(&discovered);

        let discovered_transactions: HashMap<String, usize> = discovered
            .iter()
            .enumerate()
            .filter(|(_, e)| e.entity_type() == EntityType::BusinessTransaction)
            .map(|(i, e)| (e.id().to_string(), i))
            .collect();

        let mut created = Vec::new();

        for app in self.apps {
            let app_id = business_app_id(app);
            let mut app_node = NormalizedEntity::new(EntityType::BusinessApplication, app_id.clone());
            app_node.display_name = Some(app.name.clone());
            app_node.source = Some(app.from.clone());

            for transaction in &app.transactions {
                let txn_id = transaction_id(app, transaction);
                let members = services.lookup(&transaction.depend_on, &app.from);
                if members.is_empty() {
                    debug!(app = %app.name, transaction = %transaction.name, "Transaction has no discovered services");
                }

                let edge = PartOf::new(EntityType::BusinessTransaction, txn_id.clone())
                    .labeled(transaction.name.clone());
                let mut providers = Vec::with_capacity(members.len());
                for &member in &members {
                    let service = &mut services.nodes[member];
                    service.add_part_of(edge.clone());
                    providers.push(ProviderRef::new(EntityType::Service, service.id()));
                }

                let app_edge = PartOf::new(EntityType::BusinessApplication, app_id.clone())
                    .labeled(app.name.clone());
                match discovered_transactions.get(&txn_id) {
                    Some(&position) => {
                        let existing = &mut discovered[position];
                        existing.providers = providers;
                        existing.add_part_of(app_edge);
                    }
                    None => {
                        let mut node = NormalizedEntity::new(EntityType::BusinessTransaction, txn_id.clone());
                        node.display_name = Some(transaction.name.clone());
                        node.source = Some(app.from.clone());
                        node.providers = providers;
                        node.add_part_of(app_edge);
                        created.push(node);
                    }
                }

                app_node.add_provider(ProviderRef::new(EntityType::BusinessTransaction, txn_id));
            }

            let app_edge = PartOf::new(EntityType::BusinessApplication, app_id.clone())
                .labeled(app.name.clone());
            let members = services.lookup(&app.services, &app.from);
            if members.is_empty() {
                warn!(app = %app.name, from = %app.from, "Business application has no discovered services");
            }
            for member in members {
                let service = &mut services.nodes[member];
                service.add_part_of(app_edge.clone());
                app_node.add_provider(ProviderRef::new(EntityType::Service, service.id()));
            }

            created.push(app_node);
        }

        discovered.extend(services.nodes);
        discovered.extend(created);
        discovered
    }
}

fn business_app_id(app: &BusinessAppConfig) -> String {
    format!("{}-{}", app.name, app.from)
}

fn transaction_id(app: &BusinessAppConfig, transaction: &TransactionConfig) -> String {
    transaction
        .path
        .clone()
        .unwrap_or_else(|| format!("{}-{}-{}", app.name, app.from, transaction.name))
}

/// Synthetic services indexed by the logical service names they belong to
struct ServiceIndex {
    nodes: Vec<NormalizedEntity>,
    by_name: HashMap<String, Vec<usize>>,
}

impl ServiceIndex {
    fn from_entities(entities: &[NormalizedEntity]) -> Self {
        let mut index = Self {
            nodes: Vec::new(),
            by_name: HashMap::new(),
        };

        for entity in entities.iter().filter(|e| e.entity_type().yields_service()) {
            let names: Vec<String> = entity
                .part_of
                .iter()
                .filter(|edge| edge.parent_type == EntityType::Service)
                .map(|edge| edge.label.clone().unwrap_or_else(|| edge.parent_id.clone()))
                .collect();

            let mut service = NormalizedEntity::new(EntityType::Service, format!("service-{}", entity.id()));
            service.display_name = Some(names.first().cloned().unwrap_or_else(|| entity.name().to_string()));
            service.namespace = entity.namespace.clone();
            service.cluster_id = entity.cluster_id.clone();
            service.source = entity.source.clone();
            service.metrics = entity.metrics.clone();
            service.proxy = !matches!(entity.hosted_on, Some(HostedOn::Vm { .. }));
            service.add_provider(ProviderRef::new(entity.entity_type(), entity.id()));

            let position = index.nodes.len();
            index.nodes.push(service);
            for name in names {
                index.by_name.entry(name).or_default().push(position);
            }
        }

        index
    }

    /// Services under any of `names` whose source matches `from`
    fn lookup(&self, names: &[String], from: &str) -> Vec<usize> {
        let mut found: Vec<usize> = names
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .flatten()
            .copied()
            .filter(|&i| {
                self.nodes[i]
                    .source
                    .as_deref()
                    .map_or(true, |source| source == from)
            })
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }
}
