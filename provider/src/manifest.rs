//! Declarative manifest: which entities each template and discovery rule
//! should carry.

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use zabbix_sync_engine::{Entity, EntityKind, ItemFields, Parent, ParentId, TriggerFields};

/// One declared item or item prototype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    pub key: String,
    #[serde(flatten)]
    pub fields: ItemFields,
}

/// One declared trigger or trigger prototype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub description: String,
    pub expression: String,
    #[serde(flatten)]
    pub fields: TriggerFields,
}

/// A template addressed by id or by technical host name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<ParentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemSpec>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
}

impl TemplateSpec {
    /// Human-readable label for messages.
    pub fn label(&self) -> String {
        match (&self.host, &self.template_id) {
            (Some(host), _) => host.clone(),
            (None, Some(id)) => id.clone(),
            (None, None) => "<unnamed>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRuleSpec {
    pub rule_id: ParentId,
    /// Host or template owning the rule
    pub host_id: ParentId,
    #[serde(default)]
    pub item_prototypes: Vec<ItemSpec>,
    #[serde(default)]
    pub trigger_prototypes: Vec<TriggerSpec>,
}

/// Root of the manifest file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
    #[serde(default)]
    pub discovery_rules: Vec<DiscoveryRuleSpec>,
}

/// The declared entities of one (parent, kind) collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub parent: Parent,
    pub kind: EntityKind,
    pub entities: Vec<Entity>,
}

impl Manifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ProviderError::io(path, e))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject manifests that would reconcile one collection twice.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for template in &self.templates {
            let key = match (&template.template_id, &template.host) {
                (Some(id), None) => format!("id:{}", id),
                (None, Some(host)) => format!("host:{}", host),
                _ => {
                    return Err(ProviderError::Manifest(format!(
                        "template '{}' needs exactly one of template_id and host",
                        template.label()
                    )))
                }
            };
            if !seen.insert(key) {
                return Err(ProviderError::Manifest(format!(
                    "template '{}' is declared twice",
                    template.label()
                )));
            }
        }

        let mut rules = HashSet::new();
        for rule in &self.discovery_rules {
            if rule.rule_id.is_empty() || rule.host_id.is_empty() {
                return Err(ProviderError::Manifest(
                    "discovery rules need both rule_id and host_id".to_string(),
                ));
            }
            if !rules.insert(&rule.rule_id) {
                return Err(ProviderError::Manifest(format!(
                    "discovery rule {} is declared twice",
                    rule.rule_id
                )));
            }
        }
        Ok(())
    }

    /// Every declared collection in declaration order: each template's items
    /// then triggers, then each rule's item prototypes then trigger
    /// prototypes.
    ///
    /// `resolve` maps a template host name to its id. Two declarations that
    /// end up on the same template id are rejected, since the second would
    /// delete what the first creates.
    pub fn collections<F>(&self, mut resolve: F) -> Result<Vec<Collection>>
    where
        F: FnMut(&str) -> Result<ParentId>,
    {
        let mut collections = Vec::new();
        let mut resolved = HashSet::new();

        for template in &self.templates {
            let template_id = match (&template.template_id, &template.host) {
                (Some(id), _) => id.clone(),
                (None, Some(host)) => resolve(host)?,
                (None, None) => {
                    return Err(ProviderError::Manifest(format!(
                        "template '{}' has neither template_id nor host",
                        template.label()
                    )))
                }
            };
            if !resolved.insert(template_id.clone()) {
                return Err(ProviderError::Manifest(format!(
                    "template '{}' resolves to id {}, which is already declared",
                    template.label(),
                    template_id
                )));
            }
            let parent = Parent::template(template_id.clone());

            let items = template.items.iter().map(|decl| {
                Entity::item(&decl.name, &decl.key, template_id.clone(), decl.fields.clone())
            });
            let triggers = template.triggers.iter().map(|decl| {
                Entity::trigger(
                    &decl.description,
                    &decl.expression,
                    template_id.clone(),
                    decl.fields.clone(),
                )
            });
            collections.push(Collection {
                parent: parent.clone(),
                kind: EntityKind::Item,
                entities: items.collect(),
            });
            collections.push(Collection {
                parent,
                kind: EntityKind::Trigger,
                entities: triggers.collect(),
            });
        }

        for rule in &self.discovery_rules {
            let parent = Parent::discovery_rule(rule.rule_id.clone(), rule.host_id.clone());

            let items = rule.item_prototypes.iter().map(|decl| {
                Entity::item_prototype(
                    &decl.name,
                    &decl.key,
                    rule.rule_id.clone(),
                    decl.fields.clone(),
                )
            });
            let triggers = rule.trigger_prototypes.iter().map(|decl| {
                Entity::trigger_prototype(
                    &decl.description,
                    &decl.expression,
                    rule.rule_id.clone(),
                    decl.fields.clone(),
                )
            });
            collections.push(Collection {
                parent: parent.clone(),
                kind: EntityKind::ItemPrototype,
                entities: items.collect(),
            });
            collections.push(Collection {
                parent,
                kind: EntityKind::TriggerPrototype,
                entities: triggers.collect(),
            });
        }

        Ok(collections)
    }
}
