//! Entity types reconciled under a template or discovery rule.
//!
//! An [`Entity`] carries two kinds of data: identity (`remote_id`, `name`,
//! `key`) used by the matcher, and a typed payload ([`EntityBody`]) that is
//! copied verbatim to the remote and only decides whether an update is needed.

use crate::{Error, ParentId, RemoteId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four collection kinds the engine reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    Trigger,
    ItemPrototype,
    TriggerPrototype,
}

impl EntityKind {
    /// Whether live entities of this kind can be materialized by a linked
    /// ancestor template, which requires the inherited-candidate guard
    /// before deleting.
    pub fn supports_inheritance(self) -> bool {
        matches!(self, EntityKind::ItemPrototype | EntityKind::TriggerPrototype)
    }

    /// Whether this kind is a discovery-rule prototype.
    pub fn is_prototype(self) -> bool {
        self.supports_inheritance()
    }

    /// Whether entities of this kind can be reconciled under `parent`.
    pub fn accepts(self, parent: &Parent) -> bool {
        match parent {
            Parent::Template { .. } => !self.is_prototype(),
            Parent::DiscoveryRule { .. } => self.is_prototype(),
        }
    }

    /// Stable lowercase name, also used as the state snapshot key.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Trigger => "trigger",
            EntityKind::ItemPrototype => "item_prototype",
            EntityKind::TriggerPrototype => "trigger_prototype",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a live entity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Declared and owned by this system
    #[default]
    Local,
    /// Materialized by the remote from a linked template; read-only here
    Inherited,
}

/// The owner of one reconciled collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parent {
    /// Items and triggers hang off a template.
    Template { template_id: ParentId },
    /// Prototypes hang off a discovery rule. The remote also wants the id of
    /// the template owning the rule when creating item prototypes.
    DiscoveryRule { rule_id: ParentId, host_id: ParentId },
}

impl Parent {
    pub fn template(template_id: impl Into<ParentId>) -> Self {
        Parent::Template {
            template_id: template_id.into(),
        }
    }

    pub fn discovery_rule(rule_id: impl Into<ParentId>, host_id: impl Into<ParentId>) -> Self {
        Parent::DiscoveryRule {
            rule_id: rule_id.into(),
            host_id: host_id.into(),
        }
    }

    /// The id shared by every entity of one reconciliation pass.
    pub fn id(&self) -> &ParentId {
        match self {
            Parent::Template { template_id } => template_id,
            Parent::DiscoveryRule { rule_id, .. } => rule_id,
        }
    }

    /// Id of the template that ultimately owns the collection.
    pub fn host_id(&self) -> &ParentId {
        match self {
            Parent::Template { template_id } => template_id,
            Parent::DiscoveryRule { host_id, .. } => host_id,
        }
    }
}

/// Payload of items and item prototypes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemFields {
    /// Update interval in seconds
    pub delay: u32,
    pub item_type: u8,
    pub value_type: u8,
    pub data_type: u8,
    pub delta: u8,
    pub description: String,
    /// Days of history to keep
    pub history: String,
    /// Days of trends to keep
    pub trends: String,
    /// Allowed hosts, trapper items only
    pub trapper_hosts: String,
    pub interface_id: String,
}

impl Default for ItemFields {
    fn default() -> Self {
        Self {
            delay: 60,
            item_type: 0,
            value_type: 0,
            data_type: 0,
            delta: 0,
            description: String::new(),
            history: "90".to_string(),
            trends: "365".to_string(),
            trapper_hosts: String::new(),
            interface_id: "0".to_string(),
        }
    }
}

impl ItemFields {
    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }
}

/// Highest trigger severity the remote accepts.
pub const MAX_PRIORITY: u8 = 5;

/// Payload of triggers and trigger prototypes.
///
/// The trigger expression is not stored here: it doubles as the trigger's
/// matching key and lives in [`Entity::key`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerFields {
    pub comments: String,
    /// Severity, 0 (not classified) to 5 (disaster)
    pub priority: u8,
    /// 0 enabled, 1 disabled
    pub status: u8,
    /// Remote ids of triggers this one depends on
    pub dependencies: Vec<RemoteId>,
}

impl TriggerFields {
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Typed payload; the variant fixes the entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityBody {
    Item(ItemFields),
    Trigger(TriggerFields),
    ItemPrototype(ItemFields),
    TriggerPrototype(TriggerFields),
}

impl EntityBody {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityBody::Item(_) => EntityKind::Item,
            EntityBody::Trigger(_) => EntityKind::Trigger,
            EntityBody::ItemPrototype(_) => EntityKind::ItemPrototype,
            EntityBody::TriggerPrototype(_) => EntityKind::TriggerPrototype,
        }
    }

    /// Item payload, for items and item prototypes.
    pub fn item(&self) -> Option<&ItemFields> {
        match self {
            EntityBody::Item(fields) | EntityBody::ItemPrototype(fields) => Some(fields),
            _ => None,
        }
    }

    /// Trigger payload, for triggers and trigger prototypes.
    pub fn trigger(&self) -> Option<&TriggerFields> {
        match self {
            EntityBody::Trigger(fields) | EntityBody::TriggerPrototype(fields) => Some(fields),
            _ => None,
        }
    }
}

/// A child entity of a template or discovery rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Assigned by the remote on create, stable afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// Item name, or trigger description
    pub name: String,
    /// Item key, or trigger expression
    pub key: String,
    #[serde(default)]
    pub parent_id: ParentId,
    #[serde(default)]
    pub origin: Origin,
    pub body: EntityBody,
}

impl Entity {
    /// Build a locally declared entity without a remote id.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        parent_id: impl Into<ParentId>,
        body: EntityBody,
    ) -> Self {
        Self {
            remote_id: None,
            name: name.into(),
            key: key.into(),
            parent_id: parent_id.into(),
            origin: Origin::Local,
            body,
        }
    }

    pub fn item(
        name: impl Into<String>,
        key: impl Into<String>,
        parent_id: impl Into<ParentId>,
        fields: ItemFields,
    ) -> Self {
        Self::new(name, key, parent_id, EntityBody::Item(fields))
    }

    /// A trigger: `description` is its name, `expression` its key.
    pub fn trigger(
        description: impl Into<String>,
        expression: impl Into<String>,
        parent_id: impl Into<ParentId>,
        fields: TriggerFields,
    ) -> Self {
        Self::new(description, expression, parent_id, EntityBody::Trigger(fields))
    }

    pub fn item_prototype(
        name: impl Into<String>,
        key: impl Into<String>,
        rule_id: impl Into<ParentId>,
        fields: ItemFields,
    ) -> Self {
        Self::new(name, key, rule_id, EntityBody::ItemPrototype(fields))
    }

    pub fn trigger_prototype(
        description: impl Into<String>,
        expression: impl Into<String>,
        rule_id: impl Into<ParentId>,
        fields: TriggerFields,
    ) -> Self {
        Self::new(
            description,
            expression,
            rule_id,
            EntityBody::TriggerPrototype(fields),
        )
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<RemoteId>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.body.kind()
    }

    /// Remote id, treating an empty string like an absent one.
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref().filter(|id| !id.is_empty())
    }

    pub fn has_remote_id(&self) -> bool {
        self.remote_id().is_some()
    }

    pub fn is_inherited(&self) -> bool {
        self.origin == Origin::Inherited
    }

    /// Whether `other` would need no update to become `self`.
    ///
    /// Remote id, parent and origin are bookkeeping and do not count.
    pub fn same_content(&self, other: &Entity) -> bool {
        self.name == other.name && self.key == other.key && self.body == other.body
    }

    /// Check the payload against the remote's accepted ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "{} without a name (key '{}')",
                self.kind(),
                self.key
            )));
        }
        if self.key.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "{} '{}' without a key",
                self.kind(),
                self.name
            )));
        }
        if let Some(trigger) = self.body.trigger() {
            if trigger.priority > MAX_PRIORITY {
                return Err(Error::InvalidRequest(format!(
                    "{} '{}': priority must be between 0 and {}, got {}",
                    self.kind(),
                    self.name,
                    MAX_PRIORITY,
                    trigger.priority
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_body() {
        let item = Entity::item("CPU load", "system.cpu.load", "10001", ItemFields::default());
        assert_eq!(item.kind(), EntityKind::Item);

        let proto = Entity::trigger_prototype(
            "Disk full on {#FSNAME}",
            "last(/T/vfs.fs.size[{#FSNAME},pfree])<5",
            "20001",
            TriggerFields::default(),
        );
        assert_eq!(proto.kind(), EntityKind::TriggerPrototype);
        assert!(proto.body.trigger().is_some());
        assert!(proto.body.item().is_none());
    }

    #[test]
    fn empty_remote_id_counts_as_absent() {
        let item = Entity::item("a", "k", "1", ItemFields::default()).with_remote_id("");
        assert!(!item.has_remote_id());
        assert_eq!(item.remote_id(), None);

        let item = item.with_remote_id("42");
        assert_eq!(item.remote_id().map(String::as_str), Some("42"));
    }

    #[test]
    fn same_content_ignores_bookkeeping() {
        let declared = Entity::item("a", "k", "1", ItemFields::default());
        let stored = declared
            .clone()
            .with_remote_id("7")
            .with_origin(Origin::Inherited);
        assert!(declared.same_content(&stored));

        let slower = Entity::item("a", "k", "1", ItemFields::default().with_delay(300));
        assert!(!declared.same_content(&slower));
    }

    #[test]
    fn parent_shapes() {
        let template = Parent::template("10001");
        let rule = Parent::discovery_rule("30001", "10001");

        assert!(EntityKind::Item.accepts(&template));
        assert!(EntityKind::Trigger.accepts(&template));
        assert!(!EntityKind::ItemPrototype.accepts(&template));
        assert!(EntityKind::TriggerPrototype.accepts(&rule));
        assert!(!EntityKind::Item.accepts(&rule));

        assert_eq!(rule.id(), "30001");
        assert_eq!(rule.host_id(), "10001");
        assert_eq!(template.host_id(), "10001");
    }

    #[test]
    fn only_prototypes_support_inheritance() {
        assert!(!EntityKind::Item.supports_inheritance());
        assert!(!EntityKind::Trigger.supports_inheritance());
        assert!(EntityKind::ItemPrototype.supports_inheritance());
        assert!(EntityKind::TriggerPrototype.supports_inheritance());
    }

    #[test]
    fn validate_rejects_bad_priority() {
        let trigger = Entity::trigger(
            "High load",
            "last(/T/system.cpu.load)>5",
            "1",
            TriggerFields::default().with_priority(9),
        );
        let err = trigger.validate().unwrap_err();
        assert!(err.to_string().contains("priority must be between 0 and 5"));

        let ok =
            Entity::trigger("High load", "x>1", "1", TriggerFields::default().with_priority(5));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn item_defaults_match_remote_defaults() {
        let fields = ItemFields::default();
        assert_eq!(fields.history, "90");
        assert_eq!(fields.trends, "365");
        assert_eq!(fields.interface_id, "0");
    }

    #[test]
    fn serde_roundtrip_keeps_body_tag() {
        let item = Entity::item_prototype(
            "Free on {#FS}",
            "vfs.fs.free[{#FS}]",
            "9",
            ItemFields::default(),
        )
        .with_remote_id("100");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["body"]["kind"], "item_prototype");
        assert_eq!(json["remoteId"], "100");

        let parsed: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, item);
    }
}
