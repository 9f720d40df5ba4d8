//! Mapping between engine entities and the Zabbix API object shapes.
//!
//! Zabbix returns every scalar as a string (`"priority": "3"`) but accepts
//! numbers on input, so decoding is lenient about both.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use zabbix_sync_engine::{
    Entity, EntityBody, EntityKind, ItemFields, Origin, Output, Parent, Query, RemoteId,
    TriggerFields,
};

/// API verbs used against entity collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "get",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        })
    }
}

/// API object name of a kind.
pub fn api_object(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Item => "item",
        EntityKind::Trigger => "trigger",
        EntityKind::ItemPrototype => "itemprototype",
        EntityKind::TriggerPrototype => "triggerprototype",
    }
}

pub fn method(kind: EntityKind, verb: Verb) -> String {
    format!("{}.{}", api_object(kind), verb)
}

/// Id property of one object.
pub fn id_field(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Item | EntityKind::ItemPrototype => "itemid",
        EntityKind::Trigger | EntityKind::TriggerPrototype => "triggerid",
    }
}

/// Id list property of create/update/delete results.
pub fn ids_field(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Item | EntityKind::ItemPrototype => "itemids",
        EntityKind::Trigger | EntityKind::TriggerPrototype => "triggerids",
    }
}

/// Parameters of a `<object>.get` call.
pub fn get_params(query: &Query) -> Value {
    let mut params = Map::new();
    let output = match query.output {
        Output::Extend => json!("extend"),
        Output::IdsOnly => json!([id_field(query.kind), "templateid"]),
    };
    params.insert("output".into(), output);

    match &query.parent {
        Parent::Template { template_id } => {
            params.insert("templateids".into(), json!([template_id]));
        }
        Parent::DiscoveryRule { rule_id, .. } => {
            params.insert("discoveryids".into(), json!([rule_id]));
        }
    }
    if let Some(inherited) = query.inherited {
        params.insert("inherited".into(), json!(inherited));
    }
    if query.expand_expression {
        params.insert("expandExpression".into(), json!(true));
    }
    if query.select_dependencies {
        params.insert("selectDependencies".into(), json!(["triggerid"]));
    }
    Value::Object(params)
}

/// Parameters of a `<object>.create` call.
pub fn create_params(parent: &Parent, entities: &[Entity]) -> Value {
    Value::Array(
        entities
            .iter()
            .map(|entity| encode(entity, Some(parent)))
            .collect(),
    )
}

/// Parameters of a `<object>.update` call; every entity carries its id.
pub fn update_params(entities: &[Entity]) -> Value {
    Value::Array(entities.iter().map(|entity| encode(entity, None)).collect())
}

/// Parameters of a `<object>.delete` call.
pub fn delete_params(ids: &[RemoteId]) -> Value {
    json!(ids)
}

fn is_zero(value: &u8) -> bool {
    *value == 0
}

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}

#[derive(Serialize)]
struct ItemOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    itemid: Option<&'a str>,
    name: &'a str,
    key_: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ruleid: Option<&'a str>,
    delay: String,
    #[serde(rename = "type")]
    item_type: u8,
    value_type: u8,
    // Dropped by newer servers; only sent when set
    #[serde(skip_serializing_if = "is_zero")]
    data_type: u8,
    #[serde(skip_serializing_if = "is_zero")]
    delta: u8,
    description: &'a str,
    history: &'a str,
    trends: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    trapper_hosts: &'a str,
    interfaceid: &'a str,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
struct DependencyRef {
    triggerid: String,
}

#[derive(Serialize)]
struct TriggerOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    triggerid: Option<&'a str>,
    description: &'a str,
    expression: &'a str,
    comments: &'a str,
    priority: u8,
    status: u8,
    dependencies: Vec<DependencyRef>,
}

/// Encode one entity. `parent` is set for creates, where the server needs
/// the owning host or rule; updates address the object by id alone.
fn encode(entity: &Entity, parent: Option<&Parent>) -> Value {
    let id = entity.remote_id().map(String::as_str);
    let kind = entity.kind();

    let encoded = match &entity.body {
        EntityBody::Item(fields) | EntityBody::ItemPrototype(fields) => {
            serde_json::to_value(ItemOut {
                itemid: id,
                name: &entity.name,
                key_: &entity.key,
                hostid: parent.map(|p| p.host_id().as_str()),
                ruleid: parent
                    .filter(|_| kind.is_prototype())
                    .map(|p| p.id().as_str()),
                delay: fields.delay.to_string(),
                item_type: fields.item_type,
                value_type: fields.value_type,
                data_type: fields.data_type,
                delta: fields.delta,
                description: &fields.description,
                history: &fields.history,
                trends: &fields.trends,
                trapper_hosts: &fields.trapper_hosts,
                interfaceid: &fields.interface_id,
            })
        }
        EntityBody::Trigger(fields) | EntityBody::TriggerPrototype(fields) => {
            serde_json::to_value(TriggerOut {
                triggerid: id,
                description: &entity.name,
                expression: &entity.key,
                comments: &fields.comments,
                priority: fields.priority,
                status: fields.status,
                dependencies: fields
                    .dependencies
                    .iter()
                    .map(|triggerid| DependencyRef {
                        triggerid: triggerid.clone(),
                    })
                    .collect(),
            })
        }
    };
    // Plain structs of strings and integers always serialize
    encoded.unwrap_or(Value::Null)
}

/// Accept `"3"` as well as `3`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Text(String),
        Number(T),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
        Raw::Number(value) => Ok(value),
    }
}

fn lenient_delay<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Value = Deserialize::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => parse_delay(text),
        _ => None,
    };
    parsed.ok_or_else(|| de::Error::custom(format!("unsupported delay {}", raw)))
}

/// Seconds of an update interval such as `60`, `30s` or `5m`.
///
/// Flexible and scheduling intervals after `;` are ignored.
pub fn parse_delay(raw: &str) -> Option<u32> {
    let base = raw.split(';').next()?.trim();
    let (digits, unit) = match base.char_indices().last()? {
        (i, c) if c.is_ascii_alphabetic() => (&base[..i], c),
        _ => (base, 's'),
    };
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        _ => return None,
    };
    digits.parse::<u32>().ok()?.checked_mul(multiplier)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ItemIn {
    itemid: String,
    name: String,
    key_: String,
    #[serde(deserialize_with = "lenient_delay")]
    delay: u32,
    #[serde(rename = "type", deserialize_with = "lenient")]
    item_type: u8,
    #[serde(deserialize_with = "lenient")]
    value_type: u8,
    #[serde(deserialize_with = "lenient")]
    data_type: u8,
    #[serde(deserialize_with = "lenient")]
    delta: u8,
    description: String,
    history: String,
    trends: String,
    trapper_hosts: String,
    interfaceid: String,
    templateid: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TriggerIn {
    triggerid: String,
    description: String,
    expression: String,
    comments: String,
    #[serde(deserialize_with = "lenient")]
    priority: u8,
    #[serde(deserialize_with = "lenient")]
    status: u8,
    dependencies: Vec<DependencyRef>,
    templateid: String,
}

fn origin(templateid: &str) -> Origin {
    if templateid.is_empty() || templateid == "0" {
        Origin::Local
    } else {
        Origin::Inherited
    }
}

fn non_empty(id: String) -> Option<RemoteId> {
    Some(id).filter(|id| !id.is_empty())
}

/// Decode a `<object>.get` result.
pub fn decode_entities(
    kind: EntityKind,
    parent: &Parent,
    result: Value,
) -> Result<Vec<Entity>, serde_json::Error> {
    let objects: Vec<Value> = serde_json::from_value(result)?;
    objects
        .into_iter()
        .map(|object| decode(kind, parent, object))
        .collect()
}

fn decode(kind: EntityKind, parent: &Parent, object: Value) -> Result<Entity, serde_json::Error> {
    let parent_id = parent.id().clone();
    match kind {
        EntityKind::Item | EntityKind::ItemPrototype => decode_item(kind, parent_id, object),
        EntityKind::Trigger | EntityKind::TriggerPrototype => {
            decode_trigger(kind, parent_id, object)
        }
    }
}

fn decode_item(
    kind: EntityKind,
    parent_id: String,
    object: Value,
) -> Result<Entity, serde_json::Error> {
    let raw: ItemIn = serde_json::from_value(object)?;
    let fields = ItemFields {
        delay: raw.delay,
        item_type: raw.item_type,
        value_type: raw.value_type,
        data_type: raw.data_type,
        delta: raw.delta,
        description: raw.description,
        history: raw.history,
        trends: raw.trends,
        trapper_hosts: raw.trapper_hosts,
        interface_id: raw.interfaceid,
    };
    let body = if kind.is_prototype() {
        EntityBody::ItemPrototype(fields)
    } else {
        EntityBody::Item(fields)
    };
    let mut entity =
        Entity::new(raw.name, raw.key_, parent_id, body).with_origin(origin(&raw.templateid));
    entity.remote_id = non_empty(raw.itemid);
    Ok(entity)
}

fn decode_trigger(
    kind: EntityKind,
    parent_id: String,
    object: Value,
) -> Result<Entity, serde_json::Error> {
    let raw: TriggerIn = serde_json::from_value(object)?;
    let fields = TriggerFields {
        comments: raw.comments,
        priority: raw.priority,
        status: raw.status,
        dependencies: raw.dependencies.into_iter().map(|d| d.triggerid).collect(),
    };
    let body = if kind.is_prototype() {
        EntityBody::TriggerPrototype(fields)
    } else {
        EntityBody::Trigger(fields)
    };
    let mut entity = Entity::new(raw.description, raw.expression, parent_id, body)
        .with_origin(origin(&raw.templateid));
    entity.remote_id = non_empty(raw.triggerid);
    Ok(entity)
}

/// Ids listed in a create/update/delete result, in request order.
pub fn decode_ids(kind: EntityKind, result: &Value) -> Option<Vec<RemoteId>> {
    result
        .get(ids_field(kind))?
        .as_array()?
        .iter()
        .map(|id| match id {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
        .collect()
}
