//! Blocking JSON-RPC client for the Zabbix API.

mod rpc;
pub mod wire;

pub use rpc::{Request, Response, RpcError};
pub use wire::Verb;

use crate::config::{Config, Credentials};
use crate::error::ClientError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use zabbix_sync_engine::{
    Entity, EntityKind, Parent, ParentId, Query, RemoteCollection, RemoteError, RemoteId,
};

const ENDPOINT: &str = "api_jsonrpc.php";

/// Client for one Zabbix server.
pub struct ZabbixClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
    request_id: AtomicU64,
}

impl std::fmt::Debug for ZabbixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZabbixClient")
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

/// `https://host/zabbix` and `https://host/zabbix/api_jsonrpc.php` both
/// address the same endpoint.
fn endpoint_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(ENDPOINT) {
        base.to_string()
    } else {
        format!("{}/{}", base, ENDPOINT)
    }
}

impl ZabbixClient {
    /// Create an unauthenticated client.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint_url(url),
            token: None,
            request_id: AtomicU64::new(1),
        })
    }

    /// Create a client and authenticate with the configured credentials.
    pub fn connect(config: &Config) -> Result<Self, ClientError> {
        let client = Self::new(&config.url, config.timeout)?;
        match &config.credentials {
            Credentials::Token(token) => Ok(client.with_token(token.clone())),
            Credentials::Login { user, password } => {
                let mut client = client;
                client.login(user, password)?;
                Ok(client)
            }
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Open a session with `user.login`.
    pub fn login(&mut self, user: &str, password: &str) -> Result<(), ClientError> {
        let method = "user.login";
        let result = self.send(method, json!({"username": user, "password": password}), None)?;
        let token = result
            .as_str()
            .ok_or_else(|| ClientError::UnexpectedResponse {
                method: method.to_string(),
                detail: format!("expected a session id, got {}", result),
            })?;

        info!(user, endpoint = %self.endpoint, "logged in");
        self.token = Some(token.to_string());
        Ok(())
    }

    /// Server API version; needs no session.
    pub fn api_version(&self) -> Result<String, ClientError> {
        let method = "apiinfo.version";
        let result = self.send(method, json!([]), None)?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::UnexpectedResponse {
                method: method.to_string(),
                detail: format!("expected a version string, got {}", result),
            })
    }

    /// Resolve a template's id from its technical host name.
    pub fn template_id(&self, host: &str) -> Result<ParentId, ClientError> {
        let result = self.call(
            "template.get",
            json!({"output": ["templateid"], "filter": {"host": [host]}}),
        )?;

        result
            .as_array()
            .and_then(|templates| templates.first())
            .and_then(|template| template.get("templateid"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::TemplateNotFound(host.to_string()))
    }

    /// Fetch the entities matching `query`.
    pub fn fetch(&self, query: &Query) -> Result<Vec<Entity>, ClientError> {
        let method = wire::method(query.kind, Verb::Get);
        let result = self.call(&method, wire::get_params(query))?;
        wire::decode_entities(query.kind, &query.parent, result)
            .map_err(|source| ClientError::Decode { method, source })
    }

    /// Create `entities` under `parent`, returning the assigned ids.
    pub fn create_entities(
        &self,
        kind: EntityKind,
        parent: &Parent,
        entities: &[Entity],
    ) -> Result<Vec<RemoteId>, ClientError> {
        let method = wire::method(kind, Verb::Create);
        let result = self.call(&method, wire::create_params(parent, entities))?;
        wire::decode_ids(kind, &result).ok_or_else(|| ClientError::UnexpectedResponse {
            method,
            detail: format!("missing {} in {}", wire::ids_field(kind), result),
        })
    }

    pub fn update_entities(
        &self,
        kind: EntityKind,
        entities: &[Entity],
    ) -> Result<(), ClientError> {
        let method = wire::method(kind, Verb::Update);
        self.call(&method, wire::update_params(entities))?;
        Ok(())
    }

    pub fn delete_entities(&self, kind: EntityKind, ids: &[RemoteId]) -> Result<(), ClientError> {
        let method = wire::method(kind, Verb::Delete);
        self.call(&method, wire::delete_params(ids))?;
        Ok(())
    }

    /// Authenticated call.
    fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ClientError::NotLoggedIn(method.to_string()))?;
        self.send(method, params, Some(token))
    }

    fn send(&self, method: &str, params: Value, auth: Option<&str>) -> Result<Value, ClientError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "rpc call");

        let request = Request::new(method, params, id, auth);
        let body = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|err| {
                warn!(method, id, error = %err, "rpc transport failed");
                ClientError::Http(err)
            })?;

        let response: Response =
            serde_json::from_str(&body).map_err(|source| ClientError::Decode {
                method: method.to_string(),
                source,
            })?;

        if let Some(echoed) = &response.id {
            if echoed.as_u64() != Some(id) {
                return Err(ClientError::UnexpectedResponse {
                    method: method.to_string(),
                    detail: format!("response id {} does not match request id {}", echoed, id),
                });
            }
        }

        if let Some(error) = response.error {
            warn!(method, id, code = error.code, message = %error.message, "rpc call failed");
            return Err(ClientError::Rpc {
                method: method.to_string(),
                code: error.code,
                data: error.data_text(),
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| ClientError::UnexpectedResponse {
                method: method.to_string(),
                detail: "neither result nor error present".to_string(),
            })
    }
}

impl RemoteCollection for ZabbixClient {
    fn get(&self, query: &Query) -> Result<Vec<Entity>, RemoteError> {
        self.fetch(query).map_err(RemoteError::from)
    }

    fn create(
        &self,
        kind: EntityKind,
        parent: &Parent,
        entities: &[Entity],
    ) -> Result<Vec<RemoteId>, RemoteError> {
        self.create_entities(kind, parent, entities)
            .map_err(RemoteError::from)
    }

    fn update(&self, kind: EntityKind, entities: &[Entity]) -> Result<(), RemoteError> {
        self.update_entities(kind, entities)
            .map_err(RemoteError::from)
    }

    fn delete(&self, kind: EntityKind, ids: &[RemoteId]) -> Result<(), RemoteError> {
        self.delete_entities(kind, ids).map_err(RemoteError::from)
    }
}
