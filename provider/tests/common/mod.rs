//! In-process mock of the Zabbix JSON-RPC API.
//!
//! Runs an axum server on its own tokio runtime in a background thread so
//! the blocking client can be driven from the test thread.

#![allow(dead_code)]

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

pub const TOKEN: &str = "0424bd59b807674191e7d77572075f33";
pub const USER: &str = "Admin";
pub const PASSWORD: &str = "zabbix";
pub const API_VERSION: &str = "6.0.25";

/// One stored object.
#[derive(Debug, Clone)]
pub struct Stored {
    pub object: String,
    pub parent: String,
    pub data: Map<String, Value>,
}

impl Stored {
    pub fn id(&self) -> &str {
        self.data
            .get(id_field(&self.object))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn is_templated(&self) -> bool {
        self.data
            .get("templateid")
            .and_then(Value::as_str)
            .map_or(false, |id| id != "0")
    }

    pub fn field(&self, name: &str) -> &str {
        self.data.get(name).and_then(Value::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct MockZabbix {
    /// Method of every request received, in order
    pub calls: Vec<String>,
    /// Full request bodies, in order
    pub requests: Vec<Value>,
    pub objects: Vec<Stored>,
    /// (templateid, host) pairs answered by template.get
    pub templates: Vec<(String, String)>,
    /// Methods that answer with an application error
    pub failing: Vec<String>,
    /// Answer with an id other than the request's
    pub mismatched_ids: bool,
    next_id: u64,
}

pub type Shared = Arc<Mutex<MockZabbix>>;

fn id_field(object: &str) -> &'static str {
    if object.starts_with("item") {
        "itemid"
    } else {
        "triggerid"
    }
}

fn ids_field(object: &str) -> &'static str {
    if object.starts_with("item") {
        "itemids"
    } else {
        "triggerids"
    }
}

fn error(code: i64, message: &str, data: &str) -> Result<Value, Value> {
    Err(json!({"code": code, "message": message, "data": data}))
}

fn first_id(params: &Value, field: &str) -> Option<String> {
    params.get(field)?.as_array()?.first()?.as_str().map(str::to_string)
}

impl MockZabbix {
    pub fn new() -> Self {
        Self {
            next_id: 50000,
            templates: vec![("10001".to_string(), "Template OS Linux".to_string())],
            ..Self::default()
        }
    }

    pub fn failing(mut self, method: &str) -> Self {
        self.failing.push(method.to_string());
        self
    }

    /// Store an object as if the server held it already.
    pub fn seed(&mut self, object: &str, parent: &str, data: Value) -> String {
        let mut data = data.as_object().cloned().unwrap_or_default();
        let id = self.next_id.to_string();
        self.next_id += 1;
        data.insert(id_field(object).to_string(), json!(id));
        data.entry("templateid").or_insert(json!("0"));
        self.objects.push(Stored {
            object: object.to_string(),
            parent: parent.to_string(),
            data,
        });
        id
    }

    pub fn stored(&self, object: &str, parent: &str) -> Vec<Stored> {
        self.objects
            .iter()
            .filter(|o| o.object == object && o.parent == parent)
            .cloned()
            .collect()
    }

    /// Number of create/update/delete calls received.
    pub fn mutations(&self) -> usize {
        self.calls
            .iter()
            .filter(|m| m.ends_with(".create") || m.ends_with(".update") || m.ends_with(".delete"))
            .count()
    }

    fn handle(&mut self, request: &Value) -> Result<Value, Value> {
        let method = request["method"].as_str().unwrap_or_default().to_string();
        let params = &request["params"];
        let auth = request.get("auth").and_then(Value::as_str);

        match method.as_str() {
            "apiinfo.version" => {
                if auth.is_some() {
                    return error(
                        -32602,
                        "Invalid params.",
                        "The \"apiinfo.version\" method must be called \
                         without the \"auth\" parameter.",
                    );
                }
                return Ok(json!(API_VERSION));
            }
            "user.login" => {
                if params["username"] == USER && params["password"] == PASSWORD {
                    return Ok(json!(TOKEN));
                }
                return error(
                    -32500,
                    "Application error.",
                    "Incorrect user name or password or account is temporarily blocked.",
                );
            }
            _ => {}
        }

        if auth != Some(TOKEN) {
            return error(-32602, "Invalid params.", "Not authorised.");
        }
        if self.failing.contains(&method) {
            return error(-32500, "Application error.", "Injected failure.");
        }

        let (object, verb) = method.split_once('.').unwrap_or_default();
        match (object, verb) {
            ("template", "get") => {
                let host = &params["filter"]["host"][0];
                Ok(Value::Array(
                    self.templates
                        .iter()
                        .filter(|(_, h)| h == host)
                        .map(|(id, _)| json!({"templateid": id}))
                        .collect(),
                ))
            }
            (_, "get") => Ok(self.get(object, params)),
            (_, "create") => self.create(object, params),
            (_, "update") => self.update(object, params),
            (_, "delete") => self.delete(object, params),
            _ => error(-32601, "Method not found.", "Incorrect API \"method\"."),
        }
    }

    fn get(&self, object: &str, params: &Value) -> Value {
        let parent = first_id(params, "templateids").or_else(|| first_id(params, "discoveryids"));
        let inherited = params.get("inherited").and_then(Value::as_bool);

        let rows = self
            .objects
            .iter()
            .filter(|o| o.object == object)
            .filter(|o| parent.as_ref().map_or(true, |p| &o.parent == p))
            .filter(|o| inherited.map_or(true, |i| o.is_templated() == i))
            .map(|o| match params["output"].as_array() {
                Some(fields) => {
                    let picked: Map<String, Value> = fields
                        .iter()
                        .filter_map(Value::as_str)
                        .filter_map(|f| o.data.get(f).map(|v| (f.to_string(), v.clone())))
                        .collect();
                    Value::Object(picked)
                }
                None => Value::Object(o.data.clone()),
            })
            .collect();
        Value::Array(rows)
    }

    /// Parent of a new object, the way the server derives it.
    fn parent_of(&self, object: &str, data: &Map<String, Value>) -> Option<String> {
        let text = |name: &str| data.get(name).and_then(Value::as_str).map(str::to_string);
        match object {
            "item" => text("hostid"),
            "itemprototype" => text("ruleid"),
            "trigger" => {
                let expression = text("expression")?;
                self.templates
                    .iter()
                    .find(|(_, host)| expression.contains(&format!("{{{}:", host)))
                    .map(|(id, _)| id.clone())
            }
            "triggerprototype" => {
                let expression = text("expression")?;
                self.objects
                    .iter()
                    .filter(|o| o.object == "itemprototype")
                    .find(|o| expression.contains(o.field("key_")))
                    .map(|o| o.parent.clone())
            }
            _ => None,
        }
    }

    fn create(&mut self, object: &str, params: &Value) -> Result<Value, Value> {
        let mut ids = Vec::new();
        for entry in params.as_array().cloned().unwrap_or_default() {
            let data = entry.as_object().cloned().unwrap_or_default();
            let parent = match self.parent_of(object, &data) {
                Some(parent) => parent,
                None => return error(-32602, "Invalid params.", "Cannot determine parent."),
            };
            ids.push(self.seed(object, &parent, Value::Object(data)));
        }
        Ok(json!({ ids_field(object): ids }))
    }

    fn update(&mut self, object: &str, params: &Value) -> Result<Value, Value> {
        let field = id_field(object);
        let mut ids = Vec::new();
        for entry in params.as_array().cloned().unwrap_or_default() {
            let id = entry[field].as_str().unwrap_or_default().to_string();
            let stored = match self
                .objects
                .iter_mut()
                .find(|o| o.object == object && o.id() == id)
            {
                Some(stored) => stored,
                None => {
                    return error(
                        -32500,
                        "Application error.",
                        "No permissions to referred object or it does not exist!",
                    )
                }
            };
            for (key, value) in entry.as_object().cloned().unwrap_or_default() {
                stored.data.insert(key, value);
            }
            ids.push(id);
        }
        Ok(json!({ ids_field(object): ids }))
    }

    fn delete(&mut self, object: &str, params: &Value) -> Result<Value, Value> {
        let ids: Vec<String> = params
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect();

        for id in &ids {
            match self.objects.iter().find(|o| o.object == object && o.id() == id) {
                None => {
                    return error(
                        -32500,
                        "Application error.",
                        "No permissions to referred object or it does not exist!",
                    )
                }
                Some(o) if o.is_templated() => {
                    return error(-32500, "Application error.", "Cannot delete templated item.")
                }
                Some(_) => {}
            }
        }
        let keys: Vec<String> = self
            .objects
            .iter()
            .filter(|o| o.object == object && ids.iter().any(|id| id == o.id()))
            .map(|o| o.field("key_").to_string())
            .filter(|key| !key.is_empty())
            .collect();
        self.objects
            .retain(|o| !(o.object == object && ids.iter().any(|id| id == o.id())));

        // Like the server, deleting an item takes its triggers with it
        let dependent = match object {
            "item" => "trigger",
            "itemprototype" => "triggerprototype",
            _ => return Ok(json!({ ids_field(object): ids })),
        };
        self.objects.retain(|o| {
            o.object != dependent || !keys.iter().any(|key| o.field("expression").contains(key))
        });
        Ok(json!({ ids_field(object): ids }))
    }
}

async fn rpc(State(state): State<Shared>, Json(request): Json<Value>) -> Json<Value> {
    let mut mock = state.lock().unwrap();
    mock.calls
        .push(request["method"].as_str().unwrap_or_default().to_string());
    mock.requests.push(request.clone());

    let id = if mock.mismatched_ids {
        json!(request["id"].as_u64().unwrap_or_default() + 1000)
    } else {
        request["id"].clone()
    };
    let reply = match mock.handle(&request) {
        Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
        Err(error) => json!({"jsonrpc": "2.0", "error": error, "id": id}),
    };
    Json(reply)
}

/// Start the mock and return its base URL.
pub fn spawn(mock: MockZabbix) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(mock));
    let app = Router::new()
        .route("/api_jsonrpc.php", post(rpc))
        .with_state(state.clone());

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    let addr = rx.recv().unwrap();
    (format!("http://{}", addr), state)
}
