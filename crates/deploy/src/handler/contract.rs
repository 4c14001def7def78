//! Request contract of the deployed handler.
//!
//! [`dispatch`] mirrors the bundled handler route for route, against any
//! [`ItemStore`]. The smoke check compares a live stage with it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Path of the item collection.
pub const COLLECTION_PATH: &str = "/items";

/// Proxy integration request, as the gateway hands it to the function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    pub http_method: String,
    pub path: String,
    #[serde(default)]
    pub path_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

impl ProxyEvent {
    pub fn new(http_method: &str, path: &str) -> Self {
        Self {
            http_method: http_method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Attach the `{id}` path parameter.
    pub fn with_id(mut self, id: &str) -> Self {
        self.path_parameters = Some(BTreeMap::from([("id".to_string(), id.to_string())]));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn item_id(&self) -> Option<&str> {
        self.path_parameters
            .as_ref()
            .and_then(|params| params.get("id"))
            .map(String::as_str)
    }
}

/// Proxy integration response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status_code: u16,
    pub body: String,
}

impl ProxyResponse {
    fn json(status_code: u16, payload: &Value) -> Self {
        Self {
            status_code,
            body: payload.to_string(),
        }
    }

    fn empty(status_code: u16) -> Self {
        Self {
            status_code,
            body: String::new(),
        }
    }

    fn bad_request() -> Self {
        Self::json(400, &json!({ "error": "Invalid request" }))
    }

    /// Body parsed as JSON, `None` when empty or malformed.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Route a request resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    List,
    Get(String),
    Put,
    Delete(String),
    Invalid,
}

impl Route {
    pub fn of(event: &ProxyEvent) -> Self {
        let path = event.path.trim_end_matches('/');
        if !path.starts_with(COLLECTION_PATH) {
            return Route::Invalid;
        }
        let on_collection = path == COLLECTION_PATH;

        match (event.http_method.as_str(), event.item_id()) {
            ("GET", None) if on_collection => Route::List,
            ("GET", Some(id)) => Route::Get(id.to_string()),
            ("POST", None) if on_collection => Route::Put,
            ("DELETE", Some(id)) => Route::Delete(id.to_string()),
            _ => Route::Invalid,
        }
    }
}

/// Records keyed by their string `id`.
pub trait ItemStore {
    fn scan(&self) -> Vec<Map<String, Value>>;
    fn get(&self, id: &str) -> Option<Map<String, Value>>;
    fn put(&mut self, item: Map<String, Value>);
    fn delete(&mut self, id: &str);
}

/// Store backed by an ordered map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    items: BTreeMap<String, Map<String, Value>>,
}

impl ItemStore for MemoryStore {
    fn scan(&self) -> Vec<Map<String, Value>> {
        self.items.values().cloned().collect()
    }

    fn get(&self, id: &str) -> Option<Map<String, Value>> {
        self.items.get(id).cloned()
    }

    fn put(&mut self, item: Map<String, Value>) {
        if let Some(Value::String(id)) = item.get("id") {
            self.items.insert(id.clone(), item);
        }
    }

    fn delete(&mut self, id: &str) {
        self.items.remove(id);
    }
}

/// Handle one request against `store`.
pub fn dispatch<S: ItemStore>(store: &mut S, event: &ProxyEvent) -> ProxyResponse {
    match Route::of(event) {
        Route::List => {
            let items: Vec<Value> = store.scan().into_iter().map(Value::Object).collect();
            ProxyResponse::json(200, &Value::Array(items))
        }
        Route::Get(id) => match store.get(&id) {
            Some(item) => ProxyResponse::json(200, &Value::Object(item)),
            None => ProxyResponse::json(404, &json!({ "error": "Not found" })),
        },
        Route::Put => {
            let parsed = event
                .body
                .as_deref()
                .and_then(|body| serde_json::from_str::<Value>(body).ok());
            match parsed {
                Some(Value::Object(item)) if matches!(item.get("id"), Some(Value::String(_))) => {
                    let echoed = Value::Object(item.clone());
                    store.put(item);
                    ProxyResponse::json(201, &echoed)
                }
                _ => ProxyResponse::bad_request(),
            }
        }
        Route::Delete(id) => {
            store.delete(&id);
            ProxyResponse::empty(204)
        }
        Route::Invalid => ProxyResponse::bad_request(),
    }
}
