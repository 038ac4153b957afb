//! Test doubles shared across module tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::remote::api::{parse_envelope, ApiError, RemoteApi};

struct Route {
    method: String,
    when: Option<(String, String)>,
    body: Value,
}

/// A [`RemoteApi`] that answers from a script and records every call.
///
/// Routes are matched in insertion order; a route with a `when` parameter
/// only matches calls carrying that exact parameter value.
#[derive(Default)]
pub struct ScriptedApi {
    routes: Vec<Route>,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, method: &str, body: Value) -> Self {
        self.routes.push(Route {
            method: method.to_string(),
            when: None,
            body,
        });
        self
    }

    pub fn reply_when(mut self, method: &str, when: (&str, &str), body: Value) -> Self {
        self.routes.push(Route {
            method: method.to_string(),
            when: Some((when.0.to_string(), when.1.to_string())),
            body,
        });
        self
    }

    pub fn fail(self, method: &str, code: i64, message: &str) -> Self {
        self.reply(
            method,
            json!({"stat": "fail", "code": code, "message": message}),
        )
    }

    pub fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|(m, _)| m == method).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls().len()
    }

    /// Value of `key` in the most recent call to `method`.
    pub fn param_of(&self, method: &str, key: &str) -> Option<String> {
        self.calls()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .and_then(|(_, params)| {
                params
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
            })
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn call(&self, method: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.to_vec()));

        let route = self.routes.iter().find(|r| {
            r.method == method
                && r.when
                    .as_ref()
                    .map(|(k, v)| params.iter().any(|(pk, pv)| pk == k && pv == v))
                    .unwrap_or(true)
        });
        match route {
            Some(route) => parse_envelope(method, route.body.clone()),
            None => Err(ApiError::Status {
                status: 404,
                method: method.to_string(),
            }),
        }
    }
}
