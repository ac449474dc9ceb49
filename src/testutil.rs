//! Scripted [`Transport`] implementation for client, resolver and scan tests.

use crate::client::{Method, StoreResponse, Transport, TransportError};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status(u16, &'static str),
    Body(u16, String),
    Fail(&'static str),
}

/// Replays a fixed sequence of replies and records every request it sees.
/// Once the script is exhausted, further requests fail.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<(Method, String, Option<String>)>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn requests(&self) -> Vec<(Method, String, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests_matching(&self, method: Method, path_prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, path, _)| *m == method && path.starts_with(path_prefix))
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<StoreResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((method, path.to_string(), body.map(str::to_string)));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError("script exhausted".to_string()))?;

        match reply {
            Reply::Status(status, body) => Ok(StoreResponse {
                status,
                reason: String::new(),
                body: body.to_string(),
            }),
            Reply::Body(status, body) => Ok(StoreResponse {
                status,
                reason: String::new(),
                body,
            }),
            Reply::Fail(message) => Err(TransportError(message.to_string())),
        }
    }
}

/// A page of scroll results in the store's response shape.
pub(crate) fn page_body(cursor_id: Option<&str>, hits: &[serde_json::Value]) -> String {
    let mut root = serde_json::json!({ "hits": { "hits": hits } });
    if let Some(id) = cursor_id {
        root["_scroll_id"] = serde_json::Value::String(id.to_string());
    }
    root.to_string()
}
