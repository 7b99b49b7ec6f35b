//! In-memory gateway for engine tests

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::GatewayError;
use crate::gateway::{Operation, ProviderGateway, Scope};
use crate::models::{AccessToken, Site};

#[derive(Debug, Clone)]
enum Reply {
    Data(Value),
    Forbidden,
    Unavailable,
}

/// Scripted gateway: unscripted operations fail as unavailable
#[derive(Default)]
pub(crate) struct MockGateway {
    replies: HashMap<(Operation, Scope), Reply>,
    delays: HashMap<Operation, Duration>,
    calls: Mutex<Vec<(Operation, Scope)>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, operation: Operation, scope: Scope, data: Value) -> Self {
        self.replies.insert((operation, scope), Reply::Data(data));
        self
    }

    pub fn forbid(mut self, operation: Operation, scope: Scope) -> Self {
        self.replies.insert((operation, scope), Reply::Forbidden);
        self
    }

    pub fn fail(mut self, operation: Operation, scope: Scope) -> Self {
        self.replies.insert((operation, scope), Reply::Unavailable);
        self
    }

    pub fn delay(mut self, operation: Operation, delay: Duration) -> Self {
        self.delays.insert(operation, delay);
        self
    }

    pub fn calls(&self) -> Vec<(Operation, Scope)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose operation has the given name
    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op.name() == name)
            .count()
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    async fn execute(
        &self,
        _site: &Site,
        operation: &Operation,
        scope: Scope,
    ) -> Result<Value, GatewayError> {
        self.calls.lock().unwrap().push((operation.clone(), scope));
        if let Some(delay) = self.delays.get(operation) {
            tokio::time::sleep(*delay).await;
        }
        match self.replies.get(&(operation.clone(), scope)) {
            Some(Reply::Data(data)) => Ok(data.clone()),
            Some(Reply::Forbidden) => Err(GatewayError::Forbidden {
                operation: operation.name(),
                message: "You are not authorized to perform the requested action (HTTP 403)"
                    .to_string(),
            }),
            Some(Reply::Unavailable) | None => Err(GatewayError::Unavailable {
                operation: operation.name(),
                code: 1,
                message: format!("no scripted reply for {}", operation.name()),
            }),
        }
    }
}

pub(crate) fn test_site() -> Site {
    Site::new("TEST-SITE", "vo.test.eu", AccessToken::new("test-token"))
}
