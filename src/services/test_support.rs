//! Shared fixtures for service tests.

use std::ops::Deref;
use std::sync::Arc;

use crate::adapters::sqlite::create_migrated_test_pool;
use crate::application::Foreman;
use crate::domain::models::{Actor, Config};
use crate::domain::ports::NullEmbeddingProvider;

/// Every service over a fresh in-memory database.
pub(crate) struct TestServices {
    foreman: Foreman,
}

impl TestServices {
    pub(crate) async fn new() -> Self {
        let pool = create_migrated_test_pool().await.unwrap();
        let foreman = Foreman::assemble(pool, Config::default(), Arc::new(NullEmbeddingProvider::new()))
            .await
            .unwrap();
        Self { foreman }
    }

    pub(crate) async fn register(&self, id: &str, role: &str, capabilities: &[&str]) -> Actor {
        let actor = capabilities
            .iter()
            .fold(Actor::new(id, role), |actor, cap| actor.with_capability(*cap));
        self.foreman.actors.register(actor).await.unwrap()
    }
}

impl Deref for TestServices {
    type Target = Foreman;

    fn deref(&self) -> &Foreman {
        &self.foreman
    }
}
