//! Shared setup for tests that drive [`RestUserStore`] against a local
//! [`BackendServer`].

use ledger_backend::server::{
    BackendServer,
    BackendStore,
};
use miniapp_ledger::{
    BackendConfig,
    InMemoryUserStore,
    RestUserStore,
    Session,
};

pub struct TestContext<S = InMemoryUserStore> {
    backing: S,
    server: BackendServer,
    client: RestUserStore,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_store(InMemoryUserStore::new())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BackendStore + Clone> TestContext<S> {
    pub fn with_store(backing: S) -> Self {
        let server =
            BackendServer::start(backing.clone(), None).expect("backend server starts");
        let client =
            RestUserStore::new(&server.backend_config()).expect("client accepts server url");
        tracing::debug!(base_url = server.base_url(), "test backend ready");
        Self {
            backing,
            server,
            client,
        }
    }

    /// The store behind the server, for asserting on what actually persisted.
    pub fn backing(&self) -> &S {
        &self.backing
    }

    pub fn client(&self) -> RestUserStore {
        self.client.clone()
    }

    pub fn config(&self) -> BackendConfig {
        self.server.backend_config()
    }

    pub fn session(&self) -> Session<RestUserStore> {
        Session::new(self.client())
    }

    /// Stop the server and serve the same backing store on a fresh port.
    pub fn restart(self) -> Self {
        let Self {
            backing,
            server,
            client,
        } = self;
        drop(client);
        drop(server);
        Self::with_store(backing)
    }
}

/// Client config pointing at a port nothing listens on.
pub fn unreachable_backend() -> BackendConfig {
    let server = BackendServer::start(InMemoryUserStore::new(), None)
        .expect("backend server starts");
    let config = server.backend_config();
    drop(server);
    config
}
