use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::auth::AccessStore;
use crate::process::GitBackend;
use crate::settings::GatewaySettings;

/// Abstraction over the state required by Git HTTP handlers.
pub trait GitHttpState: Clone + Send + Sync + 'static {
    type Store: AccessStore;
    type Backend: GitBackend;

    fn store(&self) -> &Self::Store;
    fn backend(&self) -> &Self::Backend;
    fn settings(&self) -> &GatewaySettings;
    fn git_semaphore(&self) -> &Arc<Semaphore>;
}

/// Ready-made [`GitHttpState`] holding shared handles.
pub struct GatewayState<St, B> {
    store: Arc<St>,
    backend: Arc<B>,
    settings: Arc<GatewaySettings>,
    git_semaphore: Arc<Semaphore>,
}

impl<St, B> GatewayState<St, B> {
    pub fn new(store: St, backend: B, settings: GatewaySettings) -> Self {
        let git_semaphore = Arc::new(Semaphore::new(settings.max_concurrent_git.max(1)));
        Self {
            store: Arc::new(store),
            backend: Arc::new(backend),
            settings: Arc::new(settings),
            git_semaphore,
        }
    }
}

impl<St, B> Clone for GatewayState<St, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            settings: Arc::clone(&self.settings),
            git_semaphore: Arc::clone(&self.git_semaphore),
        }
    }
}

impl<St: AccessStore, B: GitBackend> GitHttpState for GatewayState<St, B> {
    type Store = St;
    type Backend = B;

    fn store(&self) -> &St {
        &self.store
    }

    fn backend(&self) -> &B {
        &self.backend
    }

    fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    fn git_semaphore(&self) -> &Arc<Semaphore> {
        &self.git_semaphore
    }
}
