use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::auth::AuthGateway;
use crate::domain::identity::Identity;

/// Forwards identity-provider state to the rest of the application.
///
/// Pure forwarding: no caching, no retry. The provider delivers the
/// present state to every new observer and one value per transition
/// thereafter; if the provider connection is down it simply does not
/// emit until it resumes.
pub struct SessionTracker<A: AuthGateway> {
    gateway: Arc<A>,
}

impl<A: AuthGateway> Clone for SessionTracker<A> {
    fn clone(&self) -> Self {
        Self { gateway: self.gateway.clone() }
    }
}

impl<A: AuthGateway> SessionTracker<A> {
    pub fn new(gateway: Arc<A>) -> Self {
        Self { gateway }
    }

    pub fn observe(&self) -> watch::Receiver<Option<Identity>> {
        self.gateway.watch()
    }

    pub fn current(&self) -> Option<Identity> {
        self.gateway.watch().borrow().clone()
    }

    pub fn gateway(&self) -> &A {
        &self.gateway
    }
}
