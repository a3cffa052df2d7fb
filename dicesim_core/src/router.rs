//! In-process invocation transport routing to entity directories.

use crate::directory::EntityDirectory;
use async_trait::async_trait;
use dicesim_env::{EntityAddress, EnvError, InvocationTransport, SimEnvironment};
use std::collections::HashMap;
use std::sync::Arc;

/// Routes invocations to the directory hosting each entity type.
///
/// This is the in-process stand-in for the remote placement lookup: the
/// caller names an address and never learns which directory served it.
pub struct LocalRouter<E: SimEnvironment> {
    routes: HashMap<String, Arc<EntityDirectory<E>>>,
}

impl<E: SimEnvironment> LocalRouter<E> {
    /// Creates a router with no routes.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Routes every entity type served by `directory` to it.
    ///
    /// A later directory serving the same type replaces the earlier route.
    pub fn with_directory(mut self, directory: Arc<EntityDirectory<E>>) -> Self {
        for entity_type in directory.entity_types() {
            self.routes.insert(entity_type, Arc::clone(&directory));
        }
        self
    }

    /// Returns the directory serving `entity_type`, if any.
    pub fn directory_for(&self, entity_type: &str) -> Option<&Arc<EntityDirectory<E>>> {
        self.routes.get(entity_type)
    }
}

impl<E: SimEnvironment> Default for LocalRouter<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: SimEnvironment> InvocationTransport for LocalRouter<E> {
    async fn invoke(
        &self,
        address: &EntityAddress,
        operation: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, EnvError> {
        let directory = self
            .routes
            .get(&address.entity_type)
            .ok_or_else(|| EnvError::unroutable(address))?;

        directory.invoke(address, operation, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CoinFactory, DieFactory, COIN_ENTITY_TYPE, DIE_ENTITY_TYPE};
    use dicesim_env::TokioEnvironment;

    fn router() -> LocalRouter<TokioEnvironment> {
        let env = TokioEnvironment::shared(99);
        let dice = Arc::new(
            EntityDirectory::new("dice-host", env.clone()).with_factory(DieFactory::default()),
        );
        let coins = Arc::new(EntityDirectory::new("coin-host", env).with_factory(CoinFactory));
        LocalRouter::new().with_directory(dice).with_directory(coins)
    }

    #[tokio::test]
    async fn test_routes_by_entity_type() {
        let router = router();

        let die = EntityAddress::new(DIE_ENTITY_TYPE, "die0");
        let coin = EntityAddress::new(COIN_ENTITY_TYPE, "coin0");
        router.invoke(&die, "Step", Vec::new()).await.unwrap();
        router.invoke(&coin, "Step", Vec::new()).await.unwrap();

        let dice_dir = router.directory_for(DIE_ENTITY_TYPE).unwrap();
        assert_eq!(dice_dir.host(), "dice-host");
        assert!(dice_dir.is_active(&die));
        assert!(!dice_dir.is_active(&coin));
    }

    #[tokio::test]
    async fn test_unrouted_type() {
        let router = router();
        let addr = EntityAddress::new("wheelActorType", "wheel0");

        let err = router.invoke(&addr, "Step", Vec::new()).await.unwrap_err();
        assert_eq!(err, EnvError::AddressNotRoutable("wheelActorType/wheel0".into()));
    }
}
