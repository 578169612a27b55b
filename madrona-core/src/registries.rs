//! Process-wide handler registries.
//!
//! Resolver and validator factories keyed by `Content-Type` string,
//! assembled once at startup and handed to each controller by value.

use crate::resolver::{DumbResolver, ResolverFactory};
use crate::validator::{PermissionsValidatorFactory, ValidatorFactory};
use std::collections::HashMap;
use std::sync::Arc;

pub const RESOLVER_DUMB: &str = "resolver/dumb";
pub const VALIDATOR_PERMISSIONS: &str = "validator/permissions";

#[derive(Clone, Default)]
pub struct Registries {
    pub(crate) resolvers: HashMap<String, Arc<dyn ResolverFactory>>,
    pub(crate) validators: HashMap<String, Arc<dyn ValidatorFactory>>,
}

impl Registries {
    pub fn empty() -> Registries {
        Registries::default()
    }

    /// The built-in handlers: the dumb resolver and the permissions
    /// validator.
    pub fn standard() -> Registries {
        let mut registries = Registries::empty();
        registries.register_resolver(RESOLVER_DUMB, Arc::new(DumbResolver));
        registries.register_validator(VALIDATOR_PERMISSIONS, Arc::new(PermissionsValidatorFactory));
        registries
    }

    pub fn register_resolver(
        &mut self,
        content_type: impl Into<String>,
        factory: Arc<dyn ResolverFactory>,
    ) {
        self.resolvers.insert(content_type.into(), factory);
    }

    pub fn register_validator(
        &mut self,
        content_type: impl Into<String>,
        factory: Arc<dyn ValidatorFactory>,
    ) {
        self.validators.insert(content_type.into(), factory);
    }
}
