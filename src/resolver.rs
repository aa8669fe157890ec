use std::sync::Arc;

use crate::cache::FlagCache;
use crate::catalog::Flag;
use crate::clock::Clock;
use crate::overrides::OverrideRegistry;
use crate::storage::Storage;

/// Which source decided a flag's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Overridden(bool),
    Remote(bool),
    Default(bool),
}

impl Resolution {
    pub fn value(self) -> bool {
        match self {
            Self::Overridden(value) | Self::Remote(value) | Self::Default(value) => value,
        }
    }
}

/// Resolves a flag from its override, then the remote cache, then its compile-time default.
///
/// Resolution only reads local state and never triggers a fetch.
pub struct FlagResolver<S: Storage, C: Clock> {
    overrides: Arc<OverrideRegistry<S>>,
    cache: Arc<FlagCache<S, C>>,
}

impl<S: Storage, C: Clock> FlagResolver<S, C> {
    pub fn new(overrides: Arc<OverrideRegistry<S>>, cache: Arc<FlagCache<S, C>>) -> Self {
        Self { overrides, cache }
    }

    pub fn resolve(&self, flag: &Flag) -> bool {
        self.resolution(flag).value()
    }

    pub fn resolution(&self, flag: &Flag) -> Resolution {
        if let Some(value) = self.overrides.overridden_value(flag) {
            return Resolution::Overridden(value);
        }

        if let Some(value) = flag.remote_key.and_then(|key| self.cache.value(key)) {
            return Resolution::Remote(value);
        }

        tracing::debug!(
            flag = flag.key,
            "Unable to resolve remote feature flag, returning the compile-time default"
        );
        Resolution::Default(flag.default_value)
    }

    /// Whether the cache holds a value for the flag's remote key.
    pub fn has_remote_value(&self, flag: &Flag) -> bool {
        flag.remote_key
            .is_some_and(|key| self.cache.has_value(key))
    }
}
