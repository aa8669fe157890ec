mod builder;
pub mod cache;
mod catalog;
pub mod clock;
mod flag_store;
mod identity;
pub mod overrides;
pub mod refresher;
pub mod resolver;
pub mod storage;
pub mod transport;
mod worker;

#[cfg(test)]
mod test;

pub use builder::{BuildError, Builder, ENDPOINT_ENV_VAR};
pub use cache::{DEFAULT_CACHE_TTL, FlagCache};
pub use catalog::{Catalog, CatalogError, Flag};
pub use flag_store::FlagStore;
pub use identity::{DeviceId, DeviceIdentity};
pub use refresher::{PendingRefresh, RefreshError};
pub use resolver::Resolution;
pub use worker::{DEFAULT_REFRESH_INTERVAL, Worker};

#[macro_export]
macro_rules! builder {
    ($catalog:expr) => {{
        $crate::Builder::new($catalog)
            .add_param("app_name", env!("CARGO_CRATE_NAME"))
            .add_param("app_version", env!("CARGO_PKG_VERSION"))
    }};
}
