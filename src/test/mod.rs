mod refresh;

use once_cell::sync::Lazy;
use tracing_subscriber::fmt;

use crate::{Catalog, Flag};

pub(crate) static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = fmt().with_test_writer().try_init();
});

pub(crate) fn init_tracing() {
    Lazy::force(&TRACING);
}

pub(crate) const X: Flag = Flag::new("x", "Flag X", false).with_remote_key("x_flag");
pub(crate) const LOCAL_ONLY: Flag = Flag::new("local_only", "No remote key", true);
pub(crate) const LOCKED: Flag = Flag::new("locked", "Not overridable", false)
    .with_remote_key("locked_flag")
    .not_overridable();

pub(crate) static FLAGS: &[Flag] = &[X, LOCAL_ONLY, LOCKED];

pub(crate) fn catalog() -> Catalog {
    Catalog::new(FLAGS).unwrap()
}
