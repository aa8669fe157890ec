use std::collections::HashSet;

/// A boolean feature toggle known at build time.
///
/// Flags are plain data so an application can declare its whole set as a
/// `static` table:
///
/// ```rust
/// use remote_feature_flags::{Catalog, Flag};
///
/// static FLAGS: &[Flag] = &[
///     Flag::new("reader_improvements", "Reader improvements", false)
///         .with_remote_key("reader_improvements"),
///     Flag::new("debug_menu", "Debug menu", true).not_overridable(),
/// ];
///
/// let catalog = Catalog::new(FLAGS).unwrap();
/// assert_eq!(catalog.len(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flag {
    /// Stable identity of the flag, also used to persist its override.
    pub key: &'static str,
    /// Human readable name shown in debug menus.
    pub description: &'static str,
    /// The key the server uses for this flag. Flags without one only ever use their default.
    pub remote_key: Option<&'static str>,
    pub default_value: bool,
    pub can_override: bool,
}

impl Flag {
    pub const fn new(key: &'static str, description: &'static str, default_value: bool) -> Self {
        Flag {
            key,
            description,
            remote_key: None,
            default_value,
            can_override: true,
        }
    }

    pub const fn with_remote_key(mut self, remote_key: &'static str) -> Self {
        self.remote_key = Some(remote_key);
        self
    }

    pub const fn not_overridable(mut self) -> Self {
        self.can_override = false;
        self
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.description)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("The flag key `{0}` is declared more than once")]
    DuplicateKey(&'static str),

    #[error("The remote key `{0}` is used by more than one flag")]
    DuplicateRemoteKey(&'static str),
}

/// The closed set of flags an application declares.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    flags: &'static [Flag],
}

impl Catalog {
    pub fn new(flags: &'static [Flag]) -> Result<Self, CatalogError> {
        let mut keys = HashSet::new();
        let mut remote_keys = HashSet::new();

        for flag in flags {
            if !keys.insert(flag.key) {
                return Err(CatalogError::DuplicateKey(flag.key));
            }

            if let Some(remote_key) = flag.remote_key {
                if !remote_keys.insert(remote_key) {
                    return Err(CatalogError::DuplicateRemoteKey(remote_key));
                }
            }
        }

        Ok(Self { flags })
    }

    pub fn get(&self, key: &str) -> Option<&'static Flag> {
        self.flags.iter().find(|flag| flag.key == key)
    }

    pub fn iter(&self) -> std::slice::Iter<'static, Flag> {
        self.flags.iter()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::{Catalog, CatalogError, Flag};

    static FLAGS: &[Flag] = &[
        Flag::new("a", "Flag A", false).with_remote_key("remote_a"),
        Flag::new("b", "Flag B", true).not_overridable(),
    ];

    #[test]
    fn looks_up_by_key() {
        let catalog = Catalog::new(FLAGS).unwrap();

        let a = catalog.get("a").unwrap();
        assert_eq!(a.remote_key, Some("remote_a"));
        assert!(a.can_override);

        let b = catalog.get("b").unwrap();
        assert_eq!(b.remote_key, None);
        assert!(!b.can_override);
        assert!(b.default_value);

        assert!(catalog.get("c").is_none());
        assert_eq!(catalog.iter().count(), 2);
    }

    #[test]
    fn rejects_duplicate_keys() {
        static DUPES: &[Flag] = &[Flag::new("a", "A", false), Flag::new("a", "A again", true)];

        assert_eq!(
            Catalog::new(DUPES).unwrap_err(),
            CatalogError::DuplicateKey("a")
        );
    }

    #[test]
    fn rejects_duplicate_remote_keys() {
        static DUPES: &[Flag] = &[
            Flag::new("a", "A", false).with_remote_key("shared"),
            Flag::new("b", "B", false).with_remote_key("shared"),
        ];

        assert_eq!(
            Catalog::new(DUPES).unwrap_err(),
            CatalogError::DuplicateRemoteKey("shared")
        );
    }
}
