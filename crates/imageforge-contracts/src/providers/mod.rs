use indexmap::IndexMap;

pub trait NamedProvider {
    fn name(&self) -> &str;
}

/// Entries keyed by their own name. Registering a name twice keeps the
/// later entry in the first entry's slot.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    entries: IndexMap<String, T>,
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(entries: impl IntoIterator<Item = T>) -> Self {
        let mut map = IndexMap::new();
        for entry in entries {
            map.insert(entry.name().to_string(), entry);
        }
        Self { entries: map }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::{NamedProvider, ProviderRegistry};

    #[derive(Clone, Debug, PartialEq)]
    struct Route {
        name: &'static str,
        endpoint: &'static str,
    }

    impl NamedProvider for Route {
        fn name(&self) -> &str {
            self.name
        }
    }

    fn route(name: &'static str, endpoint: &'static str) -> Route {
        Route { name, endpoint }
    }

    #[test]
    fn lookup_is_by_exact_name() {
        let registry = ProviderRegistry::new(vec![
            route("stability-sd3-turbo", "/sd3"),
            route("dall-e", "/images"),
        ]);
        assert_eq!(registry.get("dall-e").map(|r| r.endpoint), Some("/images"));
        assert!(registry.contains("stability-sd3-turbo"));
        assert!(!registry.contains("DALL-E"));
        assert!(registry.get("sdxl").is_none());
    }

    #[test]
    fn names_keep_registration_order() {
        let registry = ProviderRegistry::new(vec![
            route("stability-sd3-turbo", "/sd3"),
            route("dall-e", "/images"),
            route("playground-v2", "/fireworks"),
        ]);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["stability-sd3-turbo", "dall-e", "playground-v2"]
        );
    }

    #[test]
    fn later_registration_replaces_in_place() {
        let registry = ProviderRegistry::new(vec![
            route("dall-e", "/old"),
            route("playground-v2", "/fireworks"),
            route("dall-e", "/new"),
        ]);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["dall-e", "playground-v2"]
        );
        assert_eq!(registry.get("dall-e").map(|r| r.endpoint), Some("/new"));
    }
}
