//! Per-tenant model alias resolution table.
//!
//! One [`ModelCache`] holds the full `{provider -> {alias -> native_id}}` map
//! for a single tenant (§4.5 of the design). The owning layer (the core's
//! tenant-scoped state) is responsible for keying a `ModelCache` per tenant
//! and for the reader/writer lock around whole-table swaps described in the
//! concurrency model; this type itself is a plain, single-threaded map.

use std::collections::HashMap;

use crate::entry::ModelCatalogEntry;

/// `{provider -> {alias -> native_id}}` for one tenant.
#[derive(Clone, Debug, Default)]
pub struct ModelCache {
    providers: HashMap<String, HashMap<String, String>>,
    /// `{provider -> {native_id -> entry}}`, kept alongside the alias table
    /// so callers that need pricing or capability data don't have to carry
    /// the catalog listing separately.
    entries: HashMap<String, HashMap<String, ModelCatalogEntry>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole alias table for `provider` from a fresh catalog
    /// listing (tenant-db read or an adapter's `ListModels` call). This is a
    /// whole-table swap, not a merge, so stale aliases from removed models
    /// don't linger.
    pub fn populate_provider(&mut self, provider: &str, entries: &[ModelCatalogEntry]) {
        let mut table = HashMap::new();
        let mut by_native_id = HashMap::new();
        for entry in entries {
            insert_aliases(&mut table, entry);
            by_native_id.insert(entry.native_id.clone(), entry.clone());
        }
        self.providers.insert(provider.to_string(), table);
        self.entries.insert(provider.to_string(), by_native_id);
    }

    /// The full catalog row for `native_id` under `provider`, if the catalog
    /// knows it. Used for pricing lookups ahead of the provider call.
    pub fn entry(&self, provider: &str, native_id: &str) -> Option<&ModelCatalogEntry> {
        self.entries.get(provider)?.get(native_id)
    }

    /// Resolves a user-supplied model id (bare or `vendor/name`) to the
    /// native id the provider wire protocol expects. Falls back to treating
    /// `alias` itself as the native id when the cache has no entry — the
    /// model cache is advisory, never a hard gate.
    pub fn resolve<'a>(&'a self, provider: &str, alias: &'a str) -> &'a str {
        self.providers
            .get(provider)
            .and_then(|table| table.get(alias))
            .map(String::as_str)
            .unwrap_or(alias)
    }

    /// Every provider whose alias table has a literal entry for `alias`
    /// (used to detect an ambiguous bare model name, §3 invariant: "ambiguous
    /// inputs are a caller error, not silent routing").
    pub fn providers_containing(&self, alias: &str) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|(_, table)| table.contains_key(alias))
            .map(|(provider, _)| provider.as_str())
            .collect()
    }

    /// Drops the alias table for one provider (credential rotation, catalog
    /// refresh failure, config change).
    pub fn invalidate_provider(&mut self, provider: &str) {
        self.providers.remove(provider);
        self.entries.remove(provider);
    }

    /// Drops every provider's alias table for this tenant.
    pub fn invalidate_all(&mut self) {
        self.providers.clear();
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.providers.values().all(|t| t.is_empty())
    }
}

fn insert_aliases(table: &mut HashMap<String, String>, entry: &ModelCatalogEntry) {
    table
        .entry(entry.user_id.clone())
        .or_insert_with(|| entry.native_id.clone());

    if let Some(short) = entry.short_user_id() {
        table
            .entry(short.to_string())
            .or_insert_with(|| entry.native_id.clone());
    }

    // Idempotence: resolving an already-native id must return itself.
    table
        .entry(entry.native_id.clone())
        .or_insert_with(|| entry.native_id.clone());

    if !entry.display_name.is_empty() && entry.display_name != entry.user_id {
        table
            .entry(entry.display_name.clone())
            .or_insert_with(|| entry.native_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ModelCapabilities, ModelPricing};

    fn entry(user_id: &str, native_id: &str, display_name: &str) -> ModelCatalogEntry {
        ModelCatalogEntry {
            user_id: user_id.into(),
            native_id: native_id.into(),
            display_name: display_name.into(),
            provider: "openai".into(),
            capabilities: ModelCapabilities::default(),
            context_limit: None,
            output_limit: None,
            pricing: ModelPricing::default(),
        }
    }

    #[test]
    fn resolves_user_id_short_alias_and_native_id() {
        let mut cache = ModelCache::new();
        cache.populate_provider(
            "openai",
            &[entry("openai/gpt-4o", "gpt-4o-2024-08-06", "GPT-4o")],
        );
        assert_eq!(cache.resolve("openai", "openai/gpt-4o"), "gpt-4o-2024-08-06");
        assert_eq!(cache.resolve("openai", "gpt-4o"), "gpt-4o-2024-08-06");
        assert_eq!(
            cache.resolve("openai", "gpt-4o-2024-08-06"),
            "gpt-4o-2024-08-06"
        );
        assert_eq!(cache.resolve("openai", "GPT-4o"), "gpt-4o-2024-08-06");
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut cache = ModelCache::new();
        cache.populate_provider("openai", &[entry("openai/gpt-4o", "gpt-4o-2024-08-06", "")]);
        let once = cache.resolve("openai", "openai/gpt-4o").to_string();
        let twice = cache.resolve("openai", &once).to_string();
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_alias_falls_back_to_itself() {
        let cache = ModelCache::new();
        assert_eq!(cache.resolve("openai", "unknown-model"), "unknown-model");
    }

    #[test]
    fn providers_containing_finds_every_provider_with_the_alias() {
        let mut cache = ModelCache::new();
        let mut openai_entry = entry("gpt-4o", "gpt-4o-native", "");
        openai_entry.provider = "openai".into();
        cache.populate_provider("openai", &[openai_entry]);
        let mut other_entry = entry("gpt-4o", "other-gpt-4o-native", "");
        other_entry.provider = "my-openai-compat".into();
        cache.populate_provider("my-openai-compat", &[other_entry]);

        let mut providers = cache.providers_containing("gpt-4o");
        providers.sort();
        assert_eq!(providers, vec!["my-openai-compat", "openai"]);
    }

    #[test]
    fn invalidate_provider_drops_only_that_providers_table() {
        let mut cache = ModelCache::new();
        cache.populate_provider("openai", &[entry("openai/gpt-4o", "gpt-4o-native", "")]);
        cache.populate_provider("anthropic", &[entry("anthropic/claude", "claude-native", "")]);
        cache.invalidate_provider("openai");
        assert_eq!(cache.resolve("openai", "openai/gpt-4o"), "openai/gpt-4o");
        assert_eq!(cache.resolve("anthropic", "anthropic/claude"), "claude-native");
    }

    #[test]
    fn entry_looks_up_the_full_catalog_row_by_native_id() {
        let mut cache = ModelCache::new();
        let mut openai_entry = entry("openai/gpt-4o", "gpt-4o-native", "GPT-4o");
        openai_entry.pricing = ModelPricing {
            input_per_million: Some(5.0),
            output_per_million: Some(15.0),
        };
        cache.populate_provider("openai", &[openai_entry]);

        let found = cache.entry("openai", "gpt-4o-native").unwrap();
        assert_eq!(found.pricing.input_per_million, Some(5.0));
        assert!(cache.entry("openai", "no-such-model").is_none());
        assert!(cache.entry("anthropic", "gpt-4o-native").is_none());
    }

    #[test]
    fn populate_is_a_whole_table_swap() {
        let mut cache = ModelCache::new();
        cache.populate_provider("openai", &[entry("openai/gpt-4o", "gpt-4o-native", "")]);
        cache.populate_provider("openai", &[entry("openai/gpt-4-turbo", "gpt-4-turbo-native", "")]);
        assert_eq!(cache.resolve("openai", "openai/gpt-4o"), "openai/gpt-4o");
        assert_eq!(
            cache.resolve("openai", "openai/gpt-4-turbo"),
            "gpt-4-turbo-native"
        );
    }
}
