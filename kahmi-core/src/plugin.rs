use std::collections::BTreeMap;

use crate::environment::Environment;
use crate::ids::ProjectId;

/// A plugin entry point: given the environment and the project it was
/// applied to, registers extensions and task templates (`spec.md §4.4`,
/// "`apply(plugin_name)`"). Rust has no dynamic plugin loading the way the
/// source's importlib-based loader does, so a plugin here is a statically
/// registered function rather than something resolved from a dotted import
/// path at runtime; the dotted-name *resolution order* is preserved.
pub type PluginFn = fn(&mut Environment, ProjectId) -> Result<(), String>;

/// Resolves a plugin's dotted name the way the source's loader does: the
/// namespaced name first (`kahmi.build.lib.<name>`), falling back to the
/// bare name (`spec.md §6`, "Plugin interface").
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginFn>,
}

impl PluginRegistry {
    pub fn new() -> PluginRegistry {
        PluginRegistry::default()
    }

    pub fn register(&mut self, name: impl Into<String>, apply: PluginFn) {
        self.plugins.insert(name.into(), apply);
    }

    pub fn resolve(&self, name: &str) -> Option<PluginFn> {
        self.plugins
            .get(&format!("kahmi.build.lib.{name}"))
            .or_else(|| self.plugins.get(name))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_env: &mut Environment, _project: ProjectId) -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn resolve_prefers_the_namespaced_name() {
        let mut registry = PluginRegistry::new();
        registry.register("kahmi.build.lib.demo", noop);
        assert!(registry.resolve("demo").is_some());
    }

    #[test]
    fn resolve_falls_back_to_the_bare_name() {
        let mut registry = PluginRegistry::new();
        registry.register("demo", noop);
        assert!(registry.resolve("demo").is_some());
    }

    #[test]
    fn unregistered_name_does_not_resolve() {
        let registry = PluginRegistry::new();
        assert!(registry.resolve("missing").is_none());
    }
}
