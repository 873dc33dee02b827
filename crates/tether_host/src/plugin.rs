//! Plugin loader
//!
//! A plugin is a named, versioned set of host functions. The loader keeps
//! plugins in registration order and defines all of them on a linker
//! before the guest is instantiated.

use crate::error::HostError;
use wasmi::Linker;

pub trait Plugin<S> {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Define this plugin's functions on `linker`.
    fn register(&self, linker: &mut Linker<S>) -> Result<(), HostError>;
}

pub struct PluginLoader<S> {
    plugins: Vec<Box<dyn Plugin<S>>>,
}

impl<S> PluginLoader<S> {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Register a plugin. Names must be unique.
    pub fn add_plugin(&mut self, plugin: impl Plugin<S> + 'static) -> Result<(), HostError> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(HostError::DuplicatePlugin {
                name: plugin.name().to_string(),
            });
        }
        tracing::debug!(name = plugin.name(), version = plugin.version(), "plugin added");
        self.plugins.push(Box::new(plugin));
        Ok(())
    }

    /// (name, version) of every registered plugin, in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = (&str, &str)> {
        self.plugins.iter().map(|p| (p.name(), p.version()))
    }

    pub fn link(&self, linker: &mut Linker<S>) -> Result<(), HostError> {
        for plugin in &self.plugins {
            plugin.register(linker)?;
            tracing::info!(name = plugin.name(), version = plugin.version(), "plugin linked");
        }
        Ok(())
    }
}

impl<S> Default for PluginLoader<S> {
    fn default() -> Self {
        Self::new()
    }
}
