//! [`Registry`]: the named collection of collectors, live only until the
//! scheduler takes ownership of its matching members.

use std::collections::BTreeMap;

use crate::{Collector, Error};

/// A registry of collectors, keyed by name.
///
/// Registration is permitted only until [`Registry::start`] is called, which
/// freezes the registry and hands matching collectors over to the caller
/// (ordinarily the scheduler). This mirrors invariant I4's requirement that a
/// collector never be referenced from two places at once: once taken, a
/// collector belongs exclusively to its scheduler task.
#[derive(Default)]
pub struct Registry {
    collectors: BTreeMap<String, Box<dyn Collector>>,
    frozen: bool,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collector. Fails with [`Error::RegistryFrozen`] once the
    /// registry has been started.
    pub fn register(&mut self, collector: Box<dyn Collector>) -> Result<(), Error> {
        if self.frozen {
            return Err(Error::RegistryFrozen);
        }
        let _ = self.collectors.insert(collector.name().to_string(), collector);
        Ok(())
    }

    /// Returns the names of every registered collector (enabled or not), in
    /// sorted order.
    pub fn list_names(&self) -> Vec<String> {
        self.collectors.keys().cloned().collect()
    }

    /// Returns the names of enabled collectors matching `filters`, in sorted
    /// order. An empty filter list matches every enabled collector;
    /// otherwise a collector matches if any filter term is a (case-sensitive)
    /// substring of its name.
    pub fn search(&self, filters: &[String]) -> Vec<String> {
        self.collectors
            .values()
            .filter(|collector| collector.enabled())
            .filter(|collector| matches(collector.name(), filters))
            .map(|collector| collector.name().to_string())
            .collect()
    }

    /// Freezes the registry and returns the enabled collectors matching
    /// `filters`, in name order, removing them from the registry. Further
    /// calls to [`Registry::register`] fail.
    pub fn start(&mut self, filters: &[String]) -> Vec<Box<dyn Collector>> {
        self.frozen = true;
        self.search(filters)
            .into_iter()
            .filter_map(|name| self.collectors.remove(&name))
            .collect()
    }

    /// Returns `true` if the registry has been started and no longer accepts
    /// registrations.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

fn matches(name: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|filter| name.contains(filter.as_str()))
}
