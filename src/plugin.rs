//! Hooks that let per-field options change how a field is synchronized.
//!
//! A [`PVPlugin`] is registered under a name. When a request gives an option
//! with that name to a selected field, e.g. `value[deadband=abs:0.5]`, the
//! plugin is asked to create a [`PVFilter`] for that field. The filter then
//! runs before the default copy every time the field is synchronized.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{bitset::BitSet, introspect::Structure, pvdata::PVStructure};

/// The two value trees involved in one synchronization, and its direction
pub enum FilterTarget<'a> {
    ToCopy {
        master: &'a PVStructure,
        copy: &'a mut PVStructure,
    },
    ToMaster {
        copy: &'a PVStructure,
        master: &'a mut PVStructure,
    },
}

impl FilterTarget<'_> {
    /// Borrow again for a shorter lifetime, to hand to more than one filter
    pub fn reborrow(&mut self) -> FilterTarget<'_> {
        match self {
            FilterTarget::ToCopy { master, copy } => FilterTarget::ToCopy {
                master: *master,
                copy: &mut **copy,
            },
            FilterTarget::ToMaster { copy, master } => FilterTarget::ToMaster {
                copy: *copy,
                master: &mut **master,
            },
        }
    }

    pub fn is_to_copy(&self) -> bool {
        matches!(self, FilterTarget::ToCopy { .. })
    }
}

/// Applied to one selected field on every synchronization of it.
///
/// The filter knows which master field it was created for. `copy_offset` is
/// the offset of the field in the copy, which is also the bit to set or clear
/// in `bits`. Returning `true` means the filter has fully handled the field
/// and the default copy is skipped.
pub trait PVFilter: Send + Sync {
    fn filter(&self, target: FilterTarget<'_>, copy_offset: usize, bits: &mut BitSet) -> bool;
    fn name(&self) -> &str;
}

/// Creates filters for fields that request it by option name
pub trait PVPlugin: Send + Sync {
    /// `request_value` is the option value from the request. `master_offset`
    /// locates the field within `master`. Returns `None` if the plugin does
    /// not apply to this field or the value is not understood.
    fn create(
        &self,
        request_value: &str,
        copy: &Structure,
        master: &Structure,
        master_offset: usize,
    ) -> Option<Arc<dyn PVFilter>>;
}

/// Plugins by name. Passed explicitly to the copy builder.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn PVPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Register a plugin, returning any plugin previously registered under the name
    pub fn register(
        &mut self,
        name: &str,
        plugin: Arc<dyn PVPlugin>,
    ) -> Option<Arc<dyn PVPlugin>> {
        self.plugins.insert(name.to_string(), plugin)
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn PVPlugin>> {
        self.plugins.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("PluginRegistry")
            .field("plugins", &names)
            .finish()
    }
}
