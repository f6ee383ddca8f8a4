use crate::bus::Bus;
use std::any::{Any, type_name};
use std::fmt;
use std::rc::Rc;

/// Keeps the modules of an agent alive for as long as the set lives.
///
/// A module usually wires itself to the bus when constructed, and its
/// handlers hold clones of whatever state they need. The set only owns the
/// module values so they are dropped together, in installation order.
pub struct ModuleSet {
    bus: Bus,
    modules: Vec<(&'static str, Rc<dyn Any>)>,
}

impl ModuleSet {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            modules: Vec::new(),
        }
    }

    /// Builds a module from the shared bus and keeps it.
    pub fn install<M, F>(&mut self, build: F) -> Rc<M>
    where
        M: 'static,
        F: FnOnce(&Bus) -> M,
    {
        let module = Rc::new(build(&self.bus));
        tracing::debug!(module = type_name::<M>(), "installed module");

        self.modules
            .push((type_name::<M>(), Rc::clone(&module) as Rc<dyn Any>));
        module
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Names of the installed modules, in installation order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().map(|(name, _)| *name)
    }
}

impl fmt::Debug for ModuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSet")
            .field("modules", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
