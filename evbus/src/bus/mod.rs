//! Typed publish/subscribe dispatcher.
//!
//! Modules [`subscribe`](Bus::subscribe) to the event types they care about and
//! [`raise`](Bus::raise) events for others to react to. Raising an event yields
//! one task that runs every handler for that event type, in subscription order,
//! each to completion before the next one starts.
use crate::task::{Continuation, Task, sequence};
use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub mod log;
pub use log::{LogLevel, LogMessage, TracingLogger};

mod modules;
pub use modules::ModuleSet;

type Handler<E> = Rc<dyn Fn(&E) -> Task<()>>;

/// Shared handle to the subscription registry. Cloning is cheap and every clone
/// sees the same subscribers.
#[derive(Clone, Default)]
pub struct Bus {
    // Each value is a `Vec<Handler<E>>` for the `E` of its key.
    registry: Rc<RefCell<HashMap<TypeId, Box<dyn Any>>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E`. Handlers are invoked in the
    /// order they were subscribed. There is no unsubscribe.
    pub fn subscribe<E, F>(&self, handler: F)
    where
        E: 'static,
        F: Fn(&E) -> Task<()> + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        let handlers = registry
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<Handler<E>>::new()));

        if let Some(handlers) = handlers.downcast_mut::<Vec<Handler<E>>>() {
            handlers.push(Rc::new(handler));
        }
    }

    /// Returns a task that delivers `event` to every handler subscribed to `E`.
    ///
    /// Handlers are looked up when the task runs, not when it is created. The
    /// first failing handler stops delivery: the handlers after it are skipped
    /// and the failure propagates to whoever runs the returned task. With no
    /// subscribers the task resolves immediately.
    pub fn raise<E: 'static>(&self, event: E) -> Task<()> {
        let bus = self.clone();

        Task::new(move |pass, fail| {
            let handlers = bus.handlers::<E>();
            tracing::trace!(
                event = type_name::<E>(),
                handlers = handlers.len(),
                "raising event"
            );

            dispatch(event, handlers).run_with(Continuation::new(pass, fail));
        })
    }

    pub fn subscriber_count<E: 'static>(&self) -> usize {
        self.registry
            .borrow()
            .get(&TypeId::of::<E>())
            .and_then(|handlers| handlers.downcast_ref::<Vec<Handler<E>>>())
            .map_or(0, Vec::len)
    }

    fn handlers<E: 'static>(&self) -> Rc<[Handler<E>]> {
        self.registry
            .borrow()
            .get(&TypeId::of::<E>())
            .and_then(|handlers| handlers.downcast_ref::<Vec<Handler<E>>>())
            .map_or_else(|| Rc::from(Vec::new()), |handlers| Rc::from(handlers.as_slice()))
    }
}

// Each handler is only invoked once the one before it succeeded.
fn dispatch<E: 'static>(event: E, handlers: Rc<[Handler<E>]>) -> Task<()> {
    let mut index = 0;

    sequence(move || {
        let handler = handlers.get(index)?;
        index += 1;
        Some(handler(&event))
    })
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("event_types", &self.registry.borrow().len())
            .finish()
    }
}
