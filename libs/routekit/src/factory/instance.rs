use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::contracts::{Handler, SharedHandler};

/// A type-erased component held by the factory.
///
/// The payload is always an `Arc<T>` (with `T` possibly unsized, e.g.
/// `dyn EventDispatcher`), so `get::<T>()` hands out cheap clones of the
/// same object.
#[derive(Clone)]
pub struct Instance {
    class: Arc<str>,
    slot: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    pub fn new<T>(value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            class: Arc::from(short_type_name::<T>()),
            slot: Arc::new(value),
        }
    }

    /// Wrap a handler so the dispatch loop can drive it through `&mut self`.
    pub fn handler<H: Handler + 'static>(handler: H) -> Self {
        let shared: SharedHandler = Arc::new(Mutex::new(handler));
        Self::new(shared)
    }

    pub(crate) fn with_class(mut self, class: &str) -> Self {
        self.class = Arc::from(class);
        self
    }

    /// Name of the component class that produced this instance.
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.slot.downcast_ref::<Arc<T>>().cloned()
    }

    pub fn is<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.slot.is::<Arc<T>>()
    }

    /// The handler behind this instance, if it was built with [`Instance::handler`].
    pub fn as_handler(&self) -> Option<SharedHandler> {
        self.get::<Mutex<dyn Handler>>()
    }

    /// Identity comparison: both values came from the same construction.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.slot), Arc::as_ptr(&other.slot))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixed;
    impl Named for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn downcast_returns_same_object() {
        let inst = Instance::new(Arc::new(Counter(7)));
        let a = inst.get::<Counter>().unwrap();
        let b = inst.clone().get::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.0, 7);
        assert!(inst.get::<String>().is_none());
        assert_eq!(inst.class(), "Counter");
    }

    #[test]
    fn trait_objects_are_stored_by_their_dyn_type() {
        let named: Arc<dyn Named> = Arc::new(Fixed);
        let inst = Instance::new(named);
        assert!(inst.is::<dyn Named>());
        assert!(!inst.is::<Fixed>());
        assert_eq!(inst.get::<dyn Named>().unwrap().name(), "fixed");
    }

    #[test]
    fn identity_follows_clones_only() {
        let value = Arc::new(Counter(1));
        let a = Instance::new(Arc::clone(&value));
        let b = Instance::new(value);
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }
}
