use crate::error::{FrameworkError, FrameworkResult};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

type Shared = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> FrameworkResult<Shared> + Send + Sync>;

/// Type-keyed service registry shared by every request.
///
/// Bindings are made while the application is being assembled; requests
/// only read from it. A binding can be a ready instance, a lazily built
/// singleton, or a factory that builds a fresh value on each resolve.
#[derive(Default, Clone)]
pub struct Container {
    bindings: Arc<HashMap<TypeId, Binding>>,
}

#[derive(Clone)]
enum Binding {
    Instance(Shared),
    Factory(Factory),
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&mut self, id: TypeId, binding: Binding) {
        Arc::make_mut(&mut self.bindings).insert(id, binding);
    }

    pub fn instance<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.instance_arc(Arc::new(value))
    }

    pub fn instance_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) -> &mut Self {
        self.bind(TypeId::of::<T>(), Binding::Instance(value));
        self
    }

    /// Registers a factory invoked on every resolve.
    pub fn factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> FrameworkResult<T> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |container| {
            let value: Shared = Arc::new(factory(container)?);
            Ok(value)
        });
        self.bind(TypeId::of::<T>(), Binding::Factory(factory));
        self
    }

    /// Registers a factory whose first successful result is reused.
    pub fn singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> FrameworkResult<T> + Send + Sync + 'static,
    {
        let cell: Arc<OnceLock<Shared>> = Arc::new(OnceLock::new());
        let factory: Factory = Arc::new(move |container| {
            if let Some(value) = cell.get() {
                return Ok(value.clone());
            }
            let value: Shared = Arc::new(factory(container)?);
            Ok(cell.get_or_init(|| value).clone())
        });
        self.bind(TypeId::of::<T>(), Binding::Factory(factory));
        self
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.bindings.contains_key(&TypeId::of::<T>())
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> FrameworkResult<Arc<T>> {
        let unresolvable = || FrameworkError::Unresolvable {
            type_name: type_name::<T>(),
        };

        let shared = match self.bindings.get(&TypeId::of::<T>()) {
            Some(Binding::Instance(value)) => value.clone(),
            Some(Binding::Factory(factory)) => factory(self)?,
            None => return Err(unresolvable()),
        };
        shared.downcast::<T>().map_err(|_| unresolvable())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}
