use std::any::{Any, TypeId, type_name};
use std::marker::PhantomData;
use std::sync::Arc;

use flightdeck_saga::RetryPolicy;
use indexmap::IndexMap;

use crate::error::{Classifier, FlowError, OperationError, default_classifier};

/// A type-erased operation or undo, as stored in an [`OperationRegistry`].
pub(crate) type OperationFn<O, A, R> =
    Arc<dyn Fn(&O, A) -> Result<R, OperationError> + Send + Sync>;

/// A stateless object whose methods can be called as flight steps.
///
/// The set of callable operations, and how each one is compensated, is
/// declared once in [`OperationSet::register`]:
///
/// ```
/// use flightdeck_flow::{OperationError, OperationRegistry, OperationSet};
///
/// struct Buckets;
///
/// impl Buckets {
///     fn create(&self, name: String) -> Result<String, OperationError> {
///         Ok(format!("gs://{name}"))
///     }
///
///     fn delete(&self, _name: String) -> Result<(), OperationError> {
///         Ok(())
///     }
///
///     fn label(&self, _url: String, _label: String) -> Result<(), OperationError> {
///         Ok(())
///     }
/// }
///
/// impl OperationSet for Buckets {
///     fn register(registry: &mut OperationRegistry<Self>) {
///         registry.operation("create", Self::create).undo_with("delete");
///         registry.undo("delete", Self::delete);
///         registry.operation("label", Self::label).no_undo();
///     }
/// }
/// ```
pub trait OperationSet: Send + Sync + Sized + 'static {
    fn register(registry: &mut OperationRegistry<Self>);

    /// Name used in error messages.
    #[must_use]
    fn set_name() -> &'static str {
        type_name::<Self>()
    }
}

/// A function callable as an operation of `O` with the argument tuple `Args`.
///
/// Implemented for every `Fn(&O, A1, .., An) -> Result<R, OperationError>`
/// with up to five arguments, which includes methods such as `Self::create`.
pub trait Handler<O, Args>: Send + Sync + 'static {
    type Output;

    /// # Errors
    ///
    /// Returns whatever error the operation reports.
    fn invoke(&self, target: &O, args: Args) -> Result<Self::Output, OperationError>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<O, F, R, $($arg,)*> Handler<O, ($($arg,)*)> for F
        where
            F: Fn(&O, $($arg,)*) -> Result<R, OperationError> + Send + Sync + 'static,
        {
            type Output = R;

            #[allow(non_snake_case)]
            fn invoke(&self, target: &O, ($($arg,)*): ($($arg,)*)) -> Result<R, OperationError> {
                self(target, $($arg,)*)
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);

/// How an operation is undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Nothing declared yet; calling the operation is a construction error.
    Undeclared,
    /// The operation has no effect to undo.
    None,
    /// Undo with the named undo operation of the same set.
    With(String),
}

pub(crate) struct OperationEntry {
    pub(crate) function: Box<dyn Any + Send + Sync>,
    pub(crate) args: &'static str,
    pub(crate) output: &'static str,
    pub(crate) returns_unit: bool,
    pub(crate) compensation: Compensation,
    pub(crate) declared_twice: bool,
    pub(crate) retry: RetryPolicy,
    pub(crate) classifier: Classifier,
}

pub(crate) struct UndoEntry {
    pub(crate) function: Box<dyn Any + Send + Sync>,
    pub(crate) args: &'static str,
}

/// The operations and undos of one [`OperationSet`].
pub struct OperationRegistry<O> {
    operations: IndexMap<String, OperationEntry>,
    undos: IndexMap<String, UndoEntry>,
    errors: Vec<FlowError>,
    _target: PhantomData<fn(&O)>,
}

impl<O: OperationSet> OperationRegistry<O> {
    pub(crate) fn collect() -> Self {
        let mut registry = Self {
            operations: IndexMap::new(),
            undos: IndexMap::new(),
            errors: Vec::new(),
            _target: PhantomData,
        };
        O::register(&mut registry);
        registry
    }

    /// Register a forward operation. Its compensation must be declared on the
    /// returned [`OperationDecl`].
    pub fn operation<Args, H>(&mut self, name: &str, handler: H) -> OperationDecl<'_>
    where
        Args: Send + 'static,
        H: Handler<O, Args>,
        H::Output: 'static,
    {
        if self.operations.contains_key(name) {
            self.errors.push(FlowError::DuplicateOperation {
                operation_set: O::set_name(),
                operation: name.to_string(),
            });
        }
        let function: OperationFn<O, Args, H::Output> =
            Arc::new(move |target: &O, args: Args| handler.invoke(target, args));
        let entry = OperationEntry {
            function: Box::new(function),
            args: type_name::<Args>(),
            output: type_name::<H::Output>(),
            returns_unit: TypeId::of::<H::Output>() == TypeId::of::<()>(),
            compensation: Compensation::Undeclared,
            declared_twice: false,
            retry: RetryPolicy::None,
            classifier: default_classifier,
        };
        let (index, _) = self.operations.insert_full(name.to_string(), entry);
        OperationDecl {
            entry: &mut self.operations[index],
        }
    }

    /// Register an undo operation, referred to by [`OperationDecl::undo_with`].
    pub fn undo<Args, H>(&mut self, name: &str, handler: H)
    where
        Args: Send + 'static,
        H: Handler<O, Args, Output = ()>,
    {
        if self.undos.contains_key(name) {
            self.errors.push(FlowError::DuplicateUndo {
                operation_set: O::set_name(),
                undo: name.to_string(),
            });
        }
        let function: OperationFn<O, Args, ()> =
            Arc::new(move |target: &O, args: Args| handler.invoke(target, args));
        self.undos.insert(
            name.to_string(),
            UndoEntry {
                function: Box::new(function),
                args: type_name::<Args>(),
            },
        );
    }

    /// Names of the registered operations, in registration order.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub(crate) fn first_error(&self) -> Option<&FlowError> {
        self.errors.first()
    }

    pub(crate) fn operation_entry(&self, name: &str) -> Option<&OperationEntry> {
        self.operations.get(name)
    }

    pub(crate) fn undo_entry(&self, name: &str) -> Option<&UndoEntry> {
        self.undos.get(name)
    }
}

/// Declaration of one operation, returned by [`OperationRegistry::operation`].
pub struct OperationDecl<'r> {
    entry: &'r mut OperationEntry,
}

impl OperationDecl<'_> {
    fn declare(&mut self, compensation: Compensation) -> &mut Self {
        if self.entry.compensation != Compensation::Undeclared {
            self.entry.declared_twice = true;
        }
        self.entry.compensation = compensation;
        self
    }

    /// Undo the operation with the named undo of the same set. The undo must
    /// take exactly the same arguments.
    pub fn undo_with(&mut self, undo: &str) -> &mut Self {
        self.declare(Compensation::With(undo.to_string()))
    }

    /// Declare that the operation leaves nothing to undo.
    pub fn no_undo(&mut self) -> &mut Self {
        self.declare(Compensation::None)
    }

    pub fn retry(&mut self, policy: RetryPolicy) -> &mut Self {
        self.entry.retry = policy;
        self
    }

    /// Replace [`default_classifier`] for this operation's failures.
    pub fn classify(&mut self, classifier: Classifier) -> &mut Self {
        self.entry.classifier = classifier;
        self
    }
}
