use std::fmt;
use std::marker::PhantomData;

use flightdeck_saga::{WorkingMap, WorkingMapError, output_key};
use serde::de::DeserializeOwned;

/// Identity of a [`crate::Flow`], carried by every token it hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(pub(crate) u64);

/// The step a token or argument points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRef {
    pub(crate) flow: FlowId,
    pub(crate) index: usize,
}

/// Placeholder for the output of a step that has not run yet.
///
/// A `Future<T>` can only be passed as an argument to a later step or chosen
/// as the flow's result. At run time it is resolved by reading the producing
/// step's output key from the Working Map as a `T`.
pub struct Future<T> {
    flow: FlowId,
    index: usize,
    _output: PhantomData<fn() -> T>,
}

impl<T> Future<T> {
    pub(crate) fn new(flow: FlowId, index: usize) -> Self {
        Self {
            flow,
            index,
            _output: PhantomData,
        }
    }

    /// Position of the producing step in its flow.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Working Map key the producing step stores its output under.
    #[must_use]
    pub fn key(&self) -> String {
        output_key(self.index)
    }

    pub(crate) fn token_ref(&self) -> TokenRef {
        TokenRef {
            flow: self.flow,
            index: self.index,
        }
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Future<T> {}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("index", &self.index)
            .field("output", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// One argument of a step: fixed when the flow is built, or the output of an
/// earlier step.
#[derive(Debug, Clone)]
pub enum Arg<T> {
    Value(T),
    Output(Future<T>),
}

/// A fixed argument.
pub fn value<T>(value: T) -> Arg<T> {
    Arg::Value(value)
}

impl<T> From<Future<T>> for Arg<T> {
    fn from(future: Future<T>) -> Self {
        Self::Output(future)
    }
}

/// Something that yields one argument value at run time.
pub trait ArgSource: Send + Sync + 'static {
    type Value: Send + 'static;

    /// Produce the argument, reading the Working Map if it refers to an output.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkingMapError`] if the referenced output is absent or has
    /// the wrong type.
    fn resolve(&self, map: &WorkingMap) -> Result<Self::Value, WorkingMapError>;

    #[doc(hidden)]
    fn token(&self) -> Option<TokenRef>;
}

impl<T> ArgSource for Arg<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn resolve(&self, map: &WorkingMap) -> Result<T, WorkingMapError> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Output(future) => ArgSource::resolve(future, map),
        }
    }

    fn token(&self) -> Option<TokenRef> {
        match self {
            Self::Value(_) => None,
            Self::Output(future) => Some(future.token_ref()),
        }
    }
}

impl<T> ArgSource for Future<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn resolve(&self, map: &WorkingMap) -> Result<T, WorkingMapError> {
        map.get_required(&self.key())
    }

    fn token(&self) -> Option<TokenRef> {
        Some(self.token_ref())
    }
}

/// The complete argument list of one step.
///
/// Implemented for `()`, for a single [`Arg`] or [`Future`], and for tuples of
/// up to five [`ArgSource`]s. `Resolved` is the tuple the operation receives.
pub trait StepArgs: Send + Sync + 'static {
    type Resolved: Send + 'static;

    /// # Errors
    ///
    /// Returns a [`WorkingMapError`] if any referenced output cannot be read.
    fn resolve(&self, map: &WorkingMap) -> Result<Self::Resolved, WorkingMapError>;

    #[doc(hidden)]
    fn tokens(&self) -> Vec<TokenRef>;
}

impl StepArgs for () {
    type Resolved = ();

    fn resolve(&self, _map: &WorkingMap) -> Result<(), WorkingMapError> {
        Ok(())
    }

    fn tokens(&self) -> Vec<TokenRef> {
        Vec::new()
    }
}

impl<T> StepArgs for Arg<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    type Resolved = (T,);

    fn resolve(&self, map: &WorkingMap) -> Result<(T,), WorkingMapError> {
        ArgSource::resolve(self, map).map(|value| (value,))
    }

    fn tokens(&self) -> Vec<TokenRef> {
        ArgSource::token(self).into_iter().collect()
    }
}

impl<T> StepArgs for Future<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Resolved = (T,);

    fn resolve(&self, map: &WorkingMap) -> Result<(T,), WorkingMapError> {
        ArgSource::resolve(self, map).map(|value| (value,))
    }

    fn tokens(&self) -> Vec<TokenRef> {
        vec![self.token_ref()]
    }
}

macro_rules! impl_step_args {
    ($($source:ident),+) => {
        impl<$($source: ArgSource),+> StepArgs for ($($source,)+) {
            type Resolved = ($($source::Value,)+);

            #[allow(non_snake_case)]
            fn resolve(&self, map: &WorkingMap) -> Result<Self::Resolved, WorkingMapError> {
                let ($($source,)+) = self;
                Ok(($(ArgSource::resolve($source, map)?,)+))
            }

            #[allow(non_snake_case)]
            fn tokens(&self) -> Vec<TokenRef> {
                let ($($source,)+) = self;
                [$(ArgSource::token($source)),+].into_iter().flatten().collect()
            }
        }
    };
}

impl_step_args!(A1);
impl_step_args!(A1, A2);
impl_step_args!(A1, A2, A3);
impl_step_args!(A1, A2, A3, A4);
impl_step_args!(A1, A2, A3, A4, A5);
