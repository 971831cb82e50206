//! The search operation trait and a closure adapter

use crate::race::CancellationScope;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A unit of work that can take part in a race
///
/// Implementations should watch `scope` if they can run for long: the race
/// only stops *starting* operations once a winner exists, it never interrupts
/// one that is already executing.
#[async_trait]
pub trait SearchOperation: Send + Sync {
    /// Input shared unchanged by every operation in a race
    type Query: Send + Sync + 'static;
    /// Success payload
    type Output: Send + 'static;
    /// Failure payload
    type Error: Send + 'static;

    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Run the operation
    async fn execute(
        &self,
        scope: &CancellationScope,
        query: &Self::Query,
    ) -> Result<Self::Output, Self::Error>;
}

/// Shared handle to an operation, so heterogeneous implementations can race
pub type BoxedOperation<Q, R, E> = Arc<dyn SearchOperation<Query = Q, Output = R, Error = E>>;

/// Operation backed by an async function of `(scope, query)`
pub struct FnOperation<F, Q> {
    name: String,
    func: F,
    _query: PhantomData<fn(Q)>,
}

/// Wrap an async function as a named [`SearchOperation`]
pub fn search_fn<F, Fut, Q, R, E>(name: impl Into<String>, func: F) -> FnOperation<F, Q>
where
    F: Fn(CancellationScope, Q) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    Q: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    FnOperation {
        name: name.into(),
        func,
        _query: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, Q, R, E> SearchOperation for FnOperation<F, Q>
where
    F: Fn(CancellationScope, Q) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    Q: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    type Query = Q;
    type Output = R;
    type Error = E;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, scope: &CancellationScope, query: &Q) -> Result<R, E> {
        (self.func)(scope.clone(), query.clone()).await
    }
}
