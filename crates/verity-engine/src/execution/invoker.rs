//! Body invocation

use async_trait::async_trait;

use verity_core::{Args, BodyResult, TestBody, TestDefinition};

/// Calls a test body with its bound arguments
///
/// The invoker runs inside the test's ambient context; panics escaping it are
/// caught by the caller.
#[async_trait]
pub trait TestInvoker: Send + Sync {
    /// Invoke the body of `definition`
    async fn invoke(&self, definition: &TestDefinition, args: Args) -> BodyResult;
}

/// Calls synchronous bodies inline and awaits asynchronous ones
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInvoker;

#[async_trait]
impl TestInvoker for DefaultInvoker {
    async fn invoke(&self, definition: &TestDefinition, args: Args) -> BodyResult {
        match &definition.body {
            TestBody::Sync(body) => body(args),
            TestBody::Async(body) => body(args).await,
        }
    }
}
