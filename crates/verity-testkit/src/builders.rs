//! Definition and context builders

use serde_json::Value;
use verity_core::{ParameterSet, TestBody, TestContext, TestDefinition, TestItem};

/// Module path given to every definition built here
pub const TEST_MODULE: &str = "verity_tests";

/// Passing definition named `name`
pub fn definition(name: &str) -> TestDefinition {
    TestDefinition::new(name, TestBody::sync(|_| Ok(()))).with_module(TEST_MODULE)
}

/// Replace the body of `def`
pub fn with_body(mut def: TestDefinition, body: TestBody) -> TestDefinition {
    def.body = body;
    def
}

/// One parameter set per value of the single parameter `name`
pub fn param_sets<I>(name: &str, values: I) -> Vec<ParameterSet>
where
    I: IntoIterator<Item = Value>,
{
    values
        .into_iter()
        .map(|value| ParameterSet::new([(name.to_string(), value)]))
        .collect()
}

/// Test context for a bare item named `name`
pub fn test_context(name: &str, case_id: &str) -> TestContext {
    TestContext::new(
        TestItem {
            name: name.to_string(),
            module_path: TEST_MODULE.to_string(),
            ..Default::default()
        },
        case_id,
    )
}
