//! Comparison and inspection helpers that generated test cases call back
//! into while they run.

pub mod compare;
pub mod plan;
pub mod query;

use fixcheck_core::helpers_api::{Helper, HelperRegistry};
use std::sync::Arc;

pub fn default_helpers() -> Vec<Arc<dyn Helper>> {
    vec![
        Arc::new(query::PerformQuery),
        Arc::new(query::ExecuteQueries),
        Arc::new(query::ExBase),
        Arc::new(query::PerformanceCompareByQep),
        Arc::new(query::CheckSqlFunctionUsage),
        Arc::new(query::RemoveDistinct),
        Arc::new(query::PreprocessResults),
    ]
}

pub fn default_registry() -> HelperRegistry {
    HelperRegistry::new(default_helpers())
}
