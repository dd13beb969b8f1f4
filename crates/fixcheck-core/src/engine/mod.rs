pub mod live;
pub mod runner;
pub mod scenario;

pub use live::LiveBackend;
pub use runner::{RunPolicy, Runner};
pub use scenario::{run_scenario, Scenario, ScenarioBackend, ScenarioPlan, ScenarioState};
