pub mod config;
pub mod coordinator;
pub mod dataset;
pub mod db;
pub mod doctor;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod helpers_api;
pub mod model;
pub mod providers;
pub mod report;
pub mod reset;
pub mod testcase;
