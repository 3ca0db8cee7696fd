pub mod classify;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod events;
pub mod kiln_config;
pub mod logging;
pub mod materialize;
pub mod model;
pub mod orchestrator;
pub mod patterns;
pub mod planner;
pub mod preview;
pub mod spec;
pub mod stream;
pub mod testing;
pub mod timer;
pub mod ui;
pub mod util;
pub mod verify;
