pub mod archive;
pub mod automaton;
pub mod config;
pub mod content;
pub mod input;
pub mod macros;
pub mod proto;
pub mod session;
pub mod telemetry;
pub mod term;
pub mod transport;
