pub mod cli;
pub mod error;
pub mod model;
pub mod output;
pub mod probe;
pub mod protocol;
pub mod report;
pub mod sampler;
pub mod session;
pub mod simulate;
pub mod slots;
pub mod state;
pub mod table;
pub mod watch;
