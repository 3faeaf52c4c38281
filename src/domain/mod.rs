pub mod config;
pub mod drawdown;
pub mod records;
pub mod state;
pub mod status;

pub use config::*;
pub use records::*;
pub use state::*;
pub use status::*;
