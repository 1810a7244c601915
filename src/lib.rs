pub mod bastion;
pub mod cli;
pub mod codec;
pub mod config;
pub mod forward;
pub mod net;
pub mod relay;
pub mod rsync;
pub mod shim;
pub mod tunnel;

pub use cli::Cli;
pub use config::RunConfig;
