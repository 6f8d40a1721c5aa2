pub mod app;
pub mod common;
pub mod shutdown;

pub use app::Application;
pub use common::{init_logging, load_config, StartupConfig};
pub use shutdown::{wait_for_shutdown_signal, ShutdownManager};
