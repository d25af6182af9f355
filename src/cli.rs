pub mod apply;
pub mod context;
pub mod down;
pub mod services;
pub mod up;

pub use apply::ApplyOptions;
pub use context::{CliContext, WaitArgs};
pub use down::DownOptions;
pub use up::UpOptions;
