//! 对局状态与同步

mod session;
mod sync;

pub use session::Session;
pub use sync::GameSync;
