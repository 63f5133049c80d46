//! Command implementations

mod dump;
mod flash;
mod realtime;
mod scan;
mod tune;

pub use dump::dump;
pub use flash::flash;
pub use realtime::realtime;
pub use scan::scan;
pub use tune::tune;
