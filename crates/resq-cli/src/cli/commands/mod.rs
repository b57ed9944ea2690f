//! CLI command handlers, one per file.

mod cancel;
mod circuits;
mod queue;
mod replay;
mod submit;
mod watch;

pub use cancel::run_cancel;
pub use circuits::run_circuits;
pub use queue::run_queue;
pub use replay::run_replay;
pub use submit::{run_submit, SubmitArgs};
#[cfg(test)]
pub use submit::parse_header;
pub use watch::run_watch;
