//! Process execution.

pub mod console;
pub mod descriptors;
pub mod replace;
pub mod resolver;

pub use console::{CONSOLE_PATH, reopen_console_on_ttys};
pub use descriptors::{adopt_control_channel, close_inherited};
pub use replace::exec_in_place;
pub use resolver::{Action, EntryPointResolver, Resolution, ResolveError};
