//! Command system for testframework
//!
//! Every subcommand of the `testf` binary is a [`Command`].

use crate::error::Result;
use crate::ui::UI;

pub mod groups;
pub mod load;
pub mod run;
mod utils;

pub use groups::GroupsCommand;
pub use list_tests::ListTestsCommand;
pub use load::LoadCommand;
pub use run::RunCommand;

/// Trait that all commands must implement
pub trait Command {
    /// Execute the command, returning the process exit code
    fn execute(&self, ui: &mut dyn UI) -> Result<i32>;

    /// Get the command name
    fn name(&self) -> &str;

    /// Get command help text
    fn help(&self) -> &str;
}
