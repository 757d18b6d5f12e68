//! List the named groups of the suite

use crate::commands::utils::load_suite;
use crate::commands::Command;
use crate::error::Result;
use crate::ui::UI;

/// Command to list the groups declared in the suite manifest.
#[derive(Debug, Default)]
pub struct GroupsCommand {
    pub base_path: Option<String>,
    pub config_path: Option<String>,
    /// Also print each group's tokens.
    pub verbose: bool,
}

impl GroupsCommand {
    pub fn new(base_path: Option<String>) -> Self {
        GroupsCommand {
            base_path,
            ..Default::default()
        }
    }
}

impl Command for GroupsCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let suite = load_suite(self.base_path.as_deref(), self.config_path.as_deref())?;
        if suite.groups.is_empty() {
            ui.output("No groups defined")?;
            return Ok(0);
        }
        for (name, patterns) in &suite.groups {
            if self.verbose {
                ui.output(&format!("{}:", name))?;
                for pattern in patterns {
                    ui.output(&format!("  {}", pattern))?;
                }
            } else {
                ui.output(name)?;
            }
        }
        Ok(0)
    }

    fn name(&self) -> &str {
        "groups"
    }

    fn help(&self) -> &str {
        "List the named test groups"
    }
}
