//! A UI that records everything, for tests

use crate::error::Result;
use crate::ui::UI;

/// A UI implementation for testing that captures output in vectors
pub struct TestUI {
    pub output: Vec<String>,
    pub errors: Vec<String>,
    pub bytes_output: Vec<Vec<u8>>,
}

impl TestUI {
    pub fn new() -> Self {
        TestUI {
            output: Vec::new(),
            errors: Vec::new(),
            bytes_output: Vec::new(),
        }
    }
}

impl Default for TestUI {
    fn default() -> Self {
        Self::new()
    }
}

impl UI for TestUI {
    fn output(&mut self, message: &str) -> Result<()> {
        self.output.push(message.to_string());
        Ok(())
    }

    fn error(&mut self, message: &str) -> Result<()> {
        self.errors.push(message.to_string());
        Ok(())
    }

    fn warning(&mut self, message: &str) -> Result<()> {
        self.errors.push(format!("Warning: {}", message));
        Ok(())
    }

    fn output_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes_output.push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_streams_separately() {
        let mut ui = TestUI::new();
        ui.output("Running 1 tests").unwrap();
        ui.error("Interrupted").unwrap();
        ui.warning("No such test x (from group g)").unwrap();
        ui.output_bytes(b"log").unwrap();
        assert_eq!(ui.output, vec!["Running 1 tests"]);
        assert_eq!(
            ui.errors,
            vec!["Interrupted", "Warning: No such test x (from group g)"]
        );
        assert_eq!(ui.bytes_output, vec![b"log".to_vec()]);
    }
}
