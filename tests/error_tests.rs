//! Error path testing
//!
//! This module tests error handling in various failure scenarios to ensure
//! the application properly handles and reports errors.

use std::fs;
use tempfile::TempDir;
use testframework::commands::{Command, GroupsCommand, ListTestsCommand, LoadCommand, RunCommand};
use testframework::config::MANIFEST_FILE;
use testframework::error::{Error, Result};
use testframework::ui::UI;

// Test UI implementation
struct TestUI {
    pub output: Vec<String>,
    pub errors: Vec<String>,
}

impl TestUI {
    fn new() -> Self {
        TestUI {
            output: Vec::new(),
            errors: Vec::new(),
        }
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
}

fn suite(manifest: &str) -> (TempDir, String) {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(MANIFEST_FILE), manifest).unwrap();
    let path = temp.path().to_string_lossy().to_string();
    (temp, path)
}

#[test]
fn test_commands_without_manifest() {
    let temp = TempDir::new().unwrap();
    let path = Some(temp.path().to_string_lossy().to_string());
    let commands: Vec<Box<dyn Command>> = vec![
        Box::new(RunCommand::new(path.clone())),
        Box::new(ListTestsCommand::new(path.clone())),
        Box::new(GroupsCommand::new(path.clone())),
        Box::new(LoadCommand::new(path)),
    ];
    for cmd in commands {
        let mut ui = TestUI::new();
        let err = cmd.execute(&mut ui).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{}: {}", cmd.name(), err);
        assert!(err.to_string().contains(MANIFEST_FILE));
    }
}

#[test]
fn test_test_without_command() {
    let (_temp, path) = suite("[test:a]\ntimeout=5\n");
    let mut ui = TestUI::new();
    let err = ListTestsCommand::new(Some(path)).execute(&mut ui).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Configuration error: No command option in [test:a]"
    );
}

#[test]
fn test_invalid_timeout() {
    let (_temp, path) = suite("[test:a]\ncommand=true\ntimeout=soon\n");
    let mut ui = TestUI::new();
    let err = ListTestsCommand::new(Some(path)).execute(&mut ui).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("soon"));
}

#[test]
fn test_invalid_env_entry() {
    let (_temp, path) = suite("[test:a]\ncommand=true\nenv=NOEQUALS\n");
    let mut ui = TestUI::new();
    let err = ListTestsCommand::new(Some(path)).execute(&mut ui).unwrap_err();
    assert!(err.to_string().contains("expected KEY=VALUE"));
}

#[test]
fn test_test_nested_under_leaf() {
    let (_temp, path) = suite("[test:a]\ncommand=true\n[test:a.b]\ncommand=true\n");
    let mut ui = TestUI::new();
    let err = ListTestsCommand::new(Some(path)).execute(&mut ui).unwrap_err();
    assert!(matches!(err, Error::DuplicateTest(_)));
}

#[test]
fn test_missing_group_file() {
    let (_temp, path) = suite("[test:a]\ncommand=true\n[group:g]\nfile=missing.group\n");
    let mut ui = TestUI::new();
    let err = GroupsCommand::new(Some(path)).execute(&mut ui).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("missing.group"));
}

#[test]
fn test_recursive_group() {
    let (_temp, path) = suite(
        "[test:a]\ncommand=true\n[group:g1]\npatterns=a g2\n[group:g2]\npatterns=g1\n",
    );
    let mut cmd = ListTestsCommand::new(Some(path));
    cmd.filters = vec!["g1".to_string()];
    let mut ui = TestUI::new();
    let err = cmd.execute(&mut ui).unwrap_err();
    assert!(matches!(err, Error::Selection(_)));
}

#[test]
fn test_empty_selection_token() {
    let (_temp, path) = suite("[test:a]\ncommand=true\n");
    for token in ["", "!"] {
        let mut cmd = ListTestsCommand::new(Some(path.clone()));
        cmd.filters = vec![token.to_string()];
        let mut ui = TestUI::new();
        let err = cmd.execute(&mut ui).unwrap_err();
        assert!(matches!(err, Error::Selection(_)), "{:?}", token);
    }
}

#[test]
fn test_unknown_test_from_user_is_fatal() {
    let (_temp, path) = suite("[test:a]\ncommand=true\n");
    let mut cmd = RunCommand::new(Some(path));
    cmd.filters = vec!["a".to_string(), "b.c".to_string()];
    let mut ui = TestUI::new();
    let err = cmd.execute(&mut ui).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Selection error: No such test b.c (from user input)"
    );
}

#[test]
fn test_unknown_test_from_group_is_warning() {
    let (_temp, path) = suite("[test:a]\ncommand=true\n[group:g]\npatterns=a gone\n");
    let mut cmd = ListTestsCommand::new(Some(path));
    cmd.filters = vec!["g".to_string()];
    let mut ui = TestUI::new();
    assert_eq!(cmd.execute(&mut ui).unwrap(), 0);
    assert_eq!(ui.output, vec!["a"]);
    assert_eq!(
        ui.errors,
        vec!["Warning: No such test gone (from group g)"]
    );
}

#[test]
fn test_existing_output_dir() {
    let (temp, path) = suite("[test:a]\ncommand=true\n");
    let out = temp.path().join("taken");
    fs::create_dir(&out).unwrap();
    let mut cmd = RunCommand::new(Some(path));
    cmd.output_dir = Some(out.to_string_lossy().to_string());
    let mut ui = TestUI::new();
    let err = cmd.execute(&mut ui).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("Could not create output directory"));
}

#[test]
fn test_load_from_missing_dir() {
    let temp = TempDir::new().unwrap();
    let mut cmd = LoadCommand::new(Some(temp.path().to_string_lossy().to_string()));
    cmd.from = Some(temp.path().join("nope").to_string_lossy().to_string());
    let mut ui = TestUI::new();
    assert!(cmd.execute(&mut ui).is_err());
}

#[test]
fn test_load_without_previous_results() {
    let (_temp, path) = suite("[test:a]\ncommand=true\n");
    let mut ui = TestUI::new();
    let err = LoadCommand::new(Some(path)).execute(&mut ui).unwrap_err();
    assert!(err.to_string().contains("No previous results"));
}
