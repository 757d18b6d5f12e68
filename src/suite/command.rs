//! Native test programs
//!
//! A command test is a shell command line. Configuration values are
//! substituted into `$NAME` / `${NAME}` placeholders for the requirements the
//! test declares, and exported in the child's environment. A substituted value
//! is single-quoted when it contains anything the shell would interpret.

use crate::suite::Configuration;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("placeholder regex is valid")
    })
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "/._-=:,+@%".contains(c)
}

/// Quote a value so `sh` reads it back as a single word.
fn shell_quote(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_shell_safe) {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// A test that runs a command line through `sh -c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTest {
    command: String,
    timeout: Option<u64>,
    requirements: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandTest {
    pub fn new(command: impl Into<String>) -> Self {
        CommandTest {
            command: command.into(),
            timeout: None,
            requirements: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Override the runner's default timeout for this test.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements
            .extend(requirements.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns a copy with the values of this test's requirements injected.
    ///
    /// Placeholders for names that are not requirements of this test, or have
    /// no configured value, are left for the shell to expand.
    pub fn configure(&self, conf: &Configuration) -> CommandTest {
        let value_of = |name: &str| {
            if self.requirements.iter().any(|r| r == name) {
                conf.get(name)
            } else {
                None
            }
        };
        let command = placeholder_regex()
            .replace_all(&self.command, |caps: &Captures<'_>| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match value_of(name) {
                    Some(value) => shell_quote(value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned();

        let mut env = self.env.clone();
        for name in &self.requirements {
            if let Some(value) = conf.get(name) {
                env.insert(name.clone(), value.to_string());
            }
        }

        CommandTest {
            command,
            timeout: self.timeout,
            requirements: self.requirements.clone(),
            env,
        }
    }

    /// Build the process that runs this test.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command).envs(&self.env);
        cmd
    }
}

impl fmt::Display for CommandTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "command: {}", self.command)?;
        if let Some(timeout) = self.timeout {
            writeln!(f, "timeout: {}s", timeout)?;
        }
        if !self.requirements.is_empty() {
            writeln!(f, "requires: {}", self.requirements.join(" "))?;
        }
        for (key, value) in &self.env {
            writeln!(f, "env: {}={}", key, value)?;
        }
        Ok(())
    }
}
