use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One program invocation: executable first, then its arguments
pub type Argv = Vec<String>;

/// A named, ordered sequence of programs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Unique lookup key (exact, case-sensitive)
    pub name: String,

    /// Free-form description shown in the web UI
    #[serde(default)]
    pub memo: String,

    /// Steps, run in order as independent child processes
    #[serde(rename = "programs")]
    pub steps: Vec<Argv>,

    /// Capture each step's stdout into the result
    #[serde(rename = "output", default)]
    pub capture_output: bool,
}

impl Command {
    pub fn new(name: impl Into<String>, steps: Vec<Argv>) -> Self {
        Command {
            name: name.into(),
            memo: String::new(),
            steps,
            capture_output: false,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn with_output(mut self, capture_output: bool) -> Self {
        self.capture_output = capture_output;
        self
    }

    /// Every step must name an executable
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::EmptyCommandName);
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.first().map_or(true, |program| program.is_empty()) {
                return Err(CoreError::EmptyStep {
                    name: self.name.clone(),
                    index,
                });
            }
        }
        Ok(())
    }
}

/// Read-only table of commands, built once at startup.
///
/// Entries keep configuration order. When a name appears more than once the
/// first entry wins; the later ones stay visible in [`CommandRegistry::commands`]
/// and are reported by [`CommandRegistry::duplicates`].
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    /// Build the registry, rejecting commands with empty steps
    pub fn new(commands: Vec<Command>) -> Result<Self> {
        let mut index = HashMap::with_capacity(commands.len());
        for (position, command) in commands.iter().enumerate() {
            command.validate()?;
            index.entry(command.name.clone()).or_insert(position);
        }
        Ok(CommandRegistry { commands, index })
    }

    pub fn find(&self, name: &str) -> Option<&Command> {
        self.index.get(name).map(|&position| &self.commands[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All commands in configuration order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Names that are shadowed by an earlier entry, in configuration order
    pub fn duplicates(&self) -> Vec<&str> {
        self.commands
            .iter()
            .enumerate()
            .filter(|(position, command)| self.index.get(&command.name) != Some(position))
            .map(|(_, command)| command.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Argv {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_find_exact_match() {
        let registry = CommandRegistry::new(vec![
            Command::new("deploy", vec![argv(&["make", "deploy"])]),
            Command::new("ping", vec![argv(&["echo", "hi"])]),
        ])
        .unwrap();

        assert_eq!(registry.find("ping").unwrap().steps, vec![argv(&["echo", "hi"])]);
        assert!(registry.find("Ping").is_none());
        assert!(registry.find("pin").is_none());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_first_match_wins() {
        let registry = CommandRegistry::new(vec![
            Command::new("deploy", vec![argv(&["echo", "first"])]),
            Command::new("other", vec![argv(&["true"])]),
            Command::new("deploy", vec![argv(&["echo", "second"])]),
        ])
        .unwrap();

        let found = registry.find("deploy").unwrap();
        assert_eq!(found.steps[0], argv(&["echo", "first"]));
        assert_eq!(registry.duplicates(), vec!["deploy"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_empty_step_rejected() {
        let result = CommandRegistry::new(vec![Command::new(
            "broken",
            vec![argv(&["true"]), vec![]],
        )]);

        match result {
            Err(CoreError::EmptyStep { name, index }) => {
                assert_eq!(name, "broken");
                assert_eq!(index, 1);
            }
            other => panic!("Expected EmptyStep error, got {:?}", other),
        }
    }

    #[test]
    fn test_listing_format() {
        let command = Command::new("ping", vec![argv(&["echo", "hi"])])
            .with_memo("say hi")
            .with_output(true);

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "ping",
                "memo": "say hi",
                "programs": [["echo", "hi"]],
                "output": true,
            })
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let command: Command =
            serde_json::from_str(r#"{"name": "up", "programs": [["uptime"]]}"#).unwrap();
        assert_eq!(command.memo, "");
        assert!(!command.capture_output);
    }
}
