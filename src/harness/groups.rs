//! Agent group setup around a stage.

use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;

/// Creates and removes agent groups on the daemon host.
pub trait GroupProvisioner: Send + Sync {
    fn add(&self, group: &str) -> Result<(), String>;
    fn remove(&self, group: &str) -> Result<(), String>;
}

/// Used when stages carry no groups or the host is managed elsewhere.
#[derive(Debug, Default, Clone)]
pub struct NoopProvisioner;

impl GroupProvisioner for NoopProvisioner {
    fn add(&self, _group: &str) -> Result<(), String> {
        Ok(())
    }

    fn remove(&self, _group: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Runs the daemon's group management tool: `<tool> -a -g <group> -q` to add,
/// `<tool> -r -g <group> -q` to remove.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandProvisioner {
    pub tool: PathBuf,
}

impl CommandProvisioner {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    fn run(&self, flag: &str, group: &str) -> Result<(), String> {
        let status = Command::new(&self.tool)
            .args([flag, "-g", group, "-q"])
            .status()
            .map_err(|err| format!("spawn {}: {err}", self.tool.display()))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!(
                "{} {flag} -g {group} exited with {status}",
                self.tool.display()
            ))
        }
    }
}

impl GroupProvisioner for CommandProvisioner {
    fn add(&self, group: &str) -> Result<(), String> {
        self.run("-a", group)
    }

    fn remove(&self, group: &str) -> Result<(), String> {
        self.run("-r", group)
    }
}

/// Groups created for one stage; removed again by [`teardown`](Self::teardown).
pub(crate) struct GroupScope<'a> {
    provisioner: &'a dyn GroupProvisioner,
    created: Vec<String>,
}

impl<'a> GroupScope<'a> {
    pub fn provision(
        provisioner: &'a dyn GroupProvisioner,
        groups: &[String],
    ) -> (Self, Result<(), String>) {
        let mut scope = Self {
            provisioner,
            created: Vec::with_capacity(groups.len()),
        };
        for group in groups {
            if let Err(err) = provisioner.add(group) {
                return (scope, Err(err));
            }
            tracing::debug!(group = %group, "group added");
            scope.created.push(group.clone());
        }
        (scope, Ok(()))
    }

    pub fn teardown(self) {
        for group in self.created.iter().rev() {
            match self.provisioner.remove(group) {
                Ok(()) => tracing::debug!(group = %group, "group removed"),
                Err(err) => tracing::warn!(group = %group, "failed to remove group: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl GroupProvisioner for Recording {
        fn add(&self, group: &str) -> Result<(), String> {
            if self.fail_on == Some(group) {
                return Err(format!("cannot add {group}"));
            }
            self.calls.lock().unwrap().push(format!("+{group}"));
            Ok(())
        }

        fn remove(&self, group: &str) -> Result<(), String> {
            self.calls.lock().unwrap().push(format!("-{group}"));
            Ok(())
        }
    }

    #[test]
    fn teardown_removes_in_reverse_order() {
        let recording = Recording::default();
        let groups = vec!["g1".to_string(), "g2".to_string()];
        let (scope, result) = GroupScope::provision(&recording, &groups);
        assert!(result.is_ok());
        scope.teardown();
        assert_eq!(
            *recording.calls.lock().unwrap(),
            vec!["+g1", "+g2", "-g2", "-g1"]
        );
    }

    #[test]
    fn partial_failure_only_removes_created_groups() {
        let recording = Recording {
            fail_on: Some("g2"),
            ..Recording::default()
        };
        let groups = vec!["g1".to_string(), "g2".to_string(), "g3".to_string()];
        let (scope, result) = GroupScope::provision(&recording, &groups);
        assert!(result.is_err());
        scope.teardown();
        assert_eq!(*recording.calls.lock().unwrap(), vec!["+g1", "-g1"]);
    }
}
