//! Task descriptor (`task.toml`)
//!
//! ```toml
//! id = "ticker"
//! name = "Ticker"
//! headless = true
//!
//! [entry]
//! kind = "command"
//! command = "python3 -u main.py"
//!
//! [parameters.interval]
//! type = "integer"
//! value = 1
//! ```

use crate::task::ParameterDefs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use taskhost_foundation::{Error, Result};

/// Descriptor file name inside a task directory
pub const MANIFEST_FILE: &str = "task.toml";

fn default_headless() -> bool {
    true
}

/// How the entry of a task is obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntrySpec {
    /// Entry type registered in the [`TaskCatalog`](super::TaskCatalog)
    Native {
        #[serde(rename = "type")]
        type_name: String,
    },

    /// External program; `command` is split shell-style
    Command {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        program: Option<String>,

        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,

        /// Forward input-proxy lines to the program's stdin
        #[serde(default)]
        interactive: bool,
    },
}

/// Parsed `task.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    /// Identity; the directory name when omitted
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default)]
    pub parameters: ParameterDefs,

    pub entry: EntrySpec,
}

impl TaskManifest {
    /// Parse a descriptor; `fallback_id` fills a missing `id` and `name`
    pub fn parse(content: &str, fallback_id: &str) -> Result<Self> {
        let mut manifest: TaskManifest =
            toml::from_str(content).map_err(|e| Error::load(fallback_id, e.to_string()))?;
        if manifest.id.trim().is_empty() {
            manifest.id = fallback_id.to_string();
        }
        if manifest.name.trim().is_empty() {
            manifest.name = manifest.id.clone();
        }
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read `<dir>/task.toml`
    pub async fn read(dir: &Path) -> Result<Self> {
        let fallback_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = dir.join(MANIFEST_FILE);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::load(&fallback_id, format!("{}: {}", path.display(), e)))?;
        Self::parse(&content, &fallback_id)
    }

    fn validate(&self) -> Result<()> {
        if self.id.contains(|c: char| c == '/' || c == '\\' || c.is_whitespace()) {
            return Err(Error::load(&self.id, "id must be a single path segment"));
        }
        match &self.entry {
            EntrySpec::Native { type_name } if type_name.trim().is_empty() => {
                Err(Error::load(&self.id, "native entry needs a type"))
            }
            EntrySpec::Command {
                command, program, ..
            } => match (command, program) {
                (Some(_), Some(_)) => Err(Error::load(
                    &self.id,
                    "command entry takes either `command` or `program`, not both",
                )),
                (None, None) => Err(Error::load(&self.id, "command entry needs a command")),
                _ => Ok(()),
            },
            EntrySpec::Native { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ParameterKind;

    #[test]
    fn test_parse_command_manifest() {
        let manifest = TaskManifest::parse(
            r#"
name = "Printer"

[entry]
kind = "command"
command = "sh -c 'echo hi'"
interactive = true

[parameters.count]
type = "integer"
value = 3
min = 1
max = 10
"#,
            "printer",
        )
        .unwrap();

        assert_eq!(manifest.id, "printer");
        assert_eq!(manifest.name, "Printer");
        assert!(manifest.headless);
        assert!(matches!(
            manifest.entry,
            EntrySpec::Command {
                interactive: true,
                ..
            }
        ));
        let count = &manifest.parameters["count"];
        assert_eq!(count.kind, ParameterKind::Integer);
        assert_eq!(count.value, 3);
        assert_eq!(count.max, Some(10.0));
    }

    #[test]
    fn test_parse_native_manifest() {
        let manifest = TaskManifest::parse(
            "id = \"clock\"\nheadless = false\n[entry]\nkind = \"native\"\ntype = \"ticker\"\n",
            "dir-name",
        )
        .unwrap();
        assert_eq!(manifest.id, "clock");
        assert_eq!(manifest.name, "clock");
        assert!(!manifest.headless);
        assert_eq!(
            manifest.entry,
            EntrySpec::Native {
                type_name: "ticker".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_manifests() {
        let missing_entry = TaskManifest::parse("name = \"x\"", "x");
        assert!(matches!(missing_entry, Err(Error::Load { .. })));

        let unknown_kind = TaskManifest::parse("[entry]\nkind = \"wasm\"", "x");
        assert!(matches!(unknown_kind, Err(Error::Load { .. })));

        let both = TaskManifest::parse(
            "[entry]\nkind = \"command\"\ncommand = \"a\"\nprogram = \"b\"",
            "x",
        );
        assert!(matches!(both, Err(Error::Load { .. })));

        let bad_id = TaskManifest::parse(
            "id = \"../escape\"\n[entry]\nkind = \"native\"\ntype = \"t\"",
            "x",
        );
        assert!(matches!(bad_id, Err(Error::Load { .. })));
    }
}
