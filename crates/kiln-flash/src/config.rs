//! Blob-handler configuration.
//!
//! At startup the daemon reads a JSON list describing each firmware blob:
//! where its staged bytes go and which external actions drive preparation,
//! verification, and installation. Invalid entries are logged and skipped;
//! a bad entry never fails startup.
//!
//! Parsing yields *descriptions*. Turning a description into a live
//! trigger is the embedder's job through [`TriggerFactory`], because the
//! service-manager plumbing the systemd-backed actions need lives outside
//! this daemon.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::actions::{ActionPack, ActionTrigger, SkipAction};

/// Default activation mode for unit-backed actions.
const DEFAULT_MODE: &str = "replace";

/// How one action of the pack is carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDesc {
    /// Start a service unit and watch its job result.
    Systemd { unit: String, mode: String },
    /// Start a service unit; the result is read from a status file.
    StatusFile {
        unit: String,
        path: PathBuf,
        mode: String,
    },
    /// No external action; reports success immediately.
    Skip,
}

/// A validated configuration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// The blob path, always under `/flash/`.
    pub blob_id: String,
    /// Staging file for the image bytes.
    pub writer_path: PathBuf,
    pub preparation: ActionDesc,
    pub verification: ActionDesc,
    pub update: ActionDesc,
}

/// Builds live triggers from action descriptions.
pub trait TriggerFactory {
    fn build(&self, blob_id: &str, desc: &ActionDesc) -> Box<dyn ActionTrigger>;
}

/// Factory for environments without a service manager (tests, bring-up):
/// every description becomes a skip action, with a warning for the ones
/// that asked for more.
#[derive(Debug, Default)]
pub struct SkipFactory;

impl TriggerFactory for SkipFactory {
    fn build(&self, blob_id: &str, desc: &ActionDesc) -> Box<dyn ActionTrigger> {
        if !matches!(desc, ActionDesc::Skip) {
            tracing::warn!(
                blob = blob_id,
                action = ?desc,
                "service activation unavailable; treating action as skip"
            );
        }
        SkipAction::boxed()
    }
}

/// Builds the action pack for one configuration entry.
pub fn build_actions(config: &HandlerConfig, factory: &dyn TriggerFactory) -> ActionPack {
    ActionPack {
        preparation: factory.build(&config.blob_id, &config.preparation),
        verification: factory.build(&config.blob_id, &config.verification),
        update: factory.build(&config.blob_id, &config.update),
    }
}

// ----------------------------------------------------------------------
// Raw JSON shapes
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEntry {
    blob: String,
    handler: RawHandler,
    actions: RawActions,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawHandler {
    #[serde(rename = "file")]
    File { path: PathBuf },
}

#[derive(Debug, Deserialize)]
struct RawActions {
    preparation: RawAction,
    verification: RawAction,
    update: RawAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawAction {
    #[serde(rename = "systemd")]
    Systemd { unit: String, mode: Option<String> },
    #[serde(rename = "fileSystemdVerify")]
    FileSystemdVerify {
        unit: String,
        path: PathBuf,
        mode: Option<String>,
    },
    #[serde(rename = "fileSystemdUpdate")]
    FileSystemdUpdate {
        unit: String,
        path: PathBuf,
        mode: Option<String>,
    },
    #[serde(rename = "reboot")]
    Reboot,
    #[serde(rename = "skip")]
    Skip,
}

impl RawAction {
    fn into_desc(self) -> ActionDesc {
        match self {
            Self::Systemd { unit, mode } => ActionDesc::Systemd {
                unit,
                mode: mode.unwrap_or_else(|| DEFAULT_MODE.to_string()),
            },
            Self::FileSystemdVerify { unit, path, mode }
            | Self::FileSystemdUpdate { unit, path, mode } => ActionDesc::StatusFile {
                unit,
                path,
                mode: mode.unwrap_or_else(|| DEFAULT_MODE.to_string()),
            },
            Self::Reboot => ActionDesc::Systemd {
                unit: "reboot.target".to_string(),
                mode: "replace-irreversibly".to_string(),
            },
            Self::Skip => ActionDesc::Skip,
        }
    }
}

fn validate(entry: RawEntry) -> Result<HandlerConfig, String> {
    if !entry.blob.starts_with("/flash/") || entry.blob.len() <= "/flash/".len() {
        return Err(format!(
            "invalid blob name '{}': must start with /flash/",
            entry.blob
        ));
    }
    let RawHandler::File { path } = entry.handler;
    Ok(HandlerConfig {
        blob_id: entry.blob,
        writer_path: path,
        preparation: entry.actions.preparation.into_desc(),
        verification: entry.actions.verification.into_desc(),
        update: entry.actions.update.into_desc(),
    })
}

/// Parses one JSON document holding a list of entries. Entries that fail
/// validation are logged and dropped.
pub fn parse_config(data: &str) -> Vec<HandlerConfig> {
    let entries: Vec<serde_json::Value> = match serde_json::from_str(data) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(error = %err, "blob configuration is not a JSON list");
            return Vec::new();
        }
    };

    let mut configs = Vec::new();
    for value in entries {
        let parsed: Result<RawEntry, _> = serde_json::from_value(value);
        match parsed.map_err(|err| err.to_string()).and_then(validate) {
            Ok(config) => configs.push(config),
            Err(err) => {
                tracing::warn!(error = %err, "skipping invalid blob configuration entry");
            }
        }
    }
    configs
}

/// Loads every `*.json` file in a directory, in name order.
pub fn load_dir(dir: &Path) -> Vec<HandlerConfig> {
    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "cannot read blob config dir");
            return Vec::new();
        }
    };
    paths.sort();

    let mut configs = Vec::new();
    for path in paths {
        match fs::read_to_string(&path) {
            Ok(data) => configs.extend(parse_config(&data)),
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "cannot read blob config");
            }
        }
    }
    configs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_entry_parses() {
        let json = r#"[{
            "blob": "/flash/image",
            "handler": {"type": "file", "path": "/tmp/staged.bin"},
            "actions": {
                "preparation": {"type": "systemd", "unit": "prepare.service"},
                "verification": {
                    "type": "fileSystemdVerify",
                    "unit": "verify.service",
                    "path": "/tmp/verify.status",
                    "mode": "replace-nope"
                },
                "update": {"type": "reboot"}
            }
        }]"#;

        let configs = parse_config(json);
        assert_eq!(configs.len(), 1);
        let config = &configs[0];
        assert_eq!(config.blob_id, "/flash/image");
        assert_eq!(config.writer_path, PathBuf::from("/tmp/staged.bin"));
        assert_eq!(
            config.preparation,
            ActionDesc::Systemd {
                unit: "prepare.service".to_string(),
                mode: "replace".to_string(),
            }
        );
        assert_eq!(
            config.verification,
            ActionDesc::StatusFile {
                unit: "verify.service".to_string(),
                path: PathBuf::from("/tmp/verify.status"),
                mode: "replace-nope".to_string(),
            }
        );
        assert_eq!(
            config.update,
            ActionDesc::Systemd {
                unit: "reboot.target".to_string(),
                mode: "replace-irreversibly".to_string(),
            }
        );
    }

    #[test]
    fn skip_actions_parse() {
        let json = r#"[{
            "blob": "/flash/bios",
            "handler": {"type": "file", "path": "/tmp/bios.bin"},
            "actions": {
                "preparation": {"type": "skip"},
                "verification": {"type": "skip"},
                "update": {"type": "skip"}
            }
        }]"#;
        let configs = parse_config(json);
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].preparation, ActionDesc::Skip);
    }

    #[test]
    fn invalid_entries_are_dropped_not_fatal() {
        let json = r#"[
            {"blob": "bad-name",
             "handler": {"type": "file", "path": "/tmp/a"},
             "actions": {"preparation": {"type": "skip"},
                          "verification": {"type": "skip"},
                          "update": {"type": "skip"}}},
            {"blob": "/flash/",
             "handler": {"type": "file", "path": "/tmp/b"},
             "actions": {"preparation": {"type": "skip"},
                          "verification": {"type": "skip"},
                          "update": {"type": "skip"}}},
            {"blob": "/flash/ok",
             "handler": {"type": "unknown", "path": "/tmp/c"},
             "actions": {"preparation": {"type": "skip"},
                          "verification": {"type": "skip"},
                          "update": {"type": "skip"}}},
            {"blob": "/flash/good",
             "handler": {"type": "file", "path": "/tmp/d"},
             "actions": {"preparation": {"type": "skip"},
                          "verification": {"type": "skip"},
                          "update": {"type": "skip"}}}
        ]"#;

        let configs = parse_config(json);
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].blob_id, "/flash/good");
    }

    #[test]
    fn missing_action_drops_entry() {
        let json = r#"[{
            "blob": "/flash/image",
            "handler": {"type": "file", "path": "/tmp/a"},
            "actions": {"preparation": {"type": "skip"},
                         "verification": {"type": "skip"}}
        }]"#;
        assert!(parse_config(json).is_empty());
    }

    #[test]
    fn non_list_document_yields_nothing() {
        assert!(parse_config("{}").is_empty());
        assert!(parse_config("not json").is_empty());
        assert!(parse_config("[]").is_empty());
    }

    #[test]
    fn load_dir_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = |blob: &str| {
            format!(
                r#"[{{"blob": "{blob}",
                      "handler": {{"type": "file", "path": "/tmp/x"}},
                      "actions": {{"preparation": {{"type": "skip"}},
                                   "verification": {{"type": "skip"}},
                                   "update": {{"type": "skip"}}}}}}]"#
            )
        };
        std::fs::write(dir.path().join("a.json"), entry("/flash/a")).unwrap();
        std::fs::write(dir.path().join("b.json"), entry("/flash/b")).unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "junk").unwrap();
        std::fs::write(dir.path().join("broken.json"), "junk").unwrap();

        let configs = load_dir(dir.path());
        let blobs: Vec<&str> = configs.iter().map(|c| c.blob_id.as_str()).collect();
        assert_eq!(blobs, ["/flash/a", "/flash/b"]);
    }

    #[test]
    fn skip_factory_builds_working_triggers() {
        let config = HandlerConfig {
            blob_id: "/flash/image".to_string(),
            writer_path: PathBuf::from("/tmp/x"),
            preparation: ActionDesc::Skip,
            verification: ActionDesc::Systemd {
                unit: "verify.service".to_string(),
                mode: "replace".to_string(),
            },
            update: ActionDesc::Skip,
        };
        let mut pack = build_actions(&config, &SkipFactory);
        assert!(pack.preparation.trigger());
        assert!(pack.verification.trigger());
        assert_eq!(
            pack.update.status(),
            crate::actions::ActionStatus::Success
        );
    }
}
