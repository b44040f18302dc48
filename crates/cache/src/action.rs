//! Cached action records
//!
//! An action record is a single line of six `|`-separated object digests:
//!
//! ```text
//! wd|env|prog|args|inputs-manifest|outputs-manifest
//! ```
//!
//! stored at `actions/<action-id>`. The first five digests are the key
//! material (the action id is the digest of their dotted concatenation);
//! the outputs-manifest digest is the cached value. Records are immutable:
//! publishing is create-or-replace, never append, and the record is always
//! the last write of a successful execution.

use crate::{Cache, Digest, Error, Result};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

/// The six digests of one cached action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    /// Digest of the working-directory blob
    pub wd: Digest,
    /// Digest of the sorted `KEY=VALUE` environment blob
    pub env: Digest,
    /// Content digest of the program binary
    pub prog: Digest,
    /// Digest of the one-argument-per-line blob
    pub args: Digest,
    /// Digest of the inputs manifest blob
    pub inputs_manifest: Digest,
    /// Digest of the outputs manifest blob
    pub outputs_manifest: Digest,
}

impl ActionRecord {
    /// Serialize to the single-line record format
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}\n",
            self.wd, self.env, self.prog, self.args, self.inputs_manifest, self.outputs_manifest
        )
    }

    /// Parse the single-line record format
    pub fn parse(text: &str) -> Result<Self> {
        let line = text.trim_end_matches('\n');
        let fields: Vec<&str> = line.split('|').collect();
        let [wd, env, prog, args, inputs_manifest, outputs_manifest] = fields[..] else {
            return Err(Error::corrupt(format!(
                "action record must have six digests, got {}",
                fields.len()
            )));
        };
        Ok(Self {
            wd: Digest::from_hex(wd)?,
            env: Digest::from_hex(env)?,
            prog: Digest::from_hex(prog)?,
            args: Digest::from_hex(args)?,
            inputs_manifest: Digest::from_hex(inputs_manifest)?,
            outputs_manifest: Digest::from_hex(outputs_manifest)?,
        })
    }

    /// The digests this record references directly, in field order
    #[must_use]
    pub fn digests(&self) -> [&Digest; 6] {
        [
            &self.wd,
            &self.env,
            &self.prog,
            &self.args,
            &self.inputs_manifest,
            &self.outputs_manifest,
        ]
    }
}

/// A listed action record with its file modification time
#[derive(Debug, Clone)]
pub struct ActionEntry {
    /// The action identifier
    pub id: Digest,
    /// Modification time of the record file
    pub modified: SystemTime,
}

impl Cache {
    /// Path of the record file for an action id
    #[must_use]
    pub fn action_path(&self, id: &Digest) -> PathBuf {
        self.actions_dir().join(id.as_hex())
    }

    /// Whether a record exists for `id`
    #[must_use]
    pub fn has_action(&self, id: &Digest) -> bool {
        self.action_path(id).exists()
    }

    /// Load and parse the record for `id`
    pub fn load_action(&self, id: &Digest) -> Result<ActionRecord> {
        let path = self.action_path(id);
        if !path.exists() {
            return Err(Error::missing(id.as_hex()));
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::io("read", &path, e))?;
        ActionRecord::parse(&text)
    }

    /// Publish a record at `actions/<id>` (create-or-replace)
    pub fn publish_action(&self, id: &Digest, record: &ActionRecord) -> Result<()> {
        let path = self.action_path(id);
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).map_err(|e| Error::io("create", &tmp_path, e))?;
        file.write_all(record.to_line().as_bytes())
            .map_err(|e| Error::io("write", &tmp_path, e))?;
        file.sync_all()
            .map_err(|e| Error::io("sync", &tmp_path, e))?;
        drop(file);
        fs::rename(&tmp_path, &path).map_err(|e| Error::io("rename", &path, e))?;
        tracing::debug!(action = %id, "published action record");
        Ok(())
    }

    /// Delete the record for `id` (no-op when absent)
    pub fn remove_action(&self, id: &Digest) -> Result<()> {
        let path = self.action_path(id);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| Error::io("remove_file", &path, e))?;
        Ok(())
    }

    /// List every action record with its modification time, unsorted
    pub fn list_actions(&self) -> Result<Vec<ActionEntry>> {
        let dir = self.actions_dir();
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::io("read_dir", &dir, e))? {
            let entry = entry.map_err(|e| Error::io("read_dir_entry", &dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(id) = Digest::from_hex(&name) else {
                continue;
            };
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| Error::io("metadata", entry.path(), e))?;
            entries.push(ActionEntry { id, modified });
        }
        Ok(entries)
    }
}
