//! Interactive cache shrinker
//!
//! Walks the cached actions and asks the operator whether to remove, skip,
//! or quit for each one, then sweeps every object and path-index stamp no
//! longer referenced by a surviving action.
//!
//! Reference counting is explicit: a first pass moves every digest and path
//! referenced by any action out of the unreferenced sets while counting
//! references; removing an action decrements its references, and anything
//! that drops to zero moves back. The sweep at the end deletes exactly the
//! unreferenced remainder, so retained actions always stay fully
//! resolvable.

use crate::manifest::Manifest;
use crate::{Cache, Digest, Error, Result};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};

/// Operator's answer for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    /// Delete this action and release its references
    Remove,
    /// Keep this action
    Skip,
    /// Stop prompting; keep this and all remaining actions
    Quit,
}

/// One action as presented to the operator
#[derive(Debug, Clone)]
pub struct ActionSummary {
    /// The action identifier
    pub id: Digest,
    /// Program path when resolvable, abbreviated digest otherwise
    pub program: String,
    /// Abbreviated argument list
    pub args: String,
    /// Modification time of the record file
    pub modified: DateTime<Local>,
    /// Bytes recovered if only this action were removed
    pub min_bytes: u64,
    /// Bytes referenced by this action in total
    pub max_bytes: u64,
}

impl std::fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  {}  {} {}  ({}..{} bytes cached)",
            &self.id.as_hex()[..12],
            self.modified.format("%Y-%m-%d %H:%M:%S"),
            self.program,
            self.args,
            self.min_bytes,
            self.max_bytes
        )
    }
}

/// Source of operator answers
///
/// The production implementation reads the terminal; tests script the
/// answers.
pub trait ShrinkPrompt {
    /// Present one action and return the operator's choice
    fn choose(&mut self, summary: &ActionSummary) -> Result<PromptChoice>;
}

/// Prompt that reads single-character answers from `/dev/tty`
///
/// The terminal is opened as its own channel so the prompt keeps working
/// when the process's stdin is a pipe.
pub struct TtyPrompt {
    tty: std::io::BufReader<std::fs::File>,
}

impl TtyPrompt {
    /// Open the controlling terminal
    pub fn open() -> Result<Self> {
        let tty = std::fs::File::open("/dev/tty")
            .map_err(|e| Error::io("open", "/dev/tty", e))?;
        Ok(Self {
            tty: std::io::BufReader::new(tty),
        })
    }
}

impl ShrinkPrompt for TtyPrompt {
    fn choose(&mut self, summary: &ActionSummary) -> Result<PromptChoice> {
        let mut stdout = std::io::stdout();
        loop {
            write!(stdout, "{summary}\nremove, skip, or quit [r/s/q]? ")
                .map_err(|e| Error::io("write", "stdout", e))?;
            stdout.flush().map_err(|e| Error::io("flush", "stdout", e))?;

            let mut line = String::new();
            let read = self
                .tty
                .read_line(&mut line)
                .map_err(|e| Error::io("read", "/dev/tty", e))?;
            if read == 0 {
                // Terminal closed; stop the walk rather than looping forever.
                return Ok(PromptChoice::Quit);
            }
            match line.trim_start().chars().next() {
                Some('r') => return Ok(PromptChoice::Remove),
                Some('s') => return Ok(PromptChoice::Skip),
                Some('q') => return Ok(PromptChoice::Quit),
                _ => continue,
            }
        }
    }
}

/// Result of a shrink run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShrinkReport {
    /// Action records deleted
    pub actions_removed: usize,
    /// Blobs deleted from `objects/`
    pub objects_removed: usize,
    /// Stamps deleted from `path-index/`
    pub stamps_removed: usize,
    /// Bytes of blob data freed
    pub bytes_freed: u64,
}

/// Everything one action references
#[derive(Debug, Clone, Default)]
struct ActionRefs {
    objects: BTreeSet<Digest>,
    paths: BTreeSet<String>,
}

fn collect_refs(cache: &Cache, id: &Digest) -> Result<ActionRefs> {
    let record = cache.load_action(id)?;
    let mut refs = ActionRefs::default();

    // The record's own key-line blob lives at objects/<id>.
    refs.objects.insert(id.clone());
    for digest in record.digests() {
        refs.objects.insert(digest.clone());
    }

    for manifest_digest in [&record.inputs_manifest, &record.outputs_manifest] {
        let manifest = match read_manifest(cache, manifest_digest) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(
                    action = %id,
                    manifest = %manifest_digest,
                    error = %err,
                    "unreadable manifest; its references will not be retained"
                );
                continue;
            }
        };
        for (path, stamp) in manifest.iter() {
            refs.objects.insert(stamp.digest.clone());
            refs.paths.insert(path.to_string());
        }
    }

    Ok(refs)
}

fn read_manifest(cache: &Cache, digest: &Digest) -> Result<Manifest> {
    let bytes = cache.read_object(digest)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::corrupt(format!("manifest object {digest} is not UTF-8")))?;
    Manifest::parse(&text)
}

fn summarize(
    cache: &Cache,
    id: &Digest,
    modified: std::time::SystemTime,
    refs: &ActionRefs,
    object_refcounts: &BTreeMap<Digest, usize>,
) -> ActionSummary {
    let record = cache.load_action(id).ok();

    // The program has no recorded path of its own; recover it from the
    // inputs manifest entry carrying the same content digest.
    let mut program = None;
    let mut args = String::new();
    if let Some(record) = &record {
        if let Ok(manifest) = read_manifest(cache, &record.inputs_manifest) {
            program = manifest
                .iter()
                .find(|(_, stamp)| stamp.digest == record.prog)
                .map(|(path, _)| path.to_string());
        }
        if let Ok(bytes) = cache.read_object(&record.args) {
            args = String::from_utf8_lossy(&bytes)
                .lines()
                .collect::<Vec<_>>()
                .join(" ");
            if args.len() > 60 {
                args.truncate(57);
                args.push_str("...");
            }
        }
    }
    let program = program.unwrap_or_else(|| {
        record.map_or_else(
            || "<unreadable>".to_string(),
            |r| format!("<program {}>", &r.prog.as_hex()[..12]),
        )
    });

    let mut min_bytes = 0u64;
    let mut max_bytes = 0u64;
    for digest in &refs.objects {
        let Ok(size) = cache.object_size(digest) else {
            continue;
        };
        max_bytes += size;
        if object_refcounts.get(digest) == Some(&1) {
            min_bytes += size;
        }
    }

    ActionSummary {
        id: id.clone(),
        program,
        args,
        modified: DateTime::<Local>::from(modified),
        min_bytes,
        max_bytes,
    }
}

/// Walk actions interactively and garbage-collect afterwards
///
/// Actions are presented oldest first; `r` removes, `s` skips, `q` ends
/// the walk. The sweep then deletes every unreferenced object and stamp
/// and prunes empty path-index directories.
pub fn shrink(cache: &Cache, prompt: &mut dyn ShrinkPrompt) -> Result<ShrinkReport> {
    let mut unreferenced_objects: BTreeSet<Digest> =
        cache.list_objects()?.into_iter().collect();
    let mut unreferenced_paths: BTreeSet<String> =
        cache.list_stamp_paths()?.into_iter().collect();
    let mut object_refcounts: BTreeMap<Digest, usize> = BTreeMap::new();
    let mut path_refcounts: BTreeMap<String, usize> = BTreeMap::new();

    // Count pass, newest first.
    let mut actions = cache.list_actions()?;
    actions.sort_by(|a, b| b.modified.cmp(&a.modified));

    let mut refs_by_action: BTreeMap<Digest, ActionRefs> = BTreeMap::new();
    for entry in &actions {
        let refs = collect_refs(cache, &entry.id)?;
        for digest in &refs.objects {
            unreferenced_objects.remove(digest);
            *object_refcounts.entry(digest.clone()).or_insert(0) += 1;
        }
        for path in &refs.paths {
            unreferenced_paths.remove(path);
            *path_refcounts.entry(path.clone()).or_insert(0) += 1;
        }
        refs_by_action.insert(entry.id.clone(), refs);
    }

    let mut report = ShrinkReport::default();

    // Display pass, oldest first.
    actions.reverse();
    for entry in &actions {
        let refs = &refs_by_action[&entry.id];
        let summary = summarize(cache, &entry.id, entry.modified, refs, &object_refcounts);
        match prompt.choose(&summary)? {
            PromptChoice::Skip => {}
            PromptChoice::Quit => break,
            PromptChoice::Remove => {
                for digest in &refs.objects {
                    if let Some(count) = object_refcounts.get_mut(digest) {
                        *count -= 1;
                        if *count == 0 {
                            object_refcounts.remove(digest);
                            unreferenced_objects.insert(digest.clone());
                        }
                    }
                }
                for path in &refs.paths {
                    if let Some(count) = path_refcounts.get_mut(path) {
                        *count -= 1;
                        if *count == 0 {
                            path_refcounts.remove(path);
                            unreferenced_paths.insert(path.clone());
                        }
                    }
                }
                cache.remove_action(&entry.id)?;
                report.actions_removed += 1;
                tracing::info!(action = %entry.id, "removed action record");
            }
        }
    }

    // Sweep.
    for digest in &unreferenced_objects {
        if let Ok(size) = cache.object_size(digest) {
            report.bytes_freed += size;
        }
        cache.remove_object(digest)?;
        report.objects_removed += 1;
        tracing::debug!(object = %digest, "swept unreferenced object");
    }
    for path in &unreferenced_paths {
        cache.remove_stamp(path)?;
        report.stamps_removed += 1;
        tracing::debug!(path = %path, "swept unreferenced stamp");
    }
    cache.prune_empty_index_dirs()?;

    tracing::info!(
        actions = report.actions_removed,
        objects = report.objects_removed,
        stamps = report.stamps_removed,
        bytes = report.bytes_freed,
        "shrink complete"
    );
    Ok(report)
}

/// Scripted prompt for tests and non-interactive runs
#[derive(Debug)]
pub struct ScriptedPrompt {
    answers: std::vec::IntoIter<PromptChoice>,
    /// Summaries shown so far, for assertions
    pub seen: Vec<ActionSummary>,
}

impl ScriptedPrompt {
    /// Answer with `choices` in order; further prompts quit
    #[must_use]
    pub fn new(choices: Vec<PromptChoice>) -> Self {
        Self {
            answers: choices.into_iter(),
            seen: Vec::new(),
        }
    }
}

impl ShrinkPrompt for ScriptedPrompt {
    fn choose(&mut self, summary: &ActionSummary) -> Result<PromptChoice> {
        self.seen.push(summary.clone());
        Ok(self.answers.next().unwrap_or(PromptChoice::Quit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionRecord;
    use std::path::Path;
    use tempfile::TempDir;

    /// Publish a fake action over the given input files, returning its id
    fn publish_fake_action(cache: &Cache, wd_line: &str, inputs: &[&Path]) -> Digest {
        let wd = cache.store_bytes(format!("{wd_line}\n").as_bytes()).unwrap();
        let env = cache.store_bytes(b"").unwrap();
        let args = cache.store_bytes(b"run\n").unwrap();

        let mut manifest = Manifest::new();
        let mut prog = None;
        for input in inputs {
            let stamp = cache.cache_file(input, None).unwrap();
            manifest
                .insert(input.to_string_lossy(), stamp.digest.clone(), stamp.size)
                .unwrap();
            prog.get_or_insert(stamp.digest);
        }
        let inputs_manifest = cache
            .store_bytes(manifest.to_canonical_string().as_bytes())
            .unwrap();
        let outputs_manifest = cache.store_bytes(b"").unwrap();

        let key_line = format!("{wd}.{env}.{}.{args}.{inputs_manifest}\n", prog.clone().unwrap());
        let id = cache.store_bytes(key_line.as_bytes()).unwrap();

        let record = ActionRecord {
            wd,
            env,
            prog: prog.unwrap(),
            args,
            inputs_manifest,
            outputs_manifest,
        };
        cache.publish_action(&id, &record).unwrap();
        id
    }

    #[test]
    fn test_shared_blob_survives_until_last_reference() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::open(tmp.path().join("cache")).unwrap();

        let shared = tmp.path().join("shared.txt");
        std::fs::write(&shared, b"shared contents").unwrap();
        let shared_digest = Digest::from_bytes(b"shared contents");

        let first = publish_fake_action(&cache, "/work/a", &[&shared]);
        let second = publish_fake_action(&cache, "/work/b", &[&shared]);
        assert_ne!(first, second);

        // Remove the first action, quit before the second.
        let mut prompt = ScriptedPrompt::new(vec![PromptChoice::Remove, PromptChoice::Quit]);
        let report = shrink(&cache, &mut prompt).unwrap();

        assert_eq!(report.actions_removed, 1);
        assert!(cache.has_object(&shared_digest));
        assert!(cache.has_action(&second) || cache.has_action(&first));
        // Exactly one of the two records is gone.
        assert_eq!(
            usize::from(cache.has_action(&first)) + usize::from(cache.has_action(&second)),
            1
        );

        // Remove the survivor; the shared blob goes with it.
        let mut prompt = ScriptedPrompt::new(vec![PromptChoice::Remove]);
        let report = shrink(&cache, &mut prompt).unwrap();
        assert_eq!(report.actions_removed, 1);
        assert!(!cache.has_object(&shared_digest));
        assert!(cache.list_actions().unwrap().is_empty());
    }

    #[test]
    fn test_skip_keeps_everything() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::open(tmp.path().join("cache")).unwrap();

        let input = tmp.path().join("input.txt");
        std::fs::write(&input, b"data").unwrap();
        let id = publish_fake_action(&cache, "/work", &[&input]);

        let objects_before = cache.list_objects().unwrap().len();
        let mut prompt = ScriptedPrompt::new(vec![PromptChoice::Skip]);
        let report = shrink(&cache, &mut prompt).unwrap();

        assert_eq!(report, ShrinkReport::default());
        assert!(cache.has_action(&id));
        assert_eq!(cache.list_objects().unwrap().len(), objects_before);
    }

    #[test]
    fn test_orphan_objects_and_stamps_are_swept() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::open(tmp.path().join("cache")).unwrap();

        let orphan = cache.store_bytes(b"orphaned blob").unwrap();
        let orphan_file = tmp.path().join("orphan.txt");
        std::fs::write(&orphan_file, b"stamped but unreferenced").unwrap();
        cache.cache_file(&orphan_file, Some("/elsewhere/orphan.txt")).unwrap();

        let kept_input = tmp.path().join("kept.txt");
        std::fs::write(&kept_input, b"kept").unwrap();
        let id = publish_fake_action(&cache, "/work", &[&kept_input]);

        let mut prompt = ScriptedPrompt::new(vec![PromptChoice::Skip]);
        let report = shrink(&cache, &mut prompt).unwrap();

        assert!(!cache.has_object(&orphan));
        // The orphan stamp and its blob are gone; the action's are kept.
        assert!(cache.read_stamp("/elsewhere/orphan.txt").unwrap().is_none());
        assert!(
            cache
                .read_stamp(&kept_input.to_string_lossy())
                .unwrap()
                .is_some()
        );
        assert!(report.objects_removed >= 2);
        assert!(report.bytes_freed > 0);
        assert!(cache.has_action(&id));

        // Retained action still fully resolvable.
        let record = cache.load_action(&id).unwrap();
        for digest in record.digests() {
            assert!(cache.has_object(digest), "missing object {digest}");
        }
    }

    #[test]
    fn test_quit_stops_the_walk() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::open(tmp.path().join("cache")).unwrap();

        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        publish_fake_action(&cache, "/work/a", &[&a]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        publish_fake_action(&cache, "/work/b", &[&b]);

        let mut prompt = ScriptedPrompt::new(vec![PromptChoice::Quit]);
        let report = shrink(&cache, &mut prompt).unwrap();

        // Only one prompt shown, nothing removed.
        assert_eq!(prompt.seen.len(), 1);
        assert_eq!(report.actions_removed, 0);
        assert_eq!(cache.list_actions().unwrap().len(), 2);
    }

    #[test]
    fn test_display_pass_is_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::open(tmp.path().join("cache")).unwrap();

        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        let older = publish_fake_action(&cache, "/work/a", &[&a]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newer = publish_fake_action(&cache, "/work/b", &[&b]);

        let mut prompt = ScriptedPrompt::new(vec![PromptChoice::Skip, PromptChoice::Skip]);
        shrink(&cache, &mut prompt).unwrap();

        assert_eq!(prompt.seen.len(), 2);
        assert_eq!(prompt.seen[0].id, older);
        assert_eq!(prompt.seen[1].id, newer);
    }

    #[test]
    fn test_min_max_bytes_reflect_sharing() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::open(tmp.path().join("cache")).unwrap();

        let shared = tmp.path().join("shared.txt");
        std::fs::write(&shared, b"0123456789").unwrap();
        let unique = tmp.path().join("unique.txt");
        std::fs::write(&unique, b"abcde").unwrap();

        publish_fake_action(&cache, "/work/a", &[&shared]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        publish_fake_action(&cache, "/work/b", &[&shared, &unique]);

        let mut prompt = ScriptedPrompt::new(vec![PromptChoice::Skip, PromptChoice::Skip]);
        shrink(&cache, &mut prompt).unwrap();

        let second = &prompt.seen[1];
        // The shared 10-byte blob is referenced twice, so it counts toward
        // max but not min; the 5-byte blob and the action's private key
        // material count toward both.
        assert!(second.max_bytes >= second.min_bytes + 10);
        assert!(second.min_bytes >= 5);
    }
}
