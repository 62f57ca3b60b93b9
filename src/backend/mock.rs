//! In-memory backend for testing the engine without repository I/O.
//!
//! The mock models a single linear history: `commit` appends a synthetic
//! changeset, `checkout`/`reset_to` move the current position, and tag
//! reachability for [TagScope::Position] means "the target is at or before
//! the current position". Push rejections and remote advances can be staged
//! to exercise the stamping retry loop.

use crate::backend::{
    CheckoutTarget, TagEntry, TagScope, VcsType, VersionControlBackend, STAMP_USER_NAME,
};
use crate::error::{Result, VerstampError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    history: Vec<String>,
    position: usize,
    branch: String,
    detached: bool,
    pending: bool,
    outgoing: bool,
    remote: String,
    tags: Vec<TagEntry>,
    clock: i64,
    next_commit: u64,
    reject_pushes: u32,
    pushed: Vec<String>,
    on_pull: Vec<TagEntry>,
}

/// Mock backend; all scenario mutation goes through `&self` setters so the
/// instance can be handed out as a trait object.
pub struct MockBackend {
    root: PathBuf,
    state: Mutex<MockState>,
}

fn synth_changeset(n: u64) -> String {
    format!("{:040x}", n + 1)
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_root(Path::new("."))
    }

    pub fn with_root(root: &Path) -> Self {
        let initial = synth_changeset(0);
        MockBackend {
            root: root.to_path_buf(),
            state: Mutex::new(MockState {
                history: vec![initial],
                position: 0,
                branch: "main".to_string(),
                remote: "mock://origin".to_string(),
                next_commit: 1,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub fn set_pending(&self, pending: bool) {
        self.lock().pending = pending;
    }

    pub fn set_outgoing(&self, outgoing: bool) {
        self.lock().outgoing = outgoing;
    }

    pub fn set_detached(&self, detached: bool) {
        self.lock().detached = detached;
    }

    pub fn set_branch(&self, branch: &str) {
        self.lock().branch = branch.to_string();
    }

    pub fn set_remote(&self, remote: &str) {
        self.lock().remote = remote.to_string();
    }

    /// Fail the next `n` pushes with a race error.
    pub fn reject_next_pushes(&self, n: u32) {
        self.lock().reject_pushes = n;
    }

    /// Stage a tag that appears (with its target changeset) after the next
    /// `pull`: a concurrent stamper winning the race.
    pub fn stage_remote_tag(&self, name: &str, message: &str) {
        let mut state = self.lock();
        let target = synth_changeset(state.next_commit);
        state.next_commit += 1;
        state.clock += 1;
        let entry = TagEntry {
            name: name.to_string(),
            target,
            tagger: Some(STAMP_USER_NAME.to_string()),
            message: Some(message.to_string()),
            created: state.clock,
        };
        state.on_pull.push(entry);
    }

    /// Create a tag that does not carry the tool's tagger identity.
    pub fn add_foreign_tag(&self, name: &str, message: &str) {
        let mut state = self.lock();
        state.clock += 1;
        let target = state.history[state.position].clone();
        let created = state.clock;
        state.tags.push(TagEntry {
            name: name.to_string(),
            target,
            tagger: Some("someone-else".to_string()),
            message: Some(message.to_string()),
            created,
        });
    }

    pub fn pushed_tags(&self) -> Vec<String> {
        self.lock().pushed.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionControlBackend for MockBackend {
    fn vcs_type(&self) -> VcsType {
        VcsType::Git
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn changeset(&self, tag: Option<&str>) -> Result<String> {
        let state = self.lock();
        match tag {
            None => Ok(state.history[state.position].clone()),
            Some(name) => state
                .tags
                .iter()
                .find(|t| t.name == name)
                .map(|t| t.target.clone())
                .ok_or_else(|| VerstampError::backend(format!("No such tag: {}", name))),
        }
    }

    fn has_pending_changes(&self) -> Result<bool> {
        Ok(self.lock().pending)
    }

    fn has_outgoing_changes(&self) -> Result<bool> {
        Ok(self.lock().outgoing)
    }

    fn is_detached_head(&self) -> Result<bool> {
        Ok(self.lock().detached)
    }

    fn active_branch(&self) -> Result<String> {
        let state = self.lock();
        if state.detached {
            return Err(VerstampError::backend(
                "Cannot determine active branch: HEAD is detached",
            ));
        }
        Ok(state.branch.clone())
    }

    fn default_branch(&self) -> Result<String> {
        Ok(self.lock().branch.clone())
    }

    fn remote_url(&self) -> Result<String> {
        Ok(self.lock().remote.clone())
    }

    fn list_tags(&self, prefix: &str, scope: TagScope) -> Result<Vec<TagEntry>> {
        let state = self.lock();
        let reachable = &state.history[..=state.position];
        let mut entries: Vec<TagEntry> = state
            .tags
            .iter()
            .filter(|t| t.name.starts_with(prefix))
            .filter(|t| match scope {
                TagScope::Global => true,
                TagScope::Position | TagScope::Branch => reachable.contains(&t.target),
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        Ok(entries)
    }

    fn tags_at(&self, changeset: &str) -> Result<Vec<String>> {
        let state = self.lock();
        let mut tags: Vec<String> = state
            .tags
            .iter()
            .filter(|t| t.target == changeset)
            .map(|t| t.name.clone())
            .collect();
        tags.sort();
        Ok(tags)
    }

    fn tag_entry(&self, name: &str) -> Result<Option<TagEntry>> {
        Ok(self.lock().tags.iter().find(|t| t.name == name).cloned())
    }

    fn commit(&self, _message: &str, _include: &[PathBuf]) -> Result<String> {
        let mut state = self.lock();
        if state.detached {
            return Err(VerstampError::backend("Cannot commit on a detached HEAD"));
        }
        let changeset = synth_changeset(state.next_commit);
        state.next_commit += 1;
        let pos = state.position + 1;
        state.history.truncate(pos);
        state.history.push(changeset.clone());
        state.position = pos;
        state.pending = false;
        Ok(changeset)
    }

    fn create_tag(
        &self,
        name: &str,
        message: &str,
        revision: Option<&str>,
        force: bool,
    ) -> Result<()> {
        let mut state = self.lock();
        let target = match revision {
            None => state.history[state.position].clone(),
            Some(rev) => {
                if state.history.contains(&rev.to_string()) {
                    rev.to_string()
                } else if let Some(tag) = state.tags.iter().find(|t| t.name == rev) {
                    tag.target.clone()
                } else {
                    return Err(VerstampError::backend(format!(
                        "Cannot resolve revision '{}'",
                        rev
                    )));
                }
            }
        };
        if !force && state.tags.iter().any(|t| t.name == name) {
            return Err(VerstampError::backend(format!(
                "Tag '{}' already exists",
                name
            )));
        }
        state.tags.retain(|t| t.name != name);
        state.clock += 1;
        let created = state.clock;
        state.tags.push(TagEntry {
            name: name.to_string(),
            target,
            tagger: Some(STAMP_USER_NAME.to_string()),
            message: Some(message.to_string()),
            created,
        });
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.lock().tags.retain(|t| t.name != name);
        Ok(())
    }

    fn push(&self, tags: &[String], force_tags: &[String]) -> Result<()> {
        let mut state = self.lock();
        if state.reject_pushes > 0 {
            state.reject_pushes -= 1;
            return Err(VerstampError::race("Push rejected: ref already advanced"));
        }
        state.pushed.extend(tags.iter().cloned());
        state.pushed.extend(force_tags.iter().cloned());
        state.outgoing = false;
        Ok(())
    }

    fn pull(&self) -> Result<()> {
        let mut state = self.lock();
        let staged: Vec<TagEntry> = state.on_pull.drain(..).collect();
        for entry in staged {
            state.history.push(entry.target.clone());
            state.position = state.history.len() - 1;
            state.tags.push(entry);
        }
        Ok(())
    }

    fn checkout(&self, target: &CheckoutTarget) -> Result<()> {
        let mut state = self.lock();
        match target {
            CheckoutTarget::Branch(branch) => {
                state.branch = branch.clone();
                state.detached = false;
                state.position = state.history.len() - 1;
            }
            CheckoutTarget::Revision(rev) => {
                let pos = state
                    .history
                    .iter()
                    .position(|c| c == rev)
                    .ok_or_else(|| {
                        VerstampError::backend(format!("Cannot resolve revision '{}'", rev))
                    })?;
                state.position = pos;
                state.detached = pos != state.history.len() - 1;
            }
            CheckoutTarget::Tag(tag) => {
                let target = state
                    .tags
                    .iter()
                    .find(|t| &t.name == tag)
                    .map(|t| t.target.clone())
                    .ok_or_else(|| VerstampError::backend(format!("No such tag: {}", tag)))?;
                let pos = state.history.iter().position(|c| *c == target).ok_or_else(
                    || VerstampError::backend(format!("Tag '{}' target not in history", tag)),
                )?;
                state.position = pos;
                state.detached = pos != state.history.len() - 1;
            }
        }
        Ok(())
    }

    fn reset_to(&self, changeset: &str) -> Result<()> {
        let mut state = self.lock();
        let pos = state
            .history
            .iter()
            .position(|c| c == changeset)
            .ok_or_else(|| {
                VerstampError::backend(format!("Cannot resolve revision '{}'", changeset))
            })?;
        state.position = pos;
        Ok(())
    }
}
