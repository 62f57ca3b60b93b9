use crate::backend::{
    CheckoutTarget, TagEntry, TagScope, VcsType, VersionControlBackend, STAMP_USER_EMAIL,
    STAMP_USER_NAME,
};
use crate::error::{Result, VerstampError};
use git2::{BranchType, ErrorClass, ErrorCode, ObjectType, Oid, Repository, Signature};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Git implementation of the backend capability interface, via `git2`.
pub struct GitBackend {
    repo: Repository,
    root: PathBuf,
}

impl GitBackend {
    /// Open the repository enclosing `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::discover(path.as_ref())?;
        let root = repo
            .workdir()
            .ok_or_else(|| VerstampError::backend("Bare repositories cannot be tracked"))?
            .to_path_buf();
        Ok(GitBackend { repo, root })
    }

    fn stamp_signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now(STAMP_USER_NAME, STAMP_USER_EMAIL)?)
    }

    fn default_remote(&self) -> Result<git2::Remote<'_>> {
        if let Ok(remote) = self.repo.find_remote("origin") {
            return Ok(remote);
        }
        let names = self.repo.remotes()?;
        let first = names
            .iter()
            .flatten()
            .next()
            .ok_or_else(|| VerstampError::backend("Repository has no configured remote"))?;
        Ok(self.repo.find_remote(first)?)
    }

    /// Configure SSH/default credentials on a callbacks object.
    ///
    /// Tries the usual key files, then the SSH agent, then whatever default
    /// credentials libgit2 can produce. Local-path remotes never invoke this.
    fn set_credentials(callbacks: &mut git2::RemoteCallbacks<'_>) {
        callbacks.credentials(|_url, username_from_url, allowed_types| {
            if allowed_types.contains(git2::CredentialType::SSH_KEY) {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                for key in ["id_ed25519", "id_rsa", "id_ecdsa"] {
                    let key_path = format!("{}/.ssh/{}", home, key);
                    let path = std::path::Path::new(&key_path);
                    if path.exists() {
                        if let Ok(cred) = git2::Cred::ssh_key(
                            username_from_url.unwrap_or("git"),
                            None,
                            path,
                            None,
                        ) {
                            return Ok(cred);
                        }
                    }
                }
                if let Ok(cred) =
                    git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
                {
                    return Ok(cred);
                }
            }
            git2::Cred::default()
        });
    }

    fn head_commit_id(&self) -> Result<Oid> {
        Ok(self.repo.head()?.peel_to_commit()?.id())
    }

    /// The tip the given scope measures reachability against, `None` for a
    /// global listing.
    fn scope_tip(&self, scope: TagScope) -> Result<Option<Oid>> {
        match scope {
            TagScope::Global => Ok(None),
            TagScope::Position => Ok(Some(self.head_commit_id()?)),
            TagScope::Branch => {
                // While detached the branch tip is unknowable; fall back to
                // the current position.
                if self.repo.head_detached()? {
                    return Ok(Some(self.head_commit_id()?));
                }
                let branch = self
                    .repo
                    .find_branch(&self.active_branch()?, BranchType::Local)?;
                let oid = branch.get().target().ok_or_else(|| {
                    VerstampError::backend("Active branch has no target commit")
                })?;
                Ok(Some(oid))
            }
        }
    }

    fn lookup_tag_entry(&self, name: &str) -> Result<Option<TagEntry>> {
        let reference_name = format!("refs/tags/{}", name);
        let reference = match self.repo.find_reference(&reference_name) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let target = reference
            .peel(ObjectType::Commit)
            .map_err(|e| VerstampError::backend(format!("Cannot peel tag '{}': {}", name, e)))?
            .id();

        // Annotated tags carry a tagger and message; lightweight tags fall
        // back to the commit time and an empty identity.
        let annotated = reference
            .target()
            .and_then(|oid| self.repo.find_tag(oid).ok());
        let (tagger, message, created) = match annotated {
            Some(tag) => (
                tag.tagger().and_then(|s| s.name().map(str::to_string)),
                tag.message().map(str::to_string),
                tag.tagger().map(|s| s.when().seconds()).unwrap_or(0),
            ),
            None => {
                let created = self
                    .repo
                    .find_commit(target)
                    .map(|c| c.time().seconds())
                    .unwrap_or(0);
                (None, None, created)
            }
        };

        Ok(Some(TagEntry {
            name: name.to_string(),
            target: target.to_string(),
            tagger,
            message,
            created,
        }))
    }
}

impl VersionControlBackend for GitBackend {
    fn vcs_type(&self) -> VcsType {
        VcsType::Git
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn changeset(&self, tag: Option<&str>) -> Result<String> {
        match tag {
            Some(tag) => {
                let obj = self
                    .repo
                    .revparse_single(&format!("refs/tags/{}", tag))
                    .map_err(|e| {
                        VerstampError::backend(format!("Cannot resolve tag '{}': {}", tag, e))
                    })?;
                Ok(obj
                    .peel(ObjectType::Commit)
                    .map_err(|e| VerstampError::backend(format!("Cannot peel '{}': {}", tag, e)))?
                    .id()
                    .to_string())
            }
            None => Ok(self.head_commit_id()?.to_string()),
        }
    }

    fn has_pending_changes(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    fn has_outgoing_changes(&self) -> Result<bool> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Ok(false);
        }
        let branch_name = head
            .shorthand()
            .ok_or_else(|| VerstampError::backend("Branch name is not valid UTF-8"))?
            .to_string();
        let local_oid = head
            .target()
            .ok_or_else(|| VerstampError::backend("Branch has no target commit"))?;

        let branch = self.repo.find_branch(&branch_name, BranchType::Local)?;
        let upstream = match branch.upstream() {
            Ok(up) => up,
            // No tracking branch configured; nothing to compare against.
            Err(_) => return Ok(false),
        };
        let upstream_oid = upstream
            .get()
            .target()
            .ok_or_else(|| VerstampError::backend("Upstream branch has no target commit"))?;

        let (ahead, _behind) = self.repo.graph_ahead_behind(local_oid, upstream_oid)?;
        Ok(ahead > 0)
    }

    fn is_detached_head(&self) -> Result<bool> {
        Ok(self.repo.head_detached()?)
    }

    fn active_branch(&self) -> Result<String> {
        if self.repo.head_detached()? {
            return Err(VerstampError::backend(
                "Cannot determine active branch: HEAD is detached",
            ));
        }
        let head = self.repo.head()?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| VerstampError::backend("Branch name is not valid UTF-8"))
    }

    fn default_branch(&self) -> Result<String> {
        if let Ok(reference) = self.repo.find_reference("refs/remotes/origin/HEAD") {
            if let Some(target) = reference.symbolic_target() {
                if let Some(name) = target.strip_prefix("refs/remotes/origin/") {
                    return Ok(name.to_string());
                }
            }
        }
        let mut names = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        if names.len() == 1 {
            return Ok(names.remove(0));
        }
        Err(VerstampError::backend(
            "Cannot determine the default branch",
        ))
    }

    fn remote_url(&self) -> Result<String> {
        let remote = self.default_remote()?;
        remote
            .url()
            .map(str::to_string)
            .ok_or_else(|| VerstampError::backend("Remote URL is not valid UTF-8"))
    }

    fn list_tags(&self, prefix: &str, scope: TagScope) -> Result<Vec<TagEntry>> {
        let pattern = format!("{}*", prefix);
        let names = self.repo.tag_names(Some(&pattern))?;
        let tip = self.scope_tip(scope)?;

        let mut entries = Vec::new();
        for name in names.iter().flatten() {
            let Some(entry) = self.lookup_tag_entry(name)? else {
                continue;
            };
            if let Some(tip) = tip {
                let target = Oid::from_str(&entry.target)
                    .map_err(|e| VerstampError::backend(format!("Bad tag target: {}", e)))?;
                let reachable = target == tip || self.repo.graph_descendant_of(tip, target)?;
                if !reachable {
                    continue;
                }
            }
            entries.push(entry);
        }

        entries.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        Ok(entries)
    }

    fn tags_at(&self, changeset: &str) -> Result<Vec<String>> {
        let names = self.repo.tag_names(None)?;
        let mut brothers = Vec::new();
        for name in names.iter().flatten() {
            if let Some(entry) = self.lookup_tag_entry(name)? {
                if entry.target == changeset {
                    brothers.push(entry.name);
                }
            }
        }
        brothers.sort();
        Ok(brothers)
    }

    fn tag_entry(&self, name: &str) -> Result<Option<TagEntry>> {
        self.lookup_tag_entry(name)
    }

    fn commit(&self, message: &str, include: &[PathBuf]) -> Result<String> {
        let mut index = self.repo.index()?;
        // The cached index can be stale when other handles have committed
        // in between; reload it from disk before staging.
        index.read(true)?;
        for path in include {
            index.add_path(path).map_err(|e| {
                VerstampError::backend(format!("Cannot stage '{}': {}", path.display(), e))
            })?;
        }
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let sig = self.stamp_signature()?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    fn create_tag(
        &self,
        name: &str,
        message: &str,
        revision: Option<&str>,
        force: bool,
    ) -> Result<()> {
        let obj = match revision {
            Some(rev) => self.repo.revparse_single(rev).map_err(|e| {
                VerstampError::backend(format!("Cannot resolve revision '{}': {}", rev, e))
            })?,
            None => self.repo.head()?.peel(ObjectType::Commit)?,
        };
        let sig = self.stamp_signature()?;
        self.repo.tag(name, &obj, &sig, message, force)?;
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.repo.tag_delete(name)?;
        Ok(())
    }

    fn push(&self, tags: &[String], force_tags: &[String]) -> Result<()> {
        let mut refspecs: Vec<String> = Vec::new();
        if !self.repo.head_detached()? {
            let branch = self.active_branch()?;
            refspecs.push(format!("refs/heads/{0}:refs/heads/{0}", branch));
        }
        for tag in tags {
            refspecs.push(format!("refs/tags/{0}:refs/tags/{0}", tag));
        }
        for tag in force_tags {
            refspecs.push(format!("+refs/tags/{0}:refs/tags/{0}", tag));
        }
        let refspec_strs: Vec<&str> = refspecs.iter().map(|s| s.as_str()).collect();

        // A ref the server refuses (someone else advanced it first) is the
        // race signal, not a hard failure.
        let rejected: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = git2::RemoteCallbacks::new();
        Self::set_credentials(&mut callbacks);
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                *rejected.borrow_mut() = Some(format!("{}: {}", refname, status));
            }
            Ok(())
        });

        let mut push_options = git2::PushOptions::new();
        push_options.remote_callbacks(callbacks);

        let mut remote = self.default_remote()?;
        match remote.push(&refspec_strs, Some(&mut push_options)) {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::NotFastForward || e.class() == ErrorClass::Reference => {
                return Err(VerstampError::race(format!("Push rejected: {}", e)));
            }
            Err(e) if e.class() == ErrorClass::Net => {
                return Err(VerstampError::backend(format!(
                    "Network error during push: {}",
                    e
                )));
            }
            Err(e) => return Err(VerstampError::backend(format!("Push failed: {}", e))),
        }

        if let Some(reason) = rejected.borrow_mut().take() {
            return Err(VerstampError::race(format!("Push rejected: {}", reason)));
        }
        Ok(())
    }

    fn pull(&self) -> Result<()> {
        let remote_name = {
            let remote = self.default_remote()?;
            remote.name().unwrap_or("origin").to_string()
        };

        let mut callbacks = git2::RemoteCallbacks::new();
        Self::set_credentials(&mut callbacks);
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);

        // Fetch every branch and tag so ledger scans see the remote's state.
        let refspec_heads = format!("+refs/heads/*:refs/remotes/{}/*", remote_name);
        let refspecs = &[refspec_heads.as_str(), "+refs/tags/*:refs/tags/*"];
        let mut remote = self.repo.find_remote(&remote_name)?;
        remote
            .fetch(refspecs, Some(&mut fetch_options), None)
            .map_err(|e| {
                VerstampError::backend(format!("Failed to fetch from '{}': {}", remote_name, e))
            })?;

        if self.repo.head_detached()? {
            return Ok(());
        }
        let branch_name = self.active_branch()?;

        // Fast-forward the active branch onto its remote counterpart when
        // possible; diverged branches are left for the caller to notice via
        // the outgoing check.
        let tracking = format!("refs/remotes/{}/{}", remote_name, branch_name);
        let remote_ref = match self.repo.find_reference(&tracking) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        let remote_oid = remote_ref
            .target()
            .ok_or_else(|| VerstampError::backend("Remote tracking ref has no target"))?;
        let local_oid = self.head_commit_id()?;

        if local_oid == remote_oid {
            return Ok(());
        }
        if !self.repo.graph_descendant_of(remote_oid, local_oid)? {
            return Ok(());
        }

        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.force();
        let obj = self.repo.find_object(remote_oid, None)?;
        self.repo.checkout_tree(&obj, Some(&mut checkout))?;
        self.repo
            .find_reference(&format!("refs/heads/{}", branch_name))?
            .set_target(remote_oid, "verstamp: fast-forward pull")?;
        Ok(())
    }

    fn checkout(&self, target: &CheckoutTarget) -> Result<()> {
        let mut opts = git2::build::CheckoutBuilder::new();
        opts.force();

        match target {
            CheckoutTarget::Branch(branch) => {
                if self.repo.find_branch(branch, BranchType::Local).is_err() {
                    // Materialize the local branch from its remote counterpart.
                    let tracking = format!("refs/remotes/origin/{}", branch);
                    let remote_ref = self.repo.find_reference(&tracking).map_err(|_| {
                        VerstampError::backend(format!("No local or remote branch '{}'", branch))
                    })?;
                    let commit = remote_ref.peel_to_commit()?;
                    let mut created = self.repo.branch(branch, &commit, false)?;
                    created.set_upstream(Some(&format!("origin/{}", branch)))?;
                }
                let obj = self
                    .repo
                    .revparse_single(&format!("refs/heads/{}", branch))?;
                self.repo.checkout_tree(&obj, Some(&mut opts))?;
                self.repo.set_head(&format!("refs/heads/{}", branch))?;
            }
            CheckoutTarget::Tag(tag) => {
                let obj = self.repo.revparse_single(&format!("refs/tags/{}", tag))?;
                let commit = obj.peel(ObjectType::Commit)?;
                self.repo.checkout_tree(&commit, Some(&mut opts))?;
                self.repo.set_head_detached(commit.id())?;
            }
            CheckoutTarget::Revision(rev) => {
                let obj = self.repo.revparse_single(rev).map_err(|e| {
                    VerstampError::backend(format!("Cannot resolve revision '{}': {}", rev, e))
                })?;
                let commit = obj.peel(ObjectType::Commit)?;
                self.repo.checkout_tree(&commit, Some(&mut opts))?;
                self.repo.set_head_detached(commit.id())?;
            }
        }
        Ok(())
    }

    fn reset_to(&self, changeset: &str) -> Result<()> {
        let obj = self.repo.revparse_single(changeset)?;
        self.repo.reset(&obj, git2::ResetType::Hard, None)?;
        Ok(())
    }
}

/// Clone `remote` into `dest`.
pub fn clone(remote: &str, dest: &Path) -> Result<()> {
    let mut callbacks = git2::RemoteCallbacks::new();
    GitBackend::set_credentials(&mut callbacks);
    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);

    git2::build::RepoBuilder::new()
        .fetch_options(fetch_options)
        .clone(remote, dest)
        .map_err(|e| VerstampError::backend(format!("Clone of '{}' failed: {}", remote, e)))?;
    Ok(())
}

// SAFETY: GitBackend wraps git2::Repository which is Send but not Sync.
// Every GitBackend instance is confined to the worker that opened it; the
// trait requires Sync only so boxed backends can cross the bounded-pool
// boundary.
unsafe impl Sync for GitBackend {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        repo
    }

    fn backend_with_commit(dir: &Path) -> GitBackend {
        init_repo(dir);
        fs::write(dir.join("README.md"), "hello\n").unwrap();
        let backend = GitBackend::open(dir).unwrap();
        backend
            .commit("initial", &[PathBuf::from("README.md")])
            .unwrap();
        backend
    }

    #[test]
    fn test_open_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        // discover() walks upward, so only assert the happy path elsewhere;
        // a bare repo must be refused outright.
        let bare_dir = dir.path().join("bare.git");
        Repository::init_bare(&bare_dir).unwrap();
        assert!(GitBackend::open(&bare_dir).is_err());
    }

    #[test]
    fn test_commit_and_changeset() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_commit(dir.path());
        let head = backend.changeset(None).unwrap();
        assert_eq!(head.len(), 40);
        assert!(!backend.has_pending_changes().unwrap());
        assert!(!backend.is_detached_head().unwrap());
    }

    #[test]
    fn test_pending_changes_detected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_commit(dir.path());
        fs::write(dir.path().join("new.txt"), "data\n").unwrap();
        assert!(backend.has_pending_changes().unwrap());
    }

    #[test]
    fn test_annotated_tag_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_commit(dir.path());
        let head = backend.changeset(None).unwrap();

        backend
            .create_tag("svc_0.0.1", "{\"app\":null}", None, false)
            .unwrap();

        let entry = backend.tag_entry("svc_0.0.1").unwrap().unwrap();
        assert_eq!(entry.target, head);
        assert_eq!(entry.tagger.as_deref(), Some(STAMP_USER_NAME));
        assert_eq!(entry.message.as_deref(), Some("{\"app\":null}"));
        assert_eq!(backend.changeset(Some("svc_0.0.1")).unwrap(), head);
    }

    #[test]
    fn test_list_tags_prefix_and_scope() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_commit(dir.path());
        backend.create_tag("svc_0.0.1", "one", None, false).unwrap();
        backend.create_tag("other_0.0.1", "two", None, false).unwrap();

        let entries = backend.list_tags("svc_", TagScope::Position).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "svc_0.0.1");

        let all = backend.list_tags("", TagScope::Global).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_brother_tags() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_commit(dir.path());
        let head = backend.changeset(None).unwrap();
        backend.create_tag("svc_1.0.0-rc1", "rc", None, false).unwrap();
        backend.create_tag("svc_1.0.0", "rel", None, false).unwrap();

        let brothers = backend.tags_at(&head).unwrap();
        assert_eq!(brothers, vec!["svc_1.0.0", "svc_1.0.0-rc1"]);
    }

    #[test]
    fn test_detached_checkout_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_commit(dir.path());
        let first = backend.changeset(None).unwrap();

        fs::write(dir.path().join("file2.txt"), "more\n").unwrap();
        backend
            .commit("second", &[PathBuf::from("file2.txt")])
            .unwrap();
        let second = backend.changeset(None).unwrap();
        assert_ne!(first, second);

        backend
            .checkout(&CheckoutTarget::Revision(first.clone()))
            .unwrap();
        assert!(backend.is_detached_head().unwrap());
        assert_eq!(backend.changeset(None).unwrap(), first);

        backend.reset_to(&second).unwrap();
        assert_eq!(backend.changeset(None).unwrap(), second);
    }
}
