//! Mercurial backend via the system `hg` binary.
//!
//! Mercurial has no detached-HEAD concept; "detached" here means the working
//! directory parent is not the tip of its branch, which is the same condition
//! for stamping purposes: new commits would not extend the published line.

use crate::backend::{
    CheckoutTarget, TagEntry, TagScope, VcsType, VersionControlBackend, STAMP_USER_EMAIL,
    STAMP_USER_NAME,
};
use crate::error::{Result, VerstampError};
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct MercurialBackend {
    root: PathBuf,
}

impl MercurialBackend {
    /// Open the repository rooted at `path` (must contain `.hg`).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.join(".hg").exists() {
            return Err(VerstampError::backend(format!(
                "Not a mercurial repository: {}",
                root.display()
            )));
        }
        Ok(MercurialBackend { root })
    }

    fn hg(&self) -> Command {
        let mut cmd = Command::new("hg");
        cmd.arg("-R").arg(&self.root);
        cmd
    }

    /// Run an hg command; non-zero exit maps to a backend error carrying
    /// stderr. `ok_codes` lists additional exit codes treated as success
    /// (hg uses 1 for "nothing found" in several read commands).
    fn run(&self, args: &[&str], ok_codes: &[i32]) -> Result<(i32, String)> {
        let output = self
            .hg()
            .args(args)
            .output()
            .map_err(|e| VerstampError::backend(format!("Failed to run hg: {}", e)))?;
        let code = output.status.code().unwrap_or(-1);
        if code == 0 || ok_codes.contains(&code) {
            Ok((code, String::from_utf8_lossy(&output.stdout).to_string()))
        } else {
            Err(VerstampError::backend(format!(
                "hg {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn stamp_user() -> String {
        format!("{} <{}>", STAMP_USER_NAME, STAMP_USER_EMAIL)
    }

    fn log_entry(&self, revset: &str) -> Result<Option<(String, String, String, i64)>> {
        // node \x1f user \x1f desc \x1f epoch
        let (code, out) = self.run(
            &[
                "log",
                "-l",
                "1",
                "-r",
                revset,
                "-T",
                "{node}\x1f{author}\x1f{desc}\x1f{date(date, '%s')}",
            ],
            &[1],
        )?;
        if code != 0 || out.is_empty() {
            return Ok(None);
        }
        let mut parts = out.splitn(4, '\x1f');
        let node = parts.next().unwrap_or_default().to_string();
        let user = parts.next().unwrap_or_default().to_string();
        let desc = parts.next().unwrap_or_default().to_string();
        let created = parts
            .next()
            .unwrap_or_default()
            .trim()
            .parse::<i64>()
            .unwrap_or(0);
        Ok(Some((node, user, desc, created)))
    }
}

impl VersionControlBackend for MercurialBackend {
    fn vcs_type(&self) -> VcsType {
        VcsType::Mercurial
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn changeset(&self, tag: Option<&str>) -> Result<String> {
        let rev = tag.unwrap_or(".");
        let (_, out) = self.run(&["log", "-l", "1", "-r", rev, "-T", "{node}"], &[])?;
        if out.is_empty() {
            return Err(VerstampError::backend(format!(
                "Cannot resolve revision '{}'",
                rev
            )));
        }
        Ok(out.trim().to_string())
    }

    fn has_pending_changes(&self) -> Result<bool> {
        let (_, out) = self.run(&["status"], &[])?;
        Ok(!out.trim().is_empty())
    }

    fn has_outgoing_changes(&self) -> Result<bool> {
        // Exit code 1 means "no outgoing changesets".
        let (code, _) = self.run(&["outgoing", "-q", "-l", "1"], &[1])?;
        Ok(code == 0)
    }

    fn is_detached_head(&self) -> Result<bool> {
        // Working-directory parent that has branch-local children is the
        // mercurial analogue of a detached HEAD.
        let (code, out) = self.run(
            &["log", "-l", "1", "-r", "children(.) and branch(.)", "-T", "{node}"],
            &[1],
        )?;
        Ok(code == 0 && !out.trim().is_empty())
    }

    fn active_branch(&self) -> Result<String> {
        let (_, out) = self.run(&["branch"], &[])?;
        Ok(out.trim().to_string())
    }

    fn default_branch(&self) -> Result<String> {
        Ok("default".to_string())
    }

    fn remote_url(&self) -> Result<String> {
        let (_, out) = self.run(&["paths", "default"], &[])?;
        let url = out.trim();
        if url.is_empty() {
            return Err(VerstampError::backend("Repository has no default path"));
        }
        Ok(url.to_string())
    }

    fn list_tags(&self, prefix: &str, scope: TagScope) -> Result<Vec<TagEntry>> {
        let revset = match scope {
            TagScope::Position => "tag() and ancestors(.)".to_string(),
            TagScope::Branch => "tag() and ancestors(max(branch(.)))".to_string(),
            TagScope::Global => "tag()".to_string(),
        };
        let (_, out) = self.run(
            &["log", "-r", &revset, "-T", "{node}\x1f{tags}\x1e"],
            &[1],
        )?;

        let mut entries = Vec::new();
        for rec in out.split('\x1e').filter(|r| !r.trim().is_empty()) {
            let mut parts = rec.splitn(2, '\x1f');
            let node = parts.next().unwrap_or_default().trim().to_string();
            let tags = parts.next().unwrap_or_default();
            for tag in tags.split_whitespace().filter(|t| *t != "tip") {
                if !tag.starts_with(prefix) {
                    continue;
                }
                // The tagging commit (the .hgtags edit) carries the tagger
                // identity, the record payload and the creation time.
                let tagging = self.log_entry(&format!(
                    "limit(file('.hgtags') and descendants({}), 1)",
                    node
                ))?;
                let (tagger, message, created) = match tagging {
                    Some((_, user, desc, created)) => (Some(user), Some(desc), created),
                    None => (None, None, 0),
                };
                entries.push(TagEntry {
                    name: tag.to_string(),
                    target: node.clone(),
                    tagger: tagger
                        .map(|u| u.split('<').next().unwrap_or("").trim().to_string()),
                    message,
                    created,
                });
            }
        }
        entries.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        Ok(entries)
    }

    fn tags_at(&self, changeset: &str) -> Result<Vec<String>> {
        let (code, out) = self.run(&["log", "-l", "1", "-r", changeset, "-T", "{tags}"], &[1])?;
        if code != 0 {
            return Ok(Vec::new());
        }
        let mut tags: Vec<String> = out
            .split_whitespace()
            .filter(|t| *t != "tip")
            .map(str::to_string)
            .collect();
        tags.sort();
        Ok(tags)
    }

    fn tag_entry(&self, name: &str) -> Result<Option<TagEntry>> {
        let entries = self.list_tags(name, TagScope::Global)?;
        Ok(entries.into_iter().find(|e| e.name == name))
    }

    fn commit(&self, message: &str, include: &[PathBuf]) -> Result<String> {
        let mut args: Vec<String> = vec![
            "commit".to_string(),
            "-m".to_string(),
            message.to_string(),
            "-u".to_string(),
            Self::stamp_user(),
        ];
        for path in include {
            self.run(&["add", &path.to_string_lossy()], &[])?;
            args.push(path.to_string_lossy().to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        self.run(&arg_refs, &[])?;
        self.changeset(None)
    }

    fn create_tag(
        &self,
        name: &str,
        message: &str,
        revision: Option<&str>,
        force: bool,
    ) -> Result<()> {
        let rev = revision.unwrap_or(".");
        let user = Self::stamp_user();
        let mut args = vec!["tag", "-r", rev, "-m", message, "-u", &user];
        if force {
            args.push("-f");
        }
        args.push(name);
        self.run(&args, &[])?;
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        let user = Self::stamp_user();
        self.run(
            &["tag", "--remove", "-m", "verstamp: remove tag", "-u", &user, name],
            &[],
        )?;
        Ok(())
    }

    fn push(&self, _tags: &[String], _force_tags: &[String]) -> Result<()> {
        // Mercurial tags travel with the tagging commits; one push carries
        // branch and tags together. Exit code 1 means nothing to push.
        let output = self
            .hg()
            .args(["push"])
            .output()
            .map_err(|e| VerstampError::backend(format!("Failed to run hg: {}", e)))?;
        let code = output.status.code().unwrap_or(-1);
        if code == 0 || code == 1 {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("push creates new remote head") || stderr.contains("abort: push") {
            return Err(VerstampError::race(format!(
                "Push rejected: {}",
                stderr.trim()
            )));
        }
        Err(VerstampError::backend(format!(
            "hg push failed: {}",
            stderr.trim()
        )))
    }

    fn pull(&self) -> Result<()> {
        self.run(&["pull", "-u"], &[1]).map(|_| ())
    }

    fn checkout(&self, target: &CheckoutTarget) -> Result<()> {
        let rev = match target {
            CheckoutTarget::Revision(rev) => rev.clone(),
            CheckoutTarget::Tag(tag) => tag.clone(),
            CheckoutTarget::Branch(branch) => branch.clone(),
        };
        self.run(&["update", "-C", "-r", &rev], &[]).map(|_| ())
    }

    fn reset_to(&self, changeset: &str) -> Result<()> {
        self.run(&["update", "-C", "-r", changeset], &[]).map(|_| ())
    }
}

/// Clone `remote` into `dest`.
pub fn clone(remote: &str, dest: &Path) -> Result<()> {
    let output = Command::new("hg")
        .arg("clone")
        .arg(remote)
        .arg(dest)
        .output()
        .map_err(|e| VerstampError::backend(format!("Failed to run hg: {}", e)))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(VerstampError::backend(format!(
            "Clone of '{}' failed: {}",
            remote,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
