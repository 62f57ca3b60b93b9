//! Shared helpers: throwaway git repositories with local bare remotes.

#![allow(dead_code)]

use git2::{BranchType, Repository};
use std::fs;
use std::path::{Path, PathBuf};

/// Stage `paths` and commit them with the test user identity.
pub fn commit_paths(repo_dir: &Path, paths: &[&str], message: &str) -> String {
    let repo = Repository::open(repo_dir).unwrap();
    let mut index = repo.index().unwrap();
    for path in paths {
        index.add_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = repo.signature().unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
        .to_string()
}

pub fn commit_file(repo_dir: &Path, name: &str, content: &str, message: &str) -> String {
    fs::write(repo_dir.join(name), content).unwrap();
    commit_paths(repo_dir, &[name], message)
}

/// Push the active branch to origin and refresh the tracking ref.
pub fn push_branch(repo_dir: &Path) {
    let repo = Repository::open(repo_dir).unwrap();
    let branch = repo.head().unwrap().shorthand().unwrap().to_string();
    let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
    let mut remote = repo.find_remote("origin").unwrap();
    remote.push(&[refspec.as_str()], None).unwrap();
    remote
        .fetch(&["+refs/heads/*:refs/remotes/origin/*"], None, None)
        .unwrap();
}

/// Create a working repository with one seed commit, backed by a local bare
/// origin it tracks. Returns (workdir, origin path).
pub fn repo_with_origin(base: &Path, name: &str) -> (PathBuf, PathBuf) {
    let origin = base.join(format!("{}.git", name));
    Repository::init_bare(&origin).unwrap();

    let work = base.join(name);
    let repo = Repository::init(&work).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
    }
    drop(repo);
    commit_file(&work, "README.md", "seed\n", "initial commit");

    let repo = Repository::open(&work).unwrap();
    repo.remote("origin", origin.to_str().unwrap()).unwrap();
    let branch_name = repo.head().unwrap().shorthand().unwrap().to_string();
    {
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch_name);
        let mut remote = repo.find_remote("origin").unwrap();
        remote.push(&[refspec.as_str()], None).unwrap();
        remote
            .fetch(&["+refs/heads/*:refs/remotes/origin/*"], None, None)
            .unwrap();
    }
    let mut branch = repo.find_branch(&branch_name, BranchType::Local).unwrap();
    branch
        .set_upstream(Some(&format!("origin/{}", branch_name)))
        .unwrap();

    (work, origin)
}

pub fn head_of(repo_dir: &Path) -> String {
    let repo = Repository::open(repo_dir).unwrap();
    let id = repo
        .head()
        .unwrap()
        .peel_to_commit()
        .unwrap()
        .id()
        .to_string();
    id
}

/// Record a dependency pin in the app's conf.toml, commit and push it.
pub fn configure_dep(work: &Path, app: &str, dep_path: &str, dep_remote: &Path) {
    use verstamp::backend::VcsType;
    use verstamp::config::{self, DependencyPin};

    let mut conf = config::load_app_config(work, app).unwrap();
    conf.deps.insert(
        dep_path.to_string(),
        DependencyPin {
            vcs_type: VcsType::Git,
            remote: dep_remote.to_str().unwrap().to_string(),
            branch: None,
            tag: None,
            hash: None,
        },
    );
    config::save_app_config(work, app, &conf).unwrap();
    let rel = format!(".verstamp/{}/conf.toml", app);
    commit_paths(work, &[&rel], "configure dependencies");
    push_branch(work);
}
