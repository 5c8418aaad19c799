// Git plumbing for the temporal indexer, built on `gix` rather than
// shelled-out `git` subprocesses. `gix` is already a teacher dependency and
// already used for commit/tree diffing in the retained reference module
// `git::commit_statistics`; this module generalizes that single-iterator,
// manual-parent-walk style into full history enumeration, blob listing,
// branch containment, and reflog-based ancestor recovery.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use gix::bstr::ByteSlice;
use regex::Regex;

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct GitCommit {
    pub hash: String,
    pub timestamp: i64,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub parent_hashes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub file_path: String,
    pub blob_hash: String,
    pub size: u64,
}

fn to_err(e: impl std::fmt::Display) -> DaemonError {
    DaemonError::StorageError(e.to_string())
}

pub struct GitRepo {
    repo: gix::Repository,
}

impl GitRepo {
    pub fn open(path: &Path) -> Result<Self, DaemonError> {
        let repo = gix::open(path).map_err(to_err)?;
        Ok(Self { repo })
    }

    pub fn current_branch_name(&self) -> Result<String, DaemonError> {
        let head = self.repo.head_name().map_err(to_err)?;
        match head {
            Some(name) => Ok(name.shorten().to_string()),
            None => Ok("HEAD".to_string()),
        }
    }

    pub fn current_head_commit_hash(&self) -> Result<String, DaemonError> {
        let id = self
            .repo
            .head()
            .map_err(to_err)?
            .into_fully_peeled_id()
            .map_err(to_err)?
            .map_err(to_err)?;
        Ok(id.to_string())
    }

    pub fn all_branch_names(&self) -> Result<Vec<String>, DaemonError> {
        let platform = self.repo.references().map_err(to_err)?;
        let mut names = Vec::new();
        for reference in platform.local_branches().map_err(to_err)? {
            let reference = reference.map_err(to_err)?;
            names.push(reference.name().shorten().to_string());
        }
        Ok(names)
    }

    /// Glob-style (`*`, `?`) matching against `all_branch_names`. Returns
    /// `NoMatchingBranches` (via an empty vec; the caller attaches the
    /// available-branch hint) when nothing matches.
    pub fn branches_matching(&self, patterns: &[String]) -> Result<Vec<String>, DaemonError> {
        let all = self.all_branch_names()?;
        let regexes: Vec<Regex> = patterns.iter().map(|p| glob_to_regex(p)).collect();
        Ok(all
            .into_iter()
            .filter(|name| regexes.iter().any(|re| re.is_match(name)))
            .collect())
    }

    fn branch_head_id(&self, branch_name: &str) -> Result<gix::ObjectId, DaemonError> {
        let reference = self
            .repo
            .find_reference(branch_name)
            .map_err(to_err)?;
        reference
            .into_fully_peeled_id()
            .map_err(to_err)
            .map(|id| id.detach())
    }

    /// Full-history enumeration reachable from the given branch heads, in
    /// ascending timestamp order (`--reverse` equivalent), optionally
    /// bounded by `since_date_unix` and `max_commits`. Performed as a BFS
    /// over parent links rather than a true topological sort; ties on
    /// timestamp are broken by hash for determinism, which is sufficient
    /// for this design's use (dedup and checkpointing key on commit hash,
    /// not strict ancestry order).
    pub fn commits_reachable_from(
        &self,
        branch_names: &[String],
        since_date_unix: Option<i64>,
        max_commits: Option<u64>,
    ) -> Result<Vec<GitCommit>, DaemonError> {
        let mut roots = Vec::new();
        for name in branch_names {
            roots.push(self.branch_head_id(name)?);
        }

        let mut seen: HashSet<gix::ObjectId> = HashSet::new();
        let mut queue: VecDeque<gix::ObjectId> = roots.into_iter().collect();
        let mut commits = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let commit = id.attach(&self.repo).object().map_err(to_err)?.into_commit();
            let decoded = commit.decode().map_err(to_err)?;
            let timestamp = decoded.time().seconds;
            if let Some(since) = since_date_unix {
                if timestamp < since {
                    continue;
                }
            }

            let author = decoded.author();
            let parent_hashes: Vec<String> = decoded.parents().map(|p| p.to_string()).collect();
            commits.push(GitCommit {
                hash: id.to_string(),
                timestamp,
                author_name: author.name.to_string(),
                author_email: author.email.to_string(),
                message: decoded.message().to_str_lossy().to_string(),
                parent_hashes,
            });

            for parent in commit.parent_ids() {
                queue.push_back(parent.detach());
            }
        }

        commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.hash.cmp(&b.hash)));
        if let Some(max) = max_commits {
            commits.truncate(max as usize);
        }
        Ok(commits)
    }

    pub fn blobs_for_commit(&self, commit_hash: &str) -> Result<Vec<BlobEntry>, DaemonError> {
        let id = gix::ObjectId::from_hex(commit_hash.as_bytes()).map_err(to_err)?;
        let commit = self
            .repo
            .find_object(id)
            .map_err(to_err)?
            .into_commit();
        let tree = commit.tree().map_err(to_err)?;
        let mut out = Vec::new();
        collect_blobs(&tree, "", &mut out)?;
        Ok(out)
    }

    pub fn read_blob(&self, blob_hash: &str) -> Result<Vec<u8>, DaemonError> {
        let id = gix::ObjectId::from_hex(blob_hash.as_bytes()).map_err(to_err)?;
        let object = self.repo.find_object(id).map_err(to_err)?;
        Ok(object.data.to_vec())
    }

    pub fn is_commit_present(&self, commit_hash: &str) -> bool {
        gix::ObjectId::from_hex(commit_hash.as_bytes())
            .ok()
            .and_then(|id| self.repo.find_object(id).ok())
            .is_some()
    }

    /// For `all`-strategy indexing: every branch whose tip commit can reach
    /// `commit_hash` by walking parent links. Naive O(branches × history)
    /// but correct, and this is only invoked once per commit during a full
    /// history run — a second pass over branches per commit, exactly as
    /// the design's branch-metadata placement rule prescribes doing inline
    /// rather than as a cheaper but staler precomputation.
    pub fn branches_containing(&self, commit_hash: &str, all_branches: &[String]) -> Result<Vec<String>, DaemonError> {
        let target = gix::ObjectId::from_hex(commit_hash.as_bytes()).map_err(to_err)?;
        let mut matches = Vec::new();
        for branch in all_branches {
            let head = self.branch_head_id(branch)?;
            if self.is_ancestor_or_self(head, target)? {
                matches.push(branch.clone());
            }
        }
        Ok(matches)
    }

    fn is_ancestor_or_self(&self, from: gix::ObjectId, target: gix::ObjectId) -> Result<bool, DaemonError> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if id == target {
                return Ok(true);
            }
            if !seen.insert(id) {
                continue;
            }
            let commit = id.attach(&self.repo).object().map_err(to_err)?.into_commit();
            for parent in commit.parent_ids() {
                queue.push_back(parent.detach());
            }
        }
        Ok(false)
    }

    /// Checkpoint recovery: if `lost_commit` is no longer reachable from
    /// any current branch (history was rewritten), walk HEAD's reflog
    /// looking for the most recent previous HEAD value that is still
    /// present in the object database — the nearest common ancestor the
    /// design calls for, approximated as "last reflog entry we can still
    /// resolve".
    pub fn find_common_ancestor_via_reflog(&self, lost_commit: &str) -> Option<String> {
        let head = self.repo.head().ok()?;
        let log = head.log_iter().all().ok()??;
        for entry in log.flatten() {
            let candidate = entry.previous_oid().to_string();
            if self.is_commit_present(&candidate) {
                return Some(candidate);
            }
        }
        let _ = lost_commit;
        None
    }
}

fn collect_blobs(tree: &gix::Tree<'_>, prefix: &str, out: &mut Vec<BlobEntry>) -> Result<(), DaemonError> {
    for entry in tree.iter() {
        let entry = entry.map_err(to_err)?;
        let name = entry.filename().to_str_lossy().to_string();
        let path = if prefix.is_empty() { name } else { format!("{prefix}/{name}") };

        if entry.mode().is_tree() {
            let subtree = entry.object().map_err(to_err)?.into_tree();
            collect_blobs(&subtree, &path, out)?;
        } else if entry.mode().is_blob() {
            let object = entry.object().map_err(to_err)?;
            out.push(BlobEntry {
                file_path: path,
                blob_hash: entry.oid().to_string(),
                size: object.data.len() as u64,
            });
        }
    }
    Ok(())
}

fn glob_to_regex(pattern: &str) -> Regex {
    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => escaped.push_str(".*"),
            '?' => escaped.push('.'),
            c if "()[]{}+.^$|\\".contains(c) => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped.push('$');
    Regex::new(&escaped).unwrap_or_else(|_| Regex::new("$^").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_prefix() {
        let re = glob_to_regex("release/*");
        assert!(re.is_match("release/1.0"));
        assert!(!re.is_match("main"));
    }

    #[test]
    fn glob_without_wildcard_is_exact() {
        let re = glob_to_regex("main");
        assert!(re.is_match("main"));
        assert!(!re.is_match("mainline"));
    }
}
