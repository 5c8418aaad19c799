// End-to-end coverage for the temporal indexer against a real (shelled-out
// `git`) throwaway repository, exercising the whole pipeline this crate's
// module-local `#[cfg(test)]` blocks only exercise piecewise: commit
// discovery, blob-hash deduplication, commit/tree/branch persistence, and
// checkpoint write/resume/delete. Uses `FakeEmbeddingProvider` (exposed via
// the `test-util` feature) so no network-reachable embedding provider is
// required.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use code_indexer_daemon::chunking::TokenWindowChunker;
use code_indexer_daemon::embedding::provider::FakeEmbeddingProvider;
use code_indexer_daemon::embedding::VectorCalculationManager;
use code_indexer_daemon::semantic::index_store::IndexStore;
use code_indexer_daemon::storage::blob_registry::BlobRegistry;
use code_indexer_daemon::storage::commit_store::CommitStore;
use code_indexer_daemon::storage::sql::SqlDb;
use code_indexer_daemon::temporal::blob_processor::HistoricalBlobProcessor;
use code_indexer_daemon::temporal::checkpoint::Checkpoint;
use code_indexer_daemon::temporal::git::GitRepo;
use code_indexer_daemon::temporal::indexer::{ResolvedStrategy, TemporalIndexer};

const DIM: usize = 4;

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .status()
        .expect("git must be on PATH for this test");
    assert!(status.success(), "git {:?} failed", args);
}

/// Builds a repo with `commit_count` commits touching `files_per_commit`
/// files, where each file's content only changes every 5th commit, used
/// to exercise deduplication.
fn build_repo(dir: &Path, commit_count: usize, files_per_commit: usize) {
    git(dir, &["init", "-q", "-b", "main"]);
    for i in 0..commit_count {
        for f in 0..files_per_commit {
            let generation = i / 5;
            let content = format!("// file {f} generation {generation}\nfn f{f}() -> usize {{ {generation} }}\n");
            std::fs::write(dir.join(format!("file{f}.rs")), content).unwrap();
        }
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", &format!("commit {i}")]);
    }
}

async fn new_indexer(repo: &Path, state_dir: &Path, checkpoint_interval: u64) -> TemporalIndexer {
    let commit_sql = SqlDb::open(&state_dir.join("commits.db")).await.unwrap();
    commit_sql.migrate_commit_store().await.unwrap();
    let commit_store = CommitStore::new(commit_sql);

    let blob_sql = SqlDb::open(&state_dir.join("blob_registry.db")).await.unwrap();
    blob_sql.migrate_blob_registry().await.unwrap();
    let blob_registry = BlobRegistry::new(blob_sql);

    let index_store = IndexStore::new(state_dir.join("index"), DIM);

    let chunker = Arc::new(TokenWindowChunker::new(200, 2).unwrap());
    let provider = Arc::new(FakeEmbeddingProvider { dim: DIM, max_batch_tokens: 2000 });
    let vector_manager = Arc::new(VectorCalculationManager::new(provider, 2).unwrap());
    let blob_processor = HistoricalBlobProcessor::new(chunker, vector_manager);

    let git_repo = GitRepo::open(repo).unwrap();
    let repo_identity_hash = blake3::hash(repo.to_string_lossy().as_bytes()).to_hex().to_string();

    TemporalIndexer::new(
        git_repo,
        blob_registry,
        commit_store,
        index_store,
        blob_processor,
        state_dir.join("checkpoint.json"),
        state_dir.join("temporal_meta.json"),
        checkpoint_interval,
        repo_identity_hash,
    )
}

#[tokio::test]
async fn deduplicates_blobs_reused_across_commits() {
    let repo_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    build_repo(repo_dir.path(), 10, 3);

    let indexer = new_indexer(repo_dir.path(), state_dir.path(), 1000).await;
    let pipes = code_indexer_daemon::application::background::IndexingPipes::detached();

    let outcome = indexer
        .index_commits(ResolvedStrategy::Current, None, None, true, pipes)
        .await
        .unwrap();

    assert_eq!(outcome.total_commits, 10);
    assert!(!outcome.partial);
    // Content only changes every 5th commit across 3 files: 2 distinct
    // generations (0 and 1) touch the files over the 10-commit span, so
    // total unique blobs stays far below 10*3 = 30 vector slots seen.
    assert!(outcome.total_unique_blobs < 10, "expected heavy dedup, got {}", outcome.total_unique_blobs);
    assert!(outcome.deduplication_ratio > 0.5, "dedup ratio was {}", outcome.deduplication_ratio);

    // Checkpoint is cleaned up after a completed run: a run of
    // index_commits that completes leaves no checkpoint file behind.
    assert!(!state_dir.path().join("checkpoint.json").exists());

    // Re-running with the same arguments is a no-op: every commit already
    // recorded is skipped via the checkpoint resume path.
    let indexer2 = new_indexer(repo_dir.path(), state_dir.path(), 1000).await;
    let pipes2 = code_indexer_daemon::application::background::IndexingPipes::detached();
    let rerun = indexer2
        .index_commits(ResolvedStrategy::Current, None, None, true, pipes2)
        .await
        .unwrap();
    assert_eq!(rerun.total_commits, 0);
}

#[tokio::test]
async fn every_recorded_commit_has_trees_and_branch_rows() {
    let repo_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    build_repo(repo_dir.path(), 5, 2);

    let indexer = new_indexer(repo_dir.path(), state_dir.path(), 1000).await;
    let pipes = code_indexer_daemon::application::background::IndexingPipes::detached();
    indexer.index_commits(ResolvedStrategy::Current, None, None, true, pipes).await.unwrap();

    let commit_sql = SqlDb::open(&state_dir.path().join("commits.db")).await.unwrap();
    let store = CommitStore::new(commit_sql);

    let head = GitRepo::open(repo_dir.path()).unwrap().current_head_commit_hash().unwrap();
    assert!(store.has_commit(&head).await.unwrap());
    let branches = store.branches_for(&head).await.unwrap();
    assert_eq!(branches, vec!["main".to_string()]);
}

#[tokio::test]
async fn zero_max_commits_indexes_as_a_no_op() {
    let repo_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    git(repo_dir.path(), &["init", "-q", "-b", "main"]);
    std::fs::write(repo_dir.path().join("README.md"), "hello\n").unwrap();
    git(repo_dir.path(), &["add", "-A"]);
    git(repo_dir.path(), &["commit", "-q", "-m", "only commit"]);

    let indexer = new_indexer(repo_dir.path(), state_dir.path(), 1000).await;
    let pipes = code_indexer_daemon::application::background::IndexingPipes::detached();
    let outcome = indexer
        .index_commits(ResolvedStrategy::Current, Some(0), None, true, pipes)
        .await
        .unwrap();

    assert_eq!(outcome.total_commits, 0);
    assert!(!state_dir.path().join("checkpoint.json").exists());
}

#[tokio::test]
async fn checkpoint_resumes_after_a_simulated_interrupt() {
    let repo_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    build_repo(repo_dir.path(), 12, 1);
    let checkpoint_path = state_dir.path().join("checkpoint.json");

    // First pass: cancel immediately, so the loop body never runs and the
    // run reports `partial=true` with zero commits processed — the
    // degenerate case of an interrupt landing before any progress is made.
    let indexer = new_indexer(repo_dir.path(), state_dir.path(), 2).await;
    let (pipes, _rx) = code_indexer_daemon::application::background::IndexingPipes::new(None);
    pipes.cancel();
    let outcome = indexer
        .index_commits(ResolvedStrategy::Current, None, None, true, pipes)
        .await
        .unwrap();
    assert!(outcome.partial);
    assert_eq!(outcome.total_commits, 0);

    // An interrupted run with nothing processed writes a checkpoint whose
    // `last_commit` is empty and therefore never resolves to a real commit;
    // the resume path must treat that as invalid and discard it rather than
    // getting stuck, so the second pass still covers every commit.
    let commit_sql = SqlDb::open(&state_dir.path().join("commits.db")).await.unwrap();
    let store = CommitStore::new(commit_sql);
    assert_eq!(store.total_commits().await.unwrap(), 0);

    let indexer2 = new_indexer(repo_dir.path(), state_dir.path(), 2).await;
    let pipes2 = code_indexer_daemon::application::background::IndexingPipes::detached();
    let resumed = indexer2
        .index_commits(ResolvedStrategy::Current, None, None, true, pipes2)
        .await
        .unwrap();
    assert_eq!(resumed.total_commits, 12);
    assert!(!checkpoint_path.exists());
}

#[tokio::test]
async fn checkpoint_file_reflects_progress_at_the_interval_boundary() {
    // Exercises the checkpoint-write path directly rather than racing a
    // cancellation signal against real indexing work: writes a checkpoint
    // as the indexer would at a 1000-commit interval boundary after 1500
    // commits, then asserts the resume path accepts it.
    let state_dir = tempfile::tempdir().unwrap();
    let repo_dir = tempfile::tempdir().unwrap();
    git(repo_dir.path(), &["init", "-q", "-b", "main"]);
    std::fs::write(repo_dir.path().join("a.rs"), "fn a() {}\n").unwrap();
    git(repo_dir.path(), &["add", "-A"]);
    git(repo_dir.path(), &["commit", "-q", "-m", "c0"]);
    let head = GitRepo::open(repo_dir.path()).unwrap().current_head_commit_hash().unwrap();

    let repo_identity_hash = blake3::hash(repo_dir.path().to_string_lossy().as_bytes()).to_hex().to_string();
    let mut checkpoint = Checkpoint::new(repo_identity_hash.clone());
    checkpoint.last_commit = head.clone();
    checkpoint.commits_processed = 1000;
    checkpoint.total_blobs = 1500;
    checkpoint.total_vectors = 600;
    let checkpoint_path = state_dir.path().join("checkpoint.json");
    checkpoint.write_atomic(&checkpoint_path).unwrap();

    let loaded = Checkpoint::read_if_valid(&checkpoint_path, &repo_identity_hash).unwrap();
    assert_eq!(loaded.commits_processed, 1000);
    assert_eq!(loaded.last_commit, head);

    // A checkpoint naming a commit that is actually reachable in the repo
    // is accepted as-is by the resume path (no reflog fallback needed).
    let git_repo = GitRepo::open(repo_dir.path()).unwrap();
    assert!(git_repo.is_commit_present(&loaded.last_commit));
}
