//! Git volume manager against a local origin repository.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

use crader_engine::GitVolume;

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn make_origin(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "dev@example.com"]);
    git(dir, &["config", "user.name", "Dev"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["checkout", "-q", "-b", "main"]);
    std::fs::write(dir.join("README.md"), b"# origin\n").unwrap();
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", "init"]);
}

#[tokio::test]
async fn test_mirror_worktree_roundtrip() {
    let dirs = TempDir::new().unwrap();
    let origin = dirs.path().join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    make_origin(&origin);

    let volume = GitVolume::open(dirs.path().join("volume"), Duration::from_secs(60)).unwrap();
    let url = origin.to_str().unwrap();

    // First call clones the mirror...
    let mirror = volume.ensure_mirror(url).await.unwrap();
    assert!(mirror.join("HEAD").exists());

    // ...second call fetches into it, same path.
    let again = volume.ensure_mirror(url).await.unwrap();
    assert_eq!(mirror, again);

    let branch = volume.default_branch(&mirror).await.unwrap();
    assert_eq!(branch, "main");

    let commit = volume.resolve_head(&mirror, &branch).await.unwrap();
    assert_eq!(commit.len(), 40);

    // Worktree materializes the commit and cleans up on drop.
    let worktree_path = {
        let worktree = volume.checkout_worktree(&mirror, &commit).await.unwrap();
        assert!(worktree.path().join("README.md").exists());
        worktree.path().to_path_buf()
    };
    assert!(!worktree_path.exists());
}

#[tokio::test]
async fn test_mirror_sees_new_commits_after_fetch() {
    let dirs = TempDir::new().unwrap();
    let origin = dirs.path().join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    make_origin(&origin);

    let volume = GitVolume::open(dirs.path().join("volume"), Duration::from_secs(60)).unwrap();
    let url = origin.to_str().unwrap();

    let mirror = volume.ensure_mirror(url).await.unwrap();
    let first = volume.resolve_head(&mirror, "main").await.unwrap();

    std::fs::write(origin.join("next.txt"), b"more\n").unwrap();
    git(&origin, &["add", "-A"]);
    git(&origin, &["commit", "-q", "-m", "second"]);

    volume.ensure_mirror(url).await.unwrap();
    let second = volume.resolve_head(&mirror, "main").await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_cleanup_orphans_removes_stale_workspaces() {
    let dirs = TempDir::new().unwrap();
    let volume = GitVolume::open(dirs.path().join("volume"), Duration::from_secs(60)).unwrap();

    let stale = dirs.path().join("volume/workspaces/stale-job");
    std::fs::create_dir_all(&stale).unwrap();

    // max_age zero: everything qualifies as stale.
    let removed = volume.cleanup_orphans(Duration::from_secs(0)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(!stale.exists());

    let kept = dirs.path().join("volume/workspaces/fresh-job");
    std::fs::create_dir_all(&kept).unwrap();
    let removed = volume
        .cleanup_orphans(Duration::from_secs(24 * 3600))
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert!(kept.exists());

    let missing = volume.resolve_head(Path::new("/nonexistent"), "main").await;
    assert!(missing.is_err());
}
