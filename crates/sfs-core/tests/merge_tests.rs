#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

use sfs_core::batch::BatchStatus;
use sfs_core::catalog::Catalog;
use sfs_core::merge::{ConflictManifest, ConflictPolicy, MergeEngine, MergeOptions, MergeResult, MergeState, Resolution};
use sfs_core::platform;
use sfs_core::storage::{MemoryStore, MetadataStore};
use sfs_core::Error;

struct Fixture {
    _tmp: TempDir,
    media: PathBuf,
    catalog: Catalog<MemoryStore>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let media = tmp.path().join("media");
        fs::create_dir_all(&media).unwrap();
        let cat = tmp.path().join("cat");
        fs::create_dir_all(&cat).unwrap();
        let catalog = Catalog::with_store(&cat, MemoryStore::new()).unwrap();
        let media = fs::canonicalize(media).unwrap();
        Fixture {
            _tmp: tmp,
            media,
            catalog,
        }
    }

    /// Create a physical file of `size` bytes and a managed link to it at `rel`.
    fn link(&mut self, rel: &str, physical: &str, size: usize) {
        let source = self.media.join(physical);
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, vec![b'z'; size]).unwrap();
        self.link_existing(rel, &source);
    }

    fn link_existing(&mut self, rel: &str, source: &Path) {
        let metadata = fs::metadata(source).unwrap();
        self.catalog.create_link(Path::new(rel), source).unwrap();
        self.catalog
            .record_metadata(
                Path::new(rel),
                metadata.len(),
                metadata.modified().unwrap().into(),
                source,
            )
            .unwrap();
    }

    fn dir(&self, rel: &str) -> PathBuf {
        self.catalog.root().join(rel)
    }

    fn merge(&mut self, options: &MergeOptions) -> Result<MergeResult, Error> {
        let (target, source) = (self.dir("target"), self.dir("source"));
        MergeEngine::new(&mut self.catalog).merge(&target, &source, options)
    }

    fn recorded_size(&self, rel: &str) -> Option<u64> {
        self.catalog
            .lookup_metadata(Path::new(rel))
            .unwrap()
            .map(|r| r.size)
    }

    fn content_len(&self, rel: &str) -> usize {
        fs::read(self.dir(rel)).unwrap().len()
    }
}

fn continue_with(policy: ConflictPolicy) -> MergeOptions {
    MergeOptions {
        continue_merge: true,
        on_conflict: policy,
        ..MergeOptions::default()
    }
}

/// target/a.txt (10 bytes), source/a.txt (20 bytes), source/b.txt (new)
fn one_conflict() -> Fixture {
    let mut fx = Fixture::new();
    fx.link("target/a.txt", "t/a.txt", 10);
    fx.link("source/a.txt", "s/a.txt", 20);
    fx.link("source/b.txt", "s/b.txt", 5);
    fx
}

#[test]
fn test_merge_without_conflicts_relocates_everything() {
    let mut fx = Fixture::new();
    fx.link("target/e.txt", "e.txt", 1);
    fx.link("source/d.txt", "d.txt", 2);
    fx.link("source/sub/c.txt", "sub/c.txt", 3);
    fx.link("source/sub/deeper/f.txt", "sub/deeper/f.txt", 4);

    let result = fx.merge(&MergeOptions::default()).unwrap();
    assert!(result.is_completed());
    assert_eq!(result.stats.moved, 3);
    assert_eq!(result.stats.conflicts, 0);

    for (rel, len) in [
        ("target/e.txt", 1),
        ("target/d.txt", 2),
        ("target/sub/c.txt", 3),
        ("target/sub/deeper/f.txt", 4),
    ] {
        assert!(platform::is_symlink(&fx.dir(rel)), "{} should be a link", rel);
        assert_eq!(fx.recorded_size(rel), Some(len as u64));
        assert_eq!(fx.content_len(rel), len);
    }
    assert!(fx
        .catalog
        .store()
        .records_under(Path::new("source"))
        .unwrap()
        .is_empty());
    assert!(!ConflictManifest::path_for(&fx.dir("target")).exists());
}

#[test]
fn test_one_conflict_halts_with_manifest() {
    let mut fx = one_conflict();
    let result = fx.merge(&MergeOptions::default()).unwrap();

    assert!(matches!(
        result.state,
        MergeState::AwaitingResolution { remaining: 1, .. }
    ));
    assert_eq!(result.stats.moved, 1);
    assert_eq!(result.stats.conflicts, 1);

    // b.txt was applied immediately, a.txt untouched on both sides.
    assert!(platform::is_symlink(&fx.dir("target/b.txt")));
    assert_eq!(fx.recorded_size("target/a.txt"), Some(10));
    assert_eq!(fx.recorded_size("source/a.txt"), Some(20));

    let manifest_path = result.manifest_path().unwrap().to_path_buf();
    assert_eq!(manifest_path, fx.dir("target").join("target.merge.sfs"));
    let manifest = ConflictManifest::load_pending(&fx.dir("target")).unwrap();
    assert_eq!(manifest.items.len(), 1);
    let conflict = &manifest.items[0];
    assert_eq!(conflict.relative_path, PathBuf::from("a.txt"));
    assert_eq!(conflict.target.size, Some(10));
    assert_eq!(conflict.source.size, Some(20));
    assert_eq!(conflict.resolution, Resolution::Unresolved);
    assert_eq!(manifest.source.as_deref(), Some(fx.dir("source").as_path()));
}

#[test]
fn test_pending_manifest_blocks_a_fresh_merge() {
    let mut fx = one_conflict();
    fx.merge(&MergeOptions::default()).unwrap();
    fx.link("source/late.txt", "s/late.txt", 7);

    let result = fx.merge(&MergeOptions::default());
    assert!(matches!(result, Err(Error::ReportExists(_))));
    // Nothing moved.
    assert!(platform::is_symlink(&fx.dir("source/late.txt")));

    let overridden = fx
        .merge(&MergeOptions {
            override_existing: true,
            ..MergeOptions::default()
        })
        .unwrap();
    assert_eq!(overridden.stats.moved, 1);
    assert!(platform::is_symlink(&fx.dir("target/late.txt")));
}

#[test]
fn test_keep_both_keeps_both_contents_reachable() {
    let mut fx = one_conflict();
    let result = fx.merge(&continue_with(ConflictPolicy::KeepBoth)).unwrap();

    assert!(result.is_completed());
    assert_eq!(result.stats.kept_both, 1);
    assert_eq!(fx.content_len("target/a.txt"), 10);
    assert_eq!(fx.content_len("target/a.merged.txt"), 20);
    assert_eq!(fx.recorded_size("target/a.merged.txt"), Some(20));
    assert!(!platform::exists_no_follow(&fx.dir("source/a.txt")));

    let manifest = ConflictManifest::load(&ConflictManifest::path_for(&fx.dir("target"))).unwrap();
    assert_eq!(manifest.status, BatchStatus::Consumed);
}

#[test]
fn test_keep_both_picks_a_free_name() {
    let mut fx = one_conflict();
    fx.link("target/a.merged.txt", "t/a.merged.txt", 3);

    fx.merge(&continue_with(ConflictPolicy::KeepBoth)).unwrap();
    assert_eq!(fx.content_len("target/a.merged.txt"), 3);
    assert_eq!(fx.content_len("target/a.merged-2.txt"), 20);
}

#[test]
fn test_keep_source_replaces_target() {
    let mut fx = one_conflict();
    let result = fx
        .merge(&MergeOptions {
            del_json: true,
            ..continue_with(ConflictPolicy::KeepSource)
        })
        .unwrap();

    assert!(result.is_completed());
    assert_eq!(result.stats.kept_source, 1);
    assert_eq!(fx.recorded_size("target/a.txt"), Some(20));
    assert_eq!(fx.content_len("target/a.txt"), 20);
    assert!(!ConflictManifest::path_for(&fx.dir("target")).exists());
}

#[test]
fn test_keep_source_leaves_both_sides_intact_when_blocked() {
    let mut fx = Fixture::new();
    fx.link("target/x/keep.txt", "t/keep.txt", 3);
    fs::write(fx.dir("target/x/notes.txt"), "mine").unwrap();
    fx.link("source/x", "s/x", 4);

    let result = fx.merge(&continue_with(ConflictPolicy::KeepSource)).unwrap();
    assert!(matches!(result.state, MergeState::AwaitingResolution { remaining: 1, .. }));
    assert_eq!(result.stats.failed, 1);
    assert!(fx.catalog.is_managed_link(&fx.dir("target/x/keep.txt")));
    assert!(fx.catalog.is_managed_link(&fx.dir("source/x")));
    assert!(fx.dir("target/x/notes.txt").is_file());

    // Once the foreign file is gone the saved decision goes through.
    fs::remove_file(fx.dir("target/x/notes.txt")).unwrap();
    let result = fx
        .merge(&MergeOptions {
            use_json: true,
            ..MergeOptions::default()
        })
        .unwrap();
    assert!(result.is_completed());
    assert_eq!(result.stats.kept_source, 1);
    assert!(platform::is_symlink(&fx.dir("target/x")));
    assert_eq!(fx.recorded_size("target/x"), Some(4));
    assert_eq!(fx.recorded_size("target/x/keep.txt"), None);
}

#[test]
fn test_pending_manifest_does_not_block_a_merge_without_conflicts() {
    let mut fx = one_conflict();
    fx.merge(&MergeOptions::default()).unwrap();
    fx.catalog.remove_entry(Path::new("source/a.txt")).unwrap();
    fx.link("source/late.txt", "s/late.txt", 7);

    let result = fx.merge(&MergeOptions::default()).unwrap();
    assert!(result.is_completed());
    assert_eq!(result.stats.moved, 1);
    assert!(platform::is_symlink(&fx.dir("target/late.txt")));
    // The pending manifest is left for the user.
    let manifest = ConflictManifest::load(&ConflictManifest::path_for(&fx.dir("target"))).unwrap();
    assert_eq!(manifest.status, BatchStatus::Pending);
}

#[test]
fn test_identical_entries_are_not_conflicts() {
    let mut fx = Fixture::new();
    fx.link("target/same.txt", "same.txt", 4);
    let physical = fx.media.join("same.txt");
    fx.link_existing("source/same.txt", &physical);

    let result = fx.merge(&MergeOptions::default()).unwrap();
    assert!(result.is_completed());
    assert_eq!(result.stats.identical, 1);
    assert_eq!(result.stats.conflicts, 0);
    assert!(!platform::exists_no_follow(&fx.dir("source/same.txt")));
    assert!(platform::is_symlink(&fx.dir("target/same.txt")));
}

#[test]
fn test_json_resume_applies_only_remaining_conflicts() {
    let mut fx = one_conflict();
    fx.link("target/c.txt", "t/c.txt", 1);
    fx.link("source/c.txt", "s/c.txt", 2);

    let first = fx.merge(&MergeOptions::default()).unwrap();
    assert!(matches!(
        first.state,
        MergeState::AwaitingResolution { remaining: 2, .. }
    ));

    // Decide a.txt only.
    let target = fx.dir("target");
    let mut manifest = ConflictManifest::load_pending(&target).unwrap();
    for conflict in &mut manifest.items {
        if conflict.relative_path == Path::new("a.txt") {
            conflict.resolution = Resolution::KeepSource;
        }
    }
    manifest.save(&target).unwrap();

    let resume = MergeOptions {
        use_json: true,
        ..MergeOptions::default()
    };
    let second = fx.merge(&resume).unwrap();
    assert!(matches!(
        second.state,
        MergeState::AwaitingResolution { remaining: 1, .. }
    ));
    assert_eq!(second.stats.kept_source, 1);
    assert_eq!(fx.recorded_size("target/a.txt"), Some(20));

    let mut manifest = ConflictManifest::load_pending(&target).unwrap();
    assert_eq!(manifest.items.len(), 1);
    assert_eq!(manifest.items[0].relative_path, PathBuf::from("c.txt"));
    manifest.items[0].resolution = Resolution::KeepTarget;
    manifest.save(&target).unwrap();

    let third = fx.merge(&resume).unwrap();
    assert!(third.is_completed());
    assert_eq!(third.stats.kept_target, 1);
    assert_eq!(third.stats.kept_source, 0);
    assert_eq!(fx.recorded_size("target/c.txt"), Some(1));
    assert!(!platform::exists_no_follow(&fx.dir("source/c.txt")));
}

#[test]
fn test_json_resume_with_continue_fills_the_gaps() {
    let mut fx = one_conflict();
    fx.merge(&MergeOptions::default()).unwrap();

    let result = fx
        .merge(&MergeOptions {
            use_json: true,
            ..continue_with(ConflictPolicy::KeepBoth)
        })
        .unwrap();
    assert!(result.is_completed());
    assert_eq!(result.stats.kept_both, 1);
}

#[test]
fn test_json_resume_requires_a_manifest() {
    let mut fx = one_conflict();
    let result = fx.merge(&MergeOptions {
        use_json: true,
        ..MergeOptions::default()
    });
    assert!(matches!(result, Err(Error::ReportNotFound(_))));
    assert!(platform::is_symlink(&fx.dir("source/b.txt")));
}

#[test]
fn test_del_source_waits_for_all_conflicts() {
    let mut fx = one_conflict();
    let gated = fx
        .merge(&MergeOptions {
            del_source: true,
            ..MergeOptions::default()
        })
        .unwrap();
    assert!(!gated.stats.source_deleted);
    assert!(fx.dir("source").is_dir());
    assert!(platform::is_symlink(&fx.dir("source/a.txt")));

    let done = fx
        .merge(&MergeOptions {
            use_json: true,
            del_source: true,
            del_json: true,
            ..continue_with(ConflictPolicy::KeepTarget)
        })
        .unwrap();
    assert!(done.is_completed());
    assert!(done.stats.source_deleted);
    assert!(!fx.dir("source").exists());
    assert_eq!(fx.recorded_size("target/a.txt"), Some(10));
    assert!(fx
        .catalog
        .store()
        .records_under(Path::new("source"))
        .unwrap()
        .is_empty());
}

#[test]
fn test_invalid_targets_fail_before_scanning() {
    let mut fx = one_conflict();
    fs::create_dir_all(fx.dir("target/inner")).unwrap();
    let outside = fx.media.clone();

    let cases = [
        (fx.dir("target"), fx.dir("target")),
        (fx.dir("target"), fx.dir("target/inner")),
        (fx.dir("target"), outside),
        (fx.dir("target"), fx.dir("missing")),
        (fx.dir("target"), fx.dir(".sfs")),
    ];
    for (target, source) in cases {
        let result = MergeEngine::new(&mut fx.catalog).merge(&target, &source, &MergeOptions::default());
        assert!(
            matches!(result, Err(Error::InvalidMergeTargets(_))),
            "{} <- {} should be rejected",
            target.display(),
            source.display()
        );
    }
    assert!(platform::is_symlink(&fx.dir("source/b.txt")));
}
