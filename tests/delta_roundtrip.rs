// tests/delta_roundtrip.rs

//! Delta build/apply round trips over real release packages.
//!
//! Rebuilding a package from its base plus a delta must reproduce the
//! published package byte for byte, for both patch formats and for chains.

mod common;

use common::Fixture;
use std::fs;
use std::path::{Path, PathBuf};
use updraft::archive::{create_archive, extract_archive};
use updraft::progress::{CancelToken, SilentProgress};
use updraft::{DeltaApplier, DeltaBuilder, Error, PatchFormat};

fn rebuild(fixture: &Fixture, base: &Path, deltas: &[PathBuf], name: &str) -> Vec<u8> {
    let cancel = CancelToken::new();
    let work = fixture.temp.path().join(format!("work-{}", name));
    extract_archive(base, &work, &cancel).unwrap();
    DeltaApplier::new(&common::test_config())
        .apply_chain(&work, deltas, &SilentProgress, &cancel)
        .unwrap();

    let out = fixture.temp.path().join(format!("{}.nupkg", name));
    create_archive(&work, &out, &SilentProgress, &cancel).unwrap();
    fs::read(out).unwrap()
}

#[test]
fn test_roundtrip_both_formats() {
    let fixture = Fixture::new(&["1.0.0", "1.1.0"]);
    let base = fixture.releases.join(&fixture.fulls[0].file_name);
    let target = fixture.releases.join(&fixture.fulls[1].file_name);
    let expected = fs::read(&target).unwrap();

    for format in [PatchFormat::Legacy, PatchFormat::Modern] {
        let delta = fixture.temp.path().join(format!("delta-{}.nupkg", format));
        let stats = DeltaBuilder::new(&common::test_config())
            .with_format(format)
            .build(&base, &target, &delta, &SilentProgress, &CancelToken::new())
            .unwrap();

        assert_eq!(stats.changed_files, 1, "{}: app.bin is patched", format);
        assert_eq!(stats.same_files, 1, "{}: config.json is unchanged", format);
        assert_eq!(stats.new_files, 1, "{}: release-1.txt is new", format);
        assert_eq!(stats.removed_files, 2, "{}: legacy.dll and release-0.txt", format);
        assert!(stats.metrics().is_worthwhile());

        let rebuilt = rebuild(&fixture, &base, &[delta], &format.to_string());
        assert_eq!(rebuilt, expected, "{} round trip differs", format);
    }
}

#[test]
fn test_chain_reproduces_latest() {
    let fixture = Fixture::new(&["1.0.0", "1.0.1", "1.1.0"]);
    let base = fixture.releases.join(&fixture.fulls[0].file_name);
    let deltas: Vec<PathBuf> = fixture
        .deltas
        .iter()
        .map(|d| fixture.releases.join(&d.file_name))
        .collect();

    let rebuilt = rebuild(&fixture, &base, &deltas, "chain");
    let expected = fs::read(fixture.releases.join(&fixture.fulls[2].file_name)).unwrap();
    assert_eq!(rebuilt, expected);
}

#[test]
fn test_build_is_deterministic() {
    let fixture = Fixture::new(&["1.0.0", "1.1.0"]);
    let base = fixture.releases.join(&fixture.fulls[0].file_name);
    let target = fixture.releases.join(&fixture.fulls[1].file_name);

    let again = fixture.temp.path().join("again.nupkg");
    DeltaBuilder::new(&common::test_config())
        .build(&base, &target, &again, &SilentProgress, &CancelToken::new())
        .unwrap();

    let published = fixture.releases.join(&fixture.deltas[0].file_name);
    assert_eq!(fs::read(again).unwrap(), fs::read(published).unwrap());
}

#[test]
fn test_build_refuses_existing_output() {
    let fixture = Fixture::new(&["1.0.0", "1.1.0"]);
    let base = fixture.releases.join(&fixture.fulls[0].file_name);
    let target = fixture.releases.join(&fixture.fulls[1].file_name);

    let result = DeltaBuilder::new(&common::test_config()).build(
        &base,
        &target,
        &target,
        &SilentProgress,
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(Error::DeltaError(_))));
}

#[test]
fn test_truncated_patch_is_corrupt() {
    let fixture = Fixture::new(&["1.0.0", "1.1.0"]);
    let delta = fixture.releases.join(&fixture.deltas[0].file_name);
    common::truncate_first_patch(&delta, &fixture.deltas[0]);

    let cancel = CancelToken::new();
    let work = fixture.temp.path().join("work");
    extract_archive(&fixture.releases.join(&fixture.fulls[0].file_name), &work, &cancel).unwrap();

    let result = DeltaApplier::new(&common::test_config()).apply(&work, &delta, &SilentProgress, &cancel);
    assert!(matches!(result, Err(Error::PatchCorrupt(_))));
}

#[test]
fn test_missing_base_file_fails_before_changes() {
    let fixture = Fixture::new(&["1.0.0", "1.1.0"]);
    let cancel = CancelToken::new();
    let work = fixture.temp.path().join("work");
    extract_archive(&fixture.releases.join(&fixture.fulls[0].file_name), &work, &cancel).unwrap();
    fs::remove_file(work.join("lib").join("app.bin")).unwrap();

    let delta = fixture.releases.join(&fixture.deltas[0].file_name);
    let result = DeltaApplier::new(&common::test_config()).apply(&work, &delta, &SilentProgress, &cancel);
    assert!(matches!(result, Err(Error::PatchTargetMissing(_))));

    // Nothing was applied: the release-0 files are all still there
    assert!(work.join("lib").join("legacy.dll").exists());
    assert!(!work.join("lib").join("release-1.txt").exists());
}
