// tests/decision_props.rs

//! Property tests for the update decision engine.

use proptest::prelude::*;
use semver::Version;
use updraft::update::check_for_updates;
use updraft::{Asset, AssetFeed, AssetKind};

fn version() -> impl Strategy<Value = Version> {
    (0u64..3, 0u64..3, 0u64..3, prop::option::of(0u64..2)).prop_map(|(major, minor, patch, pre)| {
        let mut v = Version::new(major, minor, patch);
        if let Some(n) = pre {
            v.pre = semver::Prerelease::new(&format!("beta.{}", n)).unwrap();
        }
        v
    })
}

fn asset(version: Version, delta: bool) -> Asset {
    let kind = if delta { AssetKind::DeltaPackage } else { AssetKind::FullPackage };
    let mut asset = Asset::package("App", version, kind, "nupkg");
    asset.size = 10;
    asset
}

fn feed() -> impl Strategy<Value = AssetFeed> {
    (
        prop::collection::vec((version(), any::<bool>()), 0..12),
        prop::sample::select(vec!["stable", "beta"]),
    )
        .prop_map(|(entries, channel)| {
            let assets = entries.into_iter().map(|(v, delta)| asset(v, delta)).collect();
            AssetFeed::new(channel, assets)
        })
}

proptest! {
    #[test]
    fn deltas_stay_between_base_and_target(
        feed in feed(),
        installed in version(),
        base in prop::option::of(version()),
        allow_downgrade in any::<bool>(),
    ) {
        let base = base.map(|v| asset(v, false));
        let Some(info) = check_for_updates(&installed, "stable", base.as_ref(), &feed, allow_downgrade) else {
            return Ok(());
        };

        if let Some(base) = &info.base_release {
            for delta in &info.deltas {
                prop_assert!(delta.is_delta());
                prop_assert!(delta.version > base.version);
                prop_assert!(delta.version <= info.target_full.version);
            }
        } else {
            prop_assert!(info.deltas.is_empty());
        }

        for pair in info.deltas.windows(2) {
            prop_assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn no_downgrade_unless_allowed(
        feed in feed(),
        installed in version(),
        base in prop::option::of(version()),
    ) {
        let base = base.map(|v| asset(v, false));
        if let Some(info) = check_for_updates(&installed, "stable", base.as_ref(), &feed, false) {
            prop_assert!(!info.is_downgrade);
            prop_assert!(info.target_full.version > installed);
        }
    }

    #[test]
    fn target_is_latest_full(
        feed in feed(),
        installed in version(),
    ) {
        if let Some(info) = check_for_updates(&installed, "other", None, &feed, true) {
            prop_assert!(info.target_full.is_full());
            for full in feed.full_packages() {
                prop_assert!(full.version <= info.target_full.version);
            }
        }
    }
}
