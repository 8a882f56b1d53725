// src/update/plan.rs

//! Update decision engine
//!
//! Turns "what is installed" plus "what the feed offers" into an
//! [`UpdateInfo`]. Pure: no I/O, no clock, so every branch is testable
//! with literal feeds.

use crate::asset::{Asset, AssetFeed};
use crate::version;
use semver::Version;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// A resolved update plan
///
/// Built once per check and consumed by the acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    /// The full release to end up on
    pub target_full: Asset,
    /// Local full release the delta chain starts from
    pub base_release: Option<Asset>,
    /// Delta packages after `base_release`, ascending, ending at the target
    pub deltas: Vec<Asset>,
    /// Target is older than (or a lateral move from) the installed release
    pub is_downgrade: bool,
}

impl UpdateInfo {
    /// Plan that always downloads the full package
    pub fn full(target_full: Asset, is_downgrade: bool) -> Self {
        Self {
            target_full,
            base_release: None,
            deltas: Vec::new(),
            is_downgrade,
        }
    }

    /// Whether the plan can be satisfied from a delta chain
    pub fn has_delta_chain(&self) -> bool {
        self.base_release.is_some() && !self.deltas.is_empty()
    }

    /// Total bytes of the delta chain
    pub fn delta_bytes(&self) -> u64 {
        self.deltas.iter().map(|d| d.size).sum()
    }
}

/// Decide whether and how to update
///
/// - Newer full release: update, with a delta chain when `local_base`
///   exists, matches the feed's full package of its version (when one is
///   listed) and the feed carries a delta for the target version
/// - Older release: only with `allow_downgrade`, always full
/// - Same version from another channel: only with `allow_downgrade`,
///   treated like a downgrade
/// - Anything else: `None`
pub fn check_for_updates(
    installed: &Version,
    installed_channel: &str,
    local_base: Option<&Asset>,
    feed: &AssetFeed,
    allow_downgrade: bool,
) -> Option<UpdateInfo> {
    let Some(target) = feed.latest_full() else {
        info!("Feed for channel '{}' has no full releases", feed.channel);
        return None;
    };
    debug!("Latest remote release: {} ({})", target.file_name, target.version);

    match version::cmp_precedence(&target.version, installed) {
        Ordering::Greater => {
            info!(
                "Found newer remote release ({} -> {})",
                installed, target.version
            );
            Some(forward_plan(target, local_base, feed))
        }
        Ordering::Less if allow_downgrade => {
            info!(
                "Found older remote release and downgrade is enabled ({} -> {})",
                installed, target.version
            );
            Some(UpdateInfo::full(target.clone(), true))
        }
        Ordering::Equal if allow_downgrade && feed.channel != installed_channel => {
            info!(
                "Remote release {} is the same version on channel '{}' (installed from '{}')",
                target.version, feed.channel, installed_channel
            );
            Some(UpdateInfo::full(target.clone(), true))
        }
        _ => {
            info!("No update available (installed {}, remote {})", installed, target.version);
            None
        }
    }
}

fn forward_plan(target: &Asset, local_base: Option<&Asset>, feed: &AssetFeed) -> UpdateInfo {
    let Some(base) = local_base else {
        info!("No local full package to patch, deltas disabled");
        return UpdateInfo::full(target.clone(), false);
    };

    let published = feed.full_packages().find(|a| {
        a.package_id.eq_ignore_ascii_case(&base.package_id)
            && version::same_release(&a.version, &base.version)
    });
    if let Some(published) = published.filter(|p| !p.same_content(base)) {
        warn!(
            "Local base {} does not match the published {}, deltas disabled",
            base.version, published.file_name
        );
        return UpdateInfo::full(target.clone(), false);
    }

    let has_target_delta = feed.assets.iter().any(|a| {
        a.is_delta()
            && a.package_id.eq_ignore_ascii_case(&target.package_id)
            && version::same_release(&a.version, &target.version)
    });
    if !has_target_delta {
        info!("Feed has no delta for {}, deltas disabled", target.version);
        return UpdateInfo::full(target.clone(), false);
    }

    let deltas = feed.deltas_between(&target.package_id, &base.version, &target.version);
    if deltas.is_empty() {
        info!(
            "Local base {} is not older than target {}, deltas disabled",
            base.version, target.version
        );
        return UpdateInfo::full(target.clone(), false);
    }

    info!(
        "Found {} delta package(s) from local base {} to {}",
        deltas.len(),
        base.version,
        target.version
    );
    UpdateInfo {
        target_full: target.clone(),
        base_release: Some(base.clone()),
        deltas,
        is_downgrade: false,
    }
}
