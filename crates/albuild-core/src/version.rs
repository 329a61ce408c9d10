//! Deterministic four-part version tags.
//!
//! Production builds get `major.yy.days.minutes` where `major` comes from the
//! manifest's platform version, `days` counts whole days since 2020-01-01 and
//! `minutes` counts whole minutes since local midnight. Every other event gets
//! `0.0.0.0`. Nothing is persisted between runs.

use std::fmt;

use chrono::{Datelike, Local, NaiveDateTime, Timelike};

use crate::context::EventKind;
use crate::error::ManifestError;
use crate::manifest::AppManifest;

/// Days from 0001-01-01 (CE day 1) to 2020-01-01, the build-number epoch.
const EPOCH_DAYS_FROM_CE: i32 = 737_425;

/// `major.minor.build.revision`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTag {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl VersionTag {
    /// Version stamped on test compiles.
    pub const PLACEHOLDER: VersionTag = VersionTag::new(0, 0, 0, 0);

    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Production tag for `major` at local time `now`.
    pub fn at(major: u32, now: NaiveDateTime) -> Self {
        let days = now.date().num_days_from_ce() - EPOCH_DAYS_FROM_CE;
        Self {
            major,
            minor: now.year().rem_euclid(100) as u32,
            // Clocks set before the epoch clamp to day zero.
            build: days.max(0) as u32,
            revision: now.time().num_seconds_from_midnight() / 60,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::PLACEHOLDER
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Version for `manifest` under `event`, using the local clock.
pub fn generate(manifest: &AppManifest, event: &EventKind) -> Result<VersionTag, ManifestError> {
    generate_at(manifest, event, Local::now().naive_local())
}

/// Version for `manifest` under `event` at an explicit local time.
///
/// Only `push` reads the platform version; other events always get the
/// placeholder.
pub fn generate_at(
    manifest: &AppManifest,
    event: &EventKind,
    now: NaiveDateTime,
) -> Result<VersionTag, ManifestError> {
    if event.is_production() {
        Ok(VersionTag::at(manifest.platform_major()?, now))
    } else {
        Ok(VersionTag::PLACEHOLDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::Path;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn manifest(platform: &str) -> AppManifest {
        let text = format!(
            r#"{{"name":"Contoso App","platform":"{platform}","application":"22.0.0.0",
                "target":"Cloud","runtime":"11.0","dependencies":[]}}"#
        );
        AppManifest::parse(Path::new("app.json"), &text).unwrap()
    }

    #[test]
    fn test_epoch_constant() {
        let epoch = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(epoch.num_days_from_ce(), EPOCH_DAYS_FROM_CE);
    }

    #[test]
    fn test_push_version_example() {
        let v = generate_at(&manifest("22.0"), &EventKind::Push, at(2025, 6, 1, 10, 23, 0)).unwrap();
        assert_eq!(v.to_string(), "22.25.1978.623");
    }

    #[test]
    fn test_non_push_is_placeholder() {
        let event = EventKind::parse(Some("pull_request"));
        let v = generate_at(&manifest("22.0"), &event, at(2025, 6, 1, 10, 23, 0)).unwrap();
        assert_eq!(v.to_string(), "0.0.0.0");
        assert!(v.is_placeholder());

        let v = generate_at(&manifest("22.0"), &EventKind::parse(None), at(2030, 1, 1, 0, 0, 0))
            .unwrap();
        assert!(v.is_placeholder());
    }

    #[test]
    fn test_build_increases_across_days_and_is_stable_within_a_day() {
        let m = manifest("23.1");
        let morning = generate_at(&m, &EventKind::Push, at(2025, 6, 1, 0, 0, 0)).unwrap();
        let evening = generate_at(&m, &EventKind::Push, at(2025, 6, 1, 23, 59, 59)).unwrap();
        let next_day = generate_at(&m, &EventKind::Push, at(2025, 6, 2, 0, 0, 0)).unwrap();

        assert_eq!(morning.build, evening.build);
        assert!(next_day.build > evening.build);
        assert!(morning.revision < evening.revision);
        assert_eq!(evening.revision, 1439);
        assert_eq!(next_day.revision, 0);
        assert!(next_day > evening);
    }

    #[test]
    fn test_revision_truncates_partial_minutes() {
        let v = VersionTag::at(22, at(2025, 6, 1, 10, 23, 59));
        assert_eq!(v.revision, 623);
    }

    #[test]
    fn test_epoch_day_is_zero() {
        let v = VersionTag::at(22, at(2020, 1, 1, 0, 1, 0));
        assert_eq!(v, VersionTag::new(22, 20, 0, 1));
    }

    #[test]
    fn test_malformed_platform_fails_only_for_push() {
        let m = manifest("vNext");
        assert!(generate_at(&m, &EventKind::Push, at(2025, 6, 1, 0, 0, 0)).is_err());

        let event = EventKind::parse(Some("pull_request"));
        let v = generate_at(&m, &event, at(2025, 6, 1, 10, 23, 0)).unwrap();
        assert_eq!(v, VersionTag::PLACEHOLDER);
        assert!(generate_at(&m, &EventKind::parse(None), at(2025, 6, 1, 0, 0, 0))
            .unwrap()
            .is_placeholder());
    }
}
