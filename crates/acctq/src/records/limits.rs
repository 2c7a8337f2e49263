use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::common::parser::{CharParser, all_consuming, parse_u32, parse_u64};

/// Raw encoding of the "no bound" limit value.
pub const UNLIMITED_SENTINEL: u64 = u64::MAX;
/// Raw encoding of the "take the cluster default" value, both for limits
/// and fairshare.
pub const INHERIT_SENTINEL: u64 = 0;

/// Fairshare weight used when neither the association nor its cluster sets
/// one.
pub const HARD_DEFAULT_FAIRSHARE: u32 = 1;

/// A single association/cluster limit.
///
/// The two sentinels are distinct and must stay distinct across
/// serialization: 0 means "inherit from the cluster default" while
/// `u64::MAX` means "no bound at all". The tagged representation keeps the
/// two from being confused inside the process; the raw `u64` appears only at
/// the serialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum Limit {
    #[default]
    Inherit,
    Unlimited,
    Exact(u64),
}

impl Limit {
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            INHERIT_SENTINEL => Limit::Inherit,
            UNLIMITED_SENTINEL => Limit::Unlimited,
            value => Limit::Exact(value),
        }
    }

    pub fn as_raw(&self) -> u64 {
        match self {
            Limit::Inherit => INHERIT_SENTINEL,
            Limit::Unlimited => UNLIMITED_SENTINEL,
            Limit::Exact(value) => *value,
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Limit::Inherit)
    }

    /// Parses a user-supplied limit value (a decimal number or the word
    /// `unlimited`).
    pub fn parse(value: &str) -> anyhow::Result<Limit> {
        if value.eq_ignore_ascii_case("unlimited") {
            return Ok(Limit::Unlimited);
        }
        Ok(Limit::from_raw(all_consuming(parse_u64()).parse_text(value)?))
    }
}

impl From<u64> for Limit {
    fn from(raw: u64) -> Self {
        Limit::from_raw(raw)
    }
}

impl From<Limit> for u64 {
    fn from(limit: Limit) -> Self {
        limit.as_raw()
    }
}

impl Display for Limit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Inherit => Ok(()),
            Limit::Unlimited => write!(f, "unlimited"),
            Limit::Exact(value) => value.fmt(f),
        }
    }
}

/// Fairshare weight; 0 serializes the inherit sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Fairshare {
    #[default]
    Inherit,
    Exact(u32),
}

impl Fairshare {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Fairshare::Inherit,
            value => Fairshare::Exact(value),
        }
    }

    pub fn as_raw(&self) -> u32 {
        match self {
            Fairshare::Inherit => 0,
            Fairshare::Exact(value) => *value,
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Fairshare> {
        Ok(Fairshare::from_raw(
            all_consuming(parse_u32()).parse_text(value)?,
        ))
    }
}

impl From<u32> for Fairshare {
    fn from(raw: u32) -> Self {
        Fairshare::from_raw(raw)
    }
}

impl From<Fairshare> for u32 {
    fn from(fairshare: Fairshare) -> Self {
        fairshare.as_raw()
    }
}

impl Display for Fairshare {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Fairshare::Inherit => Ok(()),
            Fairshare::Exact(value) => value.fmt(f),
        }
    }
}

/// The four per-association (and per-cluster default) limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitSet {
    pub max_jobs: Limit,
    pub max_nodes_per_job: Limit,
    pub max_wall_minutes: Limit,
    pub max_cpu_secs_per_job: Limit,
}

/// A limit with the inherit sentinel already resolved away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLimit {
    Unlimited,
    Exact(u64),
}

impl ResolvedLimit {
    pub fn allows(&self, value: u64) -> bool {
        match self {
            ResolvedLimit::Unlimited => true,
            ResolvedLimit::Exact(bound) => value <= *bound,
        }
    }
}

impl Display for ResolvedLimit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedLimit::Unlimited => write!(f, "unlimited"),
            ResolvedLimit::Exact(value) => value.fmt(f),
        }
    }
}

/// Limits the scheduler actually enforces for one association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub fairshare: u32,
    pub max_jobs: ResolvedLimit,
    pub max_nodes_per_job: ResolvedLimit,
    pub max_wall_minutes: ResolvedLimit,
    pub max_cpu_secs_per_job: ResolvedLimit,
}

fn resolve_limit(own: Limit, cluster_default: Limit) -> ResolvedLimit {
    let picked = if own.is_set() { own } else { cluster_default };
    match picked {
        Limit::Exact(value) => ResolvedLimit::Exact(value),
        // Inherit on both levels falls through to the hard default,
        // which is "no bound".
        Limit::Unlimited | Limit::Inherit => ResolvedLimit::Unlimited,
    }
}

fn resolve_fairshare(own: Fairshare, cluster_default: Fairshare) -> u32 {
    match (own, cluster_default) {
        (Fairshare::Exact(value), _) => value,
        (Fairshare::Inherit, Fairshare::Exact(value)) => value,
        (Fairshare::Inherit, Fairshare::Inherit) => HARD_DEFAULT_FAIRSHARE,
    }
}

/// Materializes the effective limits of an association given its cluster's
/// defaults.
pub fn resolve(
    fairshare: Fairshare,
    limits: &LimitSet,
    cluster_fairshare: Fairshare,
    cluster_limits: &LimitSet,
) -> EffectiveLimits {
    EffectiveLimits {
        fairshare: resolve_fairshare(fairshare, cluster_fairshare),
        max_jobs: resolve_limit(limits.max_jobs, cluster_limits.max_jobs),
        max_nodes_per_job: resolve_limit(
            limits.max_nodes_per_job,
            cluster_limits.max_nodes_per_job,
        ),
        max_wall_minutes: resolve_limit(limits.max_wall_minutes, cluster_limits.max_wall_minutes),
        max_cpu_secs_per_job: resolve_limit(
            limits.max_cpu_secs_per_job,
            cluster_limits.max_cpu_secs_per_job,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_sentinels_roundtrip() {
        assert_eq!(Limit::from_raw(0), Limit::Inherit);
        assert_eq!(Limit::from_raw(u64::MAX), Limit::Unlimited);
        assert_eq!(Limit::from_raw(17), Limit::Exact(17));
        for limit in [Limit::Inherit, Limit::Unlimited, Limit::Exact(1000)] {
            assert_eq!(Limit::from_raw(limit.as_raw()), limit);
        }
    }

    #[test]
    fn test_limit_serde_stable() {
        let json = serde_json::to_string(&Limit::Unlimited).unwrap();
        assert_eq!(json, u64::MAX.to_string());
        assert_eq!(
            serde_json::from_str::<Limit>(&json).unwrap(),
            Limit::Unlimited
        );

        let json = serde_json::to_string(&Limit::Inherit).unwrap();
        assert_eq!(json, "0");
        assert_eq!(serde_json::from_str::<Limit>(&json).unwrap(), Limit::Inherit);
    }

    #[test]
    fn test_limit_parse() {
        assert_eq!(Limit::parse("0").unwrap(), Limit::Inherit);
        assert_eq!(Limit::parse("25").unwrap(), Limit::Exact(25));
        assert_eq!(Limit::parse("unlimited").unwrap(), Limit::Unlimited);
        assert_eq!(Limit::parse("UNLIMITED").unwrap(), Limit::Unlimited);
        assert!(Limit::parse("abc").is_err());
        assert!(Limit::parse("12x").is_err());
    }

    #[test]
    fn test_resolve_own_wins() {
        let limits = LimitSet {
            max_jobs: Limit::Exact(10),
            ..Default::default()
        };
        let defaults = LimitSet {
            max_jobs: Limit::Exact(100),
            ..Default::default()
        };

        let effective = resolve(
            Fairshare::Exact(3),
            &limits,
            Fairshare::Exact(7),
            &defaults,
        );
        assert_eq!(effective.fairshare, 3);
        assert_eq!(effective.max_jobs, ResolvedLimit::Exact(10));
    }

    #[test]
    fn test_resolve_falls_back_to_cluster_default() {
        let defaults = LimitSet {
            max_jobs: Limit::Exact(100),
            max_wall_minutes: Limit::Unlimited,
            ..Default::default()
        };

        let effective = resolve(
            Fairshare::Inherit,
            &LimitSet::default(),
            Fairshare::Exact(7),
            &defaults,
        );
        assert_eq!(effective.fairshare, 7);
        assert_eq!(effective.max_jobs, ResolvedLimit::Exact(100));
        assert_eq!(effective.max_wall_minutes, ResolvedLimit::Unlimited);
    }

    #[test]
    fn test_resolve_double_inherit_hits_hard_default() {
        let effective = resolve(
            Fairshare::Inherit,
            &LimitSet::default(),
            Fairshare::Inherit,
            &LimitSet::default(),
        );
        assert_eq!(effective.fairshare, HARD_DEFAULT_FAIRSHARE);
        assert_eq!(effective.max_jobs, ResolvedLimit::Unlimited);
        assert_eq!(effective.max_nodes_per_job, ResolvedLimit::Unlimited);
        assert_eq!(effective.max_wall_minutes, ResolvedLimit::Unlimited);
        assert_eq!(effective.max_cpu_secs_per_job, ResolvedLimit::Unlimited);
    }

    #[test]
    fn test_resolved_limit_allows() {
        assert!(ResolvedLimit::Unlimited.allows(u64::MAX));
        assert!(ResolvedLimit::Exact(5).allows(5));
        assert!(!ResolvedLimit::Exact(5).allows(6));
    }
}
