//! Weighted composite scoring.
//!
//! Every declared limit contributes a fixed number of points. Numeric metrics
//! earn proportional credit (`weight × limit / observed` once over the limit);
//! delegation, skills and regressions are all-or-nothing. The composite is the
//! share of achievable points earned, scaled to 100, so scenarios that leave a
//! limit or pool undeclared are not penalized for it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::metrics::SessionMetrics;
use super::run::RegressionResult;
use crate::scenario::ScoringConfig;

pub const DURATION_WEIGHT: f64 = 25.0;
pub const TURNS_WEIGHT: f64 = 20.0;
pub const DEPLOY_CALLS_WEIGHT: f64 = 20.0;
pub const INFRA_EDITS_WEIGHT: f64 = 10.0;
pub const DELEGATION_WEIGHT: f64 = 10.0;
/// Points per required skill.
pub const SKILL_WEIGHT: f64 = 5.0;
/// Points per regression rule.
pub const REGRESSION_WEIGHT: f64 = 5.0;

const EPSILON: f64 = 1e-9;

/// What a contribution measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    Metric,
    Delegation,
    Skill,
    Regression,
}

/// Points earned by one scored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Metric, skill or regression name.
    pub name: String,
    pub kind: ContributionKind,
    /// Points earned.
    pub earned: f64,
    /// Points available.
    pub weight: f64,
    /// Observed value (1/0 for binary items).
    pub observed: f64,
    /// Declared limit (1 for binary requirements).
    pub limit: f64,
}

impl Contribution {
    fn binary(name: impl Into<String>, kind: ContributionKind, weight: f64, ok: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            earned: if ok { weight } else { 0.0 },
            weight,
            observed: if ok { 1.0 } else { 0.0 },
            limit: 1.0,
        }
    }

    fn metric(name: &str, weight: f64, observed: f64, limit: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: ContributionKind::Metric,
            earned: proportional_credit(weight, observed, limit),
            weight,
            observed,
            limit,
        }
    }

    /// Whether the full weight was earned.
    pub fn is_full(&self) -> bool {
        self.earned + EPSILON >= self.weight
    }
}

/// Full weight at or under the limit, `weight × limit / observed` above it.
pub fn proportional_credit(weight: f64, observed: f64, limit: f64) -> f64 {
    if observed <= limit {
        weight
    } else {
        (weight * limit / observed).clamp(0.0, weight)
    }
}

/// Per-contribution breakdown of a run's score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub contributions: Vec<Contribution>,
}

impl Scorecard {
    /// Points earned across all contributions.
    pub fn earned(&self) -> f64 {
        self.contributions.iter().map(|c| c.earned).sum()
    }

    /// Points achievable by the declared limits.
    pub fn achievable(&self) -> f64 {
        self.contributions.iter().map(|c| c.weight).sum()
    }

    /// Composite score in [0, 100]; 100 when nothing is scored.
    pub fn composite(&self) -> f64 {
        let achievable = self.achievable();
        if achievable <= 0.0 {
            return 100.0;
        }
        (100.0 * self.earned() / achievable).clamp(0.0, 100.0)
    }

    /// True iff every contribution earned its full weight.
    pub fn passed(&self) -> bool {
        self.contributions.iter().all(Contribution::is_full)
    }

    /// Contributions that fell short.
    pub fn failures(&self) -> impl Iterator<Item = &Contribution> {
        self.contributions.iter().filter(|c| !c.is_full())
    }

    /// Looks up a contribution by name.
    pub fn get(&self, name: &str) -> Option<&Contribution> {
        self.contributions.iter().find(|c| c.name == name)
    }
}

/// Scores a session against the scenario's declared limits.
///
/// `duration_secs` is passed separately because it may come from the
/// runner's clock when the event log carries no timestamps.
pub fn score(
    config: &ScoringConfig,
    metrics: &SessionMetrics,
    duration_secs: f64,
    regressions: &BTreeMap<String, RegressionResult>,
) -> Scorecard {
    let mut contributions = Vec::new();

    if let Some(limit) = config.max_duration_minutes {
        contributions.push(Contribution::metric(
            "duration_minutes",
            DURATION_WEIGHT,
            duration_secs / 60.0,
            limit,
        ));
    }
    if let Some(limit) = config.max_turns {
        contributions.push(Contribution::metric(
            "turns",
            TURNS_WEIGHT,
            f64::from(metrics.turns),
            f64::from(limit),
        ));
    }
    if let Some(limit) = config.max_deploy_calls {
        contributions.push(Contribution::metric(
            "deploy_calls",
            DEPLOY_CALLS_WEIGHT,
            f64::from(metrics.deploy_calls),
            f64::from(limit),
        ));
    }
    if let Some(limit) = config.max_infra_edits {
        contributions.push(Contribution::metric(
            "infra_edits",
            INFRA_EDITS_WEIGHT,
            f64::from(metrics.infra_edits),
            f64::from(limit),
        ));
    }

    if config.must_delegate {
        contributions.push(Contribution::binary(
            "delegation",
            ContributionKind::Delegation,
            DELEGATION_WEIGHT,
            metrics.delegated,
        ));
    }

    for skill in &config.must_invoke_skills {
        contributions.push(Contribution::binary(
            skill.as_str(),
            ContributionKind::Skill,
            SKILL_WEIGHT,
            metrics.skills_invoked.contains(skill),
        ));
    }

    for (name, result) in regressions {
        let mut c = Contribution::binary(
            name.as_str(),
            ContributionKind::Regression,
            REGRESSION_WEIGHT,
            result.passed,
        );
        c.observed = f64::from(result.occurrences);
        c.limit = f64::from(result.limit);
        contributions.push(c);
    }

    Scorecard { contributions }
}
