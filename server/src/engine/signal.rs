use chrono::Utc;

use super::proximity::calculate_proximity_tier;
use super::safety::ReportLog;
use super::session::{Session, SessionId};
use crate::config::{ProximitySection, SignalWeights};

/// Stateless compatibility scorer ranking candidate sessions against a
/// viewer. Consumes safety/report state but never mutates anything.
pub struct SignalEngine {
    weights: SignalWeights,
    proximity: ProximitySection,
}

/// A candidate with its computed signal, as surfaced in radar results.
#[derive(Debug, Clone)]
pub struct ScoredSession {
    pub session: Session,
    pub score: f64,
}

/// FNV-1a over both session ids, viewer first. Stable for a given pair,
/// not globally predictable, no shared RNG state.
fn pair_tiebreak(viewer: SessionId, candidate: SessionId) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in viewer.as_bytes().iter().chain(candidate.as_bytes()) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

impl SignalEngine {
    pub fn new(weights: SignalWeights, proximity: ProximitySection) -> Self {
        Self { weights, proximity }
    }

    /// Additive compatibility score. `f64::NEG_INFINITY` hard-excludes a
    /// safety-flagged candidate regardless of every other factor.
    ///
    /// Callers must filter non-visible candidates *before* scoring; the
    /// visibility bonus here is a flat confirmation applied to survivors.
    pub fn calculate_score(
        &self,
        viewer: &Session,
        candidate: &Session,
        unique_reporters: usize,
    ) -> f64 {
        if candidate.safety_flag {
            return f64::NEG_INFINITY;
        }

        let w = &self.weights;
        let mut score = 0.0;

        if viewer.vibe == candidate.vibe {
            score += w.w_vibe;
        }

        // Case-sensitive exact-match intersection, capped at 3
        let shared = viewer
            .tags
            .iter()
            .filter(|t| candidate.tags.contains(t))
            .count()
            .min(3);
        score += w.w_tag * shared as f64;

        if candidate.visibility {
            score += w.w_vis;
        }

        if viewer.tags.is_empty() {
            score += w.w_tagless;
        }

        if let Some(tier) =
            calculate_proximity_tier(viewer.location, candidate.location, &self.proximity)
        {
            score += w.w_dist * tier.multiplier();
        }

        if unique_reporters > 0 {
            score += w.w_report * unique_reporters as f64;
        }

        // Soft sort-down while the candidate sits in an active cooldown,
        // floored so repeated declines cannot bury a session forever
        if candidate
            .cooldown_expires_at
            .is_some_and(|until| until > Utc::now())
        {
            score += (w.w_decline * candidate.decline_count as f64).max(w.max_decline_penalty);
        }

        score
    }

    /// Rank candidates for a viewer: self and non-visible sessions are
    /// dropped up front, hard-excluded scores never surface, and ties break
    /// by the deterministic pair hash, then alphabetically by handle.
    pub fn calculate_scores(
        &self,
        viewer: &Session,
        candidates: &[Session],
        reports: &ReportLog,
    ) -> Vec<ScoredSession> {
        let mut scored: Vec<ScoredSession> = candidates
            .iter()
            .filter(|c| c.id != viewer.id && c.visibility)
            .map(|c| ScoredSession {
                score: self.calculate_score(viewer, c, reports.unique_reporter_count(c.id)),
                session: c.clone(),
            })
            .filter(|s| s.score != f64::NEG_INFINITY)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ha = pair_tiebreak(viewer.id, a.session.id);
                    let hb = pair_tiebreak(viewer.id, b.session.id);
                    hb.cmp(&ha)
                })
                .then_with(|| a.session.handle.cmp(&b.session.handle))
        });

        scored
    }
}
