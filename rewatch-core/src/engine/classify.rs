//! Session outcome classification and completion ratios
//!
//! Exactly one of two threshold regimes applies to a session: fractions of
//! the catalog runtime when it is known, or per-kind absolute seconds when it
//! is not. Both the session reconstructor and the statistics aggregator go
//! through these two functions, so the regimes cannot drift apart or mix.

use crate::config::EngineConfig;
use crate::types::{ItemRuntime, Outcome};

/// Completion ratio in [0.0, 1.0], or None when the runtime is unknown and
/// the kind has no fallback profile.
pub fn completion_ratio(
    watched_secs: f64,
    runtime: &ItemRuntime,
    config: &EngineConfig,
) -> Option<f64> {
    let divisor = match runtime {
        ItemRuntime::Known(rt) => *rt as f64,
        ItemRuntime::Unknown(kind) => config.profile_for(*kind)?.fallback_runtime_secs as f64,
    };
    Some((watched_secs / divisor).min(1.0))
}

/// Classify a session's watched seconds under the applicable regime.
///
/// Returns the completion ratio alongside the outcome so callers store a
/// consistent pair.
pub fn classify(
    watched_secs: i64,
    runtime: &ItemRuntime,
    config: &EngineConfig,
) -> (Option<f64>, Outcome) {
    let ratio = completion_ratio(watched_secs as f64, runtime, config);

    let outcome = match runtime {
        ItemRuntime::Known(rt) => {
            let watched = watched_secs as f64;
            let runtime_secs = *rt as f64;
            if watched >= config.completed_ratio * runtime_secs {
                Outcome::Completed
            } else if watched >= config.partial_ratio * runtime_secs {
                Outcome::Partial
            } else if watched_secs >= config.min_sampled_seconds {
                Outcome::Sampled
            } else {
                Outcome::Abandoned
            }
        }
        ItemRuntime::Unknown(kind) => match config.profile_for(*kind) {
            Some(profile) => {
                if watched_secs >= profile.completed_secs {
                    Outcome::Completed
                } else if watched_secs >= profile.partial_secs {
                    Outcome::Partial
                } else if watched_secs >= profile.sampled_secs {
                    Outcome::Sampled
                } else {
                    Outcome::Abandoned
                }
            }
            None => Outcome::Unknown,
        },
    };

    (ratio, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemKind;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn test_known_runtime_completed() {
        // 1100s of a 1200s item: ratio just over the 0.9 completion threshold
        let (ratio, outcome) = classify(1100, &ItemRuntime::Known(1200), &config());
        let ratio = ratio.unwrap();
        assert!((ratio - 0.9167).abs() < 0.001);
        assert_eq!(outcome, Outcome::Completed);
    }

    #[test]
    fn test_known_runtime_threshold_boundaries() {
        let runtime = ItemRuntime::Known(1000);
        let cfg = config();

        // thresholds are inclusive
        assert_eq!(classify(900, &runtime, &cfg).1, Outcome::Completed);
        assert_eq!(classify(899, &runtime, &cfg).1, Outcome::Partial);
        assert_eq!(classify(250, &runtime, &cfg).1, Outcome::Partial);
        assert_eq!(classify(249, &runtime, &cfg).1, Outcome::Sampled);
        assert_eq!(classify(60, &runtime, &cfg).1, Outcome::Sampled);
        assert_eq!(classify(59, &runtime, &cfg).1, Outcome::Abandoned);
    }

    #[test]
    fn test_ratio_saturates_at_one() {
        // repeated pause/seek pings can push watched time past the runtime
        let (ratio, outcome) = classify(2400, &ItemRuntime::Known(1200), &config());
        assert_eq!(ratio, Some(1.0));
        assert_eq!(outcome, Outcome::Completed);
    }

    #[test]
    fn test_episode_fallback() {
        let runtime = ItemRuntime::Unknown(ItemKind::Episode);
        let cfg = config();

        let (ratio, outcome) = classify(1250, &runtime, &cfg);
        assert_eq!(outcome, Outcome::Completed);
        // fallback divisor is 1500s for episodes
        assert!((ratio.unwrap() - 1250.0 / 1500.0).abs() < 1e-9);

        assert_eq!(classify(1199, &runtime, &cfg).1, Outcome::Partial);
        assert_eq!(classify(299, &runtime, &cfg).1, Outcome::Sampled);
        assert_eq!(classify(59, &runtime, &cfg).1, Outcome::Abandoned);
    }

    #[test]
    fn test_movie_fallback() {
        let runtime = ItemRuntime::Unknown(ItemKind::Movie);
        let cfg = config();

        assert_eq!(classify(5400, &runtime, &cfg).1, Outcome::Completed);
        assert_eq!(classify(1800, &runtime, &cfg).1, Outcome::Partial);
        assert_eq!(classify(300, &runtime, &cfg).1, Outcome::Sampled);
        assert_eq!(classify(299, &runtime, &cfg).1, Outcome::Abandoned);
    }

    #[test]
    fn test_other_kind_without_runtime_is_unknown() {
        let (ratio, outcome) = classify(5000, &ItemRuntime::Unknown(ItemKind::Other), &config());
        assert_eq!(ratio, None);
        assert_eq!(outcome, Outcome::Unknown);
    }

    #[test]
    fn test_other_kind_with_runtime_uses_runtime_regime() {
        // a known runtime always wins, whatever the kind
        let (ratio, outcome) = classify(950, &ItemRuntime::Known(1000), &config());
        assert_eq!(ratio, Some(0.95));
        assert_eq!(outcome, Outcome::Completed);
    }

    #[test]
    fn test_zero_watched_seconds() {
        let (ratio, outcome) = classify(0, &ItemRuntime::Known(1200), &config());
        assert_eq!(ratio, Some(0.0));
        assert_eq!(outcome, Outcome::Abandoned);
    }
}
