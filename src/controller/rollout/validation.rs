use crate::crd::rollout::{Rollout, StrategyVariant};
use std::time::Duration;

/// Validate Rollout specification
///
/// Validates runtime constraints that cannot be enforced via CRD schema.
///
/// # Validation Rules
/// - `spec.replicas` must be >= 0
/// - exactly one of `spec.strategy.blueGreen` / `spec.strategy.canary` is set
/// - blue-green: `activeService` and `previewService` must differ when both are set
/// - canary: `canaryService` and `stableService` must differ when both are set
///
/// # Returns
/// * `Ok(StrategyVariant)` - Validation passed, with the populated strategy
/// * `Err(String)` - Validation error message
pub fn validate_rollout(rollout: &Rollout) -> Result<StrategyVariant<'_>, String> {
    if rollout.spec.replicas < 0 {
        return Err(format!(
            "spec.replicas must be >= 0, got {}",
            rollout.spec.replicas
        ));
    }

    let variant = rollout.spec.strategy.variant().map_err(|e| e.to_string())?;

    match variant {
        StrategyVariant::BlueGreen(bg) => {
            if !bg.active_service.is_empty() && bg.active_service == bg.preview_service {
                return Err(format!(
                    "spec.strategy.blueGreen.activeService and previewService must differ, both are '{}'",
                    bg.active_service
                ));
            }
        }
        StrategyVariant::Canary(canary) => {
            if let Some(stable) = &canary.stable_service {
                if !stable.is_empty() && *stable == canary.canary_service {
                    return Err(format!(
                        "spec.strategy.canary.canaryService and stableService must differ, both are '{}'",
                        stable
                    ));
                }
            }
        }
    }

    Ok(variant)
}

/// Parse a duration string like "5m", "30s", "1h" into std::time::Duration
///
/// Supported formats:
/// - "30s" → 30 seconds (max 24h = 86400s)
/// - "5m" → 5 minutes (max 24h = 1440m)
/// - "2h" → 2 hours (max 1 week = 168h)
///
/// Zero durations are rejected.
///
/// # Returns
/// Some(Duration) if parse successful and within limits, None if invalid or out of range
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let duration_str = duration_str.trim();
    let unit = duration_str.chars().last()?;
    let number: u64 = duration_str[..duration_str.len() - unit.len_utf8()]
        .parse()
        .ok()?;

    if number == 0 {
        return None;
    }

    match unit {
        's' if number <= 86400 => Some(Duration::from_secs(number)),
        'm' if number <= 1440 => number.checked_mul(60).map(Duration::from_secs),
        'h' if number <= 168 => number.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}
