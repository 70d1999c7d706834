//! Open-timeout growth for circuit breakers.

/// Next open timeout after a failed half-open trial call.
///
/// Grows geometrically by `multiplier` and never exceeds `max`.
pub fn next_open_timeout(current: f64, multiplier: f64, max: f64) -> f64 {
    (current * multiplier).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_growth() {
        assert_eq!(next_open_timeout(60.0, 2.0, 300.0), 120.0);
        assert_eq!(next_open_timeout(120.0, 2.0, 300.0), 240.0);
        assert_eq!(next_open_timeout(240.0, 2.0, 300.0), 300.0);
        assert_eq!(next_open_timeout(300.0, 2.0, 300.0), 300.0);
    }

    #[test]
    fn test_unit_multiplier_is_flat() {
        assert_eq!(next_open_timeout(30.0, 1.0, 300.0), 30.0);
    }
}
