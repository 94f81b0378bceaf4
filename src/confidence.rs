/// Confidence assigned to devices that did not answer this cycle
pub const OFFLINE_CONFIDENCE: f64 = 0.95;

/// Step bands for online devices: (exclusive lower bound, confidence),
/// strongest first. Anything at or below the last bound, or unmeasured,
/// falls through to `FLOOR_CONFIDENCE`.
pub const SIGNAL_BANDS: &[(i32, f64)] = &[(-40, 0.95), (-60, 0.85), (-80, 0.70)];

pub const FLOOR_CONFIDENCE: f64 = 0.50;

/// Score how sure we are about a device's current state
pub fn score(signal_quality: Option<i32>, is_online: bool) -> f64 {
    if !is_online {
        return OFFLINE_CONFIDENCE;
    }

    let Some(signal) = signal_quality else {
        return FLOOR_CONFIDENCE;
    };

    SIGNAL_BANDS
        .iter()
        .find(|(bound, _)| signal > *bound)
        .map(|(_, confidence)| *confidence)
        .unwrap_or(FLOOR_CONFIDENCE)
}

/// Map an echo round trip onto the dBm-like scale used for signal quality
pub fn signal_from_round_trip(round_trip_ms: f64) -> i32 {
    let estimate = -30.0 - round_trip_ms * 1.5;
    estimate.max(-100.0) as i32
}
