//! Derived-values worker (spec.md §4.5): on a fixed period, snapshots the
//! shared values map, computes whichever named formulas configuration's
//! `multi_devices` table lists, and writes the results back. The formula
//! *bodies* are hard-coded by name — `multi_devices` only supplies the
//! component devices for formulas this module already knows, new formulas
//! require a code change (spec.md §9, accepted as-is) — but which of the
//! known formulas actually run each tick is config-driven.

use std::collections::HashMap;
use std::time::Duration;

use cryo_protocol::{DeviceId, ErrorRecord, Sample};

use crate::supervisor::Supervisor;

pub const DERIVED_PERIOD: Duration = Duration::from_secs(1);

/// Snapshot of the values map taken at the start of a tick (spec.md §3: the
/// derived worker is the one consumer that needs a consistent multi-key
/// view, so it copies explicitly rather than reading through the shared map).
type Snapshot = HashMap<DeviceId, Sample>;

fn average(snapshot: &Snapshot, a: &str, b: &str) -> Sample {
    match (snapshot.get(a).and_then(Sample::as_f64), snapshot.get(b).and_then(Sample::as_f64)) {
        (Some(a), Some(b)) => Sample::Number((a + b) / 2.0),
        _ => Sample::Null,
    }
}

fn difference(snapshot: &Snapshot, a: &str, b: &str) -> Sample {
    match (snapshot.get(a).and_then(Sample::as_f64), snapshot.get(b).and_then(Sample::as_f64)) {
        (Some(a), Some(b)) => Sample::Number(a - b),
        _ => Sample::Null,
    }
}

/// Computes one named formula (spec.md §4.5 table). `None` means the name
/// is not one of the hard-coded derived devices.
pub fn compute(name: &str, snapshot: &Snapshot) -> Option<Sample> {
    match name {
        "L1" => Some(average(snapshot, "L1a", "L1c")),
        "L2" => Some(average(snapshot, "L2a", "L2c")),
        "H1" => Some(difference(snapshot, "P5d", "P5a")),
        "P3" => Some(average(snapshot, "P2", "P2d")),
        _ => None,
    }
}

/// Every formula name this worker is capable of computing. Which of these
/// actually run each tick is driven by configuration (`multi_devices`), not
/// this list — `Config::validate` already rejects any `multi_devices` key
/// outside this set.
pub const KNOWN_FORMULAS: &[&str] = &["L1", "L2", "H1", "P3"];

/// Runs the derived-values tick loop, recomputing only the formulas named in
/// `configured` (spec.md §6's `multi_devices` table) each pass. A deployment
/// that only wires up `L1`, say, never evaluates or warns about `L2`/`H1`/`P3`.
pub async fn run(supervisor: std::sync::Arc<Supervisor>, configured: Vec<DeviceId>) {
    loop {
        tokio::time::sleep(DERIVED_PERIOD).await;
        let snapshot: Snapshot = supervisor
            .values
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        for name in &configured {
            let Some(result) = compute(name, &snapshot) else {
                supervisor
                    .report(ErrorRecord::error(format!("derived device '{name}' has no known formula")))
                    .await;
                continue;
            };
            if matches!(result, Sample::Null) {
                supervisor
                    .report(ErrorRecord::warning(format!("derived device '{name}' has a null input")))
                    .await;
            }
            supervisor.values.insert(name.to_string(), result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, Sample)]) -> Snapshot {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn l1_averages_its_two_inputs() {
        let snap = snapshot(&[("L1a", Sample::Number(2.0)), ("L1c", Sample::Number(4.0))]);
        assert_eq!(compute("L1", &snap), Some(Sample::Number(3.0)));
    }

    #[test]
    fn h1_propagates_null_when_an_input_is_missing() {
        let snap = snapshot(&[("P5a", Sample::Null), ("P5d", Sample::Number(1.0))]);
        assert_eq!(compute("H1", &snap), Some(Sample::Null));
    }

    #[test]
    fn h1_computes_difference_when_both_inputs_present() {
        let snap = snapshot(&[("P5a", Sample::Number(0.2)), ("P5d", Sample::Number(1.0))]);
        assert_eq!(compute("H1", &snap), Some(Sample::Number(0.8)));
    }

    #[test]
    fn unknown_name_returns_none() {
        assert_eq!(compute("Bogus", &Snapshot::new()), None);
    }
}
