use merkle_roll::{Result, RollError};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Summary of the samples taken for one parameter value.
#[derive(Debug, Clone)]
pub struct Stat {
  pub count: usize,
  pub mean: f64,
  pub median: f64,
  pub std_dev: f64,
  pub min: f64,
  pub max: f64,
}

impl Stat {
  pub fn from_samples(samples: &[f64]) -> Stat {
    if samples.is_empty() {
      return Stat { count: 0, mean: f64::NAN, median: f64::NAN, std_dev: f64::NAN, min: f64::NAN, max: f64::NAN };
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let count = sorted.len();
    let mid = count / 2;
    let median = if count % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] };
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64;
    Stat { count, mean, median, std_dev: variance.sqrt(), min: sorted[0], max: sorted[count - 1] }
  }
}

impl Display for Stat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    // 2σ spread relative to the mean
    let spread = if self.mean > 0.0 { 200.0 * self.std_dev / self.mean } else { 0.0 };
    write!(f, "{}: {:.2} ±{:.1}% [{:.1}|{:.1}|{:.1}]", self.count, self.mean, spread, self.min, self.median, self.max)
  }
}

/// Elapsed times in milliseconds, grouped by a parameter `X` such as the number of writers.
pub struct Report<X: Display + Copy + Ord> {
  samples: BTreeMap<X, Vec<f64>>,
}

impl<X: Display + Copy + Ord> Report<X> {
  pub fn new() -> Self {
    Report { samples: BTreeMap::new() }
  }

  pub fn add(&mut self, x: X, elapsed: Duration) {
    self.samples.entry(x).or_default().push(elapsed.as_micros() as f64 / 1000.0);
  }

  pub fn single(&self, x: X) -> Option<Stat> {
    self.samples.get(&x).map(|ys| Stat::from_samples(ys))
  }

  pub fn save_to_csv(&self, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "N,COUNT,MEAN,MEDIAN,STDDEV,MIN,MAX")?;
    for (x, ys) in self.samples.iter() {
      let s = Stat::from_samples(ys);
      writeln!(w, "\"{x}\",{},{:.3},{:.3},{:.3},{:.3},{:.3}", s.count, s.mean, s.median, s.std_dev, s.min, s.max)?;
    }
    w.flush()?;
    Ok(())
  }
}

/// Writes offered and accepted for one number of concurrent writers.
#[derive(Debug, Clone, Default)]
pub struct Tally {
  /// Accepted share of each round, in percent.
  pub rates: Vec<f64>,
  pub writes: usize,
  pub accepted: usize,
  /// Rejected writes by error kind.
  pub rejected: BTreeMap<&'static str, usize>,
}

impl Tally {
  /// Accepted share over all rounds, in percent.
  pub fn rate(&self) -> f64 {
    if self.writes == 0 { f64::NAN } else { self.accepted as f64 * 100.0 / self.writes as f64 }
  }

  pub fn rounds(&self) -> usize {
    self.rates.len()
  }
}

/// Outcome of concurrent write rounds, grouped by the number of writers sharing one root.
pub struct Acceptance {
  tallies: BTreeMap<usize, Tally>,
}

impl Acceptance {
  pub fn new() -> Self {
    Acceptance { tallies: BTreeMap::new() }
  }

  /// Record one round in which `writers` proofs were submitted, `accepted` of them succeeded and the
  /// rest failed with `rejections`.
  pub fn record(&mut self, writers: usize, accepted: usize, rejections: &[RollError]) {
    let tally = self.tallies.entry(writers).or_default();
    let writes = accepted + rejections.len();
    tally.writes += writes;
    tally.accepted += accepted;
    tally.rates.push(if writes == 0 { 100.0 } else { accepted as f64 * 100.0 / writes as f64 });
    for e in rejections.iter() {
      *tally.rejected.entry(e.kind()).or_default() += 1;
    }
  }

  pub fn get(&self, writers: usize) -> Option<&Tally> {
    self.tallies.get(&writers)
  }

  /// Rejections by kind over every round.
  pub fn rejections(&self) -> BTreeMap<&'static str, usize> {
    let mut total = BTreeMap::new();
    for (kind, count) in self.tallies.values().flat_map(|t| t.rejected.iter()) {
      *total.entry(*kind).or_default() += count;
    }
    total
  }

  /// One row per number of writers. REJECTED lists `kind=count` pairs separated by `;`.
  pub fn save_to_csv(&self, path: &Path) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "N,ROUNDS,WRITES,ACCEPTED,RATE,RATE_STDDEV,REJECTED")?;
    for (n, t) in self.tallies.iter() {
      let rejected = t.rejected.iter().map(|(kind, count)| format!("{kind}={count}")).collect::<Vec<_>>().join(";");
      let spread = Stat::from_samples(&t.rates).std_dev;
      writeln!(w, "{n},{},{},{},{:.3},{:.3},\"{rejected}\"", t.rounds(), t.writes, t.accepted, t.rate(), spread)?;
    }
    w.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stat_of_samples() {
    let s = Stat::from_samples(&[4.0, 1.0, 3.0, 2.0]);
    assert_eq!(4, s.count);
    assert_eq!(2.5, s.mean);
    assert_eq!(2.5, s.median);
    assert_eq!(1.0, s.min);
    assert_eq!(4.0, s.max);
    assert!((s.std_dev - 1.25f64.sqrt()).abs() < 1e-12);
    assert_eq!(3.0, Stat::from_samples(&[5.0, 3.0, 1.0]).median);
    assert!(Stat::from_samples(&[]).mean.is_nan());
  }

  #[test]
  fn timing_rows_are_ordered_by_parameter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replace.csv");
    let mut report = Report::new();
    report.add(16usize, Duration::from_millis(3));
    report.add(4usize, Duration::from_millis(50));
    report.add(4usize, Duration::from_millis(100));
    report.save_to_csv(&path).unwrap();

    assert_eq!(75.0, report.single(4).unwrap().mean);
    assert!(report.single(8).is_none());
    let csv = std::fs::read_to_string(&path).unwrap();
    let lines = csv.lines().collect::<Vec<_>>();
    assert_eq!("N,COUNT,MEAN,MEDIAN,STDDEV,MIN,MAX", lines[0]);
    assert!(lines[1].starts_with("\"4\",2,75.000,"));
    assert!(lines[2].starts_with("\"16\",1,3.000,"));
  }

  #[test]
  fn acceptance_tallies_rejections_by_kind() {
    let mut acceptance = Acceptance::new();
    acceptance.record(4, 3, &[RollError::LeafContentsModified]);
    acceptance.record(4, 1, &[RollError::LeafContentsModified, RollError::InvalidProof, RollError::InvalidProof]);
    acceptance.record(2, 2, &[]);

    let four = acceptance.get(4).unwrap();
    assert_eq!(2, four.rounds());
    assert_eq!(8, four.writes);
    assert_eq!(4, four.accepted);
    assert_eq!(50.0, four.rate());
    assert_eq!(vec![75.0, 25.0], four.rates);
    assert_eq!(Some(&2), four.rejected.get("LeafContentsModified"));
    assert_eq!(100.0, acceptance.get(2).unwrap().rate());
    assert!(acceptance.get(8).is_none());
    assert!(Tally::default().rate().is_nan());

    let total = acceptance.rejections();
    assert_eq!(vec![("InvalidProof", 2), ("LeafContentsModified", 2)], total.into_iter().collect::<Vec<_>>());
    assert_eq!("IndexOutOfBounds", RollError::IndexOutOfBounds { index: 9, limit: 8 }.kind());
  }

  #[test]
  fn acceptance_rows_list_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acceptance.csv");
    let mut acceptance = Acceptance::new();
    acceptance.record(16, 12, &[]);
    acceptance.record(2, 1, &[RollError::InvalidProof]);
    acceptance.record(16, 8, &[RollError::RootNotFound, RollError::InvalidProof]);
    acceptance.save_to_csv(&path).unwrap();

    let csv = std::fs::read_to_string(&path).unwrap();
    let lines = csv.lines().collect::<Vec<_>>();
    assert_eq!("N,ROUNDS,WRITES,ACCEPTED,RATE,RATE_STDDEV,REJECTED", lines[0]);
    assert_eq!("2,1,2,1,50.000,0.000,\"InvalidProof=1\"", lines[1]);
    assert!(lines[2].starts_with("16,2,22,20,90.909,"));
    assert!(lines[2].ends_with(",\"InvalidProof=1;RootNotFound=1\""));
    assert_eq!(3, lines.len());
  }
}
