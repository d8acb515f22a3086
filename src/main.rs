use chrono::Local;
use clap::Parser;
use merkle_roll::{
  Authority, ProofBuilder, Result, RollError, ShadowTree, TreeAccount, TreeConfig, TreeId, hash_leaf, seeded_leaf,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod stat;

#[derive(Parser)]
#[command(name = "roll-sim")]
#[command(about = "Simulate concurrent writers submitting proofs against a concurrent Merkle tree")]
struct Args {
  /// Output directory for reports and the final tree
  #[arg(index = 1, default_value = ".")]
  dir: PathBuf,

  /// Depth of the tree
  #[arg(long, default_value_t = 20)]
  depth: u8,

  /// Capacity of the change log buffer
  #[arg(long, default_value_t = 64)]
  buffer: u32,

  /// Levels cached in the canopy; proofs are submitted without them
  #[arg(long, default_value_t = 0)]
  canopy: u8,

  /// Largest number of writers sharing one root
  #[arg(long, default_value_t = 128)]
  max_writers: usize,

  /// Number of leaves the writers choose from; a small span makes writers collide
  #[arg(long, default_value_t = 4096)]
  span: u32,

  /// Rounds per number of writers
  #[arg(long, default_value_t = 10)]
  loops: usize,

  #[arg(long, default_value_t = 0)]
  seed: u64,
}

const DIV: usize = 8;

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
  let args = Args::parse();
  let config = TreeConfig::new(args.depth, args.buffer, args.canopy)?;
  if args.span == 0 || args.span as u64 > config.capacity() {
    return Err(RollError::InvalidConfig(format!("span {} must be within 1..={}", args.span, config.capacity())));
  }

  let id = Local::now().format("%Y%m%d%H%M%S").to_string();

  let dir = args.dir.clone();
  create_dir_all(&dir)?;
  println!("Working directory: {:?}", &dir);

  run_append(&dir, &id, &config, &args)?;
  run_concurrent_replace(&dir, &id, &config, &args)?;

  Ok(())
}

fn authority(seed: u64) -> Authority {
  hash_leaf(&seed.to_le_bytes())
}

fn tree_id(seed: u64) -> TreeId {
  hash_leaf(format!("roll-sim/{seed}").as_bytes())
}

/// Empty tree ready for writes.
fn open(config: &TreeConfig, seed: u64) -> Result<TreeAccount> {
  let authority = authority(seed);
  let mut account = TreeAccount::new(tree_id(seed), config, authority, None, 0)?;
  account.init_empty(&authority)?;
  Ok(account)
}

fn run_append(dir: &Path, id: &str, config: &TreeConfig, args: &Args) -> Result<()> {
  println!("[roll::append]");
  let max_n = args.span as usize;
  let mut report = stat::Report::new();
  for n in (0..=max_n).step_by((max_n / DIV).max(1)) {
    for _ in 0..args.loops {
      // setup
      let mut account = open(config, args.seed)?;
      let signer = authority(args.seed);

      // run
      let t0 = Instant::now();
      for i in 0..n {
        account.append(&signer, seeded_leaf(i as u64))?;
      }
      let t1 = Instant::now();

      report.add(n, t1 - t0);
    }
    if let Some(s) = report.single(n) {
      println!("  n={n}: {s} ms");
    }
  }

  // write report
  let path = dir.join(format!("{id}-append.csv"));
  report.save_to_csv(&path)?;
  println!("==> {}", path.to_string_lossy());
  Ok(())
}

/// Every round, `n` writers take a proof against the same root and their writes are committed in
/// random order. Writes are rejected when another writer changed the same leaf first or when the
/// proof fell too far behind the buffer.
fn run_concurrent_replace(dir: &Path, id: &str, config: &TreeConfig, args: &Args) -> Result<()> {
  println!("[roll::replace::concurrent]");
  let mut rng = StdRng::seed_from_u64(args.seed);
  let signer = authority(args.seed);
  let mut account = open(config, args.seed)?;
  let mut tree = ShadowTree::new(config.max_depth);
  for i in 0..args.span as usize {
    let leaf = seeded_leaf(i as u64);
    account.append(&signer, leaf)?;
    tree.update(leaf, i);
  }

  let mut timing = stat::Report::new();
  let mut acceptance = stat::Acceptance::new();
  for n in (0..=args.max_writers).step_by((args.max_writers / DIV).max(1)).skip(1) {
    for _ in 0..args.loops {
      // setup
      let builder = ProofBuilder::new(&tree, config.canopy_depth as usize);
      let mut requests = (0..n)
        .map(|_| builder.replace(rng.random_range(0..args.span), seeded_leaf(rng.random())))
        .collect::<Vec<_>>();
      requests.shuffle(&mut rng);

      // run
      let mut accepted = Vec::with_capacity(n);
      let mut rejected = Vec::new();
      let t0 = Instant::now();
      for request in requests.iter() {
        match account.replace_leaf(&signer, request) {
          Ok(_) => accepted.push(request),
          Err(e) => {
            debug!(index = request.index, "write rejected: {e}");
            rejected.push(e);
          }
        }
      }
      let t1 = Instant::now();

      for request in accepted.iter() {
        tree.update(request.new_leaf, request.index as usize);
      }
      if tree.root() != account.root() {
        error!(writers = n, "shadow tree diverged from the authoritative tree");
        return Err(RollError::InvalidProof);
      }
      timing.add(n, t1 - t0);
      acceptance.record(n, accepted.len(), &rejected);
    }
    if let (Some(t), Some(a)) = (timing.single(n), acceptance.get(n)) {
      println!("  n={n}: {t} ms; accepted {:.1}% of {} writes", a.rate(), a.writes);
    }
  }
  info!(rejections = ?acceptance.rejections(), seq = account.roll().sequence_number(), "simulation finished");

  // write report
  let path = dir.join(format!("{id}-replace.csv"));
  timing.save_to_csv(&path)?;
  println!("==> {}", path.to_string_lossy());
  let path = dir.join(format!("{id}-acceptance.csv"));
  acceptance.save_to_csv(&path)?;
  println!("==> {}", path.to_string_lossy());
  let path = dir.join(format!("{id}-tree.bin"));
  account.save(&path)?;
  println!("==> {}", path.to_string_lossy());
  Ok(())
}
