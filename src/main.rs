use bccd_estimator::draw::{DrawNode, DrawTree};
use bccd_estimator::estimate::{PointEstimator, NUM_HEIGHT_SAMPLES};
use bccd_estimator::io::read_posterior_trees;
use bccd_estimator::model::Bccd;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

/// Build a BCCD model from a BEAST/NEXUS posterior tree file and print the
/// point-estimate tree as Newick, with per-node height credible intervals.
#[derive(Parser, Debug)]
#[command(name = "bccd-estimator", version, about = "BCCD point estimate for BEAST posterior trees")]
struct Args {
    /// Path to BEAST .trees (NEXUS) file, optionally gzipped
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Burn-in by number of trees (drop first N trees)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Burn-in by state (keep trees with STATE_ > value)
    #[arg(short = 's', long = "burnin-states", default_value_t = 0)]
    burnin_states: usize,

    /// Use TRANSLATE block to map taxon IDs to labels when available
    #[arg(long = "use-real-taxa", default_value_t = true)]
    use_real_taxa: bool,

    /// RNG seed for reproducible fingerprints and height resampling
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Number of sampled trees for the per-node height distributions
    #[arg(long = "samples", default_value_t = NUM_HEIGHT_SAMPLES)]
    samples: usize,

    /// Optional output path for the Newick point estimate (stdout if absent)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Quiet mode: suppresses progress messages on stdout
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

fn main() {
    let args = Args::parse();

    let t0 = Instant::now();
    let (taxons, trees) = match read_posterior_trees(
        &args.input,
        args.burnin_trees,
        args.burnin_states,
        args.use_real_taxa,
    ) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Failed to read {:?}: {e}", args.input);
            std::process::exit(2);
        }
    };
    if trees.is_empty() {
        eprintln!("No trees parsed from {:?}.", args.input);
        std::process::exit(2);
    }
    let read_s = t0.elapsed().as_secs_f64();
    log_if(!args.quiet, format!("Reading posterior trees {read_s:.3}s"));
    log_if(!args.quiet, format!("Read in {} taxons for {} trees", taxons.len(), trees.len()));

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let t1 = Instant::now();
    let bccd = match Bccd::from_forest(&trees, &mut rng) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("Failed to build the model: {e}");
            std::process::exit(3);
        }
    };
    let build_s = t1.elapsed().as_secs_f64();
    log_if(!args.quiet, format!("Building the clade model {build_s:.3}s"));
    log_if(
        !args.quiet,
        format!(
            "Counted {} clades and {} splits over {} trees",
            bccd.clades.len(),
            bccd.splits.len(),
            bccd.num_trees
        ),
    );

    let t2 = Instant::now();
    let estimator = match PointEstimator::with_num_samples(bccd, rng, args.samples) {
        Ok(estimator) => estimator,
        Err(e) => {
            eprintln!("Failed to compute the point estimate: {e}");
            std::process::exit(3);
        }
    };
    let estimate_s = t2.elapsed().as_secs_f64();
    log_if(!args.quiet, format!("Computing the point estimate {estimate_s:.3}s"));

    let tree = estimator.point_estimate();
    let newick = tree.to_newick();
    match &args.output {
        Some(path) => {
            if let Err(e) = fs::write(path, format!("{newick}\n")) {
                eprintln!("Failed to write output {path:?}: {e}");
                std::process::exit(4);
            }
            log_if(!args.quiet, format!("Wrote point estimate to {path:?}"));
        }
        None => println!("{newick}"),
    }

    if !args.quiet {
        print_height_report(tree);
    }
}

/// Per-internal-node report: height with its mean and 95% credible interval.
fn print_height_report(tree: &DrawTree) {
    println!("node\theight\tmean\tlower95\tupper95");
    print_node_report(&tree.root);
}

fn print_node_report(node: &DrawNode) {
    if let DrawNode::Internal { nr, height, left, right, height_distribution } = node {
        print_node_report(left);
        print_node_report(right);
        match height_distribution {
            Some(summary) => println!(
                "{nr}\t{height:.6}\t{:.6}\t{:.6}\t{:.6}",
                summary.mean, summary.lower, summary.upper
            ),
            None => println!("{nr}\t{height:.6}\t-\t-\t-"),
        }
    }
}

fn log_if(show: bool, msg: String) {
    if show {
        println!("{}", msg);
    }
}
