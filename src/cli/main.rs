use oddgroup::approx::*;
use oddgroup::fit::{self, Settings, Trace};
use oddgroup::model::HierarchicalModel;
use oddgroup::sample::{Data, Design};
use structopt::*;
use anyhow::{Context, bail};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};

/// Compare a shared success rate (H0) against distinct group rates (H1)
/// over subject-level binomial counts.
#[derive(StructOpt, Debug)]
pub struct Cli {

    /// Log sampler progress and adaptation at debug level.
    #[structopt(short, long)]
    verbose : bool,

    /// Silence every log message and the progress bar.
    #[structopt(short, long)]
    quiet : bool,

    #[structopt(subcommand)]
    cmd : OddGroup

}

#[derive(StructOpt, Debug)]
pub enum OddGroup {

    /// Generates a fictitious subject table, one binomial count per subject.
    Simulate {

        /// Success probability of each group (comma-separated).
        #[structopt(long, use_delimiter = true, default_value = "0.61,0.50,0.49,0.51")]
        probs : Vec<f64>,

        #[structopt(long, default_value = "20")]
        subjects : usize,

        #[structopt(long, default_value = "20")]
        trials : u64,

        #[structopt(long, default_value = "47401")]
        seed : u64,

        #[structopt(short)]
        output : Option<String>
    },

    /// Samples the posterior over (switch, parameters) and reports p(H1|D) and p(H0|D).
    Fit {

        /// CSV table with columns group,trials,correct.
        data : String,

        /// JSON sampler settings; command line values take precedence.
        #[structopt(long)]
        config : Option<String>,

        #[structopt(long)]
        draws : Option<usize>,

        #[structopt(long)]
        burn : Option<usize>,

        #[structopt(long)]
        seed : Option<u64>,

        #[structopt(long)]
        chains : Option<usize>,

        /// Where to write the traces (JSON).
        #[structopt(short)]
        output : Option<String>
    },

    /// Displays hypothesis probabilities, switch R-hat and every pairwise group contrast.
    Summary {
        src : String,

        /// Probability mass of the reported highest-density intervals.
        #[structopt(long, default_value = "0.95")]
        mass : f64
    }

}

fn init_logging(cli : &Cli) {
    let filter = if cli.quiet {
        "off"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();
}

fn load_settings(config : &Option<String>) -> anyhow::Result<Settings> {
    match config {
        Some(path) => {
            let f = File::open(path).with_context(|| format!("Could not open settings file {}", path) )?;
            serde_json::from_reader(BufReader::new(f))
                .with_context(|| format!("Invalid settings file {}", path) )
        },
        None => Ok(Settings::default())
    }
}

fn output_writer(path : &Option<String>) -> anyhow::Result<Box<dyn Write>> {
    match path {
        Some(p) => {
            let f = File::create(p).with_context(|| format!("Could not create {}", p) )?;
            Ok(Box::new(BufWriter::new(f)))
        },
        None => Ok(Box::new(io::stdout()))
    }
}

fn simulate(probs : &[f64], subjects : usize, trials : u64, seed : u64, output : &Option<String>) -> anyhow::Result<()> {
    let design = Design {
        group_probs : probs.to_vec(),
        n_subjects_per_group : subjects,
        n_trials_per_subject : trials,
        seed
    };
    let data = design.simulate()?;
    info!("Simulated {} subjects over {} groups", data.n_subjects(), data.n_groups());
    data.write_csv(output_writer(output)?)?;
    Ok(())
}

fn run_fit(
    data_path : &str,
    settings : Settings,
    output : &Option<String>,
    quiet : bool
) -> anyhow::Result<()> {
    let data = Data::open(data_path)?;
    info!("Loaded {}", data);
    let model = HierarchicalModel::new(data, settings.hyper)?;
    settings.validate()?;

    let total = settings.n_chains * (settings.n_burnin + settings.n_draws);
    let bar = if quiet { ProgressBar::hidden() } else { ProgressBar::new(total as u64) };
    bar.set_style(ProgressStyle::default_bar().template("{elapsed_precise} [{bar:40}] {pos}/{len} sweeps ({eta})"));
    let traces = fit::sample_chains_with(&model, &settings, |_, _| bar.inc(1) )?;
    bar.finish_and_clear();

    let draws : Vec<_> = traces.iter().flat_map(|t| t.draws.iter().cloned() ).collect();
    match estimate_hypothesis_probabilities(&draws[..]) {
        Some((p_h1, p_h0)) => {
            println!("p(H1|D) = {:.4}", p_h1);
            println!("p(H0|D) = {:.4}", p_h0);
        },
        None => println!("No draws retained (n_draws = 0)")
    }
    if output.is_some() {
        serde_json::to_writer(output_writer(output)?, &traces)?;
    }
    Ok(())
}

fn summary(src : &str, mass : f64) -> anyhow::Result<()> {
    let f = File::open(src).with_context(|| format!("Could not open trace file {}", src) )?;
    let traces : Vec<Trace> = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("Invalid trace file {}", src) )?;
    let draws : Vec<_> = traces.iter().flat_map(|t| t.draws.iter().cloned() ).collect();
    let (p_h1, p_h0) = match estimate_hypothesis_probabilities(&draws[..]) {
        Some(p) => p,
        None => bail!("Trace file {} holds no draws", src)
    };
    println!("{} chains, {} draws", traces.len(), draws.len());
    println!("p(H1|D) = {:.4}", p_h1);
    println!("p(H0|D) = {:.4}", p_h0);

    let switch_chains : Vec<Vec<f64>> = traces.iter().map(|t| switch_series(&t.draws[..]) ).collect();
    match split_rhat(&switch_chains[..]) {
        Some(r) => println!("switch split R-hat = {:.3}", r),
        None => println!("switch split R-hat unavailable (too few draws)")
    }
    for t in traces.iter() {
        println!(
            "chain {}: acceptance {:.3}, {} switch flips ({} by jumps), ESS(switch) {:.1}",
            t.chain,
            t.acceptance_rate(),
            t.stats.n_switch_flips,
            t.stats.n_jumps,
            effective_sample_size(&switch_series(&t.draws[..])[..])
        );
    }

    for ((i, j), c) in all_pairwise_contrasts(&draws[..]) {
        match ContrastSummary::from_samples(&c[..], mass) {
            Some(s) => println!("group {} - group {}: {}", i, j, s),
            None => println!("group {} - group {}: no draws under H1", i, j)
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::from_args();
    init_logging(&cli);
    match &cli.cmd {
        OddGroup::Simulate { probs, subjects, trials, seed, output } => {
            simulate(&probs[..], *subjects, *trials, *seed, output)
        },
        OddGroup::Fit { data, config, draws, burn, seed, chains, output } => {
            let mut settings = load_settings(config)?;
            if let Some(n) = draws {
                settings.n_draws = *n;
            }
            if let Some(n) = burn {
                settings.n_burnin = *n;
            }
            if let Some(s) = seed {
                settings.seed = *s;
            }
            if let Some(c) = chains {
                settings.n_chains = *c;
            }
            run_fit(data, settings, output, cli.quiet)
        },
        OddGroup::Summary { src, mass } => {
            summary(src, *mass)
        }
    }
}
