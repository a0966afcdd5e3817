use std::{env, fs};

use anyhow::{Context, Result, bail};
use log::info;

use machine_learning::{arch::NnetBuilder, training::NnetTrainer};

mod config;
mod data;

use config::RunConfig;
use data::SyntheticData;

const CONFIG_VAR: &str = "TRAINER_CONFIG";

fn main() -> Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_VAR).ok())
        .context("usage: trainer <run.json>, or set TRAINER_CONFIG")?;

    let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    let run: RunConfig =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {path}"))?;

    let mut nnet = NnetBuilder::new().build(&run.nnet)?;
    info!(
        components = nnet.num_components(),
        parameters = nnet.num_parameters();
        "built nnet"
    );

    let mut data = SyntheticData::new(&run.nnet, &run.data)?;
    let perturb = run.trainer.perturb_epsilon > 0.0;
    let mut trainer = NnetTrainer::new(run.trainer, &mut nnet)?;

    for _ in 0..run.data.num_minibatches {
        let eg = data.minibatch()?;

        if perturb {
            let mut perturbed = eg.clone();
            trainer.perturb_input_with_input_deriv(&eg, &mut perturbed)?;
            trainer.train(&perturbed)?;
        } else {
            trainer.train(&eg)?;
        }
    }

    let ok = trainer.print_total_stats();
    trainer.finish()?;

    if !ok {
        bail!("no objective function was accumulated");
    }

    Ok(())
}
