//! # Training schedule
//!
//! This module drives the network over a sharded dataset. Single-shard datasets get one long
//! fit, multi-shard datasets a phased schedule that steps the learning rate down while cycling
//! every shard through memory. Both paths checkpoint after every epoch and track the test-split
//! end-point-error as training progresses.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dataset::{DatasetLoader, DisparityRange, SplitData};
use crate::error::{Error, Result};
use crate::evaluate::{Evaluation, Evaluator, SplitKind};
use crate::model::{CheckpointWriter, DisparityNetwork, EpochCallback, FitOptions};
use crate::settings::Settings;

#[cfg(feature = "statistics")]
use plotters::prelude::*;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Epoch budget of the single-shard schedule.
const SINGLE_SHARD_EPOCHS: usize = 400;

/// Learning rate of the single-shard schedule.
const SINGLE_SHARD_LR: f32 = 1e-3;

/// Starting learning rate of the phased schedule, divided by [`LR_DIVISOR`] before each phase.
const INITIAL_LR: f32 = 0.5e-2;

/// Learning rate divisor applied per phase.
const LR_DIVISOR: f32 = 5.0;

/// Number of learning rate phases in the multi-shard schedule.
const PHASES: usize = 5;

/// Full-shard rounds per phase.
const ROUNDS_PER_PHASE: usize = 20;

/// Evaluation sweeps run in prediction mode. The early sweeps warm the backend so the
/// reported speed is steady state.
const PREDICT_PASSES: usize = 4;

/// Default checkpoint directory, relative to the working directory.
const CHECKPOINT_DIR: &str = "checkpoint";

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Compile gate for one multi-shard pass.
///
/// Compiling rebuilds the optimiser and discards its state, so a pass over several shards must
/// compile at most once. Callers hand a fresh `Uncompiled` value to each pass, which makes the
/// once-per-call recompilation an explicit input rather than hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileState {
    Uncompiled,
    Compiled,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Owns the live network and drives the whole training and evaluation cycle.
pub struct Trainer {
    settings: Settings,
    loader: DatasetLoader,
    range: DisparityRange,
    test: SplitData,
    net: Box<dyn DisparityNetwork>,
    evaluator: Evaluator,
    checkpoint_dir: PathBuf,

    /// Most recently loaded train shard.
    train: Option<(u32, SplitData)>,

    /// Test-split EPE after each completed evaluation, in evaluation order.
    history: Vec<(usize, f32)>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Trainer {
    /// Create a trainer around an already constructed network.
    ///
    /// `range` and `test` are expected to come from the same loader, see
    /// [`DatasetLoader::disparity_range`] and [`DatasetLoader::load_test_split`].
    pub fn new(
        settings: Settings,
        loader: DatasetLoader,
        range: DisparityRange,
        test: SplitData,
        net: Box<dyn DisparityNetwork>,
        evaluator: Evaluator,
    ) -> Self {
        Trainer {
            settings,
            loader,
            range,
            test,
            net,
            evaluator,
            checkpoint_dir: PathBuf::from(CHECKPOINT_DIR),
            train: None,
            history: Vec::new(),
        }
    }

    /// Redirect checkpoints away from the default `checkpoint/` directory.
    pub fn with_checkpoint_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.checkpoint_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Test-split EPE history, one entry per completed evaluation.
    pub fn history(&self) -> &[(usize, f32)] {
        &self.history
    }

    /// Train according to the shard count.
    ///
    /// One shard gets the long single fit, more shards the phased schedule: the learning rate
    /// is divided by five before each of five phases, and every phase runs twenty rounds of one
    /// epoch per shard followed by a timed test-split evaluation.
    pub fn train_network(&mut self) -> Result<()> {
        if self.settings.skip_training && self.settings.weights.is_some() {
            self.evaluate_test(true)?;
            return Ok(());
        }

        if self.settings.shard_count == 1 {
            self.train_all(SINGLE_SHARD_EPOCHS, SINGLE_SHARD_LR)?;
        } else {
            let mut lr = INITIAL_LR;
            for _phase in 0..PHASES {
                lr /= LR_DIVISOR;
                for _round in 0..ROUNDS_PER_PHASE {
                    let mut state = CompileState::Uncompiled;
                    self.train_batch(1, lr, &mut state)?;
                    self.evaluate_test(true)?;
                }
            }
        }

        #[cfg(feature = "statistics")]
        self.plot_history();

        Ok(())
    }

    /// Single-shard schedule: one fit across the whole epoch budget with checkpointing and a
    /// timed test-split evaluation at every epoch end.
    pub fn train_all(&mut self, epochs: usize, lr: f32) -> Result<()> {
        ensure_checkpoint_dir(&self.checkpoint_dir)?;
        self.load_shard(1)?;
        self.net.compile(lr)?;

        if self.settings.skip_training && self.settings.weights.is_some() {
            self.evaluate_test(true)?;
            return Ok(());
        }

        info!("Training for {} epochs at lr {}", epochs, lr);
        self.fit_resident(&FitOptions::epochs(epochs), true)
    }

    /// One pass over every shard at the given learning rate.
    ///
    /// Shards are loaded just in time, one resident at a time. Compilation happens at most
    /// once per invocation, gated on `state`.
    pub fn train_batch(&mut self, epochs: usize, lr: f32, state: &mut CompileState) -> Result<()> {
        ensure_checkpoint_dir(&self.checkpoint_dir)?;
        let opts = FitOptions::epochs(epochs);

        for index in 1..=self.settings.shard_count {
            self.load_shard(index)?;
            if *state == CompileState::Uncompiled {
                self.net.compile(lr)?;
                *state = CompileState::Compiled;
            }

            if self.settings.skip_training && self.settings.weights.is_some() {
                self.evaluate_test(true)?;
                return Ok(());
            }

            self.fit_resident(&opts, false)?;
        }
        Ok(())
    }

    /// Evaluate the held-out test split, appending the result to the EPE history.
    pub fn evaluate_test(&mut self, measure_performance: bool) -> Result<Evaluation> {
        let evaluation = self.evaluator.evaluate(
            self.net.as_ref(),
            &self.test,
            SplitKind::Test,
            measure_performance,
        )?;
        self.history.push((self.history.len() + 1, evaluation.epe));
        Ok(evaluation)
    }

    /// Evaluate the resident train shard, mostly for qualitative inspection. Does not touch
    /// the EPE history.
    pub fn evaluate_train(&mut self, measure_performance: bool) -> Result<Evaluation> {
        let Self {
            net,
            evaluator,
            train,
            ..
        } = self;
        match train.as_ref() {
            Some((_, shard)) => {
                evaluator.evaluate(net.as_ref(), shard, SplitKind::Train, measure_performance)
            }
            None => Err(Error::Network(String::from("no train shard resident"))),
        }
    }

    /// Prediction-mode entry: sweep the held-out split several times with timing enabled and
    /// return the final, steady-state result.
    pub fn run_prediction(&mut self) -> Result<Evaluation> {
        let mut last = self.evaluate_test(true)?;
        for _ in 1..PREDICT_PASSES {
            last = self.evaluate_test(true)?;
        }
        Ok(last)
    }

    /// Load shard `index` just in time. The reload is skipped only when the dataset has a
    /// single shard and it is already resident.
    fn load_shard(&mut self, index: u32) -> Result<()> {
        if self.settings.shard_count == 1 {
            if let Some((resident, _)) = &self.train {
                if *resident == index {
                    return Ok(());
                }
            }
        }

        let data = self.loader.load_train_shard(index, &self.range)?;
        self.settings.record_dims(data.dims());
        self.train = Some((index, data));
        Ok(())
    }

    /// Fit the network on the resident shard, checkpointing every epoch and, when `with_eval`
    /// is set, evaluating the test split at every epoch end as well.
    fn fit_resident(&mut self, opts: &FitOptions, with_eval: bool) -> Result<()> {
        let mut checkpoint = CheckpointWriter::new(&self.checkpoint_dir, &self.settings.dataset);

        let Self {
            net,
            evaluator,
            test,
            history,
            train,
            ..
        } = self;
        let (_, shard) = match train.as_ref() {
            Some(pair) => pair,
            None => return Err(Error::Network(String::from("no train shard resident"))),
        };

        let left = shard.left.view();
        let right = shard.right.view();
        let disparity = shard.disparity.view();

        if with_eval {
            let mut on_epoch = |_epoch: usize, net: &dyn DisparityNetwork| -> Result<()> {
                let evaluation = evaluator.evaluate(net, test, SplitKind::Test, true)?;
                history.push((history.len() + 1, evaluation.epe));
                Ok(())
            };
            let mut callbacks: [&mut dyn EpochCallback; 2] = [&mut checkpoint, &mut on_epoch];
            net.fit(left, right, disparity, opts, &mut callbacks)
        } else {
            let mut callbacks: [&mut dyn EpochCallback; 1] = [&mut checkpoint];
            net.fit(left, right, disparity, opts, &mut callbacks)
        }
    }

    #[cfg(feature = "statistics")]
    fn plot_history(&self) {
        if self.history.is_empty() {
            return;
        }

        std::fs::create_dir_all("plots").unwrap();

        let mut y_max = self.history.iter().fold(0.0f32, |m, &(_, epe)| m.max(epe));
        if y_max <= 0.0 {
            y_max = 1.0;
        }

        let area = BitMapBackend::new("plots/epe_history.png", (800, 600)).into_drawing_area();
        area.fill(&WHITE).unwrap();

        let mut chart = ChartBuilder::on(&area)
            .caption("Test split EPE", ("sans-serif", 20).into_font())
            .margin(5)
            .x_label_area_size(30)
            .y_label_area_size(30)
            .build_ranged(
                0..self.history.len() + 1,
                0.0f32..y_max * 1.1
            ).unwrap();

        chart.configure_mesh().draw().unwrap();

        chart
            .draw_series(LineSeries::new(
                self.history.clone(),
                &RED
            )).unwrap()
            .label("EPE (pix)")
            .legend(|(x, y)|
                PathElement::new(vec![(x, y), (x + 20, y)], &RED
            ));

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw().unwrap();

        info!("EPE history plotted");
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Create the checkpoint directory, tolerating a pre-existing one.
fn ensure_checkpoint_dir(dir: &Path) -> Result<()> {
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!("Folder exists: {}", dir.display());
            Ok(())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
