use anyhow::{Result, bail};
use machine_learning::{
    example::{NnetExample, NnetIo},
    matrix::{CompressedMatrix, CompressionMethod, GeneralMatrix, SparseMatrix},
    specs::NnetSpec,
};
use ndarray::Array2;
use ndarray_rand::{
    RandomExt,
    rand_distr::{Normal, Uniform},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::{DataSpec, Encoding};

/// Generates minibatches of a gaussian mixture classification task: each class is a cloud of
/// points around a random mean.
pub struct SyntheticData {
    input: String,
    output: String,
    means: Array2<f32>,
    noise: Normal<f32>,
    minibatch_size: usize,
    encoding: Encoding,
    rng: StdRng,
}

impl SyntheticData {
    /// Creates a new `SyntheticData` for the input of `nnet`.
    pub fn new(nnet: &NnetSpec, spec: &DataSpec) -> Result<Self> {
        if !nnet.outputs.iter().any(|o| o.name == spec.output) {
            bail!("the nnet has no output named '{}'", spec.output);
        }

        if spec.num_classes == 0 || spec.minibatch_size == 0 {
            bail!("the data needs at least one class and one example per minibatch");
        }

        let mut rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let dim = nnet.input.dim;
        let means = Array2::random_using((spec.num_classes, dim), Uniform::new(-2.0, 2.0)?, &mut rng);

        Ok(Self {
            input: nnet.input.name.clone(),
            output: spec.output.clone(),
            means,
            noise: Normal::new(0.0, spec.noise)?,
            minibatch_size: spec.minibatch_size,
            encoding: spec.encoding,
            rng,
        })
    }

    pub fn minibatch(&mut self) -> Result<NnetExample> {
        let num_classes = self.means.nrows();
        let labels: Vec<usize> = (0..self.minibatch_size)
            .map(|_| self.rng.random_range(0..num_classes))
            .collect();

        let mut input = Array2::random_using(
            (self.minibatch_size, self.means.ncols()),
            self.noise,
            &mut self.rng,
        );

        for (mut row, &label) in input.rows_mut().into_iter().zip(&labels) {
            row += &self.means.row(label);
        }

        let eg = NnetExample::new(vec![
            NnetIo::new(&self.input, input),
            NnetIo::new(&self.output, self.encode(&labels)?),
        ])?;

        Ok(eg)
    }

    fn encode(&self, labels: &[usize]) -> Result<GeneralMatrix> {
        let num_classes = self.means.nrows();

        let one_hot = || {
            let mut post = Array2::<f32>::zeros((labels.len(), num_classes));
            for (i, &label) in labels.iter().enumerate() {
                post[[i, label]] = 1.0;
            }
            post
        };

        let supervision: GeneralMatrix = match self.encoding {
            Encoding::Sparse => {
                let rows = labels.iter().map(|&label| vec![(label, 1.0)]).collect();
                SparseMatrix::new(num_classes, rows)?.into()
            }
            Encoding::Full => one_hot().into(),
            Encoding::Compressed => CompressedMatrix::new(one_hot().view(), CompressionMethod::OneByte).into(),
        };

        Ok(supervision)
    }
}
