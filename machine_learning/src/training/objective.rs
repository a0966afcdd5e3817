use ndarray::{ArrayView1, ArrayView2, Axis, Zip};

use crate::{MlErr, Result, arch::ObjectiveType, compute::Executor, matrix::GeneralMatrix};

/// Computes the objective function of an output and, optionally, seeds its derivative.
///
/// # Arguments
/// * `supervision` - The targets of the output, in any encoding.
/// * `objective_type` - The objective the output is trained with.
/// * `output_name` - The name of the output node.
/// * `supply_deriv` - Whether to hand the derivative of the objective back to the executor.
/// * `executor` - Whoever ran the forward pass.
///
/// # Returns
/// The total weight and the total objective of the minibatch.
pub fn compute_objective_function<E: Executor>(
    supervision: &GeneralMatrix,
    objective_type: ObjectiveType,
    output_name: &str,
    supply_deriv: bool,
    executor: &mut E,
) -> Result<(f32, f32)> {
    let (tot_weight, tot_objf, deriv) = {
        let output = executor.output(output_name)?;
        check_shapes(supervision, output, output_name)?;

        match objective_type {
            ObjectiveType::Linear => {
                let post = supervision.dense();
                let tot_objf = trace_mat_mat(output, post.view());
                let deriv = supply_deriv.then(|| post.into_owned());
                (supervision.sum(), tot_objf, deriv)
            }
            ObjectiveType::Quadratic => {
                let mut diff = supervision.to_dense();
                diff -= &output;
                let tot_objf = -0.5 * trace_mat_mat(diff.view(), diff.view());
                (diff.nrows() as f32, tot_objf, supply_deriv.then_some(diff))
            }
        }
    };

    if let Some(deriv) = deriv {
        executor.accept_output_deriv(output_name, deriv)?;
    }

    Ok((tot_weight, tot_objf))
}

/// Computes the classification accuracy of an output.
///
/// Each row weighs as much as the sum of its supervision, and it's counted as correct when the
/// largest supervision value and the largest output value are in the same column.
///
/// # Returns
/// The total weight and the total weight of the correct rows.
pub fn compute_accuracy(supervision: &GeneralMatrix, output: ArrayView2<f32>) -> Result<(f32, f32)> {
    check_shapes(supervision, output, "accuracy")?;

    let supervision = supervision.dense();
    let (tot_weight, tot_accuracy) = supervision
        .axis_iter(Axis(0))
        .zip(output.axis_iter(Axis(0)))
        .fold((0.0, 0.0), |(weight, accuracy), (sup, out)| {
            let row_sum = sup.sum();
            let correct = argmax(sup).is_some() && argmax(sup) == argmax(out);
            (weight + row_sum, if correct { accuracy + row_sum } else { accuracy })
        });

    Ok((tot_weight, tot_accuracy))
}

fn check_shapes(supervision: &GeneralMatrix, output: ArrayView2<f32>, name: &str) -> Result<()> {
    if output.ncols() != supervision.num_cols() {
        return Err(MlErr::DimensionMismatch {
            name: name.to_string(),
            nnet: output.ncols(),
            egs: supervision.num_cols(),
        });
    }

    if output.nrows() != supervision.num_rows() {
        return Err(MlErr::SizeMismatch {
            what: "supervision rows",
            got: supervision.num_rows(),
            expected: output.nrows(),
        });
    }

    Ok(())
}

/// `tr(a·bᵀ)`, i.e. the sum of the elementwise products.
fn trace_mat_mat(a: ArrayView2<f32>, b: ArrayView2<f32>) -> f32 {
    Zip::from(&a)
        .and(&b)
        .fold(0.0f64, |acc, &x, &y| acc + x as f64 * y as f64) as f32
}

/// The index of the first maximum of a row.
fn argmax(row: ArrayView1<f32>) -> Option<usize> {
    row.iter()
        .enumerate()
        .fold(None, |best, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;
    use crate::matrix::{CompressedMatrix, CompressionMethod, SparseMatrix};

    /// An executor with a fixed output that records the derivative it's given.
    struct Fixed {
        output: Array2<f32>,
        deriv: Option<Array2<f32>>,
    }

    impl Executor for Fixed {
        fn output(&self, name: &str) -> Result<ArrayView2<'_, f32>> {
            match name {
                "output" => Ok(self.output.view()),
                other => Err(MlErr::NotAnOutput(other.to_string())),
            }
        }

        fn accept_output_deriv(&mut self, _name: &str, deriv: Array2<f32>) -> Result<()> {
            self.deriv = Some(deriv);
            Ok(())
        }
    }

    fn fixed(output: Array2<f32>) -> Fixed {
        Fixed {
            output,
            deriv: None,
        }
    }

    #[test]
    fn linear_objective_is_a_dot_product() {
        let mut exec = fixed(array![[-0.5, -1.0], [-2.0, -0.25]]);
        let sup: GeneralMatrix = array![[1.0, 0.0], [0.0, 2.0]].into();

        let (weight, objf) =
            compute_objective_function(&sup, ObjectiveType::Linear, "output", true, &mut exec)
                .unwrap();

        assert_eq!(weight, 3.0);
        assert_eq!(objf, -1.0);
        assert_eq!(exec.deriv.unwrap(), array![[1.0, 0.0], [0.0, 2.0]]);
    }

    #[test]
    fn quadratic_objective_of_a_perfect_output_is_zero() {
        let mut exec = fixed(array![[0.5, 1.0], [2.0, 0.25], [1.0, 1.0]]);
        let sup: GeneralMatrix = exec.output.clone().into();

        let (weight, objf) =
            compute_objective_function(&sup, ObjectiveType::Quadratic, "output", true, &mut exec)
                .unwrap();

        assert_eq!(weight, 3.0);
        assert_eq!(objf, 0.0);
        assert!(exec.deriv.unwrap().iter().all(|&d| d == 0.0));
    }

    #[test]
    fn quadratic_deriv_is_the_difference() {
        let mut exec = fixed(array![[1.0, 2.0]]);
        let sup: GeneralMatrix = array![[2.0, 0.0]].into();

        let (_, objf) =
            compute_objective_function(&sup, ObjectiveType::Quadratic, "output", true, &mut exec)
                .unwrap();

        assert_eq!(objf, -2.5);
        assert_eq!(exec.deriv.unwrap(), array![[1.0, -2.0]]);
    }

    #[test]
    fn no_deriv_unless_asked() {
        let mut exec = fixed(array![[1.0, 2.0]]);
        let sup: GeneralMatrix = array![[2.0, 0.0]].into();

        compute_objective_function(&sup, ObjectiveType::Linear, "output", false, &mut exec).unwrap();
        assert!(exec.deriv.is_none());
    }

    #[test]
    fn encodings_agree() {
        let output = array![[-0.5, -2.25, -4.0], [-1.25, -0.5, -2.25]];
        let dense = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let sparse = SparseMatrix::new(3, vec![vec![(0, 1.0)], vec![(2, 1.0)]]).unwrap();
        let compressed = CompressedMatrix::new(dense.view(), CompressionMethod::OneByte);

        let sups: [GeneralMatrix; 3] = [dense.into(), sparse.into(), compressed.into()];

        let results: Vec<_> = sups
            .iter()
            .map(|sup| {
                let mut exec = fixed(output.clone());
                let result =
                    compute_objective_function(sup, ObjectiveType::Linear, "output", true, &mut exec)
                        .unwrap();
                (result, exec.deriv.unwrap())
            })
            .collect();

        assert_eq!(results[0].0, (2.0, -2.75));
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], results[2]);
    }

    #[test]
    fn column_mismatch_is_fatal() {
        let mut exec = fixed(array![[1.0, 2.0]]);
        let sup: GeneralMatrix = array![[1.0, 0.0, 0.0]].into();

        let result = compute_objective_function(&sup, ObjectiveType::Linear, "output", true, &mut exec);
        assert!(matches!(
            result,
            Err(MlErr::DimensionMismatch { nnet: 2, egs: 3, .. })
        ));
    }

    #[test]
    fn accuracy_weights_rows_by_their_supervision() {
        let output = array![[0.9, 0.1], [0.3, 0.7], [0.6, 0.4]];
        let sup: GeneralMatrix = array![[1.0, 0.0], [2.0, 0.0], [0.0, 0.5]].into();

        let (weight, accuracy) = compute_accuracy(&sup, output.view()).unwrap();
        assert_eq!(weight, 3.5);
        assert_eq!(accuracy, 1.0);
    }
}
