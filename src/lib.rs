use mimalloc::MiMalloc;
use pyo3::prelude::*;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod common;
mod cross_validate;
mod factorize;
mod gradient;
mod loss;
mod matrix;
mod sweep;
mod tester;

#[pymodule]
fn _ruslat(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(factorize::factorize_fit, m)?)?;
    m.add_function(wrap_pyfunction!(factorize::factorize_biased_fit, m)?)?;
    m.add_function(wrap_pyfunction!(loss::mean_squared_error, m)?)?;
    m.add_function(wrap_pyfunction!(loss::absolute_mean_error, m)?)?;
    m.add_function(wrap_pyfunction!(loss::binary_disagreement, m)?)?;
    m.add_function(wrap_pyfunction!(sweep::hyper_parameter_sweep, m)?)?;
    m.add_function(wrap_pyfunction!(cross_validate::cross_validate_rank, m)?)?;
    m.add_function(wrap_pyfunction!(cross_validate::summarize_results, m)?)?;
    Ok(())
}
