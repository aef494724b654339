//! Vector command
//!
//! Adds and multiplies the sample vectors on the selected device and prints
//! the full profiling breakdown of each kernel in microseconds.

use anyhow::{Context, Result};
use histeq_compute::vector::{DEMO_A, DEMO_B};
use histeq_compute::{
    Backend, ComputeBackend, ComputeError, HostBackend, ProfilingResolution, ProgramSource,
    VectorPipeline, VectorResult,
};
use tracing::trace;

use crate::DeviceArgs;

pub fn run(args: DeviceArgs, verbose: u8) -> Result<()> {
    trace!(backend = args.backend.name(), "vector::run");
    let context = super::context_config(&args);

    match context.backend.resolve() {
        Backend::Auto | Backend::Host => demo(HostBackend::from_config(&context)?, verbose),
        Backend::OpenCl => {
            #[cfg(feature = "opencl")]
            {
                demo(histeq_compute::OpenClBackend::from_config(&context)?, verbose)
            }
            #[cfg(not(feature = "opencl"))]
            {
                Err(ComputeError::BackendNotAvailable("opencl feature not enabled".to_string()).into())
            }
        }
    }
}

fn demo<B: ComputeBackend>(backend: B, verbose: u8) -> Result<()> {
    if verbose > 0 {
        println!("Running on {} [{}]", backend.device_info().name, backend.name());
    }
    let pipeline = VectorPipeline::new(backend, &ProgramSource::builtin_vector(), "").map_err(
        |e: ComputeError| {
            super::report_build_failure(&e);
            anyhow::Error::new(e).context("Failed to build vector kernels")
        },
    )?;

    println!("A = {:?}", DEMO_A);
    println!("B = {:?}", DEMO_B);

    let sum = pipeline.add(&DEMO_A, &DEMO_B).context("add failed")?;
    print_result("A + B", &sum);
    let product = pipeline.mult(&DEMO_A, &DEMO_B).context("mult failed")?;
    print_result("A * B", &product);
    Ok(())
}

fn print_result(label: &str, result: &VectorResult) {
    println!("{label} = {:?}", result.values);
    match &result.profile {
        Some(info) => {
            println!("Kernel execution time [ns]: {}", info.elapsed_ns());
            println!("{}", info.describe(ProfilingResolution::Us));
        }
        None => println!("Profiling disabled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_demo_on_host() {
        let args = DeviceArgs { backend: Backend::Host, platform: 0, device: 0, no_profile: false };
        run(args, 1).unwrap();
    }

    #[test]
    fn test_vector_bad_device_index() {
        let args = DeviceArgs { backend: Backend::Host, platform: 0, device: 3, no_profile: true };
        let err = run(args, 0).unwrap_err();
        let compute = err.downcast_ref::<ComputeError>().unwrap();
        assert_eq!(compute.kind(), histeq_compute::ErrorKind::DeviceSelection);
    }
}
