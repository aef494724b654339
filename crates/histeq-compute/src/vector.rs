//! Element-wise `f32` vector kernels.
//!
//! A single-stage pipeline on the same primitives as the histogram one:
//! two uploads, one dispatch, one download.

use tracing::{debug, info, trace};

use crate::backend::{
    AccessMode, BuiltProgram, CompletionToken, ComputeBackend, IndexSpace, KernelInvocation,
};
use crate::profiling::ProfilingInfo;
use crate::program::{BuildDiagnostics, BuildStatus, ProgramSource};
use crate::{ComputeError, ComputeResult};

/// Sample inputs printed by the `vector` command.
pub const DEMO_A: [f32; 10] = [0.0, 1.5, 2.5, 3.5, 4.5, 5.5, 6.5, 7.5, 8.5, 9.5];
pub const DEMO_B: [f32; 10] = [0.0, 1.5, 2.5, 0.5, 1.5, 2.5, 0.5, 1.5, 2.5, 0.5];

const ENTRY_POINTS: [&str; 2] = ["add", "mult"];

/// Output of one vector kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorResult {
    pub values: Vec<f32>,
    /// `None` when profiling is off.
    pub profile: Option<ProfilingInfo>,
}

/// `add` and `mult` over equal-length slices.
pub struct VectorPipeline<B: ComputeBackend> {
    backend: B,
    program: B::Program,
}

impl<B: ComputeBackend> VectorPipeline<B> {
    /// Build `source`, which must define `add` and `mult`.
    pub fn new(backend: B, source: &ProgramSource, options: &str) -> ComputeResult<Self> {
        let program = backend.build_program(source, options)?;
        let missing: Vec<&str> = ENTRY_POINTS
            .into_iter()
            .filter(|name| !program.has_entry_point(name))
            .collect();
        if !missing.is_empty() {
            let diag = program.diagnostics();
            return Err(BuildDiagnostics {
                status: BuildStatus::Error,
                options: diag.options.clone(),
                log: format!("error: program lacks kernels: {}", missing.join(", ")),
            }
            .into());
        }
        info!(backend = backend.name(), "vector pipeline ready");
        Ok(Self { backend, program })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// `a[i] + b[i]`.
    pub fn add(&self, a: &[f32], b: &[f32]) -> ComputeResult<VectorResult> {
        self.run("add", a, b)
    }

    /// `a[i] * b[i]`.
    pub fn mult(&self, a: &[f32], b: &[f32]) -> ComputeResult<VectorResult> {
        self.run("mult", a, b)
    }

    fn run(&self, kernel: &str, a: &[f32], b: &[f32]) -> ComputeResult<VectorResult> {
        if a.len() != b.len() {
            return Err(ComputeError::InvalidInput(format!(
                "{kernel}: operand lengths differ ({} vs {})",
                a.len(),
                b.len()
            )));
        }
        if a.is_empty() {
            return Err(ComputeError::InvalidInput(format!("{kernel}: empty operands")));
        }
        trace!(kernel, len = a.len(), "vector kernel");

        let bytes = std::mem::size_of_val(a);
        let mut lhs = self.backend.allocate("A", bytes, AccessMode::ReadOnly)?;
        let mut rhs = self.backend.allocate("B", bytes, AccessMode::ReadOnly)?;
        let out = self.backend.allocate("C", bytes, AccessMode::WriteOnly)?;
        self.backend.upload(&mut lhs, bytemuck::cast_slice(a))?;
        self.backend.upload(&mut rhs, bytemuck::cast_slice(b))?;

        let invocation = KernelInvocation::new(kernel, IndexSpace::linear(a.len()))
            .buffer(&lhs)
            .buffer(&rhs)
            .buffer(&out);
        let event = self.backend.dispatch(&self.program, &invocation)?;
        event.wait()?;

        let mut values = vec![0f32; a.len()];
        self.backend.download(&out, bytemuck::cast_slice_mut(&mut values))?;

        let profile = if self.backend.profiling_enabled() {
            let info = event.profiling()?;
            debug!(kernel, elapsed_ns = info.elapsed_ns(), "vector kernel complete");
            Some(info)
        } else {
            None
        };
        Ok(VectorResult { values, profile })
    }
}

impl<B: ComputeBackend> std::fmt::Debug for VectorPipeline<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorPipeline")
            .field("backend", &self.backend.name())
            .field("entry_points", &self.program.entry_points())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use approx::assert_relative_eq;

    fn pipeline(profiling: bool) -> VectorPipeline<HostBackend> {
        VectorPipeline::new(
            HostBackend::with_profiling(profiling),
            &ProgramSource::builtin_vector(),
            "",
        )
        .unwrap()
    }

    #[test]
    fn test_demo_vectors() {
        let p = pipeline(true);
        let sum = p.add(&DEMO_A, &DEMO_B).unwrap();
        let product = p.mult(&DEMO_A, &DEMO_B).unwrap();
        for i in 0..DEMO_A.len() {
            assert_relative_eq!(sum.values[i], DEMO_A[i] + DEMO_B[i]);
            assert_relative_eq!(product.values[i], DEMO_A[i] * DEMO_B[i]);
        }
        assert_relative_eq!(sum.values[3], 4.0);
        assert_relative_eq!(product.values[9], 4.75);

        let profile = sum.profile.unwrap();
        assert!(profile.queued <= profile.submitted);
        assert!(profile.start <= profile.end);
    }

    #[test]
    fn test_length_mismatch() {
        let p = pipeline(false);
        let err = p.add(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidInput(_)));
        assert!(p.mult(&[], &[]).is_err());
    }

    #[test]
    fn test_no_profile_when_disabled() {
        let p = pipeline(false);
        assert!(p.add(&[1.0], &[2.0]).unwrap().profile.is_none());
    }

    #[test]
    fn test_histogram_program_rejected() {
        let err = VectorPipeline::new(HostBackend::new(), &ProgramSource::builtin_histogram(), "")
            .unwrap_err();
        assert!(err.build_diagnostics().unwrap().log.contains("add, mult"));
    }
}
