//! Equalize command
//!
//! Loads an image, runs the device pipeline and writes the result.

use std::sync::Arc;

use anyhow::{Context, Result};
use histeq_compute::{AnyPipeline, PipelineConfig, ProgramSource};
use histeq_core::{Equalize, Identity, Normalization, ReferenceScale};
use tracing::{info, trace};

use crate::{EqualizeArgs, NormalizeMode};

pub fn run(args: EqualizeArgs, verbose: u8) -> Result<()> {
    trace!(input = %args.input.display(), bins = args.bins, "equalize::run");

    let image = super::load_planar(&args.input)?;
    info!(input = %args.input.display(), image = %image.meta(), "loaded image");

    let source = if args.kernels.is_empty() {
        ProgramSource::builtin_histogram()
    } else {
        ProgramSource::from_files(&args.kernels).context("Failed to read kernel sources")?
    };

    let config = PipelineConfig::default()
        .with_bins(args.bins)
        .with_build_options(args.build_options.clone())
        .with_shared_normalization(normalization(args.normalize));

    let context = super::context_config(&args.device);
    let pipeline = AnyPipeline::open(&context, &source, config).map_err(|e| {
        super::report_build_failure(&e);
        anyhow::Error::new(e).context("Failed to set up the pipeline")
    })?;

    if verbose > 0 {
        println!(
            "Running on {} [{}], {} buckets",
            pipeline.device_info().name,
            pipeline.name(),
            args.bins
        );
    }

    let report = pipeline
        .run(&image.view())
        .with_context(|| format!("Equalization of {} failed", args.input.display()))?;

    if args.print_histograms {
        println!("Histogram = {:?}", report.histogram);
        println!("Cumulative histogram = {:?}", report.cumulative);
        println!("Normalized histogram = {:?}", report.lut);
    }

    if report.timings.is_empty() {
        println!("Profiling disabled");
    } else {
        print!("{}", report.timings);
    }

    match &args.output {
        Some(path) => {
            super::save_planar(path, image.meta(), &report.output)?;
            if verbose > 0 {
                println!("Wrote {}", path.display());
            }
        }
        None => info!("no output path given, result discarded"),
    }
    Ok(())
}

fn normalization(mode: NormalizeMode) -> Arc<dyn Normalization> {
    match mode {
        NormalizeMode::Reference => Arc::new(ReferenceScale::default()),
        NormalizeMode::Legacy => Arc::new(ReferenceScale::legacy()),
        NormalizeMode::Equalize => Arc::new(Equalize),
        NormalizeMode::Identity => Arc::new(Identity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceArgs;
    use histeq_compute::Backend;
    use histeq_core::ImageMeta;

    fn args(input: std::path::PathBuf, output: std::path::PathBuf) -> EqualizeArgs {
        EqualizeArgs {
            input,
            output: Some(output),
            device: DeviceArgs { backend: Backend::Host, platform: 0, device: 0, no_profile: false },
            bins: 256,
            kernels: Vec::new(),
            build_options: String::new(),
            normalize: NormalizeMode::Equalize,
            print_histograms: false,
        }
    }

    #[test]
    fn test_equalize_stretches_low_contrast() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pgm");
        let output = dir.path().join("out.pgm");
        let meta = ImageMeta::planar(16, 16, 1).unwrap();
        let pixels: Vec<u8> = (0..256).map(|i| 100 + (i % 16) as u8).collect();
        super::super::save_planar(&input, &meta, &pixels).unwrap();

        run(args(input, output.clone()), 0).unwrap();

        let out = super::super::load_planar(&output).unwrap();
        assert_eq!(out.data().iter().copied().min(), Some(0));
        assert_eq!(out.data().iter().copied().max(), Some(255));
    }

    #[test]
    fn test_bad_kernel_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pgm");
        let meta = ImageMeta::planar(2, 2, 1).unwrap();
        super::super::save_planar(&input, &meta, &[1, 2, 3, 4]).unwrap();

        let broken = dir.path().join("broken.cl");
        std::fs::write(&broken, "kernel void createHist(global int* h {").unwrap();
        let mut a = args(input, dir.path().join("out.pgm"));
        a.kernels = vec![broken];

        let err = run(a, 0).unwrap_err();
        assert!(err.to_string().contains("Failed to set up the pipeline"));
    }
}
