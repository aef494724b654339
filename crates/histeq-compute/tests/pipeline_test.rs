//! End-to-end tests of the equalization pipeline on the host backend.

use std::sync::Arc;

use histeq_compute::{
    ComputeError, ErrorKind, HistogramPipeline, HostBackend, KernelNames, PipelineConfig,
    ProgramSource, Stage,
};
use histeq_core::scan::inclusive_scan;
use histeq_core::{
    Equalize, FixedScale, HistogramLayout, Identity, ImageMeta, ImageView, ReferenceScale,
    is_non_decreasing, total_count,
};

/// Deterministic noise so failures reproduce.
fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

fn host_pipeline(config: PipelineConfig) -> HistogramPipeline<HostBackend> {
    HistogramPipeline::new(HostBackend::new(), &ProgramSource::builtin_histogram(), config).unwrap()
}

#[test]
fn test_end_to_end_scenario() {
    let config = PipelineConfig::default()
        .with_bins(8)
        .with_normalization(FixedScale { offset: 0, scale: 1.0 });
    let pipeline = host_pipeline(config);

    // bucket = v * 8 / 256: 64..=95 -> 2, 96..=127 -> 3
    let pixels = [64u8, 70, 80, 95, 96, 100, 110, 120, 127, 99];
    let image = ImageView::new(&pixels, ImageMeta::planar(10, 1, 1).unwrap());
    let report = pipeline.run(&image).unwrap();

    assert_eq!(report.histogram, [0, 0, 4, 6, 0, 0, 0, 0]);
    assert_eq!(report.cumulative, [0, 0, 4, 10, 10, 10, 10, 10]);
    assert_eq!(report.lut, report.cumulative);
    assert_eq!(report.output, [4, 4, 4, 4, 10, 10, 10, 10, 10, 10]);

    for stage in Stage::ALL {
        assert!(report.timings.get(stage).is_some(), "no time for {stage}");
    }
    assert_eq!(
        report.total_ns(),
        Stage::ALL.iter().filter_map(|&s| report.timings.get(s)).sum::<u64>()
    );
}

#[test]
fn test_histogram_sum_equals_element_count() {
    let pipeline = host_pipeline(PipelineConfig::default().with_bins(37));
    for (w, h, c) in [(1, 1, 1), (17, 9, 3), (64, 48, 1), (33, 21, 4)] {
        let meta = ImageMeta::planar(w, h, c).unwrap();
        let data = noise(meta.byte_len(), w * h);
        let report = pipeline.run(&ImageView::new(&data, meta)).unwrap();
        assert_eq!(total_count(&report.histogram), meta.element_count() as i64);
        assert_eq!(*report.cumulative.last().unwrap() as usize, meta.element_count());
        assert_eq!(report.output.len(), data.len());
    }
}

#[test]
fn test_device_histogram_matches_host_reference() {
    let pipeline = host_pipeline(PipelineConfig::default());
    let meta = ImageMeta::planar(40, 30, 3).unwrap();
    let data = noise(meta.byte_len(), 7);
    let image = ImageView::new(&data, meta);

    let device = pipeline.build_histogram(&image).unwrap();
    assert_eq!(device.value, pipeline.layout().histogram_of(&image));
}

#[test]
fn test_scan_monotonic_and_keeps_total() {
    let pipeline = host_pipeline(PipelineConfig::default().with_normalization(Equalize));
    let meta = ImageMeta::planar(100, 80, 1).unwrap();
    let data = noise(meta.byte_len(), 42);
    let report = pipeline.run(&ImageView::new(&data, meta)).unwrap();

    assert!(is_non_decreasing(&report.cumulative));
    assert_eq!(
        *report.cumulative.last().unwrap() as i64,
        total_count(&report.histogram)
    );
    assert!(is_non_decreasing(&report.lut));
}

#[test]
fn test_scan_non_power_of_two_buckets() {
    let pipeline = host_pipeline(PipelineConfig::default().with_bins(300));
    assert_eq!(pipeline.layout().padded_bins(), 512);

    let counts: Vec<i32> = noise(300, 3).into_iter().map(i32::from).collect();
    let scanned = pipeline.scan(&counts).unwrap();
    assert_eq!(scanned.value, inclusive_scan(&counts));
}

#[test]
fn test_scan_single_bucket() {
    let pipeline = host_pipeline(PipelineConfig::default().with_bins(1));
    assert_eq!(pipeline.scan(&[17]).unwrap().value, [17]);
}

#[test]
fn test_identity_lut_reproduces_input() {
    let pipeline = host_pipeline(PipelineConfig::default());
    let meta = ImageMeta::planar(32, 32, 2).unwrap();
    let data = noise(meta.byte_len(), 11);
    let image = ImageView::new(&data, meta);

    let lut = HistogramLayout::default().identity_lut();
    let out = pipeline.apply_lut(&image, &lut).unwrap();
    assert_eq!(out.value, data);
}

#[test]
fn test_apply_clamps_out_of_range_lut() {
    let pipeline = host_pipeline(PipelineConfig::default().with_bins(4));
    let pixels = [0u8, 64, 128, 255];
    let image = ImageView::new(&pixels, ImageMeta::planar(2, 2, 1).unwrap());
    let out = pipeline.apply_lut(&image, &[-5, 40, 300, 255]).unwrap();
    assert_eq!(out.value, [0, 40, 255, 255]);
}

#[test]
fn test_malformed_kernel_fails_before_allocation() {
    let device = Arc::new(HostBackend::new());
    let source = ProgramSource::with_source(
        "broken.cl",
        "kernel void createHist(global const uchar* image, global int* hist, const int bins) {\n\
         \tint id = get_global_id(0);\n",
    );
    let err = HistogramPipeline::new(device.clone(), &source, PipelineConfig::default()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::KernelBuild);
    let diag = err.build_diagnostics().unwrap();
    assert!(!diag.status.is_success());
    assert!(!diag.log.trim().is_empty());
    assert!(diag.log.contains("broken.cl"));

    let stats = device.stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.allocations, 0);
    assert_eq!(stats.dispatches, 0);
}

#[test]
fn test_dispatch_failure_names_stage_and_stops() {
    let device = Arc::new(HostBackend::new());
    let mut source = ProgramSource::builtin_histogram();
    source.add_source(
        "my_scan.cl",
        "kernel void myScan(global int* hist, local int* tmp, const int n) {}\n",
    );
    let kernels = KernelNames { scan: "myScan".into(), ..KernelNames::default() };
    let config = PipelineConfig::default().with_kernels(kernels);
    let pipeline = HistogramPipeline::new(device.clone(), &source, config).unwrap();

    let pixels = noise(64, 3);
    let err = pipeline.run(&ImageView::new(&pixels, ImageMeta::planar(8, 8, 1).unwrap())).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::KernelDispatch);
    assert_eq!(err.stage(), Some("scan"));
    // histogram ran, the scan was attempted, apply never dispatched
    assert_eq!(device.stats().dispatches, 2);
}

#[test]
fn test_build_options_reach_diagnostics() {
    let device = Arc::new(HostBackend::new());
    let config = PipelineConfig::default().with_build_options("-D");
    let err = HistogramPipeline::new(device.clone(), &ProgramSource::builtin_histogram(), config)
        .unwrap_err();
    assert_eq!(err.build_diagnostics().unwrap().options, "-D");
    assert_eq!(device.stats().allocations, 0);
}

#[test]
fn test_upload_mismatch_aborts_run() {
    let device = Arc::new(HostBackend::new());
    let pipeline = HistogramPipeline::new(
        device.clone(),
        &ProgramSource::builtin_histogram(),
        PipelineConfig::default(),
    )
    .unwrap();

    // metadata says 4x4, only 10 bytes supplied
    let data = [1u8; 10];
    let err = pipeline
        .run(&ImageView::new(&data, ImageMeta::planar(4, 4, 1).unwrap()))
        .unwrap_err();
    match err {
        ComputeError::TransferSizeMismatch { expected, actual, .. } => {
            assert_eq!(expected, 16);
            assert_eq!(actual, 10);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(device.stats().dispatches, 0);
}

#[test]
fn test_empty_image_rejected() {
    let pipeline = host_pipeline(PipelineConfig::default());
    let meta = ImageMeta::planar(2, 2, 1).unwrap();
    let err = pipeline.run(&ImageView::new(&[], meta)).unwrap_err();
    assert!(matches!(err, ComputeError::InvalidInput(_)));
}

#[test]
fn test_profiling_off_yields_no_timings() {
    let pipeline = HistogramPipeline::new(
        HostBackend::with_profiling(false),
        &ProgramSource::builtin_histogram(),
        PipelineConfig::default().with_normalization(Identity),
    )
    .unwrap();
    let data = noise(256, 5);
    let report = pipeline
        .run(&ImageView::new(&data, ImageMeta::planar(16, 16, 1).unwrap()))
        .unwrap();
    assert!(report.timings.is_empty());
    assert_eq!(report.total_ns(), 0);
    assert!(pipeline.build_histogram(&ImageView::new(&data, ImageMeta::planar(16, 16, 1).unwrap()))
        .unwrap()
        .elapsed_ns
        .is_none());
}

#[test]
fn test_legacy_normalization_runs() {
    let pipeline = host_pipeline(PipelineConfig::default().with_normalization(ReferenceScale::legacy()));
    let meta = ImageMeta::planar(64, 64, 3).unwrap();
    let data = noise(meta.byte_len(), 9);
    let report = pipeline.run(&ImageView::new(&data, meta)).unwrap();
    assert_eq!(report.lut.len(), 256);
    assert_eq!(report.output.len(), data.len());
}

#[test]
fn test_kernels_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("equalize.cl");
    std::fs::write(&path, ProgramSource::builtin_histogram().concatenated()).unwrap();

    let source = ProgramSource::from_files([&path]).unwrap();
    let pipeline = HistogramPipeline::new(HostBackend::new(), &source, PipelineConfig::default()).unwrap();
    let data = noise(64, 1);
    let report = pipeline
        .run(&ImageView::new(&data, ImageMeta::planar(8, 8, 1).unwrap()))
        .unwrap();
    assert_eq!(total_count(&report.histogram), 64);
}

#[test]
fn test_missing_kernel_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ProgramSource::from_files([dir.path().join("nope.cl")]).unwrap_err();
    assert!(matches!(err, ComputeError::SourceRead { .. }));
}
