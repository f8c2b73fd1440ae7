use std::time::Instant;

use indicatif::ParallelProgressIterator;
use log::info;
use rayon::prelude::*;

use crate::alignment::{AlignmentGraph, AlignmentSolution};
use crate::config::{OutputPaths, ProjectConfig};
use crate::context::PipelineContext;
use crate::error::{MosaicError, PipelineWarning, Result};
use crate::features::{FrameFeatures, extract_features};
use crate::flight_log::load_flight_logs;
use crate::frame::Frame;
use crate::frame_source::FrameSource;
use crate::georef::{ControlPoint, FramePlacement, GeoTransform, georeference};
use crate::io::{FlightTrack, RunReport, report_timestamp, write_flight_track, write_run_report};
use crate::mosaic::{Footprint, Mosaic, composite, compute_layout};
use crate::optimization::homography::Transform2D;
use crate::raster::write_geotiff;
use crate::visualization::write_preview;

/// Everything a run produces, ready to be written.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub mosaic: Mosaic,
    pub geo_transform: GeoTransform,
    pub control_points: Vec<ControlPoint>,
    pub flight_track: FlightTrack,
    pub report: RunReport,
    pub warnings: Vec<PipelineWarning>,
}

/// Drains the frame source. Per-frame failures become warnings; an empty
/// result is an input error.
pub fn load_frames(ctx: &mut PipelineContext) -> Result<Vec<Frame>> {
    let mut source = FrameSource::from_config(&ctx.config)?;
    let mut frames = Vec::with_capacity(source.len_hint());
    while let Some(next) = source.next() {
        match next {
            Ok(frame) => frames.push(frame),
            Err(err) => {
                let warning = err.into_warning()?;
                ctx.warn(warning);
            }
        }
        ctx.merge(source.take_warnings());
    }
    ctx.merge(source.take_warnings());
    if frames.is_empty() {
        return Err(MosaicError::Input(format!(
            "no frames could be decoded from {}",
            ctx.config.source_dir()?.display()
        )));
    }
    info!("loaded {} frames", frames.len());
    Ok(frames)
}

/// All frames must carry the same number of bands.
pub fn check_band_counts(frames: &[Frame]) -> Result<usize> {
    let Some(first) = frames.first() else {
        return Err(MosaicError::Input("no frames".to_string()));
    };
    let count = first.band_count();
    match frames.iter().find(|f| f.band_count() != count) {
        Some(f) => Err(MosaicError::InconsistentBandGeometry {
            frame: f.name.clone(),
            reason: format!(
                "{} bands, {} has {}",
                f.band_count(),
                first.name,
                count
            ),
        }),
        None => Ok(count),
    }
}

/// Parallel keypoint detection. Frames without enough keypoints are dropped
/// with a warning.
pub fn detect_features(ctx: &mut PipelineContext, frames: &[Frame]) -> Result<Vec<FrameFeatures>> {
    let params = &ctx.config.processing_params;
    let results: Vec<Result<FrameFeatures>> = frames
        .par_iter()
        .progress_count(frames.len() as u64)
        .map(|frame| extract_features(frame, params.reference_band, &params.features))
        .collect();
    let mut features = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(f) => features.push(f),
            Err(err) => {
                let warning = err.into_warning()?;
                ctx.warn(warning);
            }
        }
    }
    info!(
        "features detected on {} of {} frames",
        features.len(),
        frames.len()
    );
    Ok(features)
}

fn frame_name(frames: &[Frame], id: usize) -> String {
    frames
        .iter()
        .find(|f| f.id == id)
        .map(|f| f.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Builds and solves the alignment graph, reporting unreachable frames.
pub fn align(
    ctx: &mut PipelineContext,
    frames: &[Frame],
    features: &[FrameFeatures],
) -> Result<(AlignmentGraph, AlignmentSolution)> {
    let params = &ctx.config.processing_params;
    let graph = AlignmentGraph::build(features, &params.matching, &params.ransac);
    let solution = graph
        .solve()
        .ok_or_else(|| MosaicError::Alignment("no frames with features".to_string()))?;
    let anchor_name = frame_name(frames, graph.nodes[solution.anchor].frame_id);
    for node in solution.unaligned() {
        let reason = if graph.degree(node) == 0 {
            "no valid pairwise transform to any neighbour".to_string()
        } else {
            format!("not connected to anchor frame {}", anchor_name)
        };
        ctx.warn(PipelineWarning::UnalignedFrame {
            frame: frame_name(frames, graph.nodes[node].frame_id),
            reason,
        });
    }
    if solution.aligned_count() < 2 {
        return Err(MosaicError::Alignment(format!(
            "{} of {} frames aligned, at least 2 required",
            solution.aligned_count(),
            graph.nodes.len()
        )));
    }
    info!(
        "anchor {}, {} of {} frames aligned",
        anchor_name,
        solution.aligned_count(),
        graph.nodes.len()
    );
    Ok((graph, solution))
}

/// Runs every stage for one project and returns the products in memory.
pub fn run(config: &ProjectConfig) -> Result<PipelineOutput> {
    let now = Instant::now();
    let mut ctx = PipelineContext::new(config.clone());
    let frames = load_frames(&mut ctx)?;
    let frames_loaded = frames.len();
    let band_count = check_band_counts(&frames)?;
    let features = detect_features(&mut ctx, &frames)?;
    let (graph, solution) = align(&mut ctx, &frames, &features)?;
    let anchor_frame = frame_name(&frames, graph.nodes[solution.anchor].frame_id);

    let mut global_by_id: Vec<Option<Transform2D>> = vec![None; frames.len()];
    for (node, global) in graph.nodes.iter().zip(&solution.global) {
        if let Some(slot) = frames.iter().position(|f| f.id == node.frame_id) {
            global_by_id[slot] = *global;
        }
    }
    let (aligned, transforms): (Vec<Frame>, Vec<Transform2D>) = frames
        .into_iter()
        .zip(global_by_id)
        .filter_map(|(frame, global)| global.map(|g| (frame, g)))
        .unzip();

    let footprints = aligned
        .iter()
        .zip(&transforms)
        .map(|(f, t)| {
            Footprint::new(t, f.width(), f.height()).ok_or_else(|| {
                MosaicError::Composition(format!("{} maps to infinity", f.name))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let params = &ctx.config.processing_params;
    let layout = compute_layout(&footprints, params.mosaic.max_pixels)?;

    let placements = aligned
        .iter()
        .zip(&transforms)
        .map(|(f, t)| {
            let center = t.apply(f.center()).ok_or_else(|| {
                MosaicError::Composition(format!("{} center maps to infinity", f.name))
            })?;
            Ok(FramePlacement {
                frame_id: f.id,
                name: f.name.clone(),
                timestamp_ms: f.timestamp_ms,
                center_px: layout.to_pixel(center),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut geo_warnings = Vec::new();
    let log = load_flight_logs(&ctx.config.flight_log_dir(), &mut geo_warnings)?;
    let georef_params = ctx.config.processing_params.georef.clone();
    let georeferenced = georeference(&placements, &log, &georef_params, &mut geo_warnings);
    ctx.merge(geo_warnings);
    let (geo_transform, control_points) = georeferenced?;
    let flight_track = FlightTrack::from_log(&log, georef_params.crs);

    let frames_aligned = aligned.len();
    let mosaic = composite(
        aligned,
        &transforms,
        layout,
        &ctx.config.processing_params.mosaic,
    )?;

    let (sx, sy) = geo_transform.pixel_size();
    let report = RunReport {
        project_name: ctx.config.project_name.clone(),
        time: report_timestamp(),
        frames_loaded,
        frames_aligned,
        frames_in_mosaic: mosaic.frame_ids.len(),
        band_count,
        anchor_frame,
        pair_edges: graph.edges.len(),
        layout: (&layout).into(),
        epsg: geo_transform.crs().epsg(),
        geo_transform: *geo_transform.coefficients(),
        pixel_size: [sx, sy],
        control_points: control_points.clone(),
        excluded_frames: ctx.excluded_frames(),
        warnings: ctx.warnings().to_vec(),
    };
    info!(
        "pipeline finished in {:.3} sec with {} warnings",
        now.elapsed().as_secs_f64(),
        ctx.warnings().len()
    );
    Ok(PipelineOutput {
        mosaic,
        geo_transform,
        control_points,
        flight_track,
        report,
        warnings: ctx.into_warnings(),
    })
}

/// Writes the raster, flight track, run report and optionally the preview.
pub fn write_outputs(output: &PipelineOutput, paths: &OutputPaths, preview: bool) -> Result<()> {
    std::fs::create_dir_all(&paths.dir)?;
    write_geotiff(
        &paths.raster,
        &output.mosaic.bands,
        &output.geo_transform,
        output.mosaic.nodata,
    )?;
    write_flight_track(&paths.track, &output.flight_track)?;
    write_run_report(&paths.report, &output.report)?;
    if preview {
        write_preview(&paths.preview, &output.mosaic.bands, output.mosaic.nodata)?;
    }
    info!("outputs written to {}", paths.dir.display());
    Ok(())
}
