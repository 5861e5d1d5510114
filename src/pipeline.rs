//! One localization cycle: demodulate, fit every coil, align, publish.

use crate::{
    alignment::{AlignmentResult, RigidAligner},
    config::Config,
    constants::M_TO_MM,
    demodulator::Demodulator,
    dipole_fit::{Coil, DipoleFitter},
    geometry::SensorGeometry,
    stream_buffer::DataBlock,
    transform::{apply_transform, rigid_inverse, rotation_angle, translation_part, TransformPublisher},
    Error, Result,
};
use log::{debug, info};
use nalgebra::{DMatrix, Matrix4};

/// Accumulates popped blocks until a localization cycle has enough samples
#[derive(Debug, Default)]
pub struct SampleWindow {
    blocks: Vec<DMatrix<f64>>,
    samples: usize,
}

impl SampleWindow {
    /// Empty window
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block
    pub fn push(&mut self, block: DataBlock) {
        self.samples += block.samples();
        self.blocks.push(block.into_inner());
    }

    /// Samples held
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Whether at least `samples_per_cycle` samples are held
    pub fn is_ready(&self, samples_per_cycle: usize) -> bool {
        self.samples >= samples_per_cycle
    }

    /// Blocks concatenated along time
    ///
    /// # Errors
    ///
    /// Returns an error if blocks disagree on the channel count
    pub fn concatenated(&self) -> Result<DMatrix<f64>> {
        let channels = self.blocks.first().map_or(0, |b| b.nrows());
        let mut data = DMatrix::zeros(channels, self.samples);
        let mut offset = 0;
        for block in &self.blocks {
            if block.nrows() != channels {
                return Err(Error::BlockShape {
                    expected: (channels, block.ncols()),
                    actual: block.shape(),
                });
            }
            data.columns_mut(offset, block.ncols()).copy_from(block);
            offset += block.ncols();
        }
        Ok(data)
    }

    /// Drop everything held, including samples beyond the last full cycle
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.samples = 0;
    }
}

/// Stateful localization pipeline for one measurement session
///
/// Holds the coil set across cycles so each fit can start where the last
/// one ended.
pub struct LocalizationPipeline {
    geometry: SensorGeometry,
    coils: Vec<Coil>,
    demodulator: Demodulator,
    fitter: DipoleFitter,
    aligner: RigidAligner,
    warm_start: bool,
    amplitudes: DMatrix<f64>,
}

impl LocalizationPipeline {
    /// Build the pipeline for `geometry`
    ///
    /// # Errors
    ///
    /// Returns an error if the localization rate does not yield a positive
    /// number of samples per cycle
    pub fn new(geometry: SensorGeometry, config: &Config) -> Result<Self> {
        let demodulator = Demodulator::from_rates(
            geometry.sample_rate(),
            config.localization.localizations_per_second,
            config.localization.sign_policy,
        )?;
        let coils = geometry
            .head_positions()
            .iter()
            .enumerate()
            .map(|(id, head)| Coil::new(id, *head))
            .collect();
        let amplitudes = DMatrix::zeros(geometry.num_inner(), geometry.num_coils());

        info!(
            "Localization pipeline: {} samples per cycle, {:?} sign policy",
            demodulator.samples_per_cycle(),
            demodulator.sign_policy()
        );

        Ok(Self {
            geometry,
            coils,
            demodulator,
            fitter: DipoleFitter::new(&config.optimizer),
            aligner: RigidAligner::new(&config.alignment),
            warm_start: config.localization.warm_start,
            amplitudes,
        })
    }

    /// Geometry the pipeline was built for
    pub fn geometry(&self) -> &SensorGeometry {
        &self.geometry
    }

    /// Coils as of the latest fit
    pub fn coils(&self) -> &[Coil] {
        &self.coils
    }

    /// Samples consumed per localization
    pub fn samples_per_cycle(&self) -> usize {
        self.demodulator.samples_per_cycle()
    }

    /// Localize every complete sub-window of `data` and publish each result
    ///
    /// Returns the published versions in order.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not match the geometry's channel count
    pub fn process_window(&mut self, data: &DMatrix<f64>, publisher: &TransformPublisher) -> Result<Vec<u64>> {
        let sub_windows = self.demodulator.num_sub_windows(data.ncols());
        let mut versions = Vec::with_capacity(sub_windows);

        for index in 0..sub_windows {
            let alignment = self.localize(data, index, &publisher.transform())?;
            let residual = alignment.residual();
            let version = publisher.publish(alignment.transform, self.coils.clone(), residual);

            info!(
                "Transform v{}: rotation {:.2} deg, translation {:.2} mm, alignment residual {:.3} mm",
                version,
                rotation_angle(&alignment.transform).to_degrees(),
                translation_part(&alignment.transform).norm() * M_TO_MM,
                residual * M_TO_MM
            );
            versions.push(version);
        }

        Ok(versions)
    }

    /// Fit and align one sub-window against the current transform
    ///
    /// # Errors
    ///
    /// Returns an error if the sub-window lies outside `data` or `data` has
    /// the wrong channel count
    pub fn localize(&mut self, data: &DMatrix<f64>, index: usize, current: &Matrix4<f64>) -> Result<AlignmentResult> {
        self.demodulator
            .demodulate_into(data, index, &self.geometry, &mut self.amplitudes)?;

        let device_from_head = rigid_inverse(current);
        for coil in &mut self.coils {
            if !(self.warm_start && coil.is_fitted()) {
                coil.device_position = apply_transform(&device_from_head, &coil.head_position);
            }
        }

        self.fitter.fit_coils(&mut self.coils, &self.amplitudes, &self.geometry);

        let device: Vec<_> = self.coils.iter().map(|c| c.device_position).collect();
        let head: Vec<_> = self.coils.iter().map(|c| c.head_position).collect();
        let alignment = self.aligner.align(&device, &head)?;

        debug!(
            "Sub-window {}: worst coil residual {:.3e}, {} alignment iterations",
            index,
            self.coils.iter().map(|c| c.residual).fold(0.0, f64::max),
            alignment.iterations()
        );

        Ok(alignment)
    }
}
