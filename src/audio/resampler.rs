use crate::{Result, VoxError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Convert a mono clip between sample rates.
///
/// Used once per TTS payload to match decoded audio to the output
/// device rate, so the whole clip is processed in one pass.
pub fn resample_mono(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == 0 || output_rate == 0 {
        return Err(VoxError::Config("Sample rates must be greater than 0".into()));
    }

    if input.is_empty() || input_rate == output_rate {
        return Ok(input.to_vec());
    }

    let ratio = output_rate as f64 / input_rate as f64;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let chunk_size = 1024;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .map_err(|e| VoxError::Decode(format!("Failed to create resampler: {}", e)))?;

    let mut output = Vec::with_capacity((input.len() as f64 * ratio * 1.1) as usize);

    let mut offset = 0;
    while offset < input.len() {
        let remaining = input.len() - offset;
        let take = remaining.min(chunk_size);

        // SincFixedIn needs exactly chunk_size frames; zero-pad the tail
        let mut planar = vec![vec![0.0f32; chunk_size]];
        planar[0][..take].copy_from_slice(&input[offset..offset + take]);

        let processed = resampler
            .process(&planar, None)
            .map_err(|e| VoxError::Decode(format!("Resampling failed: {}", e)))?;

        let produced = processed[0].len();
        let keep = if remaining < chunk_size {
            ((take as f64) * ratio).ceil() as usize
        } else {
            produced
        };
        output.extend_from_slice(&processed[0][..keep.min(produced)]);

        offset += take;
    }

    debug!(
        "Resampled {} samples at {} Hz -> {} samples at {} Hz",
        input.len(),
        input_rate,
        output.len(),
        output_rate
    );

    Ok(output)
}
