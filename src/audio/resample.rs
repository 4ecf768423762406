//! Sample-rate conversion via rubato's windowed-sinc resampler.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{Error, Result};

/// Resample a mono signal from `src_rate` to `dst_rate`.
///
/// Returns the input unchanged when the rates already match.
pub fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>> {
    if src_rate == 0 || dst_rate == 0 {
        return Err(Error::Audio(format!(
            "invalid sample rates {src_rate} -> {dst_rate}"
        )));
    }
    if samples.is_empty() || src_rate == dst_rate {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = dst_rate as f64 / src_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let waves_in = vec![samples.to_vec()];
    let mut waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;

    Ok(waves_out.pop().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_identity() {
        let samples = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn downsample_halves_length() {
        let samples: Vec<f32> = (0..32000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 32000.0).sin())
            .collect();
        let out = resample(&samples, 32000, 16000).unwrap();
        let expected = 16000usize;
        assert!(
            out.len().abs_diff(expected) < 300,
            "expected ~{expected} samples, got {}",
            out.len()
        );
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(resample(&[0.0; 8], 0, 16000).is_err());
    }
}
