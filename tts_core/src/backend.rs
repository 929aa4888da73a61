//! The synthesis backend seam and the adapter that turns whatever a backend
//! hands back into a clean mono waveform.
//!
//! Backends differ in what they return: a bare array, `(audio, sample_rate)`,
//! `(audio, metadata)`, or longer tuples mixing arrays with bookkeeping.
//! [`extract_waveform`] is the only place that deals with that ambiguity.

use ndarray::{ArrayD, Axis, Ix1, Ix2};
use tracing::debug;

use crate::error::AdapterError;

/// A tuple member counts as "the audio" when it is longer than this.
///
/// Metadata arrays (phoneme ids, durations, style vectors) are short; even a
/// single word of speech is several thousand samples.
pub const AUDIO_MEMBER_MIN_SAMPLES: usize = 1000;

/// One member of a container-shaped backend result.
#[derive(Debug, Clone)]
pub enum RawValue {
    Array(ArrayD<f32>),
    List(Vec<f32>),
    Scalar(f64),
    Metadata(serde_json::Value),
}

impl RawValue {
    fn kind(&self) -> &'static str {
        match self {
            RawValue::Array(_) => "array",
            RawValue::List(_) => "list",
            RawValue::Scalar(_) => "scalar",
            RawValue::Metadata(_) => "metadata",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RawBackendResult {
    Waveform(ArrayD<f32>),
    Tuple(Vec<RawValue>),
}

/// What a backend returns: raw data plus the rate it was rendered at.
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub raw: RawBackendResult,
    pub sample_rate: u32,
}

impl BackendOutput {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            raw: RawBackendResult::Waveform(ndarray::Array1::from(samples).into_dyn()),
            sample_rate,
        }
    }
}

/// Black-box text to waveform engine.
///
/// Calls block until the waveform is ready; the coordinator runs them on the
/// blocking thread pool. Implementations that cannot serve concurrent calls
/// must be deployed with `max_parallel = 1`.
pub trait SynthesisBackend: Send + Sync {
    fn synthesize_raw(&self, text: &str, voice: &str, speed: f32) -> anyhow::Result<BackendOutput>;

    /// Voices this backend can speak with, if it can enumerate them.
    fn voices(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A validated single-channel waveform with samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWaveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl NormalizedWaveform {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Select the audio member, fold it to one channel, validate and rescale.
pub fn extract_waveform(output: BackendOutput) -> Result<NormalizedWaveform, AdapterError> {
    let array = select_audio(output.raw)?;
    let mut samples = to_mono(array)?;

    if samples.is_empty() {
        return Err(AdapterError::EmptyBuffer);
    }
    if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
        return Err(AdapterError::NonFinite(pos));
    }

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 1.0 {
        debug!(peak, "rescaling audio into [-1, 1]");
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }

    Ok(NormalizedWaveform {
        samples,
        sample_rate: output.sample_rate,
    })
}

fn select_audio(raw: RawBackendResult) -> Result<ArrayD<f32>, AdapterError> {
    let members = match raw {
        RawBackendResult::Waveform(array) => return Ok(array),
        RawBackendResult::Tuple(members) => members,
    };

    match members.len() {
        0 => Err(AdapterError::EmptyContainer),
        1 => into_array(members.into_iter().next().ok_or(AdapterError::EmptyContainer)?),
        2 => {
            let mut members = members.into_iter();
            let first = members.next().ok_or(AdapterError::EmptyContainer)?;
            let second = members.next().ok_or(AdapterError::EmptyContainer)?;
            match (first, second) {
                (RawValue::Array(a), _) => Ok(a),
                (_, RawValue::Array(b)) => Ok(b),
                (first, _) => into_array(first),
            }
        }
        _ => {
            let candidate = members.iter().position(
                |m| matches!(m, RawValue::Array(a) if a.len() > AUDIO_MEMBER_MIN_SAMPLES),
            );
            let index = candidate.unwrap_or(0);
            into_array(members.into_iter().nth(index).ok_or(AdapterError::EmptyContainer)?)
        }
    }
}

fn into_array(value: RawValue) -> Result<ArrayD<f32>, AdapterError> {
    match value {
        RawValue::Array(a) => Ok(a),
        RawValue::List(v) => Ok(ndarray::Array1::from(v).into_dyn()),
        other => Err(AdapterError::NotAudio(other.kind())),
    }
}

/// 1-D passes through; 2-D `(n, 1)` is flattened, `(1, n)` takes its row,
/// anything else takes the first channel of a channels-last layout.
fn to_mono(array: ArrayD<f32>) -> Result<Vec<f32>, AdapterError> {
    match array.ndim() {
        1 => {
            let a = array
                .into_dimensionality::<Ix1>()
                .map_err(|_| AdapterError::UnsupportedRank(1))?;
            Ok(a.to_vec())
        }
        2 => {
            let a = array
                .into_dimensionality::<Ix2>()
                .map_err(|_| AdapterError::UnsupportedRank(2))?;
            let (rows, cols) = a.dim();
            if cols == 1 {
                Ok(a.iter().copied().collect())
            } else if rows == 1 {
                Ok(a.index_axis(Axis(0), 0).to_vec())
            } else {
                Ok(a.index_axis(Axis(1), 0).to_vec())
            }
        }
        n => Err(AdapterError::UnsupportedRank(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};

    fn wave(n: usize, value: f32) -> ArrayD<f32> {
        Array1::from(vec![value; n]).into_dyn()
    }

    fn out(raw: RawBackendResult) -> BackendOutput {
        BackendOutput { raw, sample_rate: 24_000 }
    }

    #[test]
    fn bare_waveform_is_used() {
        let w = extract_waveform(out(RawBackendResult::Waveform(wave(10, 0.5)))).unwrap();
        assert_eq!(w.samples, vec![0.5; 10]);
        assert_eq!(w.sample_rate, 24_000);
    }

    #[test]
    fn pair_prefers_the_array_member() {
        let raw = RawBackendResult::Tuple(vec![
            RawValue::Scalar(24_000.0),
            RawValue::Array(wave(4, 0.25)),
        ]);
        assert_eq!(extract_waveform(out(raw)).unwrap().samples, vec![0.25; 4]);

        let raw = RawBackendResult::Tuple(vec![
            RawValue::Array(wave(3, 0.1)),
            RawValue::Array(wave(5000, 0.2)),
        ]);
        assert_eq!(extract_waveform(out(raw)).unwrap().samples.len(), 3);
    }

    #[test]
    fn pair_without_arrays_converts_the_first_member() {
        let raw = RawBackendResult::Tuple(vec![
            RawValue::List(vec![0.1, 0.2]),
            RawValue::Metadata(serde_json::json!({"phonemes": "h@loU"})),
        ]);
        assert_eq!(extract_waveform(out(raw)).unwrap().samples, vec![0.1, 0.2]);

        let raw = RawBackendResult::Tuple(vec![RawValue::Scalar(1.0), RawValue::Scalar(2.0)]);
        assert!(matches!(
            extract_waveform(out(raw)),
            Err(AdapterError::NotAudio("scalar"))
        ));
    }

    #[test]
    fn long_tuple_picks_the_first_large_array() {
        let raw = RawBackendResult::Tuple(vec![
            RawValue::Array(wave(12, 0.0)),
            RawValue::Metadata(serde_json::json!(null)),
            RawValue::Array(wave(AUDIO_MEMBER_MIN_SAMPLES + 1, 0.3)),
        ]);
        let w = extract_waveform(out(raw)).unwrap();
        assert_eq!(w.samples.len(), AUDIO_MEMBER_MIN_SAMPLES + 1);
    }

    #[test]
    fn long_tuple_without_large_array_uses_the_first_member() {
        let raw = RawBackendResult::Tuple(vec![
            RawValue::Array(wave(12, 0.4)),
            RawValue::Array(wave(20, 0.1)),
            RawValue::Scalar(3.0),
        ]);
        assert_eq!(extract_waveform(out(raw)).unwrap().samples.len(), 12);
    }

    #[test]
    fn multi_channel_is_folded_to_the_first_channel() {
        // (frames, channels)
        let stereo = Array2::from_shape_vec((3, 2), vec![0.1, 0.9, 0.2, 0.9, 0.3, 0.9]).unwrap();
        let w = extract_waveform(out(RawBackendResult::Waveform(stereo.into_dyn()))).unwrap();
        assert_eq!(w.samples, vec![0.1, 0.2, 0.3]);

        let column = Array2::from_shape_vec((3, 1), vec![0.1, 0.2, 0.3]).unwrap();
        let w = extract_waveform(out(RawBackendResult::Waveform(column.into_dyn()))).unwrap();
        assert_eq!(w.samples, vec![0.1, 0.2, 0.3]);

        let row = Array2::from_shape_vec((1, 3), vec![0.1, 0.2, 0.3]).unwrap();
        let w = extract_waveform(out(RawBackendResult::Waveform(row.into_dyn()))).unwrap();
        assert_eq!(w.samples, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn rank_three_is_rejected() {
        let cube = Array3::<f32>::zeros((2, 2, 2)).into_dyn();
        assert!(matches!(
            extract_waveform(out(RawBackendResult::Waveform(cube))),
            Err(AdapterError::UnsupportedRank(3))
        ));
    }

    #[test]
    fn loud_audio_is_rescaled_to_unit_peak() {
        let w = extract_waveform(BackendOutput::mono(vec![0.5, -2.5, 1.25], 22_050)).unwrap();
        let peak = w.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert_eq!(peak, 1.0);
        assert_eq!(w.samples[1], -1.0);
        assert_eq!(w.samples[0], 0.2);
    }

    #[test]
    fn quiet_audio_is_left_alone() {
        let w = extract_waveform(BackendOutput::mono(vec![0.5, -0.25], 22_050)).unwrap();
        assert_eq!(w.samples, vec![0.5, -0.25]);
    }

    #[test]
    fn empty_and_non_finite_buffers_fail() {
        assert!(matches!(
            extract_waveform(BackendOutput::mono(vec![], 22_050)),
            Err(AdapterError::EmptyBuffer)
        ));
        assert!(matches!(
            extract_waveform(BackendOutput::mono(vec![0.1, f32::NAN], 22_050)),
            Err(AdapterError::NonFinite(1))
        ));
        assert!(matches!(
            extract_waveform(BackendOutput::mono(vec![f32::INFINITY], 22_050)),
            Err(AdapterError::NonFinite(0))
        ));
    }

    #[test]
    fn duration_is_samples_over_rate() {
        let w = NormalizedWaveform {
            samples: vec![0.0; 12_000],
            sample_rate: 24_000,
        };
        assert_eq!(w.duration_seconds(), 0.5);
    }
}
