//! Backend that shells out to an external TTS program.
//!
//! The program is invoked as
//! `<program> [args..] <input.txt> <output.wav> --voice <voice> --speed <speed>`
//! and must leave a WAV file at the output path.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use ndarray::Array2;
use tracing::{debug, warn};

use crate::backend::{BackendOutput, RawBackendResult, SynthesisBackend};
use crate::wav::read_wav;

#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    args: Vec<String>,
    voices: Vec<String>,
    scratch_dir: PathBuf,
}

impl CommandBackend {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            voices: Vec::new(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Arguments placed before the input and output paths.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_voices(mut self, voices: Vec<String>) -> Self {
        self.voices = voices;
        self
    }

    pub fn with_scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn run(
        &self,
        input: &Path,
        output: &Path,
        text: &str,
        voice: &str,
        speed: f32,
    ) -> anyhow::Result<BackendOutput> {
        std::fs::write(input, text)
            .with_context(|| format!("Failed to write {}", input.display()))?;

        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .arg("--voice")
            .arg(voice)
            .arg("--speed")
            .arg(speed.to_string())
            .output()
            .with_context(|| format!("Failed to launch {}", self.program.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            );
        }

        let wav = read_wav(output)?;
        let channels = usize::from(wav.channels.max(1));
        let frames = wav.samples.len() / channels;
        let samples = wav.samples[..frames * channels].to_vec();
        let audio = Array2::from_shape_vec((frames, channels), samples)
            .context("WAV samples do not form whole frames")?;

        debug!(frames, channels, sample_rate = wav.sample_rate, "command backend produced audio");
        Ok(BackendOutput {
            raw: RawBackendResult::Waveform(audio.into_dyn()),
            sample_rate: wav.sample_rate,
        })
    }
}

impl SynthesisBackend for CommandBackend {
    fn synthesize_raw(&self, text: &str, voice: &str, speed: f32) -> anyhow::Result<BackendOutput> {
        let stem = uuid::Uuid::new_v4().simple().to_string();
        let input = self.scratch_dir.join(format!("tts_{stem}.txt"));
        let output = self.scratch_dir.join(format!("tts_{stem}.wav"));

        let result = self.run(&input, &output, text, voice, speed);

        for path in [&input, &output] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove temp file");
                }
            }
        }
        result
    }

    fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }
}
