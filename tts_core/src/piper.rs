//! Local Piper voices behind [`SynthesisBackend`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use dashmap::DashMap;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info};

use crate::backend::{BackendOutput, SynthesisBackend};

/// One voice is one model config. piper-rs exposes no speaker selection, so
/// `speaker_id` / `default_speaker` keys in the map are accepted and ignored.
#[derive(Debug, Clone)]
pub struct VoiceEntry {
    pub config: String,
}

#[derive(Debug, Clone)]
struct Language {
    default_voice: String,
    voices: BTreeMap<String, VoiceEntry>,
}

struct CachedSynth {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    sample_rate: u32,
}

pub struct PiperBackend {
    languages: BTreeMap<String, Language>,
    default_language: String,
    cache: DashMap<String, CachedSynth>,
}

impl std::fmt::Debug for PiperBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiperBackend")
            .field("languages", &self.languages.keys().collect::<Vec<_>>())
            .field("default_language", &self.default_language)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl PiperBackend {
    /// Load voices from a `map.json`.
    ///
    /// Two entry formats are accepted per language key: the legacy
    /// `"de_DE": "path/to/config.json"` (or `{ "config": .., "default_speaker": .. }`)
    /// and `{ "default_voice": "thorsten", "voices": { "thorsten": { "config": .. } } }`.
    pub fn from_mapfile<P: AsRef<Path>>(path: P, default_language: &str) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to load {}", path.as_ref().display()))?;
        let json: serde_json::Value =
            serde_json::from_str(&text).context("map.json is not valid JSON")?;
        let languages = parse_map(&json)?;
        if languages.is_empty() {
            anyhow::bail!("map.json does not list any voices");
        }

        let default_language = if languages.contains_key(default_language) {
            default_language.to_string()
        } else {
            languages.keys().next().cloned().unwrap_or_default()
        };
        info!(languages = languages.len(), default_language = %default_language, "piper voices loaded");

        Ok(Self {
            languages,
            default_language,
            cache: DashMap::new(),
        })
    }

    /// Resolve a voice name: a voice id of any language, a language key
    /// (its default voice), or empty for the default language.
    fn resolve(&self, voice: &str) -> anyhow::Result<&VoiceEntry> {
        let lang_key = if voice.is_empty() { self.default_language.as_str() } else { voice };
        if let Some(lang) = self.languages.get(lang_key) {
            return lang
                .voices
                .get(&lang.default_voice)
                .ok_or_else(|| anyhow::anyhow!("default voice missing for language {lang_key}"));
        }
        self.languages
            .values()
            .find_map(|lang| lang.voices.get(voice))
            .ok_or_else(|| anyhow::anyhow!("Unknown voice '{voice}'. Use /voices to list."))
    }

    fn synth_for(&self, cfg_path: &str) -> anyhow::Result<(Arc<RwLock<PiperSpeechSynthesizer>>, u32)> {
        if let Some(cached) = self.cache.get(cfg_path) {
            return Ok((Arc::clone(&cached.synth), cached.sample_rate));
        }

        let sample_rate = read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(Path::new(cfg_path))
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = Arc::new(RwLock::new(PiperSpeechSynthesizer::new(model)?));
        debug!(config = cfg_path, sample_rate, "piper model loaded");

        self.cache.insert(
            cfg_path.to_string(),
            CachedSynth {
                synth: Arc::clone(&synth),
                sample_rate,
            },
        );
        Ok((synth, sample_rate))
    }
}

impl SynthesisBackend for PiperBackend {
    fn synthesize_raw(&self, text: &str, voice: &str, speed: f32) -> anyhow::Result<BackendOutput> {
        let entry = self.resolve(voice)?;
        if (speed - 1.0).abs() > f32::EPSILON {
            debug!(speed, "piper has no rate control; speed ignored");
        }

        let (synth, sample_rate) = self.synth_for(&entry.config)?;
        let synth = synth
            .read()
            .map_err(|_| anyhow::anyhow!("synthesizer lock poisoned"))?;

        let parts: PiperSpeechStreamParallel = synth
            .synthesize_parallel(text.to_string(), None)
            .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

        let mut samples: Vec<f32> = Vec::new();
        for part in parts {
            samples.extend(part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?.into_vec());
        }
        Ok(BackendOutput::mono(samples, sample_rate))
    }

    fn voices(&self) -> Vec<String> {
        let mut voices: Vec<String> = self
            .languages
            .values()
            .flat_map(|lang| lang.voices.keys().cloned())
            .collect();
        voices.extend(self.languages.keys().cloned());
        voices.sort();
        voices.dedup();
        voices
    }
}

fn parse_map(json: &serde_json::Value) -> anyhow::Result<BTreeMap<String, Language>> {
    let obj = json
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("map.json must be a JSON object"))?;

    let mut languages = BTreeMap::new();
    for (lang, value) in obj {
        let language = match value {
            serde_json::Value::Object(o) if o.contains_key("voices") => {
                let default_voice = o
                    .get("default_voice")
                    .and_then(|x| x.as_str())
                    .ok_or_else(|| anyhow::anyhow!("missing 'default_voice' for language {lang}"))?
                    .to_string();
                let voices_obj = o
                    .get("voices")
                    .and_then(|x| x.as_object())
                    .ok_or_else(|| anyhow::anyhow!("missing 'voices' object for language {lang}"))?;

                let mut voices = BTreeMap::new();
                for (voice_id, data) in voices_obj {
                    let config = data
                        .get("config")
                        .and_then(|x| x.as_str())
                        .ok_or_else(|| anyhow::anyhow!("missing 'config' for voice {voice_id}"))?;
                    voices.insert(
                        voice_id.clone(),
                        VoiceEntry {
                            config: config.to_string(),
                        },
                    );
                }
                if !voices.contains_key(&default_voice) {
                    anyhow::bail!("default voice '{default_voice}' of {lang} is not listed");
                }
                Language { default_voice, voices }
            }
            serde_json::Value::String(config) => legacy(lang, config.clone()),
            serde_json::Value::Object(o) => {
                let config = o
                    .get("config")
                    .and_then(|x| x.as_str())
                    .ok_or_else(|| anyhow::anyhow!("missing 'config' for key {lang}"))?;
                legacy(lang, config.to_string())
            }
            _ => anyhow::bail!("invalid entry for key {lang} (expected string or object)"),
        };
        languages.insert(lang.clone(), language);
    }
    Ok(languages)
}

/// A legacy entry is a language with a single voice named after it.
fn legacy(lang: &str, config: String) -> Language {
    let mut voices = BTreeMap::new();
    voices.insert(lang.to_string(), VoiceEntry { config });
    Language {
        default_voice: lang.to_string(),
        voices,
    }
}

fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
    let text = fs::read_to_string(cfg_path.as_ref())
        .with_context(|| format!("Failed to read config file: {}", cfg_path.as_ref().display()))?;
    let json: serde_json::Value = serde_json::from_str(&text).context("Config file is not valid JSON")?;
    let rate = json
        .get("audio")
        .and_then(|a| a.get("sample_rate"))
        .and_then(|sr| sr.as_u64())
        .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;
    Ok(rate as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(json: serde_json::Value) -> PiperBackend {
        PiperBackend {
            languages: parse_map(&json).unwrap(),
            default_language: "de_DE".into(),
            cache: DashMap::new(),
        }
    }

    #[test]
    fn parses_both_map_formats() {
        let b = backend(serde_json::json!({
            "de_DE": {
                "default_voice": "thorsten",
                "voices": {
                    "thorsten": { "config": "models/de/thorsten.onnx.json" },
                    "kerstin": { "config": "models/de/kerstin.onnx.json", "display_name": "Kerstin" }
                }
            },
            "en_US": "models/en/lessac.onnx.json",
            "fr_FR": { "config": "models/fr/siwis.onnx.json", "default_speaker": 2 }
        }));

        assert_eq!(b.resolve("").unwrap().config, "models/de/thorsten.onnx.json");
        assert_eq!(b.resolve("kerstin").unwrap().config, "models/de/kerstin.onnx.json");
        assert_eq!(b.resolve("en_US").unwrap().config, "models/en/lessac.onnx.json");
        assert_eq!(b.resolve("fr_FR").unwrap().config, "models/fr/siwis.onnx.json");
        assert!(b.resolve("nobody").is_err());
        assert_eq!(b.voices(), vec!["de_DE", "en_US", "fr_FR", "kerstin", "thorsten"]);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_map(&serde_json::json!({ "de_DE": 3 })).is_err());
        assert!(parse_map(&serde_json::json!({
            "de_DE": { "default_voice": "x", "voices": { "y": { "config": "c" } } }
        }))
        .is_err());
        assert!(parse_map(&serde_json::json!([])).is_err());
    }

    #[test]
    fn sample_rate_comes_from_model_config() {
        let path = std::env::temp_dir().join(format!("piper_cfg_{}.json", uuid::Uuid::new_v4().simple()));
        fs::write(&path, r#"{ "audio": { "sample_rate": 22050 } }"#).unwrap();
        assert_eq!(read_sample_rate(&path).unwrap(), 22_050);
        fs::remove_file(&path).ok();
    }
}
