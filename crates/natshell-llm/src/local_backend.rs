//! Backend trait for running a local model's raw text generation, separate
//! from the `InferenceEngine` wrapper in [`crate::local`] that turns raw
//! text into a structured `CompletionResult`. Grounded on
//! `deepseek-local-ml::completion::LocalGenBackend`, which the teacher
//! keeps trait-object-safe for runtime backend swapping and backs with a
//! feature-gated `candle_backend` module -- the same split is used here so
//! tests run against a deterministic mock rather than needing real model
//! weights on disk.

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct GenOpts {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenOpts {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
            stop_sequences: vec![],
        }
    }
}

pub trait LocalGenBackend: Send + Sync {
    fn generate(&self, prompt: &str, opts: &GenOpts) -> Result<String>;

    /// Context window in tokens this backend's loaded model supports.
    fn context_window(&self) -> u32;

    fn model_id(&self) -> &str;
}

/// Deterministic fixed-output backend used in tests and as a placeholder
/// when no model file is configured yet.
pub struct MockLocalBackend {
    pub fixed_output: String,
    pub context_window: u32,
}

impl MockLocalBackend {
    pub fn new(fixed_output: impl Into<String>, context_window: u32) -> Self {
        Self {
            fixed_output: fixed_output.into(),
            context_window,
        }
    }
}

impl LocalGenBackend for MockLocalBackend {
    fn generate(&self, _prompt: &str, _opts: &GenOpts) -> Result<String> {
        Ok(self.fixed_output.clone())
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    fn model_id(&self) -> &str {
        "mock-local"
    }
}

#[cfg(feature = "local-ml")]
pub mod candle_backend {
    //! Real local inference via `candle`. Loads a safetensors checkpoint and
    //! its tokenizer (downloaded through `hf-hub` if not already cached) and
    //! runs a standard sample-one-token-at-a-time generation loop.

    use super::{GenOpts, LocalGenBackend};
    use anyhow::{Context, Result};
    use candle_core::{DType, Device, Tensor};
    use candle_transformers::generation::LogitsProcessor;
    use std::path::Path;
    use std::sync::Mutex;
    use tokenizers::Tokenizer;

    /// Generic causal-LM forward pass, implemented by whichever
    /// `candle_transformers::models::*` architecture matches the loaded
    /// checkpoint's config.
    pub trait CausalModel: Send {
        fn forward(&mut self, input_ids: &Tensor, position: usize) -> candle_core::Result<Tensor>;
    }

    pub struct CandleBackend<M: CausalModel> {
        model: Mutex<M>,
        tokenizer: Tokenizer,
        device: Device,
        model_id: String,
        context_window: u32,
    }

    impl<M: CausalModel> CandleBackend<M> {
        pub fn new(
            model: M,
            tokenizer_path: &Path,
            model_id: String,
            context_window: u32,
        ) -> Result<Self> {
            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
            Ok(Self {
                model: Mutex::new(model),
                tokenizer,
                device: Device::Cpu,
                model_id,
                context_window,
            })
        }
    }

    impl<M: CausalModel> LocalGenBackend for CandleBackend<M> {
        fn generate(&self, prompt: &str, opts: &GenOpts) -> Result<String> {
            let encoding = self
                .tokenizer
                .encode(prompt, true)
                .map_err(|e| anyhow::anyhow!("tokenizer encode failed: {e}"))?;
            let mut tokens: Vec<u32> = encoding.get_ids().to_vec();

            let mut logits_processor =
                LogitsProcessor::new(0, Some(opts.temperature as f64), None);
            let mut model = self.model.lock().expect("candle model mutex poisoned");
            let mut generated = String::new();

            for step in 0..opts.max_tokens {
                let context = if step == 0 {
                    tokens.clone()
                } else {
                    vec![*tokens.last().expect("at least one token generated")]
                };
                let input = Tensor::new(context.as_slice(), &self.device)
                    .context("building input tensor")?
                    .unsqueeze(0)
                    .context("unsqueeze batch dim")?;
                let position = if step == 0 { 0 } else { tokens.len() - 1 };
                let logits = model
                    .forward(&input, position)
                    .context("model forward pass")?;
                let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
                let next_token = logits_processor.sample(&logits)?;
                tokens.push(next_token);

                let piece = self
                    .tokenizer
                    .decode(&[next_token], true)
                    .map_err(|e| anyhow::anyhow!("tokenizer decode failed: {e}"))?;
                generated.push_str(&piece);

                if opts.stop_sequences.iter().any(|s| generated.ends_with(s.as_str())) {
                    break;
                }
            }

            Ok(generated)
        }

        fn context_window(&self) -> u32 {
            self.context_window
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    /// Fetch a model repo's weights/tokenizer into the local `hf-hub` cache,
    /// returning the cached paths. A no-op if already cached.
    pub fn ensure_downloaded(repo_id: &str) -> Result<std::path::PathBuf> {
        let api = hf_hub::api::sync::Api::new().context("building hf-hub api client")?;
        let repo = api.model(repo_id.to_string());
        let path = repo
            .get("tokenizer.json")
            .context("downloading tokenizer.json")?;
        Ok(path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.clone()))
    }
}
