// src/services/model/qwen.rs
use std::{collections::HashMap, fmt::Debug, path::{Path, PathBuf}, sync::Arc, time::Instant};

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::{
    generation::LogitsProcessor,
    models::qwen2::{Config as Qwen2Config, ModelForCausalLM},
};
use hf_hub::{
    Repo, RepoType,
    api::tokio::{ApiBuilder, ApiRepo},
};
use tokenizers::Tokenizer;
use tokio::sync::Mutex;

use super::{
    ChatModel, MAX_NEW_TOKENS, ModelError, TEMPERATURE, TOP_P,
    exclusive::run_exclusive,
    template::{END_OF_TEXT, IM_END, render_chatml},
};
use crate::{config::ModelConfig, message::Turn};

/// A Qwen2-family instruct model loaded once and shared by every request.
///
/// Generation goes through `run_exclusive`, so concurrent requests are
/// answered one at a time in arrival order.
pub struct QwenChatModel {
    model_id: String,
    system_prompt: String,
    engine: Arc<Mutex<Engine>>,
}

impl Debug for QwenChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QwenChatModel")
            .field("model_id", &self.model_id)
            .finish()
    }
}

struct Engine {
    model: ModelForCausalLM,
    tokenizer: Tokenizer,
    sampler: LogitsProcessor,
    device: Device,
    stop_tokens: Vec<u32>,
}

impl QwenChatModel {
    /// Downloads (or reuses the hub cache for) config, tokenizer and weights,
    /// then builds the model on the best available device.
    pub async fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        tracing::info!(model = %config.model_id, revision = %config.revision, "Loading model");

        let device = select_device(config.force_cpu);
        let dtype = if device.is_cpu() { DType::F32 } else { DType::BF16 };
        tracing::info!(?device, ?dtype, "Selected device");

        // `from_env` honours HF_HOME / HF_ENDPOINT and picks up a cached CLI login.
        let mut builder = ApiBuilder::from_env();
        if let Some(token) = token_override(config.hf_token.as_deref()) {
            tracing::info!("Using HF_TOKEN for hub access");
            builder = builder.with_token(Some(token));
        }
        let api = builder
            .build()
            .map_err(|e| ModelError::Load(format!("hub client: {e}")))?;
        let repo = api.repo(Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));

        let config_file = fetch(&repo, "config.json").await?;
        let tokenizer_file = fetch(&repo, "tokenizer.json").await?;
        let weight_files = weight_files(&repo).await?;
        tracing::info!(files = weight_files.len(), "Resolved weight files");

        let seed = config.seed;
        let started = Instant::now();
        let engine = tokio::task::spawn_blocking(move || {
            Engine::build(&config_file, &tokenizer_file, &weight_files, device, dtype, seed)
        })
        .await
        .map_err(|e| ModelError::Load(e.to_string()))??;
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "Model and tokenizer loaded");

        Ok(Self {
            model_id: config.model_id.clone(),
            system_prompt: config.system_prompt.clone(),
            engine: Arc::new(Mutex::new(engine)),
        })
    }
}

#[async_trait]
impl ChatModel for QwenChatModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, turns: &[Turn]) -> Result<String, ModelError> {
        let prompt = render_chatml(turns, &self.system_prompt);
        run_exclusive(&self.engine, move |engine: &mut Engine| engine.generate(&prompt)).await
    }
}

impl Engine {
    fn build(
        config_file: &Path,
        tokenizer_file: &Path,
        weight_files: &[PathBuf],
        device: Device,
        dtype: DType,
        seed: u64,
    ) -> Result<Self, ModelError> {
        let raw = std::fs::read(config_file)
            .map_err(|e| ModelError::Load(format!("{}: {e}", config_file.display())))?;
        let config: Qwen2Config = serde_json::from_slice(&raw)
            .map_err(|e| ModelError::Load(format!("invalid config.json: {e}")))?;
        tracing::info!(
            vocab_size = config.vocab_size,
            hidden_size = config.hidden_size,
            layers = config.num_hidden_layers,
            "Model config"
        );

        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        let stop_tokens: Vec<u32> = [IM_END, END_OF_TEXT]
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();
        if stop_tokens.is_empty() {
            return Err(ModelError::Load("tokenizer has no ChatML stop tokens".to_string()));
        }

        let mut tensors = HashMap::new();
        for (i, file) in weight_files.iter().enumerate() {
            tracing::info!("Loading weight file {}/{}: {:?}", i + 1, weight_files.len(), file.file_name());
            tensors.extend(candle_core::safetensors::load(file, &device)?);
        }
        let vb = VarBuilder::from_tensors(tensors, dtype, &device);
        let model = ModelForCausalLM::new(&config, vb)?;

        Ok(Self {
            model,
            tokenizer,
            sampler: LogitsProcessor::new(seed, Some(TEMPERATURE), Some(TOP_P)),
            device,
            stop_tokens,
        })
    }

    /// Samples up to `MAX_NEW_TOKENS` after `prompt` and decodes only those.
    fn generate(&mut self, prompt: &str) -> Result<String, ModelError> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        let mut tokens = encoding.get_ids().to_vec();
        if tokens.is_empty() {
            return Err(ModelError::Tokenizer("prompt encoded to zero tokens".to_string()));
        }
        let prompt_len = tokens.len();

        self.model.clear_kv_cache();
        let started = Instant::now();

        for step in 0..MAX_NEW_TOKENS {
            let context_size = if step > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len() - context_size;
            let input = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, start_pos)?;
            let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;

            let next = self.sampler.sample(&logits)?;
            if self.stop_tokens.contains(&next) {
                break;
            }
            tokens.push(next);
        }

        let generated = &tokens[prompt_len..];
        let elapsed = started.elapsed().as_secs_f64();
        tracing::debug!(
            prompt_tokens = prompt_len,
            generated_tokens = generated.len(),
            tokens_per_sec = generated.len() as f64 / elapsed.max(f64::EPSILON),
            "Generation finished"
        );

        self.tokenizer
            .decode(generated, true)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))
    }
}

fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        return Device::Cpu;
    }
    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!("CUDA initialization failed: {}, falling back", e),
        }
    }
    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!("Metal initialization failed: {}, falling back to CPU", e),
        }
    }
    Device::Cpu
}

/// An explicit token only replaces the builder's own when it is non-blank.
fn token_override(hf_token: Option<&str>) -> Option<String> {
    hf_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

async fn fetch(repo: &ApiRepo, filename: &str) -> Result<PathBuf, ModelError> {
    repo.get(filename)
        .await
        .map_err(|e| ModelError::Load(format!("failed to download {filename}: {e}")))
}

/// Single-file checkpoints first, then the sharded layout.
async fn weight_files(repo: &ApiRepo) -> Result<Vec<PathBuf>, ModelError> {
    let single_err = match repo.get("model.safetensors").await {
        Ok(single) => return Ok(vec![single]),
        Err(e) => e,
    };
    tracing::debug!("model.safetensors unavailable ({}), trying sharded index", single_err);

    let index = repo
        .get("model.safetensors.index.json")
        .await
        .map_err(|e| missing_weights(&single_err, &e))?;
    let raw = tokio::fs::read(&index)
        .await
        .map_err(|e| ModelError::Load(format!("{}: {e}", index.display())))?;

    let mut files = Vec::new();
    for shard in shard_names(&raw)? {
        files.push(fetch(repo, &shard).await?);
    }
    Ok(files)
}

/// Keeps both lookup failures so a network or auth error is not reported as a
/// missing index.
fn missing_weights(single: &dyn std::fmt::Display, index: &dyn std::fmt::Display) -> ModelError {
    ModelError::Load(format!(
        "no usable weights: model.safetensors: {single}; model.safetensors.index.json: {index}"
    ))
}

fn shard_names(index_json: &[u8]) -> Result<Vec<String>, ModelError> {
    let index: serde_json::Value = serde_json::from_slice(index_json)
        .map_err(|e| ModelError::Load(format!("invalid safetensors index: {e}")))?;
    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| ModelError::Load("safetensors index has no weight_map".to_string()))?;

    let mut names: Vec<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect();
    names.sort();
    names.dedup();

    if names.is_empty() {
        return Err(ModelError::Load("safetensors index lists no shards".to_string()));
    }
    Ok(names)
}
