use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{GradeError, Result};

pub const DEFAULT_MODEL_ID: &str = "bert-base-uncased";
pub const DEFAULT_EMBEDDING_DIM: usize = 768;
pub const DEFAULT_MAX_TOKENS: usize = 512;
pub const DEFAULT_TOTAL_TEST_MARKS: f64 = 100.0;

pub const MODEL_WEIGHTS_FILE: &str = "model.safetensors";
pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Files that make up a local BERT checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelPaths {
    pub weights: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelPaths {
    /// Standard Hugging Face layout: `model.safetensors`, `config.json` and
    /// `tokenizer.json` side by side.
    pub fn from_dir(dir: &Path) -> Self {
        Self {
            weights: dir.join(MODEL_WEIGHTS_FILE),
            config: dir.join(MODEL_CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
        }
    }

    pub fn missing(&self) -> Vec<&Path> {
        [&self.weights, &self.config, &self.tokenizer]
            .into_iter()
            .filter(|p| !p.exists())
            .map(PathBuf::as_path)
            .collect()
    }
}

/// Subset of the Hugging Face `config.json` for BERT encoders.
#[derive(Debug, Clone, Deserialize)]
pub struct BertConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

fn default_max_position_embeddings() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl BertConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GradeError::ModelUnavailable(format!("read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            GradeError::ModelUnavailable(format!("parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(GradeError::ModelUnavailable(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        Ok(())
    }
}
