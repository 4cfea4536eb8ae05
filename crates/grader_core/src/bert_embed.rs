use std::time::Instant;

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder};
use once_cell::sync::OnceCell;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{info, warn};

use crate::config::{BertConfig, ModelPaths, DEFAULT_MAX_TOKENS};
#[cfg(test)]
use crate::config::DEFAULT_MODEL_ID;
use crate::embed::EmbeddingProvider;
use crate::error::{GradeError, Result};

/// TF-converted checkpoints store layer norms as `gamma`/`beta`.
fn layer_norm(vb: VarBuilder, size: usize, eps: f64) -> Result<LayerNorm> {
    let (weight, bias) = match (vb.get(size, "weight"), vb.get(size, "bias")) {
        (Ok(weight), Ok(bias)) => (weight, bias),
        _ => (vb.get(size, "gamma")?, vb.get(size, "beta")?),
    };
    Ok(LayerNorm::new(weight, bias, eps))
}

struct Embeddings {
    word: Tensor,
    position: Tensor,
    token_type: Tensor,
    norm: LayerNorm,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        Ok(Self {
            word: vb.pp("word_embeddings").get((config.vocab_size, h), "weight")?,
            position: vb
                .pp("position_embeddings")
                .get((config.max_position_embeddings, h), "weight")?,
            token_type: vb
                .pp("token_type_embeddings")
                .get((config.type_vocab_size, h), "weight")?,
            norm: layer_norm(vb.pp("LayerNorm"), h, config.layer_norm_eps)?,
        })
    }

    /// Single-segment input: every token has type id 0.
    fn forward(&self, token_ids: &[u32]) -> Result<Tensor> {
        let device = self.word.device();
        let seq_len = token_ids.len();
        let ids = Tensor::new(token_ids, device)?;
        let positions = Tensor::arange(0u32, seq_len as u32, device)?;
        let segments = Tensor::zeros(seq_len, DType::U32, device)?;

        let summed = self
            .word
            .index_select(&ids, 0)?
            .add(&self.position.index_select(&positions, 0)?)?
            .add(&self.token_type.index_select(&segments, 0)?)?;
        Ok(self.norm.forward(&summed)?.unsqueeze(0)?)
    }
}

struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    norm: LayerNorm,
    heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        let projections = vb.pp("self");
        Ok(Self {
            query: candle_nn::linear(h, h, projections.pp("query"))?,
            key: candle_nn::linear(h, h, projections.pp("key"))?,
            value: candle_nn::linear(h, h, projections.pp("value"))?,
            dense: candle_nn::linear(h, h, vb.pp("output").pp("dense"))?,
            norm: layer_norm(vb.pp("output").pp("LayerNorm"), h, config.layer_norm_eps)?,
            heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, width) = hidden.dims3()?;
        let per_head = |proj: &Linear| -> Result<Tensor> {
            Ok(proj
                .forward(hidden)?
                .reshape((batch, seq_len, self.heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let q = per_head(&self.query)?;
        let k = per_head(&self.key)?;
        let v = per_head(&self.value)?;

        let scores = (q.matmul(&k.t()?)? / (self.head_dim as f64).sqrt())?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, width))?;

        let residual = (hidden + self.dense.forward(&context)?)?;
        Ok(self.norm.forward(&residual)?)
    }
}

struct EncoderLayer {
    attention: Attention,
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let (h, inner) = (config.hidden_size, config.intermediate_size);
        Ok(Self {
            attention: Attention::load(vb.pp("attention"), config)?,
            intermediate: candle_nn::linear(h, inner, vb.pp("intermediate").pp("dense"))?,
            output: candle_nn::linear(inner, h, vb.pp("output").pp("dense"))?,
            norm: layer_norm(vb.pp("output").pp("LayerNorm"), h, config.layer_norm_eps)?,
        })
    }

    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let attended = self.attention.forward(hidden)?;
        let expanded = self.intermediate.forward(&attended)?.gelu_erf()?;
        let residual = (&attended + self.output.forward(&expanded)?)?;
        Ok(self.norm.forward(&residual)?)
    }
}

struct BertModel {
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    config: BertConfig,
}

impl BertModel {
    fn load(paths: &ModelPaths, config: BertConfig, device: &Device) -> Result<Self> {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&paths.weights], DType::F32, device)?
        };
        // Pre-training checkpoints nest the encoder under `bert.`.
        let vb = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb
        };

        let embeddings = Embeddings::load(vb.pp("embeddings"), &config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(vb.pp("encoder").pp("layer").pp(i), &config))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embeddings,
            layers,
            config,
        })
    }

    /// Final-layer hidden state of the first (`[CLS]`) token.
    fn forward(&self, token_ids: &[u32]) -> Result<Vec<f32>> {
        let token_ids = &token_ids[..token_ids.len().min(self.config.max_position_embeddings)];
        if token_ids.is_empty() {
            return Err(GradeError::Embedding(
                "tokenizer produced no tokens".to_string(),
            ));
        }

        let mut hidden = self.embeddings.forward(token_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }
        Ok(hidden.i((0, 0))?.to_vec1::<f32>()?)
    }
}

/// BERT encoder with its tokenizer, pooled on `[CLS]`.
pub struct BertEmbeddingProvider {
    model: BertModel,
    tokenizer: Tokenizer,
    paths: ModelPaths,
}

impl BertEmbeddingProvider {
    /// Loads weights, config and tokenizer. Any failure is reported as
    /// [`GradeError::ModelUnavailable`].
    pub fn load(paths: &ModelPaths, max_tokens: usize) -> Result<Self> {
        let start = Instant::now();
        let missing = paths.missing();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
            return Err(GradeError::ModelUnavailable(format!(
                "missing model files: {}",
                names.join(", ")
            )));
        }

        let config = BertConfig::from_file(&paths.config)?;
        let max_tokens = max_tokens.min(config.max_position_embeddings);

        let model = BertModel::load(paths, config, &Device::Cpu)
            .map_err(|e| GradeError::ModelUnavailable(format!("load weights: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(&paths.tokenizer)
            .map_err(|e| GradeError::ModelUnavailable(format!("load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(|e| GradeError::ModelUnavailable(format!("configure truncation: {e}")))?;
        tokenizer.with_padding(None);

        let provider = Self {
            model,
            tokenizer,
            paths: paths.clone(),
        };
        info!(
            weights = %paths.weights.display(),
            dim = provider.dim(),
            layers = provider.model.layers.len(),
            max_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "embedding model loaded"
        );
        Ok(provider)
    }

    pub fn dim(&self) -> usize {
        self.model.config.hidden_size
    }

    pub fn paths(&self) -> &ModelPaths {
        &self.paths
    }
}

impl EmbeddingProvider for BertEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| GradeError::Embedding(format!("tokenize: {e}")))?;
        self.model.forward(encoding.get_ids())
    }
}

static SHARED_MODEL: OnceCell<BertEmbeddingProvider> = OnceCell::new();

/// Embedding provider that loads the BERT model on first use and shares it
/// for the rest of the process. Every instance reads the same model; the
/// first successful load decides which checkpoint that is.
#[derive(Clone)]
pub struct LazyBertProvider {
    paths: ModelPaths,
    max_tokens: usize,
    cell: &'static OnceCell<BertEmbeddingProvider>,
}

impl LazyBertProvider {
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            paths,
            max_tokens: DEFAULT_MAX_TOKENS,
            cell: &SHARED_MODEL,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(2);
        self
    }

    #[cfg(test)]
    fn with_cell(mut self, cell: &'static OnceCell<BertEmbeddingProvider>) -> Self {
        self.cell = cell;
        self
    }

    #[cfg(test)]
    fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Returns the shared model, loading it if this is the first call. A
    /// failed load leaves the cell empty.
    pub fn model(&self) -> Result<&'static BertEmbeddingProvider> {
        let model = self
            .cell
            .get_or_try_init(|| BertEmbeddingProvider::load(&self.paths, self.max_tokens))?;
        if model.paths() != &self.paths {
            warn!(
                requested = %self.paths.weights.display(),
                loaded = %model.paths().weights.display(),
                "embedding model already loaded from a different checkpoint; reusing it"
            );
        }
        Ok(model)
    }
}

impl EmbeddingProvider for LazyBertProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.model()?.embed(text)
    }
}
