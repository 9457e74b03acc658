use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::token::LlamaToken;
use once_cell::sync::Lazy;

use super::{l2_normalize, EmbeddingProvider};

static LLAMA_BACKEND: Lazy<LlamaBackend> =
    Lazy::new(|| LlamaBackend::init().expect("init llama backend"));

/// Batches at most this many sentences per decode call.
const MAX_BATCH_SEQS: i32 = 64;

/// Sentence embeddings from a GGUF model run through llama.cpp.
pub struct NativeEmbedder {
    name: String,
    dim: usize,
    n_ctx: usize,
    model: Option<Box<LlamaModel>>,
    ctx: Option<Mutex<LlamaContext<'static>>>,
}

// SAFETY:
// - Every context access goes through the `Mutex`, one decode at a time.
// - llama.cpp contexts have no thread affinity; they only forbid
//   concurrent use.
unsafe impl Send for NativeEmbedder {}
unsafe impl Sync for NativeEmbedder {}

impl NativeEmbedder {
    pub fn load(model_path: &Path) -> anyhow::Result<Self> {
        if !model_path.exists() {
            return Err(anyhow!(
                "embedding model not found: {}",
                model_path.display()
            ));
        }

        let backend: &LlamaBackend = &LLAMA_BACKEND;
        // llama.cpp treats values > n_layer as "offload all layers"; on
        // CPU-only builds this is a no-op.
        let model_params = LlamaModelParams::default().with_n_gpu_layers(9999);
        let model = Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .with_context(|| format!("load model {}", model_path.display()))?,
        );
        // Self-referential: `LlamaContext` borrows `LlamaModel`. We keep the model in a `Box`
        // (stable address) and extend the lifetime to `'static` for the context.
        // SAFETY:
        // - The model allocation remains valid as long as `self.model` is `Some`.
        // - We drop `ctx` before `model` in `Drop`.
        let model_ptr: *const LlamaModel = &*model;
        let model_ref: &'static LlamaModel = unsafe { &*model_ptr };

        let ctx_size = model_ref.n_ctx_train().clamp(256, 8192);

        // Pooled embeddings need every token of a sequence inside a single
        // decode call, so the batch is sized to the full context.
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(ctx_size))
            .with_n_batch(ctx_size)
            .with_n_ubatch(ctx_size)
            .with_embeddings(true);
        let ctx = model_ref
            .new_context(backend, ctx_params)
            .context("create embedding context")?;

        let dim = model_ref.n_embd() as usize;
        let name = model_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("model.gguf")
            .to_string();

        Ok(Self {
            name,
            dim,
            n_ctx: ctx_size as usize,
            model: Some(model),
            ctx: Some(Mutex::new(ctx)),
        })
    }

    fn model_ref(&self) -> &LlamaModel {
        self.model
            .as_deref()
            .expect("NativeEmbedder model missing (use-after-drop)")
    }

    fn ctx_cell(&self) -> &Mutex<LlamaContext<'static>> {
        self.ctx
            .as_ref()
            .expect("NativeEmbedder ctx missing (use-after-drop)")
    }
}

impl EmbeddingProvider for NativeEmbedder {
    fn signature(&self) -> String {
        format!("gguf:{}:{}", self.name, self.dim)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        let model = self.model_ref();
        let mut token_lists: Vec<Vec<LlamaToken>> = Vec::with_capacity(texts.len());
        for text in texts {
            let mut tokens = model
                .str_to_token(text, AddBos::Always)
                .with_context(|| format!("tokenize {text:?}"))?;
            if tokens.is_empty() {
                return Err(anyhow!("empty token sequence for {text:?}"));
            }
            // Sentences longer than the context keep their prefix only.
            tokens.truncate(self.n_ctx);
            token_lists.push(tokens);
        }

        let mut ctx = self.ctx_cell().lock().expect("embedding context lock");
        let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut batch = LlamaBatch::new(self.n_ctx, MAX_BATCH_SEQS);
        let mut queued: i32 = 0;
        for tokens in &token_lists {
            let no_room = batch.n_tokens() as usize + tokens.len() > self.n_ctx
                || queued == MAX_BATCH_SEQS;
            if no_room {
                drain_batch(&mut ctx, &mut batch, queued, &mut out)?;
                queued = 0;
            }
            batch
                .add_sequence(tokens, queued, false)
                .context("queue embedding sequence")?;
            queued += 1;
        }
        if queued > 0 {
            drain_batch(&mut ctx, &mut batch, queued, &mut out)?;
        }
        Ok(out)
    }
}

fn drain_batch(
    ctx: &mut LlamaContext<'_>,
    batch: &mut LlamaBatch,
    n_seq: i32,
    out: &mut Vec<Vec<f32>>,
) -> anyhow::Result<()> {
    ctx.clear_kv_cache();
    ctx.decode(batch).context("decode embedding batch")?;
    for i in 0..n_seq {
        let embedding = ctx
            .embeddings_seq_ith(i)
            .context("read sequence embedding")?;
        let mut v = embedding.to_vec();
        l2_normalize(&mut v);
        out.push(v);
    }
    batch.clear();
    Ok(())
}

impl Drop for NativeEmbedder {
    fn drop(&mut self) {
        // `LlamaContext` holds a reference to `LlamaModel`.
        // Drop the context first, then the model.
        let _ = self.ctx.take();
        let _ = self.model.take();
    }
}
