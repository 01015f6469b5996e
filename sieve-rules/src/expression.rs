use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::error::Result;

/// Opaque compiled form of an expression, produced by an [`ExpressionEvaluator`].
///
/// Evaluators store whatever program representation they need and recover it
/// with [`CompiledExpr::program`].
#[derive(Clone)]
pub struct CompiledExpr {
    source: Arc<str>,
    program: Arc<dyn Any + Send + Sync>,
}

impl CompiledExpr {
    pub fn new<P: Any + Send + Sync>(source: &str, program: P) -> Self {
        Self {
            source: Arc::from(source),
            program: Arc::new(program),
        }
    }

    /// Expression text this program was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program<P: Any>(&self) -> Option<&P> {
        self.program.downcast_ref::<P>()
    }
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Variable under which evaluators expose the full document.
pub const DOCUMENT_BINDING: &str = "$msg";

/// Query/transform language capability used for `jsonata` typed sources.
///
/// Both methods fail with [`crate::RuleError::Compile`] or
/// [`crate::RuleError::Evaluation`] carrying the runtime's message.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    fn compile(&self, expr: &str) -> Result<CompiledExpr>;

    /// Evaluates against `context` (the row, or the document when there is
    /// none). `document` is bound as [`DOCUMENT_BINDING`]; both are borrowed
    /// so per-row calls never copy the message.
    async fn evaluate(
        &self,
        compiled: &CompiledExpr,
        context: &Value,
        document: &Value,
    ) -> Result<Value>;
}

/// Evaluator front-end that memoises compiled programs by expression text.
pub struct Expressions {
    evaluator: Arc<dyn ExpressionEvaluator>,
    cache: Option<RwLock<HashMap<String, CompiledExpr>>>,
}

impl Expressions {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>, cache_enabled: bool) -> Self {
        Self {
            evaluator,
            cache: cache_enabled.then(|| RwLock::new(HashMap::new())),
        }
    }

    pub fn compile(&self, expr: &str) -> Result<CompiledExpr> {
        let Some(cache) = &self.cache else {
            return self.evaluator.compile(expr);
        };

        if let Some(compiled) = cache.read().get(expr) {
            return Ok(compiled.clone());
        }

        let compiled = self.evaluator.compile(expr)?;
        trace!(expr, "compiled expression");
        cache.write().insert(expr.to_string(), compiled.clone());
        Ok(compiled)
    }

    pub async fn evaluate(&self, expr: &str, context: &Value, document: &Value) -> Result<Value> {
        let compiled = self.compile(expr)?;
        self.evaluator.evaluate(&compiled, context, document).await
    }

    /// Number of cached programs.
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map(|cache| cache.read().len()).unwrap_or(0)
    }
}

impl fmt::Debug for Expressions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expressions")
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}
