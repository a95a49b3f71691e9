use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::codegen::TemplateEnv;
use crate::config::Config;
use crate::linearizer::Linearization;
use crate::model::ModelDef;
use crate::stages::{AssembleStage, EmitStage, GraphFunctionStage, HeaderStage, LinearizeStage, LoadStage};

/// State of one model conversion, filled in stage by stage.
pub struct CompilerContext {
    pub env: Arc<TemplateEnv>,
    pub config: Config,
    pub source_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,

    pub model: Option<ModelDef>,
    pub model_header: Option<String>,
    pub linearization: Option<Linearization>,
    pub graph_function: Option<String>,
    pub script: Option<String>,
}

impl CompilerContext {
    pub fn new(env: Arc<TemplateEnv>, config: Config) -> Self {
        Self {
            env,
            config,
            source_path: None,
            output_path: None,
            model: None,
            model_header: None,
            linearization: None,
            graph_function: None,
            script: None,
        }
    }

    pub fn from_path(env: Arc<TemplateEnv>, config: Config, source: impl AsRef<Path>) -> Self {
        Self { source_path: Some(source.as_ref().to_path_buf()), ..Self::new(env, config) }
    }

    pub fn from_model(env: Arc<TemplateEnv>, config: Config, model: ModelDef) -> Self {
        Self { model: Some(model), ..Self::new(env, config) }
    }

    pub fn with_output(mut self, path: Option<PathBuf>) -> Self {
        self.output_path = path;
        self
    }

    /// Source file, or graph name for in-memory models.
    pub fn label(&self) -> String {
        match (&self.source_path, &self.model) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(model)) => model.graph.name.clone(),
            (None, None) => "<empty>".to_string(),
        }
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, ctx: &mut CompilerContext) -> anyhow::Result<()>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Load, header, linearize, graph function, assemble, emit.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.add_stage(LoadStage);
        pipeline.add_stage(HeaderStage);
        pipeline.add_stage(LinearizeStage);
        pipeline.add_stage(GraphFunctionStage);
        pipeline.add_stage(AssembleStage);
        pipeline.add_stage(EmitStage);
        pipeline
    }

    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn execute(&self, ctx: &mut CompilerContext) -> anyhow::Result<()> {
        for stage in &self.stages {
            debug!(stage = stage.name(), source = %ctx.label(), "running stage");
            stage.run(ctx)?;
        }
        Ok(())
    }
}
