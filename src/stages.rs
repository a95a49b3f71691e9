use anyhow::{Context, anyhow};
use tracing::{info, warn};

use crate::codegen::script::{self, ScriptParts};
use crate::linearizer::linearize;
use crate::model::ModelDef;
use crate::pipeline::{CompilerContext, Stage};

fn model(ctx: &CompilerContext) -> anyhow::Result<&ModelDef> {
    ctx.model.as_ref().ok_or_else(|| anyhow!("No model loaded"))
}

pub struct LoadStage;
impl Stage for LoadStage {
    fn name(&self) -> &str { "Load Model" }
    fn run(&self, ctx: &mut CompilerContext) -> anyhow::Result<()> {
        if ctx.model.is_some() {
            return Ok(());
        }
        let path = ctx.source_path.as_ref().ok_or_else(|| anyhow!("Neither a model nor a source path was given"))?;
        let model = ModelDef::from_file(path)
            .with_context(|| format!("Failed to read model: {}", path.display()))?;
        ctx.model = Some(model);
        Ok(())
    }
}

pub struct HeaderStage;
impl Stage for HeaderStage {
    fn name(&self) -> &str { "Model Header" }
    fn run(&self, ctx: &mut CompilerContext) -> anyhow::Result<()> {
        let header = script::render_model_header(&ctx.env, model(ctx)?)?;
        ctx.model_header = Some(header);
        Ok(())
    }
}

pub struct LinearizeStage;
impl Stage for LinearizeStage {
    fn name(&self) -> &str { "Linearize Graph" }
    fn run(&self, ctx: &mut CompilerContext) -> anyhow::Result<()> {
        let graph = &model(ctx)?.graph;
        let linearization = linearize(graph, ctx.env.as_ref())
            .with_context(|| format!("Failed to linearize graph '{}'", graph.name))?;
        ctx.linearization = Some(linearization);
        Ok(())
    }
}

pub struct GraphFunctionStage;
impl Stage for GraphFunctionStage {
    fn name(&self) -> &str { "Graph Function" }
    fn run(&self, ctx: &mut CompilerContext) -> anyhow::Result<()> {
        let linearization = ctx.linearization.as_ref().ok_or_else(|| anyhow!("Graph was not linearized"))?;
        let function = script::render_graph_function(
            &ctx.env,
            &model(ctx)?.graph,
            &linearization.names,
            &linearization.scripts,
        )?;
        ctx.graph_function = Some(function);
        Ok(())
    }
}

pub struct AssembleStage;
impl Stage for AssembleStage {
    fn name(&self) -> &str { "Assemble Script" }
    fn run(&self, ctx: &mut CompilerContext) -> anyhow::Result<()> {
        let model_header = ctx.model_header.as_deref().ok_or_else(|| anyhow!("No model header rendered"))?;
        let graph_function = ctx.graph_function.as_deref().ok_or_else(|| anyhow!("No graph function rendered"))?;
        let imports = ctx.linearization.as_ref().map(|l| l.imports.as_slice()).unwrap_or_default();

        let wdir = match (&ctx.config.scripts_dir, imports.is_empty()) {
            (Some(dir), false) => Some(dir.display().to_string()),
            (None, false) => {
                warn!(source = %ctx.label(), "script has imports but no scripts directory is configured");
                None
            }
            (_, true) => None,
        };

        let title = format!("This file was generated by {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let parts = ScriptParts {
            title: &title,
            model_header,
            wdir: wdir.as_deref(),
            imports,
            graph_function,
        };
        let rendered = script::render_main(&ctx.env, &parts)?;
        ctx.script = Some(rendered);
        Ok(())
    }
}

pub struct EmitStage;
impl Stage for EmitStage {
    fn name(&self) -> &str { "Emit Script" }
    fn run(&self, ctx: &mut CompilerContext) -> anyhow::Result<()> {
        let Some(path) = &ctx.output_path else { return Ok(()) };
        let rendered = ctx.script.as_deref().ok_or_else(|| anyhow!("No script assembled"))?;
        script::write_script(path, rendered)
            .with_context(|| format!("Failed to write script: {}", path.display()))?;
        info!(source = %ctx.label(), output = %path.display(), "script written");
        Ok(())
    }
}
