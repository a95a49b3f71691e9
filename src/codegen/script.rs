use std::fs;
use std::path::Path;

use serde::Serialize;
use tera::Context;

use super::TemplateEnv;
use crate::core::names::NameMap;
use crate::core::types::{dml_function_name, dml_value_type};
use crate::error::{Error, Result};
use crate::model::{GraphDef, ModelDef, TensorDef, ValueInfo};

#[derive(Serialize)]
struct FunctionParam {
    dml_type: String,
    name: String,
}

#[derive(Serialize)]
struct MetadataProp<'a> {
    key: &'a str,
    value: &'a str,
}

/// Pieces of the final script, each already rendered.
pub struct ScriptParts<'a> {
    pub title: &'a str,
    pub model_header: &'a str,
    pub wdir: Option<&'a str>,
    pub imports: &'a [String],
    pub graph_function: &'a str,
}

pub fn render_model_header(env: &TemplateEnv, model: &ModelDef) -> Result<String> {
    let opset_import: Vec<String> = model.opset_import.iter()
        .map(|opset| {
            let domain = if opset.domain.is_empty() { "ONNX" } else { opset.domain.as_str() };
            format!("{}/{}", domain, opset.version)
        })
        .collect();
    let metadata_props: Vec<MetadataProp<'_>> = model.metadata_props.iter()
        .map(|p| MetadataProp { key: &p.key, value: &p.value })
        .collect();

    let mut context = Context::new();
    context.insert("ir_version", &model.ir_version);
    context.insert("opset_import", &opset_import);
    context.insert("producer_name", &model.producer_name);
    context.insert("producer_version", &model.producer_version);
    context.insert("domain", &model.domain);
    context.insert("model_version", &model.model_version);
    context.insert("doc_lines", &comment_lines(&model.doc_string));
    context.insert("metadata_props", &metadata_props);
    Ok(env.render("model_header.dml", &context)?.trim_end().to_string())
}

/// One assignment per initializer: `name = matrix("v0 v1 ...", rows=r, cols=c)`
/// or a plain literal for rank-0 tensors. Rank-1 tensors become row vectors,
/// matching how they broadcast against the last axis; tensors above rank 2
/// are flattened to `dims[0]` rows.
pub fn render_initializer(env: &TemplateEnv, names: &NameMap, tensor: &TensorDef) -> Result<String> {
    let values = tensor.values_as_text()?;
    if values.is_empty() && tensor.element_count() > 0 {
        return Err(Error::InvalidInitializer { name: tensor.name.clone(), reason: "no values".into() });
    }
    if values.len() != tensor.element_count() {
        return Err(Error::InvalidInitializer {
            name: tensor.name.clone(),
            reason: format!("{} values for {} elements", values.len(), tensor.element_count()),
        });
    }

    let (rows, cols) = match tensor.dims.as_slice() {
        [] => (1, 1),
        [cols] => (1, *cols),
        [rows, rest @ ..] => (*rows, rest.iter().product()),
    };

    let mut context = Context::new();
    context.insert("name", &names.ident(&tensor.name));
    context.insert("scalar", &tensor.dims.is_empty());
    context.insert("values", &values.join(" "));
    context.insert("rows", &rows);
    context.insert("cols", &cols);
    env.render("initializer.dml", &context)
}

/// `gen_<graph>` function taking the unbound graph inputs and returning the
/// graph outputs; the body is initializers followed by `node_scripts`.
pub fn render_graph_function(
    env: &TemplateEnv,
    graph: &GraphDef,
    names: &NameMap,
    node_scripts: &[String],
) -> Result<String> {
    let inputs: Vec<FunctionParam> = graph.inputs_without_initializers().map(|v| function_param(names, v)).collect();
    let outputs: Vec<FunctionParam> = graph.outputs.iter().map(|v| function_param(names, v)).collect();

    let mut body = Vec::new();
    for tensor in &graph.initializers {
        body.push(render_initializer(env, names, tensor)?);
    }
    body.extend(node_scripts.iter().flat_map(|script| script.lines().map(str::to_string)));

    let mut context = Context::new();
    context.insert("name", &dml_function_name(&graph.name));
    context.insert("description", &comment_lines(&graph.doc_string));
    context.insert("inputs", &inputs);
    context.insert("outputs", &outputs);
    context.insert("body", &body);
    Ok(env.render("graph_function.dml", &context)?.trim_end().to_string())
}

pub fn render_main(env: &TemplateEnv, parts: &ScriptParts<'_>) -> Result<String> {
    let mut context = Context::new();
    context.insert("title", parts.title);
    context.insert("model_header", parts.model_header);
    context.insert("wdir", &parts.wdir);
    context.insert("imports", parts.imports);
    context.insert("graph_function", parts.graph_function);
    let mut script = env.render("main.dml", &context)?;
    script.truncate(script.trim_end().len());
    script.push('\n');
    Ok(script)
}

/// Writes `script` verbatim, creating parent directories as needed.
pub fn write_script(path: &Path, script: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, script)?;
    Ok(())
}

fn function_param(names: &NameMap, value: &ValueInfo) -> FunctionParam {
    let elem = value.elem_type().unwrap_or_default();
    FunctionParam {
        dml_type: dml_value_type(elem, value.shape().as_ref()),
        name: names.ident(&value.name),
    }
}

fn comment_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim_end).filter(|line| !line.is_empty()).collect()
}
