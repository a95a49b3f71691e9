//! Per-operator script generators. Each returns the node's script and, for
//! operators backed by a layer script, the matching `source(...)` import.

use tera::Context;

use super::TemplateEnv;
use crate::core::names::NameMap;
use crate::core::op::OpKind;
use crate::error::{Error, Result};
use crate::linearizer::Fragment;
use crate::model::{GraphDef, NodeDef, TensorData, TensorDef};

const LAYERS_DIR: &str = "nn/layers";
const DEFAULT_DROPOUT_RATIO: f32 = 0.5;
const DEFAULT_SEED: i64 = -1;

/// `out = left <operator> right`
pub fn infix(env: &TemplateEnv, names: &NameMap, op: OpKind, node: &NodeDef, operator: &str) -> Result<Fragment> {
    check_counts(op, node, 2, 1)?;
    let mut context = Context::new();
    context.insert("output", &output_var(names, op, node, 0)?);
    context.insert("left", &input_var(names, op, node, 0)?);
    context.insert("right", &input_var(names, op, node, 1)?);
    context.insert("operator", operator);
    Ok(Fragment::script(env.render("operators/infix.dml", &context)?))
}

/// `out = <operator>input`
pub fn prefix(env: &TemplateEnv, names: &NameMap, op: OpKind, node: &NodeDef, operator: &str) -> Result<Fragment> {
    check_counts(op, node, 1, 1)?;
    let mut context = Context::new();
    context.insert("output", &output_var(names, op, node, 0)?);
    context.insert("input", &input_var(names, op, node, 0)?);
    context.insert("operator", operator);
    Ok(Fragment::script(env.render("operators/prefix.dml", &context)?))
}

pub fn builtin_call(env: &TemplateEnv, names: &NameMap, op: OpKind, node: &NodeDef, function: &str) -> Result<Fragment> {
    check_counts(op, node, 2, 1)?;
    let arguments = vec![input_var(names, op, node, 0)?, input_var(names, op, node, 1)?];
    let script = render_call(env, &[output_var(names, op, node, 0)?], None, function, &arguments)?;
    Ok(Fragment::script(script))
}

/// Single-input activation layers: `out = <layer>::forward(X)`.
pub fn layer_forward(env: &TemplateEnv, names: &NameMap, op: OpKind, node: &NodeDef, layer: &str) -> Result<Fragment> {
    check_counts(op, node, 1, 1)?;
    if op == OpKind::Softmax {
        if let Some(axis) = node.attr_int("axis") {
            if axis != 1 && axis != -1 {
                return Err(invalid(op, node, format!("softmax over axis {} is not supported", axis)));
            }
        }
    }
    let output = output_var(names, op, node, 0)?;
    let script = render_call(env, &[output], Some(layer), "forward", &[input_var(names, op, node, 0)?])?;
    Ok(Fragment::with_import(render_import(env, layer, layer)?, script))
}

/// `[out, mask] = dropout::forward(X, p, seed)` where `p` is the keep
/// probability.
pub fn dropout(env: &TemplateEnv, graph: &GraphDef, names: &mut NameMap, op: OpKind, node: &NodeDef) -> Result<Fragment> {
    check_counts(op, node, 3, 2)?;
    let x = input_var(names, op, node, 0)?;

    let keep = match (node.attr_float("ratio"), node.input(1)) {
        (Some(ratio), _) => (1.0 - ratio).to_string(),
        (None, Some(ratio_input)) => {
            let constant = graph.initializer(ratio_input).map(TensorDef::data).transpose()?;
            match constant {
                Some(TensorData::Float(values)) if !values.is_empty() => (1.0 - values[0]).to_string(),
                Some(TensorData::Double(values)) if !values.is_empty() => (1.0 - values[0]).to_string(),
                _ => format!("1 - {}", names.ident(ratio_input)),
            }
        }
        (None, None) => (1.0 - DEFAULT_DROPOUT_RATIO).to_string(),
    };
    let seed = node.attr_int("seed").unwrap_or(DEFAULT_SEED);

    let out = output_var(names, op, node, 0)?;
    let mask = match node.output(1) {
        Some(mask) => names.ident(mask),
        None => names.fresh(&format!("{}_mask", out)),
    };

    let script = render_call(env, &[out, mask], Some("dropout"), "forward", &[x, keep, seed.to_string()])?;
    Ok(Fragment::with_import(render_import(env, "dropout", "dropout")?, script))
}

/// `[out, Hout, Wout] = max_pool2d::forward(X, C, Hin, Win, Hf, Wf, strideh, stridew, padh, padw)`
pub fn max_pool(env: &TemplateEnv, graph: &GraphDef, names: &mut NameMap, op: OpKind, node: &NodeDef) -> Result<Fragment> {
    check_counts(op, node, 1, 1)?;
    check_unit_dilations(op, node)?;
    check_explicit_padding(op, node)?;
    if node.attr_int("ceil_mode").unwrap_or(0) != 0 {
        return Err(invalid(op, node, "ceil_mode is not supported"));
    }

    let input = required_input(op, node, 0)?;
    let (channels, height, width) = image_dims(graph, op, node, input)?;
    let (kernel_h, kernel_w) = attr_pair(op, node, "kernel_shape")?
        .ok_or_else(|| invalid(op, node, "missing kernel_shape attribute"))?;
    let (stride_h, stride_w) = attr_pair(op, node, "strides")?.unwrap_or((1, 1));
    let (pad_h, pad_w) = padding(op, node)?;

    let targets = output_dims_targets(names, op, node)?;
    let mut arguments = vec![names.ident(input)];
    arguments.extend(
        [channels, height, width].iter().map(usize::to_string)
            .chain([kernel_h, kernel_w, stride_h, stride_w, pad_h, pad_w].iter().map(i64::to_string)),
    );

    let script = render_call(env, &targets, Some("max_pool2d"), "forward", &arguments)?;
    Ok(Fragment::with_import(render_import(env, "max_pool2d", "max_pool2d_builtin")?, script))
}

/// `[out, Hout, Wout] = conv2d::forward(X, W, b, C, Hin, Win, Hf, Wf, strideh, stridew, padh, padw)`;
/// a missing bias becomes a zero column vector declared just before the call.
pub fn conv(env: &TemplateEnv, graph: &GraphDef, names: &mut NameMap, op: OpKind, node: &NodeDef) -> Result<Fragment> {
    check_counts(op, node, 3, 1)?;
    check_unit_dilations(op, node)?;
    check_explicit_padding(op, node)?;
    if node.attr_int("group").unwrap_or(1) != 1 {
        return Err(invalid(op, node, "grouped convolution is not supported"));
    }

    let input = required_input(op, node, 0)?;
    let weights = required_input(op, node, 1)?;
    let (channels, height, width) = image_dims(graph, op, node, input)?;

    let weight_shape = graph.shape_of(weights)
        .filter(|s| s.rank() == 4)
        .ok_or_else(|| invalid(op, node, format!("weights '{}' must have a known [F, C, Hf, Wf] shape", weights)))?;
    let filters = weight_shape.static_dim(0)
        .ok_or_else(|| invalid(op, node, "number of filters must be static"))?;
    let (kernel_h, kernel_w) = match attr_pair(op, node, "kernel_shape")? {
        Some(kernel) => kernel,
        None => match (weight_shape.static_dim(2), weight_shape.static_dim(3)) {
            (Some(h), Some(w)) => (h as i64, w as i64),
            _ => return Err(invalid(op, node, "kernel size must be static")),
        },
    };
    let (stride_h, stride_w) = attr_pair(op, node, "strides")?.unwrap_or((1, 1));
    let (pad_h, pad_w) = padding(op, node)?;

    let targets = output_dims_targets(names, op, node)?;
    let (bias, bias_init) = match node.input(2) {
        // rank-1 tensors are row vectors, the layer wants an F x 1 column
        Some(bias) if graph.shape_of(bias).is_some_and(|s| s.rank() == 1) => (format!("t({})", names.ident(bias)), None),
        Some(bias) => (names.ident(bias), None),
        None => {
            let name = names.fresh(&format!("{}_bias", targets[0]));
            let mut context = Context::new();
            context.insert("name", &name);
            context.insert("rows", &filters);
            (name, Some(env.render("operators/zero_bias.dml", &context)?))
        }
    };

    let mut arguments = vec![names.ident(input), names.ident(weights), bias];
    arguments.extend(
        [channels, height, width].iter().map(usize::to_string)
            .chain([kernel_h, kernel_w, stride_h, stride_w, pad_h, pad_w].iter().map(i64::to_string)),
    );
    let call = render_call(env, &targets, Some("conv2d"), "forward", &arguments)?;

    let script = match bias_init {
        Some(init) => format!("{}\n{}", init, call),
        None => call,
    };
    Ok(Fragment::with_import(render_import(env, "conv2d", "conv2d_builtin")?, script))
}

fn render_import(env: &TemplateEnv, name: &str, file: &str) -> Result<String> {
    let mut context = Context::new();
    context.insert("path", &format!("{}/{}.dml", LAYERS_DIR, file));
    context.insert("name", name);
    env.render("import.dml", &context)
}

fn render_call(
    env: &TemplateEnv,
    targets: &[String],
    namespace: Option<&str>,
    function: &str,
    arguments: &[String],
) -> Result<String> {
    let target = match targets {
        [single] => single.clone(),
        _ => format!("[{}]", targets.join(", ")),
    };
    let mut context = Context::new();
    context.insert("target", &target);
    context.insert("namespace", &namespace);
    context.insert("function", function);
    context.insert("arguments", arguments);
    env.render("operators/function_call.dml", &context)
}

fn invalid(op: OpKind, node: &NodeDef, reason: impl Into<String>) -> Error {
    Error::invalid_node(op.name(), node.display_name(), reason)
}

fn check_counts(op: OpKind, node: &NodeDef, max_inputs: usize, max_outputs: usize) -> Result<()> {
    let inputs = node.present_inputs().count();
    let outputs = node.present_outputs().count();
    if inputs > max_inputs || outputs > max_outputs {
        return Err(invalid(op, node, format!(
            "expected at most {} inputs and {} outputs, got {} and {}",
            max_inputs, max_outputs, inputs, outputs
        )));
    }
    Ok(())
}

fn required_input<'n>(op: OpKind, node: &'n NodeDef, position: usize) -> Result<&'n str> {
    node.input(position).ok_or_else(|| invalid(op, node, format!("missing input {}", position)))
}

fn input_var(names: &NameMap, op: OpKind, node: &NodeDef, position: usize) -> Result<String> {
    required_input(op, node, position).map(|name| names.ident(name))
}

fn output_var(names: &NameMap, op: OpKind, node: &NodeDef, position: usize) -> Result<String> {
    node.output(position)
        .map(|name| names.ident(name))
        .ok_or_else(|| invalid(op, node, format!("missing output {}", position)))
}

/// `[out, out_hout, out_wout]` for the 2-D layers.
fn output_dims_targets(names: &mut NameMap, op: OpKind, node: &NodeDef) -> Result<[String; 3]> {
    let out = output_var(names, op, node, 0)?;
    let hout = names.fresh(&format!("{}_hout", out));
    let wout = names.fresh(&format!("{}_wout", out));
    Ok([out, hout, wout])
}

fn attr_pair(op: OpKind, node: &NodeDef, name: &str) -> Result<Option<(i64, i64)>> {
    match node.attr_ints(name) {
        None => Ok(None),
        Some([a, b]) => Ok(Some((*a, *b))),
        Some(values) => Err(invalid(op, node, format!("{} must have 2 values, got {}", name, values.len()))),
    }
}

/// `pads` is `[h_begin, w_begin, h_end, w_end]`; only symmetric padding maps
/// onto a single pad per axis.
fn padding(op: OpKind, node: &NodeDef) -> Result<(i64, i64)> {
    match node.attr_ints("pads") {
        None => Ok((0, 0)),
        Some([h_begin, w_begin, h_end, w_end]) if h_begin == h_end && w_begin == w_end => Ok((*h_begin, *w_begin)),
        Some([_, _, _, _]) => Err(invalid(op, node, "asymmetric padding is not supported")),
        Some(values) => Err(invalid(op, node, format!("pads must have 4 values, got {}", values.len()))),
    }
}

fn check_unit_dilations(op: OpKind, node: &NodeDef) -> Result<()> {
    match node.attr_ints("dilations") {
        Some(dilations) if dilations.iter().any(|&d| d != 1) => {
            Err(invalid(op, node, "dilations other than 1 are not supported"))
        }
        _ => Ok(()),
    }
}

/// `auto_pad` arrives base64-encoded in the JSON form; only NOTSET is accepted.
fn check_explicit_padding(op: OpKind, node: &NodeDef) -> Result<()> {
    let auto_pad = node.attribute("auto_pad").and_then(|a| a.s.as_deref());
    match auto_pad {
        None | Some("") | Some("NOTSET") | Some("Tk9UU0VU") => Ok(()),
        Some(_) => Err(invalid(op, node, "auto_pad is not supported, use explicit pads")),
    }
}

/// `(C, Hin, Win)` of an NCHW input.
fn image_dims(graph: &GraphDef, op: OpKind, node: &NodeDef, input: &str) -> Result<(usize, usize, usize)> {
    let shape = graph.shape_of(input).filter(|s| s.rank() == 4);
    let dims = shape.as_ref().and_then(|s| Some((s.static_dim(1)?, s.static_dim(2)?, s.static_dim(3)?)));
    dims.ok_or_else(|| invalid(op, node, format!("input '{}' must have a [N, C, H, W] shape with static C, H, W", input)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ElemType;
    use crate::linearizer::NodeGenerator;
    use crate::model::{AttributeDef, DimDef, ShapeDef, TensorTypeDef, TypeDef, ValueInfo};
    use pretty_assertions::assert_eq;

    fn node(op: &str, inputs: &[&str], outputs: &[&str]) -> NodeDef {
        NodeDef {
            op_type: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn ints(name: &str, values: &[i64]) -> AttributeDef {
        AttributeDef { name: name.into(), ints: values.to_vec(), ..Default::default() }
    }

    fn tensor(name: &str, dims: &[i64]) -> ValueInfo {
        let dim = dims.iter().map(|&d| DimDef { dim_value: Some(d), dim_param: None }).collect();
        ValueInfo {
            name: name.into(),
            ty: Some(TypeDef {
                tensor_type: Some(TensorTypeDef { elem_type: ElemType::Float, shape: Some(ShapeDef { dim }) }),
            }),
            ..Default::default()
        }
    }

    fn generate(graph: &GraphDef, node: &NodeDef) -> Result<Fragment> {
        TemplateEnv::new().unwrap().generate(graph, &mut NameMap::new(graph), node)
    }

    fn image_graph() -> GraphDef {
        GraphDef {
            inputs: vec![tensor("x", &[1, 3, 8, 8]), tensor("w", &[4, 3, 3, 3])],
            ..Default::default()
        }
    }

    #[test]
    fn infix_operators() {
        let g = GraphDef::default();
        assert_eq!(generate(&g, &node("Add", &["a", "b"], &["c"])).unwrap().script, "c = a + b");
        assert_eq!(generate(&g, &node("Sub", &["a", "b"], &["c"])).unwrap().script, "c = a - b");
        assert_eq!(generate(&g, &node("MatMul", &["a", "b"], &["c"])).unwrap().script, "c = a %*% b");
        assert_eq!(generate(&g, &node("And", &["a", "b"], &["c"])).unwrap().script, "c = a & b");
        assert_eq!(generate(&g, &node("Or", &["a", "b"], &["c"])).unwrap().script, "c = a | b");
    }

    #[test]
    fn neg_and_xor() {
        let g = GraphDef::default();
        assert_eq!(generate(&g, &node("Neg", &["x"], &["y"])).unwrap(), Fragment::script("y = -x"));
        assert_eq!(generate(&g, &node("Xor", &["a", "b"], &["c"])).unwrap(), Fragment::script("c = xor(a, b)"));
    }

    #[test]
    fn names_are_sanitized() {
        let fragment = generate(&GraphDef::default(), &node("Add", &["input.1", "0"], &["out:0"])).unwrap();
        assert_eq!(fragment.script, "out_0 = input_1 + v0");
    }

    #[test]
    fn activation_layers_import_their_script() {
        let g = GraphDef::default();
        for (op, layer) in [("Relu", "relu"), ("Tanh", "tanh"), ("Sigmoid", "sigmoid"), ("Softmax", "softmax")] {
            let fragment = generate(&g, &node(op, &["x"], &["y"])).unwrap();
            assert_eq!(fragment.script, format!("y = {}::forward(x)", layer));
            assert_eq!(fragment.import, Some(format!("source(\"nn/layers/{}.dml\") as {}", layer, layer)));
        }
    }

    #[test]
    fn softmax_rejects_other_axes() {
        let mut n = node("Softmax", &["x"], &["y"]);
        n.attributes.push(AttributeDef { name: "axis".into(), i: Some(0), ..Default::default() });
        assert!(matches!(generate(&GraphDef::default(), &n), Err(Error::InvalidNode { .. })));
    }

    #[test]
    fn dropout_uses_keep_probability() {
        let mut n = node("Dropout", &["x"], &["y"]);
        n.attributes.push(AttributeDef { name: "ratio".into(), f: Some(0.25), ..Default::default() });
        let fragment = generate(&GraphDef::default(), &n).unwrap();
        assert_eq!(fragment.script, "[y, y_mask] = dropout::forward(x, 0.75, -1)");
        assert_eq!(fragment.import.as_deref(), Some("source(\"nn/layers/dropout.dml\") as dropout"));
    }

    #[test]
    fn dropout_defaults_and_named_mask() {
        let mut n = node("Dropout", &["x"], &["y", "m"]);
        n.attributes.push(AttributeDef { name: "seed".into(), i: Some(42), ..Default::default() });
        let fragment = generate(&GraphDef::default(), &n).unwrap();
        assert_eq!(fragment.script, "[y, m] = dropout::forward(x, 0.5, 42)");
    }

    #[test]
    fn dropout_ratio_from_input() {
        let fragment = generate(&GraphDef::default(), &node("Dropout", &["x", "r"], &["y"])).unwrap();
        assert_eq!(fragment.script, "[y, y_mask] = dropout::forward(x, 1 - r, -1)");
    }

    #[test]
    fn max_pool_reads_input_shape() {
        let mut n = node("MaxPool", &["x"], &["y"]);
        n.attributes.push(ints("kernel_shape", &[2, 2]));
        n.attributes.push(ints("strides", &[2, 2]));
        let fragment = generate(&image_graph(), &n).unwrap();
        assert_eq!(
            fragment.script,
            "[y, y_hout, y_wout] = max_pool2d::forward(x, 3, 8, 8, 2, 2, 2, 2, 0, 0)"
        );
        assert_eq!(
            fragment.import.as_deref(),
            Some("source(\"nn/layers/max_pool2d_builtin.dml\") as max_pool2d")
        );
    }

    #[test]
    fn dropout_ratio_from_constant_input() {
        let mut g = GraphDef {
            initializers: vec![TensorDef {
                name: "r".into(),
                data_type: ElemType::Float,
                // 0.25f32, little endian
                raw_data: Some("AACAPg==".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let n = node("Dropout", &["x", "r"], &["y"]);
        assert_eq!(generate(&g, &n).unwrap().script, "[y, y_mask] = dropout::forward(x, 0.75, -1)");

        g.initializers[0] = TensorDef {
            name: "r".into(),
            data_type: ElemType::Double,
            double_data: vec![0.5],
            ..Default::default()
        };
        assert_eq!(generate(&g, &n).unwrap().script, "[y, y_mask] = dropout::forward(x, 0.5, -1)");
    }

    #[test]
    fn helper_variables_do_not_shadow_tensors() {
        let g = GraphDef {
            inputs: vec![tensor("x", &[1, 3, 8, 8]), tensor("w", &[4, 3, 3, 3]), tensor("y_bias", &[4, 1])],
            ..Default::default()
        };
        let fragment = generate(&g, &node("Conv", &["x", "w"], &["y"])).unwrap();
        assert_eq!(
            fragment.script,
            "y_bias_1 = matrix(0, rows=4, cols=1)\n\
             [y, y_hout, y_wout] = conv2d::forward(x, w, y_bias_1, 3, 8, 8, 3, 3, 1, 1, 0, 0)"
        );

        let g = GraphDef { inputs: vec![tensor("y_mask", &[2, 2])], ..Default::default() };
        let fragment = generate(&g, &node("Dropout", &["x"], &["y"])).unwrap();
        assert_eq!(fragment.script, "[y, y_mask_1] = dropout::forward(x, 0.5, -1)");
    }

    #[test]
    fn max_pool_rejects_ceil_mode() {
        let mut n = node("MaxPool", &["x"], &["y"]);
        n.attributes.push(ints("kernel_shape", &[2, 2]));
        n.attributes.push(AttributeDef { name: "ceil_mode".into(), i: Some(1), ..Default::default() });
        match generate(&image_graph(), &n) {
            Err(Error::InvalidNode { reason, .. }) => assert!(reason.contains("ceil_mode")),
            other => panic!("expected invalid node, got {:?}", other),
        }
    }

    #[test]
    fn max_pool_needs_kernel_and_shape() {
        let n = node("MaxPool", &["x"], &["y"]);
        assert!(matches!(generate(&image_graph(), &n), Err(Error::InvalidNode { .. })));

        let mut n = node("MaxPool", &["unknown"], &["y"]);
        n.attributes.push(ints("kernel_shape", &[2, 2]));
        match generate(&image_graph(), &n) {
            Err(Error::InvalidNode { op, reason, .. }) => {
                assert_eq!(op, "MaxPool");
                assert!(reason.contains("unknown"));
            }
            other => panic!("expected invalid node, got {:?}", other),
        }
    }

    #[test]
    fn conv_with_bias() {
        let mut n = node("Conv", &["x", "w", "b"], &["y"]);
        n.attributes.push(ints("pads", &[1, 1, 1, 1]));
        let fragment = generate(&image_graph(), &n).unwrap();
        assert_eq!(
            fragment.script,
            "[y, y_hout, y_wout] = conv2d::forward(x, w, b, 3, 8, 8, 3, 3, 1, 1, 1, 1)"
        );
        assert_eq!(fragment.import.as_deref(), Some("source(\"nn/layers/conv2d_builtin.dml\") as conv2d"));
    }

    #[test]
    fn conv_transposes_vector_bias() {
        let mut g = image_graph();
        g.initializers.push(TensorDef { name: "b".into(), dims: vec![4], float_data: vec![0.0; 4], ..Default::default() });
        let fragment = generate(&g, &node("Conv", &["x", "w", "b"], &["y"])).unwrap();
        assert_eq!(
            fragment.script,
            "[y, y_hout, y_wout] = conv2d::forward(x, w, t(b), 3, 8, 8, 3, 3, 1, 1, 0, 0)"
        );
    }

    #[test]
    fn conv_without_bias_declares_zeros() {
        let fragment = generate(&image_graph(), &node("Conv", &["x", "w"], &["y"])).unwrap();
        assert_eq!(
            fragment.script,
            "y_bias = matrix(0, rows=4, cols=1)\n\
             [y, y_hout, y_wout] = conv2d::forward(x, w, y_bias, 3, 8, 8, 3, 3, 1, 1, 0, 0)"
        );
    }

    #[test]
    fn conv_rejects_unsupported_attributes() {
        let mut grouped = node("Conv", &["x", "w"], &["y"]);
        grouped.attributes.push(AttributeDef { name: "group".into(), i: Some(2), ..Default::default() });
        assert!(matches!(generate(&image_graph(), &grouped), Err(Error::InvalidNode { .. })));

        let mut asymmetric = node("Conv", &["x", "w"], &["y"]);
        asymmetric.attributes.push(ints("pads", &[0, 0, 1, 1]));
        assert!(matches!(generate(&image_graph(), &asymmetric), Err(Error::InvalidNode { .. })));

        let mut dilated = node("Conv", &["x", "w"], &["y"]);
        dilated.attributes.push(ints("dilations", &[2, 2]));
        assert!(matches!(generate(&image_graph(), &dilated), Err(Error::InvalidNode { .. })));
    }

    #[test]
    fn arity_is_checked() {
        let g = GraphDef::default();
        assert!(matches!(generate(&g, &node("Add", &["a"], &["c"])), Err(Error::InvalidNode { .. })));
        assert!(matches!(generate(&g, &node("Relu", &["a", "b"], &["c"])), Err(Error::InvalidNode { .. })));
        assert!(matches!(generate(&g, &node("Neg", &["a"], &[])), Err(Error::InvalidNode { .. })));
    }
}
