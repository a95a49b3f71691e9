use std::fmt;
use std::str::FromStr;

use crate::codegen::operators;
use crate::codegen::TemplateEnv;
use crate::core::names::NameMap;
use crate::error::{Error, Result};
use crate::linearizer::Fragment;
use crate::model::{GraphDef, NodeDef};

/// Operator kinds with a registered generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    // Infix
    Add, Sub, MatMul, And, Or,
    // Prefix
    Neg,
    // Builtin call
    Xor,
    // Layer calls
    Relu, Tanh, Sigmoid, Softmax, Dropout, MaxPool, Conv,
}

impl OpKind {
    pub const ALL: [OpKind; 14] = [
        OpKind::Add, OpKind::Sub, OpKind::MatMul, OpKind::And, OpKind::Or,
        OpKind::Neg, OpKind::Xor,
        OpKind::Relu, OpKind::Tanh, OpKind::Sigmoid, OpKind::Softmax,
        OpKind::Dropout, OpKind::MaxPool, OpKind::Conv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Add => "Add",
            OpKind::Sub => "Sub",
            OpKind::MatMul => "MatMul",
            OpKind::And => "And",
            OpKind::Or => "Or",
            OpKind::Neg => "Neg",
            OpKind::Xor => "Xor",
            OpKind::Relu => "Relu",
            OpKind::Tanh => "Tanh",
            OpKind::Sigmoid => "Sigmoid",
            OpKind::Softmax => "Softmax",
            OpKind::Dropout => "Dropout",
            OpKind::MaxPool => "MaxPool",
            OpKind::Conv => "Conv",
        }
    }

    /// Renders the script fragment (and import, if any) for `node`.
    pub fn generate(&self, env: &TemplateEnv, graph: &GraphDef, names: &mut NameMap, node: &NodeDef) -> Result<Fragment> {
        match self {
            OpKind::Add => operators::infix(env, names, *self, node, "+"),
            OpKind::Sub => operators::infix(env, names, *self, node, "-"),
            OpKind::MatMul => operators::infix(env, names, *self, node, "%*%"),
            OpKind::And => operators::infix(env, names, *self, node, "&"),
            OpKind::Or => operators::infix(env, names, *self, node, "|"),
            OpKind::Neg => operators::prefix(env, names, *self, node, "-"),
            OpKind::Xor => operators::builtin_call(env, names, *self, node, "xor"),
            OpKind::Relu => operators::layer_forward(env, names, *self, node, "relu"),
            OpKind::Tanh => operators::layer_forward(env, names, *self, node, "tanh"),
            OpKind::Sigmoid => operators::layer_forward(env, names, *self, node, "sigmoid"),
            OpKind::Softmax => operators::layer_forward(env, names, *self, node, "softmax"),
            OpKind::Dropout => operators::dropout(env, graph, names, *self, node),
            OpKind::MaxPool => operators::max_pool(env, graph, names, *self, node),
            OpKind::Conv => operators::conv(env, graph, names, *self, node),
        }
    }
}

impl FromStr for OpKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        OpKind::ALL
            .iter()
            .copied()
            .find(|op| op.name() == name)
            .ok_or_else(|| Error::UnsupportedOperator { op: name.to_string() })
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_parses_from_its_name() {
        for op in OpKind::ALL {
            assert_eq!(op.name().parse::<OpKind>().unwrap(), op);
        }
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        match "FooBar".parse::<OpKind>() {
            Err(Error::UnsupportedOperator { op }) => assert_eq!(op, "FooBar"),
            other => panic!("expected unsupported operator, got {:?}", other),
        }
    }

    #[test]
    fn parsing_is_case_sensitive() {
        assert!("relu".parse::<OpKind>().is_err());
    }
}
