// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow edge-condition evaluator.
//!
//! Evaluates a single predicate `<operand> <op> <literal>` against a
//! run/node/context dictionary. Empty conditions pass; anything that does
//! not parse fails closed.

use gf_core::Run;
use std::collections::HashMap;

/// Absolute tolerance for numeric equality.
const NUMERIC_EPSILON: f64 = 1e-4;

/// Node attributes visible to edge conditions.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub state: String,
    pub summary: String,
    pub attempt: u32,
    pub node_type: String,
}

/// The dictionary an operand path resolves against.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeContext<'a> {
    pub run: Option<&'a Run>,
    pub node: Option<&'a NodeInfo>,
    pub context: Option<&'a HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "==" => Some(Op::Eq),
            "!=" => Some(Op::Ne),
            ">" => Some(Op::Gt),
            ">=" => Some(Op::Ge),
            "<" => Some(Op::Lt),
            "<=" => Some(Op::Le),
            _ => None,
        }
    }

    fn is_ordering(self) -> bool {
        matches!(self, Op::Gt | Op::Ge | Op::Lt | Op::Le)
    }
}

/// Evaluate `condition` against `ctx`.
pub fn evaluate_condition(condition: &str, ctx: &EdgeContext<'_>) -> bool {
    let condition = condition.trim();
    if condition.is_empty() {
        return true;
    }

    let Some((operand, op, literal)) = split_predicate(condition) else {
        return false;
    };
    let Some(op) = Op::parse(op) else { return false };
    let Some(left) = resolve_operand(operand, ctx) else {
        return false;
    };
    let right = unquote(literal);

    compare(&left, op, right)
}

/// `lhs op rest-of-line`, where the literal may contain spaces.
fn split_predicate(condition: &str) -> Option<(&str, &str, &str)> {
    let operand_end = condition.find(char::is_whitespace)?;
    let (operand, rest) = condition.split_at(operand_end);
    let rest = rest.trim_start();
    let (op, literal) = match rest.find(char::is_whitespace) {
        Some(op_end) => {
            let (op, lit) = rest.split_at(op_end);
            (op, lit.trim())
        }
        None => (rest, ""),
    };
    if op.is_empty() {
        return None;
    }
    Some((operand, op, literal))
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Resolve a dotted operand path against the context dictionary.
fn resolve_operand(path: &str, ctx: &EdgeContext<'_>) -> Option<String> {
    if let Some(field) = path.strip_prefix("run.") {
        let run = ctx.run?;
        return match field {
            "state" => Some(run.state.to_string()),
            "summary" => Some(run.summary.clone().unwrap_or_default()),
            "attempt" => Some(run.attempt.to_string()),
            "failureClass" | "failure_class" => {
                Some(run.failure_class.map(|c| c.to_string()).unwrap_or_default())
            }
            _ => None,
        };
    }
    if let Some(field) = path.strip_prefix("node.") {
        let node = ctx.node?;
        return match field {
            "state" => Some(node.state.clone()),
            "summary" => Some(node.summary.clone()),
            "attempt" => Some(node.attempt.to_string()),
            "type" => Some(node.node_type.clone()),
            _ => None,
        };
    }
    let name = path.strip_prefix("context.").unwrap_or(path);
    ctx.context?.get(name).cloned()
}

fn compare(left: &str, op: Op, right: &str) -> bool {
    if let (Ok(l), Ok(r)) = (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        return match op {
            Op::Eq => (l - r).abs() <= NUMERIC_EPSILON,
            Op::Ne => (l - r).abs() > NUMERIC_EPSILON,
            Op::Gt => l > r,
            Op::Ge => l >= r,
            Op::Lt => l < r,
            Op::Le => l <= r,
        };
    }

    // Ordering on non-numeric operands is unsupported.
    if op.is_ordering() {
        return false;
    }
    let equal = left.eq_ignore_ascii_case(right);
    match op {
        Op::Eq => equal,
        Op::Ne => !equal,
        _ => false,
    }
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
