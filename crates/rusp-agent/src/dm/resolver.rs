// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Path expression resolution.
//!
//! Expands a possibly-wildcarded expression into the flat, ordered list
//! of concrete paths it names under the current instance set:
//!
//! - `*` expands one instance segment: `Device.LocalAgent.MTP.*.Status`
//! - `[...]` filters instances by sibling parameters with `&&`/`||`
//!   short-circuit evaluation: `Device.X.[Enable==true && Port>1000].Name`
//! - `Ref#` follows a reference parameter into the object it names;
//!   dangling references fail with the resolve-target-not-found kind
//! - a leading `+` inside `[...]` forces ordered output even when
//!   sorting is globally disabled
//!
//! Enumeration goes through the owning table's refresh callback when the
//! cached instance set is stale, so two back-to-back resolutions of the
//! same expression against unchanged state yield identical output.

use super::path::{DmPath, Segment};
use super::{get_value, table_instances, DmEnv};
use crate::config::MAX_DM_PATH;
use crate::error::{Result, UspError};
use crate::textutils;

// ============================================================================
// Expression parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ExprSeg {
    Name(String),
    /// `Name#`: follow the reference held by parameter `Name`.
    Ref(String),
    Instance(u32),
    Wildcard,
    /// Raw text between `[` and `]`.
    Filter(String),
}

fn split_segments(expr: &str) -> Result<(Vec<ExprSeg>, bool)> {
    if expr.is_empty() {
        return Err(UspError::InvalidPath("empty expression".into()));
    }
    if expr.len() > MAX_DM_PATH {
        return Err(UspError::InvalidPath(format!(
            "expression exceeds {MAX_DM_PATH} characters"
        )));
    }

    // Split on dots outside brackets and quotes.
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    for c in expr.chars() {
        match c {
            '"' if depth > 0 => {
                in_quote = !in_quote;
                current.push(c);
            }
            '[' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ']' if !in_quote => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| UspError::InvalidPath(format!("unbalanced ']' in '{expr}'")))?;
                current.push(c);
            }
            '.' if depth == 0 && !in_quote => {
                parts.push(std::mem::take(&mut current));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if depth != 0 || in_quote {
        return Err(UspError::InvalidPath(format!(
            "unterminated filter in '{expr}'"
        )));
    }

    let trailing_dot = current.is_empty() && expr.ends_with('.');
    if !current.is_empty() {
        parts.push(current);
    }

    let mut segs = Vec::new();
    for part in parts {
        if part.is_empty() {
            return Err(UspError::InvalidPath(format!("empty segment in '{expr}'")));
        }
        let seg = if part == "*" {
            ExprSeg::Wildcard
        } else if part.starts_with('[') && part.ends_with(']') {
            ExprSeg::Filter(part[1..part.len() - 1].to_string())
        } else if part.bytes().all(|b| b.is_ascii_digit()) {
            let n: u32 = part
                .parse()
                .map_err(|_| UspError::InvalidPath(format!("bad instance number '{part}'")))?;
            if n == 0 {
                return Err(UspError::InvalidPath("instance numbers start at 1".into()));
            }
            ExprSeg::Instance(n)
        } else if let Some(name) = part.strip_suffix('#') {
            ExprSeg::Ref(name.to_string())
        } else {
            ExprSeg::Name(part.to_string())
        };
        segs.push(seg);
    }
    Ok((segs, trailing_dot))
}

// ============================================================================
// Filter evaluation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

#[derive(Debug, Clone)]
struct Cond {
    lhs: String,
    op: CmpOp,
    rhs: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conj {
    And,
    Or,
}

/// A filter, parsed as conditions joined left-to-right by `&&`/`||`.
#[derive(Debug, Clone)]
struct Filter {
    /// Leading `+`: force ordered output.
    ordered: bool,
    conds: Vec<Cond>,
    /// Conjunction *before* conds[i+1].
    joins: Vec<Conj>,
}

fn parse_filter(raw: &str) -> Result<Filter> {
    let mut text = raw.trim();
    let ordered = text.starts_with('+');
    if ordered {
        text = text[1..].trim_start();
    }
    if text.is_empty() {
        return Err(UspError::InvalidPath("empty filter expression".into()));
    }

    // Split on && / || outside quotes, left to right.
    let mut pieces = Vec::new();
    let mut joins = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut in_quote = false;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quote = !in_quote,
            b'&' if !in_quote && i + 1 < bytes.len() && bytes[i + 1] == b'&' => {
                pieces.push(&text[start..i]);
                joins.push(Conj::And);
                i += 1;
                start = i + 1;
            }
            b'|' if !in_quote && i + 1 < bytes.len() && bytes[i + 1] == b'|' => {
                pieces.push(&text[start..i]);
                joins.push(Conj::Or);
                i += 1;
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    pieces.push(&text[start..]);

    let mut conds = Vec::new();
    for piece in pieces {
        conds.push(parse_cond(piece.trim())?);
    }
    Ok(Filter {
        ordered,
        conds,
        joins,
    })
}

fn parse_cond(piece: &str) -> Result<Cond> {
    // Two-character operators first so `<=` does not parse as `<`.
    for (token, op) in [
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ] {
        if let Some(pos) = find_outside_quotes(piece, token) {
            let lhs = piece[..pos].trim();
            let rhs = piece[pos + token.len()..].trim();
            if lhs.is_empty() || rhs.is_empty() {
                return Err(UspError::InvalidPath(format!("malformed condition '{piece}'")));
            }
            let rhs = rhs.trim_matches('"');
            return Ok(Cond {
                lhs: lhs.to_string(),
                op,
                rhs: rhs.to_string(),
            });
        }
    }
    Err(UspError::InvalidPath(format!(
        "no comparison operator in condition '{piece}'"
    )))
}

fn find_outside_quotes(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let nlen = needle.len();
    let mut in_quote = false;
    let mut i = 0usize;
    while i + nlen <= bytes.len() {
        if bytes[i] == b'"' {
            in_quote = !in_quote;
        } else if !in_quote && &haystack[i..i + nlen] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn compare(lhs: &str, op: CmpOp, rhs: &str) -> bool {
    // Booleans compare canonically, numbers numerically, otherwise text.
    if let (Ok(a), Ok(b)) = (textutils::parse_bool(lhs), textutils::parse_bool(rhs)) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        };
    }
    if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Le => a <= b,
            CmpOp::Ge => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Gt => a > b,
        };
    }
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Ge => lhs >= rhs,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Gt => lhs > rhs,
    }
}

fn eval_filter(env: &mut DmEnv<'_>, filter: &Filter, inst_path: &DmPath) -> Result<bool> {
    let mut result = eval_cond(env, &filter.conds[0], inst_path)?;
    for (join, cond) in filter.joins.iter().zip(filter.conds[1..].iter()) {
        // Left-to-right short circuit.
        match join {
            Conj::And if !result => continue,
            Conj::Or if result => continue,
            _ => {}
        }
        result = eval_cond(env, cond, inst_path)?;
    }
    Ok(result)
}

fn eval_cond(env: &mut DmEnv<'_>, cond: &Cond, inst_path: &DmPath) -> Result<bool> {
    let mut param = inst_path.clone();
    for part in cond.lhs.split('.') {
        param = param.child_name(part);
    }
    let value = get_value(env, &param)?;
    Ok(compare(&value, cond.op, &cond.rhs))
}

// ============================================================================
// Resolution walk
// ============================================================================

fn current_template(path: &DmPath) -> String {
    path.schema_path()
}

fn template_known(env: &DmEnv<'_>, template: &str) -> bool {
    env.reg.node(template).is_some() || env.reg.nodes_under(template).next().is_some()
}

fn walk(
    env: &mut DmEnv<'_>,
    prefix: Option<DmPath>,
    segs: &[ExprSeg],
    out: &mut Vec<DmPath>,
) -> Result<()> {
    let Some(seg) = segs.first() else {
        if let Some(path) = prefix {
            out.push(path);
        }
        return Ok(());
    };
    let rest = &segs[1..];

    match seg {
        ExprSeg::Name(name) => {
            let next = match &prefix {
                Some(p) => p.child_name(name),
                None => DmPath::from_segments(vec![Segment::Name(name.clone())], false),
            };
            if !template_known(env, &current_template(&next)) {
                return Err(UspError::InvalidPath(format!(
                    "unknown path {}",
                    next.to_param_string()
                )));
            }
            walk(env, Some(next), rest, out)
        }
        ExprSeg::Instance(n) => {
            let table = prefix.as_ref().ok_or_else(|| {
                UspError::InvalidPath("expression starts with an instance number".into())
            })?;
            let concrete = table.to_param_string();
            let live = table_instances(env, &concrete)?;
            if !live.contains(n) {
                return Err(UspError::InvalidPath(format!(
                    "{concrete}.{n} does not exist"
                )));
            }
            walk(env, Some(table.child_instance(*n)), rest, out)
        }
        ExprSeg::Wildcard => {
            let table = prefix.as_ref().ok_or_else(|| {
                UspError::InvalidPath("expression starts with a wildcard".into())
            })?;
            let concrete = table.to_param_string();
            for n in table_instances(env, &concrete)? {
                walk(env, Some(table.child_instance(n)), rest, out)?;
            }
            Ok(())
        }
        ExprSeg::Filter(raw) => {
            let table = prefix.as_ref().ok_or_else(|| {
                UspError::InvalidPath("expression starts with a filter".into())
            })?;
            let filter = parse_filter(raw)?;
            let concrete = table.to_param_string();
            for n in table_instances(env, &concrete)? {
                let inst = table.child_instance(n);
                if eval_filter(env, &filter, &inst)? {
                    walk(env, Some(inst), rest, out)?;
                }
            }
            Ok(())
        }
        ExprSeg::Ref(name) => {
            let obj = prefix.as_ref().ok_or_else(|| {
                UspError::InvalidPath("expression starts with a reference".into())
            })?;
            let ref_param = obj.child_name(name);
            let target = get_value(env, &ref_param)?;
            if target.is_empty() {
                return Err(UspError::ResolveTargetNotFound(format!(
                    "{} holds no reference",
                    ref_param.to_param_string()
                )));
            }
            let target_path = DmPath::parse(&target).map_err(|_| {
                UspError::ResolveTargetNotFound(format!(
                    "{} references malformed path '{target}'",
                    ref_param.to_param_string()
                ))
            })?;
            if super::verify_instances(env, &target_path).is_err() {
                return Err(UspError::ResolveTargetNotFound(format!(
                    "{} references missing object {target}",
                    ref_param.to_param_string()
                )));
            }
            walk(env, Some(target_path), rest, out)
        }
    }
}

/// Resolve an expression to concrete parameter paths.
pub fn resolve_params(env: &mut DmEnv<'_>, expr: &str) -> Result<Vec<String>> {
    let (segs, _trailing) = split_segments(expr)?;
    let mut out = Vec::new();
    walk(env, None, &segs, &mut out)?;

    let mut paths = Vec::with_capacity(out.len());
    for p in out {
        // The final template must name a parameter.
        env.reg.param(&p.schema_path())?;
        paths.push(p.to_param_string());
    }
    if env.sort_instances || expr_forces_order(expr) {
        paths.sort_by(|a, b| numeric_path_cmp(a, b));
    }
    Ok(paths)
}

/// Resolve an expression to concrete object paths (Add, Delete,
/// GetInstances, object-form Get). Callers that require table
/// *instances* (Delete) check the trailing `{i}` themselves.
pub fn resolve_objects(env: &mut DmEnv<'_>, expr: &str) -> Result<Vec<DmPath>> {
    let (segs, _trailing) = split_segments(expr)?;
    let mut out = Vec::new();
    walk(env, None, &segs, &mut out)?;

    for p in &out {
        let template = p.schema_path();
        let is_object = template.ends_with("{i}")
            || matches!(env.reg.node(&template), Some(crate::dm::SchemaNode::Object(_)))
            || env.reg.nodes_under(&template).next().is_some();
        if !is_object {
            return Err(UspError::InvalidPath(format!(
                "{} does not address an object",
                p.to_object_string()
            )));
        }
    }
    if env.sort_instances || expr_forces_order(expr) {
        out.sort_by(|a, b| numeric_path_cmp(&a.to_param_string(), &b.to_param_string()));
    }
    Ok(out)
}

fn expr_forces_order(expr: &str) -> bool {
    expr.contains("[+")
}

/// Order paths with instance numbers compared numerically
/// (`MTP.2` before `MTP.10`).
fn numeric_path_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let mut ia = a.split('.');
    let mut ib = b.split('.');
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u32>(), y.parse::<u32>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
