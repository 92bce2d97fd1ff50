// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Value codec between JSON and QuickJS values.
//!
//! | JSON | QuickJS |
//! |------|---------|
//! | null | `null` (and `undefined` on the way back) |
//! | boolean | boolean |
//! | number | int when it fits in i32, float otherwise |
//! | string | string |
//! | array | `Array`, element-wise |
//! | object | plain `Object`, own enumerable keys |
//!
//! Integral floats within the safe integer range come back as JSON integers, so
//! `3 + 1` yields `4` rather than `4.0`. NaN, infinities, functions, symbols and
//! other exotic values fail with [`DriverError::UnsupportedValue`]. Conversion is
//! bounded in nesting and size. Cycles are found by object identity against the
//! chain of enclosing containers, so shared but acyclic references convert fine.

use rquickjs::{Array, Ctx, Object, Type};
use serde_json::{Map, Number, Value};

use super::traits::{DriverError, Result};

/// Maximum container nesting of a converted value, serde_json's own parse limit.
pub const MAX_DEPTH: usize = 128;

/// Maximum number of nodes in one converted value.
pub const MAX_NODES: usize = 1_000_000;

/// Largest integer a double represents exactly (2^53 - 1).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Tracks depth and node count during one conversion.
struct LimitTracker {
    depth: usize,
    nodes: usize,
}

impl LimitTracker {
    fn new() -> Self {
        Self { depth: 0, nodes: 0 }
    }

    fn visit(&mut self, path: &str) -> Result<()> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(unsupported(
                path,
                format!("more than {} values", MAX_NODES),
            ));
        }
        Ok(())
    }

    fn descend(&mut self, path: &str) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(unsupported(
                path,
                format!("nesting deeper than {} levels", MAX_DEPTH),
            ));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }
}

fn unsupported(path: &str, reason: impl Into<String>) -> DriverError {
    DriverError::UnsupportedValue {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn engine_error(path: &str, err: rquickjs::Error) -> DriverError {
    DriverError::Other(format!("conversion of '{}' failed: {}", path, err))
}

// ============================================================================
// JSON -> QuickJS
// ============================================================================

/// Convert a JSON value into a QuickJS value owned by `ctx`.
pub fn json_to_js<'js>(ctx: &Ctx<'js>, value: &Value, path: &str) -> Result<rquickjs::Value<'js>> {
    let mut tracker = LimitTracker::new();
    json_to_js_internal(ctx, value, path, &mut tracker)
}

fn json_to_js_internal<'js>(
    ctx: &Ctx<'js>,
    value: &Value,
    path: &str,
    tracker: &mut LimitTracker,
) -> Result<rquickjs::Value<'js>> {
    tracker.visit(path)?;

    let converted = match value {
        Value::Null => rquickjs::Value::new_null(ctx.clone()),
        Value::Bool(b) => rquickjs::Value::new_bool(ctx.clone(), *b),
        Value::Number(n) => number_to_js(ctx, n),
        Value::String(s) => rquickjs::String::from_str(ctx.clone(), s)
            .map_err(|e| engine_error(path, e))?
            .into_value(),
        Value::Array(items) => {
            tracker.descend(path)?;
            let array = Array::new(ctx.clone()).map_err(|e| engine_error(path, e))?;
            for (index, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, index);
                let item = json_to_js_internal(ctx, item, &item_path, tracker)?;
                array
                    .set(index, item)
                    .map_err(|e| engine_error(&item_path, e))?;
            }
            tracker.ascend();
            array.into_value()
        }
        Value::Object(fields) => {
            tracker.descend(path)?;
            let object = Object::new(ctx.clone()).map_err(|e| engine_error(path, e))?;
            for (key, field) in fields {
                let field_path = format!("{}.{}", path, key);
                let field = json_to_js_internal(ctx, field, &field_path, tracker)?;
                object
                    .set(key.as_str(), field)
                    .map_err(|e| engine_error(&field_path, e))?;
            }
            tracker.ascend();
            object.into_value()
        }
    };

    Ok(converted)
}

fn number_to_js<'js>(ctx: &Ctx<'js>, n: &Number) -> rquickjs::Value<'js> {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => rquickjs::Value::new_int(ctx.clone(), small),
            Err(_) => rquickjs::Value::new_float(ctx.clone(), i as f64),
        }
    } else if let Some(u) = n.as_u64() {
        rquickjs::Value::new_float(ctx.clone(), u as f64)
    } else {
        rquickjs::Value::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN))
    }
}

// ============================================================================
// QuickJS -> JSON
// ============================================================================

/// Convert a QuickJS value into JSON.
pub fn js_to_json(value: &rquickjs::Value<'_>, path: &str) -> Result<Value> {
    let mut tracker = LimitTracker::new();
    let mut ancestors = Vec::new();
    js_to_json_internal(value, path, &mut tracker, &mut ancestors)
}

fn js_to_json_internal<'js>(
    value: &rquickjs::Value<'js>,
    path: &str,
    tracker: &mut LimitTracker,
    ancestors: &mut Vec<rquickjs::Value<'js>>,
) -> Result<Value> {
    tracker.visit(path)?;

    let is_container = matches!(value.type_of(), Type::Array | Type::Object);
    if is_container {
        // Value equality on objects is pointer identity.
        if ancestors.contains(value) {
            return Err(unsupported(path, "cyclic reference"));
        }
        tracker.descend(path)?;
        ancestors.push(value.clone());
    }

    let converted = match value.type_of() {
        Type::Undefined | Type::Null => Value::Null,
        Type::Bool => Value::Bool(value.as_bool().unwrap_or_default()),
        Type::Int => Value::from(value.as_int().unwrap_or_default()),
        Type::Float => float_to_json(value.as_float().unwrap_or(f64::NAN), path)?,
        Type::String => {
            let s = value
                .as_string()
                .ok_or_else(|| unsupported(path, "string expected"))?;
            Value::String(s.to_string().map_err(|e| engine_error(path, e))?)
        }
        Type::Array => {
            let array = value
                .as_array()
                .ok_or_else(|| unsupported(path, "array expected"))?;
            let mut items = Vec::with_capacity(array.len());
            for index in 0..array.len() {
                let item_path = format!("{}[{}]", path, index);
                let item: rquickjs::Value = array
                    .get(index)
                    .map_err(|e| engine_error(&item_path, e))?;
                items.push(js_to_json_internal(&item, &item_path, tracker, ancestors)?);
            }
            Value::Array(items)
        }
        Type::Object => {
            let object = value
                .as_object()
                .ok_or_else(|| unsupported(path, "object expected"))?;
            let mut fields = Map::new();
            for key in object.keys::<String>() {
                let key = key.map_err(|e| engine_error(path, e))?;
                let field_path = format!("{}.{}", path, key);
                let field: rquickjs::Value = object
                    .get(key.as_str())
                    .map_err(|e| engine_error(&field_path, e))?;
                let field = js_to_json_internal(&field, &field_path, tracker, ancestors)?;
                fields.insert(key, field);
            }
            Value::Object(fields)
        }
        other => {
            return Err(unsupported(
                path,
                format!("{:?} values cannot be converted to JSON", other),
            ));
        }
    };

    if is_container {
        ancestors.pop();
        tracker.ascend();
    }
    Ok(converted)
}

fn float_to_json(f: f64, path: &str) -> Result<Value> {
    if !f.is_finite() {
        return Err(unsupported(path, format!("{} is not a JSON number", f)));
    }
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        return Ok(Value::from(f as i64));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| unsupported(path, format!("{} is not a JSON number", f)))
}
