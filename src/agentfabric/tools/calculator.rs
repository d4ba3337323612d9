//! Arithmetic tool backed by `evalexpr`.
//!
//! Exposes one tool, `calculator`, taking `{"expression": "..."}` and
//! returning `{"result": <number>}`.  Supports the operators and `math::`
//! functions evalexpr ships (`+ - * / % ^`, `math::sin`, `math::ln`, ...)
//! plus the conveniences agents actually type: `**` for exponentiation and
//! the bare constants `pi` and `e`.

use crate::agentfabric::tool_protocol::{ToolError, ToolMetadata, ToolProtocol, ToolResult};
use async_trait::async_trait;
use evalexpr::ContextWithMutableVariables;

/// Built-in arithmetic evaluator; the reference [`ToolProtocol`]
/// implementation.
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }

    fn evaluate(&self, expression: &str) -> Result<f64, String> {
        let prepared = prepare_expression(expression);

        let mut context = evalexpr::HashMapContext::<evalexpr::DefaultNumericTypes>::new();
        let _ = context.set_value(
            "math::PI".to_string(),
            evalexpr::Value::Float(std::f64::consts::PI),
        );
        let _ = context.set_value(
            "math::E".to_string(),
            evalexpr::Value::Float(std::f64::consts::E),
        );

        match evalexpr::eval_with_context(&prepared, &context) {
            Ok(value) => value
                .as_number()
                .map_err(|_| "result is not a number".to_string()),
            Err(e) => Err(format!("evaluation error: {}", e)),
        }
    }
}

fn prepare_expression(expr: &str) -> String {
    let mut prepared = expr.trim().replace("**", "^");
    prepared = replace_constant(&prepared, "pi", "math::PI");
    prepared = replace_constant(&prepared, "e", "math::E");
    prepared
}

// Replace a standalone constant name, leaving identifiers like "exp" or
// "math::E" untouched.
fn replace_constant(expr: &str, constant: &str, replacement: &str) -> String {
    let chars: Vec<char> = expr.chars().collect();
    let pattern: Vec<char> = constant.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let matches_here = chars[i..].starts_with(&pattern[..]);
        let boundary_before = i == 0 || (!chars[i - 1].is_alphanumeric() && chars[i - 1] != ':' && chars[i - 1] != '_');
        let after = i + pattern.len();
        let boundary_after = after >= chars.len()
            || (!chars[after].is_alphanumeric() && chars[after] != ':' && chars[after] != '_');
        if matches_here && boundary_before && boundary_after {
            out.push_str(replacement);
            i += pattern.len();
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProtocol for CalculatorTool {
    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError> {
        Ok(vec![ToolMetadata::new(
            "calculator",
            "Evaluates a mathematical expression and returns the numeric result.",
        )
        .with_input_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '2 + 2 * 3'"
                }
            },
            "required": ["expression"]
        }))])
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let expression = arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments {
                name: name.to_string(),
                reason: "missing string field 'expression'".to_string(),
            })?;

        match self.evaluate(expression) {
            Ok(result) => Ok(ToolResult::success(serde_json::json!({ "result": result }))),
            Err(reason) => Ok(ToolResult::failure(reason)),
        }
    }
}
