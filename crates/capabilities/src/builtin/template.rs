use serde_json::{json, Value};
use sy_domain::capability::{CapabilityError, CapabilityResult, Invocation, InvocationOutput};

use crate::traits::Capability;

/// Offline response writer.
///
/// Renders the turn's tool results as plain text so a deployment with no
/// model backend can still complete tool-driven turns.
pub struct TemplateSynthesizer;

#[async_trait::async_trait]
impl Capability for TemplateSynthesizer {
    async fn invoke(&self, invocation: Invocation) -> CapabilityResult {
        let query = invocation.str_field("query").unwrap_or_default();
        let results = invocation
            .input
            .get("tool_results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if results.is_empty() {
            if query.is_empty() {
                return Err(CapabilityError::invalid_input("nothing to synthesize"));
            }
            return Ok(InvocationOutput::new(json!({
                "text": format!("No language model is configured to answer: {query}"),
            })));
        }

        let lines: Vec<String> = results.iter().map(render_result).collect();
        let text = if lines.len() == 1 {
            format!("Result: {}", lines[0])
        } else {
            let mut text = String::from("Results:");
            for line in &lines {
                text.push_str("\n- ");
                text.push_str(line);
            }
            text
        };
        Ok(InvocationOutput::new(json!({ "text": text })))
    }
}

fn render_result(entry: &Value) -> String {
    let capability = entry
        .get("capability")
        .and_then(Value::as_str)
        .unwrap_or("tool");
    let output = entry.get("output").unwrap_or(&Value::Null);
    if let Some(text) = output.get("text").and_then(Value::as_str) {
        return text.to_owned();
    }
    match output.get("result") {
        Some(Value::String(s)) => format!("{capability}: {s}"),
        Some(v) => format!("{capability}: {v}"),
        None => match output {
            Value::String(s) => format!("{capability}: {s}"),
            other => format!("{capability}: {other}"),
        },
    }
}
