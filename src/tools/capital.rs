use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolContext};

const CAPITALS: &[(&str, &str)] = &[
    ("australia", "Canberra"),
    ("brazil", "Brasília"),
    ("canada", "Ottawa"),
    ("china", "Beijing"),
    ("france", "Paris"),
    ("germany", "Berlin"),
    ("india", "New Delhi"),
    ("italy", "Rome"),
    ("japan", "Tokyo"),
    ("mexico", "Mexico City"),
    ("south korea", "Seoul"),
    ("spain", "Madrid"),
    ("united kingdom", "London"),
    ("united states", "Washington, D.C."),
];

pub fn capital_of(country: &str) -> Option<&'static str> {
    let wanted = country.trim().to_lowercase();
    CAPITALS
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, capital)| *capital)
}

/// Static country -> capital lookup.
#[derive(Debug, Clone, Default)]
pub struct CapitalCityTool;

#[derive(Debug, Deserialize)]
struct CapitalArgs {
    country: String,
}

#[async_trait]
impl Tool for CapitalCityTool {
    fn name(&self) -> &str {
        "get_capital_city"
    }

    fn description(&self) -> &str {
        "Retrieves the capital city for a given country."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"country": {"type": "string"}},
            "required": ["country"]
        }))
    }

    async fn call(&self, input: Value, _ctx: &mut ToolContext<'_>) -> Result<Value> {
        let args: CapitalArgs = parse_args(self.name(), input)?;
        let answer = match capital_of(&args.country) {
            Some(capital) => capital.to_string(),
            None => format!("Sorry, I don't know the capital of {}.", args.country),
        };
        Ok(Value::String(answer))
    }
}
