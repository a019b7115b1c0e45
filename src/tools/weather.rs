use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::tool::{parse_args, Tool, ToolContext};

const MIN_DEGREES: u32 = 10;
const MAX_DEGREES: u32 = 30;

/// Canned weather reports; unknown cities get a random temperature.
#[derive(Debug, Clone, Default)]
pub struct WeatherTool;

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    city: String,
}

fn random_degrees() -> u32 {
    fastrand::u32(MIN_DEGREES..=MAX_DEGREES)
}

/// Weather description for `city`.
pub fn describe_weather(city: &str) -> String {
    let lowered = city.to_lowercase();
    if lowered.contains("sydney") {
        "The weather in Sydney is 25 degrees and sunny.".to_string()
    } else if lowered.contains("melbourne") {
        "The weather in Melbourne is 18 degrees and cloudy.".to_string()
    } else {
        format!("The weather in {city} is {} degrees.", random_degrees())
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Looks up the weather for a given city."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        }))
    }

    async fn call(&self, input: Value, _ctx: &mut ToolContext<'_>) -> Result<Value> {
        let args: WeatherArgs = parse_args(self.name(), input)?;
        Ok(Value::String(describe_weather(&args.city)))
    }
}
