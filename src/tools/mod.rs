//! Built-in tools the pipelines register.
//!
//! - `write_to_disk`: save generated code
//! - `get_stock_prices`: start/end closes per ticker
//! - `get_weather`: canned or random weather
//! - `set_topics`: research topics into session state
//! - `get_capital_city`: static capital lookup
//! - `finish_writing`: exit the writing loop

pub mod capital;
pub mod files;
pub mod research;
pub mod stocks;
pub mod weather;
pub mod writing;

pub use capital::CapitalCityTool;
pub use files::WriteToDiskTool;
pub use research::{SetTopicsTool, TOPIC_KEYS};
pub use stocks::{DailyClose, MarketData, PricePair, StockPriceTool, TickerQuote, YahooFinance};
pub use weather::WeatherTool;
pub use writing::FinishWritingTool;
