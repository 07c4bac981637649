//! Synthetic payloads for each [`StreamKind`].
//!
//! Generators are plain state machines over a seeded RNG: no clocks, no tasks.  The same seed and
//! config always produce the same sequence of payloads.
use super::kind::StreamKind;
use super::message::StreamConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

const DEFAULT_SYMBOLS: &[&str] = &["AAPL", "GOOGL", "MSFT", "AMZN", "TSLA"];
const DEFAULT_ROOM: &str = "general";

const ACTIONS: &[&str] = &["login", "logout", "page_view", "click", "purchase", "search"];
const PAGES: &[&str] = &["/", "/products", "/cart", "/checkout", "/profile", "/search"];
const CHAT_USERS: &[&str] = &["alice", "bob", "carol", "dave", "erin"];
const CHAT_LINES: &[&str] = &[
    "Hello everyone!",
    "Has anyone tried the new release?",
    "Looks good to me",
    "I'll take a look after lunch",
    "Can someone review my PR?",
    "brb",
];
const LOG_LEVELS: &[(&str, u32)] = &[("debug", 2), ("info", 6), ("warn", 2), ("error", 1)];
const SERVICES: &[&str] = &["api", "auth", "database", "cache", "worker"];
const LOG_MESSAGES: &[&str] = &[
    "Request completed",
    "Cache miss",
    "Connection pool exhausted",
    "Retrying operation",
    "User session refreshed",
    "Slow query detected",
];

/// Largest fraction of its price a stock can move in one tick
const MAX_PRICE_STEP: f64 = 0.02;
/// Prices never drop below this
const PRICE_FLOOR: f64 = 1.0;

#[derive(Debug)]
struct Quote {
    symbol: String,
    price: f64,
}

/// Produces successive payloads for one stream
#[derive(Debug)]
pub struct EventGenerator {
    kind: StreamKind,
    rng: StdRng,
    sequence: u64,
    sensor_id: Option<String>,
    room: String,
    quotes: Vec<Quote>,
}

impl EventGenerator {
    pub fn new(kind: StreamKind, config: &StreamConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let quotes = if kind == StreamKind::StockPrices {
            let symbols = match &config.symbols {
                Some(symbols) if !symbols.is_empty() => symbols.clone(),
                _ => DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            };
            symbols
                .into_iter()
                .map(|symbol| Quote {
                    symbol,
                    price: round(rng.gen_range(50.0..500.0), 2),
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            kind,
            rng,
            sequence: 0,
            sensor_id: config.sensor_id.clone(),
            room: config
                .room
                .clone()
                .unwrap_or_else(|| DEFAULT_ROOM.to_string()),
            quotes,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Random number source shared with whoever schedules this generator, so that one seed
    /// determines both payloads and timing.
    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Produce the next payload
    pub fn generate(&mut self) -> Value {
        self.sequence += 1;
        match self.kind {
            StreamKind::UserActivity => self.user_activity(),
            StreamKind::Analytics => self.analytics(),
            StreamKind::Chat => self.chat(),
            StreamKind::SensorData => self.sensor_data(),
            StreamKind::LogEvents => self.log_event(),
            StreamKind::StockPrices => self.stock_prices(),
        }
    }

    fn user_activity(&mut self) -> Value {
        json!({
            "userId": format!("user_{}", self.rng.gen_range(1..=1000)),
            "action": pick(&mut self.rng, ACTIONS),
            "page": pick(&mut self.rng, PAGES),
            "sessionDuration": self.rng.gen_range(1..=3600),
        })
    }

    fn analytics(&mut self) -> Value {
        let page_views: u32 = self.rng.gen_range(100..=10_000);
        json!({
            "pageViews": page_views,
            "uniqueVisitors": self.rng.gen_range(page_views / 4..=page_views),
            "bounceRate": round(self.rng.gen_range(0.2..=0.8), 3),
            "avgSessionDuration": self.rng.gen_range(30..=600),
            "conversionRate": round(self.rng.gen_range(0.01..=0.1), 4),
        })
    }

    fn chat(&mut self) -> Value {
        json!({
            "messageId": self.sequence,
            "room": self.room,
            "user": pick(&mut self.rng, CHAT_USERS),
            "message": pick(&mut self.rng, CHAT_LINES),
        })
    }

    fn sensor_data(&mut self) -> Value {
        let sensor_id = match &self.sensor_id {
            Some(id) => id.clone(),
            None => format!("sensor_{}", self.rng.gen_range(1..=10)),
        };
        json!({
            "sensorId": sensor_id,
            "temperature": round(self.rng.gen_range(10.0..=50.0), 1),
            "humidity": round(self.rng.gen_range(20.0..=80.0), 1),
            "pressure": round(self.rng.gen_range(980.0..=1050.0), 1),
            "battery": self.rng.gen_range(0..=100),
        })
    }

    fn log_event(&mut self) -> Value {
        let level = LOG_LEVELS
            .choose_weighted(&mut self.rng, |(_, weight)| *weight)
            .map(|(level, _)| *level)
            .unwrap_or("info");
        json!({
            "level": level,
            "service": pick(&mut self.rng, SERVICES),
            "message": pick(&mut self.rng, LOG_MESSAGES),
            "requestId": format!("{:016x}", self.rng.gen::<u64>()),
            "durationMs": self.rng.gen_range(1..=2000),
        })
    }

    /// Every symbol takes a small random step from its previous price
    fn stock_prices(&mut self) -> Value {
        let rng = &mut self.rng;
        let prices: Vec<Value> = self
            .quotes
            .iter_mut()
            .map(|quote| {
                let previous = quote.price;
                let step = rng.gen_range(-MAX_PRICE_STEP..=MAX_PRICE_STEP) * previous;
                quote.price = round((previous + step).max(PRICE_FLOOR), 2);
                let change = round(quote.price - previous, 2);

                json!({
                    "symbol": quote.symbol,
                    "price": quote.price,
                    "change": change,
                    "changePercent": round(change / previous * 100.0, 2),
                })
            })
            .collect();

        json!({ "prices": prices })
    }
}

fn pick(rng: &mut StdRng, choices: &[&'static str]) -> &'static str {
    choices.choose(rng).copied().unwrap_or_default()
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_readings_stay_in_range() {
        let mut generator = EventGenerator::new(StreamKind::SensorData, &StreamConfig::default(), 7);
        for _ in 0..500 {
            let data = generator.generate();
            let temperature = data["temperature"].as_f64().unwrap();
            let humidity = data["humidity"].as_f64().unwrap();
            assert!((10.0..=50.0).contains(&temperature), "{temperature}");
            assert!((20.0..=80.0).contains(&humidity), "{humidity}");
            assert!(data["sensorId"].as_str().unwrap().starts_with("sensor_"));
        }
    }

    #[test]
    fn configured_sensor_id_and_room_are_used() {
        let config = StreamConfig {
            sensor_id: Some("greenhouse".to_string()),
            room: Some("ops".to_string()),
            ..Default::default()
        };
        let mut sensors = EventGenerator::new(StreamKind::SensorData, &config, 1);
        assert_eq!(sensors.generate()["sensorId"], "greenhouse");

        let mut chat = EventGenerator::new(StreamKind::Chat, &config, 1);
        let first = chat.generate();
        assert_eq!(first["room"], "ops");
        assert_eq!(first["messageId"], 1);
        assert_eq!(chat.generate()["messageId"], 2);
    }

    #[test]
    fn stock_prices_walk_and_never_go_below_floor() {
        let config = StreamConfig {
            symbols: Some(vec!["PENNY".to_string(), "ACME".to_string()]),
            ..Default::default()
        };
        let mut generator = EventGenerator::new(StreamKind::StockPrices, &config, 99);
        generator.quotes[0].price = 1.01;

        let mut last = generator
            .quotes
            .iter()
            .map(|q| q.price)
            .collect::<Vec<_>>();
        for _ in 0..1000 {
            let data = generator.generate();
            let prices = data["prices"].as_array().unwrap();
            assert_eq!(prices.len(), 2);
            assert_eq!(prices[0]["symbol"], "PENNY");

            for (quote, previous) in prices.iter().zip(&last) {
                let price = quote["price"].as_f64().unwrap();
                assert!(price >= PRICE_FLOOR);
                // Each step is bounded; the extra cent covers rounding
                assert!((price - previous).abs() <= previous * MAX_PRICE_STEP + 0.011);
            }
            last = prices.iter().map(|q| q["price"].as_f64().unwrap()).collect();
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        for kind in StreamKind::all() {
            let mut a = EventGenerator::new(kind, &StreamConfig::default(), 1234);
            let mut b = EventGenerator::new(kind, &StreamConfig::default(), 1234);
            for _ in 0..10 {
                assert_eq!(a.generate(), b.generate(), "{kind}");
            }
        }
    }

    #[test]
    fn every_kind_produces_an_object() {
        for kind in StreamKind::all() {
            let mut generator = EventGenerator::new(kind, &StreamConfig::default(), 5);
            assert!(generator.generate().is_object(), "{kind}");
            assert_eq!(generator.kind(), kind);
        }
    }
}
