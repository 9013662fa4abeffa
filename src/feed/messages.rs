//! VALR trade-socket wire types.
//!
//! Inbound text is decoded exactly once, here, into [`InboundMessage`].
//! Nothing downstream looks at raw JSON maps.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

use crate::config::exchange_symbol;
use crate::error::DecodeError;

/// Event name used to subscribe to full order book updates.
pub const FULL_ORDERBOOK_EVENT: &str = "FULL_ORDERBOOK_UPDATE";

/// Known values of the inbound `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Full book snapshot sent after subscribing.
    FullOrderbookSnapshot,
    /// Full book re-publication after a change.
    FullOrderbookUpdate,
    /// Subscription acknowledgment.
    Subscribed,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Book snapshot or update carrying both ladders.
    Snapshot {
        /// Which book message type delivered it.
        kind: MessageType,
        /// Raw ladders, not yet normalized.
        book: RawBook,
    },
    /// The exchange confirmed a subscription.
    SubscriptionAck {
        /// The acknowledgment as received, for logging.
        detail: String,
    },
    /// Any other message type; ignored by the collector.
    Unrecognized {
        /// The `type` field, when present.
        message_type: Option<String>,
    },
}

impl InboundMessage {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }

        let raw_type = value.get("type").and_then(Value::as_str);
        match raw_type.and_then(|t| MessageType::from_str(t).ok()) {
            Some(kind @ (MessageType::FullOrderbookSnapshot | MessageType::FullOrderbookUpdate)) => {
                Ok(InboundMessage::Snapshot {
                    kind,
                    book: RawBook::from_value(&value),
                })
            }
            Some(MessageType::Subscribed) => Ok(InboundMessage::SubscriptionAck {
                detail: text.to_string(),
            }),
            None => Ok(InboundMessage::Unrecognized {
                message_type: raw_type.map(str::to_string),
            }),
        }
    }
}

/// Book payload as sent by the exchange.
///
/// Built field by field from the parsed JSON so one malformed element never
/// rejects the whole message. A level that is not an object has no price
/// and is dropped during normalization. An order without a readable
/// quantity counts as zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBook {
    /// Bid levels, best first.
    bids: Vec<RawLevel>,
    /// Ask levels, best first.
    asks: Vec<RawLevel>,
    /// Exchange sequence counter.
    last_change: Option<Value>,
}

impl RawBook {
    /// Read a book payload from a parsed message.
    ///
    /// The ladders live either under a `data` object or at the top level.
    /// `data` is tried first; when it is absent or not an object the top
    /// level is used.
    pub fn from_value(value: &Value) -> Self {
        let inner = match value.get("data") {
            Some(data @ Value::Object(_)) => data,
            _ => value,
        };
        Self {
            bids: ladder_from_value(inner.get("Bids")),
            asks: ladder_from_value(inner.get("Asks")),
            last_change: inner.get("LastChange").cloned(),
        }
    }

    /// Decode a book payload from raw text.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        Ok(Self::from_value(&value))
    }

    /// Raw bid levels.
    pub fn bids(&self) -> &[RawLevel] {
        &self.bids
    }

    /// Raw ask levels.
    pub fn asks(&self) -> &[RawLevel] {
        &self.asks
    }

    /// Exchange sequence number, if it is an integer.
    pub fn sequence_number(&self) -> Option<i64> {
        match self.last_change.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Anything other than an array is an empty ladder.
fn ladder_from_value(value: Option<&Value>) -> Vec<RawLevel> {
    match value {
        Some(Value::Array(levels)) => levels.iter().map(RawLevel::from_value).collect(),
        _ => Vec::new(),
    }
}

/// One raw price level: a price and the individual orders resting there.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLevel {
    price: Option<Value>,
    orders: Vec<RawOrder>,
}

impl RawLevel {
    /// Build a level from string fields (used by tests and the mock feed).
    pub fn new(price: &str, quantities: &[&str]) -> Self {
        Self {
            price: Some(Value::String(price.to_string())),
            orders: quantities.iter().map(|q| RawOrder::new(q)).collect(),
        }
    }

    /// Read one ladder element. Non-objects yield a level with no price.
    pub fn from_value(value: &Value) -> Self {
        let orders = match value.get("Orders") {
            Some(Value::Array(orders)) => orders.iter().map(RawOrder::from_value).collect(),
            _ => Vec::new(),
        };
        Self {
            price: value.get("Price").cloned(),
            orders,
        }
    }

    /// Parsed price, `None` when missing or unparsable.
    pub fn price(&self) -> Option<Decimal> {
        self.price.as_ref().and_then(decimal_from_value)
    }

    /// Orders at this level.
    pub fn orders(&self) -> &[RawOrder] {
        &self.orders
    }
}

/// A single resting order within a level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOrder {
    quantity: Option<Value>,
}

impl RawOrder {
    /// Build an order from a quantity string.
    pub fn new(quantity: &str) -> Self {
        Self {
            quantity: Some(Value::String(quantity.to_string())),
        }
    }

    /// Read one order element. Non-objects yield an order with no quantity.
    pub fn from_value(value: &Value) -> Self {
        Self {
            quantity: value.get("quantity").cloned(),
        }
    }

    /// Parsed quantity, `None` when missing or unparsable.
    pub fn quantity(&self) -> Option<Decimal> {
        self.quantity.as_ref().and_then(decimal_from_value)
    }
}

/// Numeric fields arrive as strings, occasionally as JSON numbers.
fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s.trim()),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Outbound subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    msg_type: &'static str,
    subscriptions: Vec<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Subscription {
    event: &'static str,
    pairs: Vec<String>,
}

impl SubscribeRequest {
    /// Subscribe to full order book updates for display-format pairs.
    pub fn full_orderbook(pairs: &[String]) -> Self {
        Self {
            msg_type: "SUBSCRIBE",
            subscriptions: vec![Subscription {
                event: FULL_ORDERBOOK_EVENT,
                pairs: pairs.iter().map(|p| exchange_symbol(p)).collect(),
            }],
        }
    }

    /// Serialize to the JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
