use alloy::{
    primitives::{Address, B256},
    rpc::types::{Log, ValueOrArray},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// EVM logs carry at most four topics.
pub const MAX_TOPIC_POSITIONS: usize = 4;

/// The filter object of a `logs` subscription.
///
/// `address` is absent, a single address, or a set (OR). `topics` is an
/// ordered list of up to four positions; each position is `null`
/// (wildcard), a single value, or a set (OR). Parsing into typed alloy
/// values makes every comparison case-insensitive on the wire's hex form.
///
/// `fromBlock`/`toBlock` are accepted so that filter objects written for
/// `eth_getLogs` parse unchanged, but live subscriptions ignore them; the
/// poller supplies its own window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<ValueOrArray<Address>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<Option<ValueOrArray<B256>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<Value>,
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid log filter: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("too many topic positions: {0}, at most {MAX_TOPIC_POSITIONS} allowed")]
    TooManyTopics(usize),
}

impl LogFilter {
    /// Parses the optional filter object of `["logs", {...}]` params.
    /// A missing or `null` object subscribes to every log.
    pub fn parse(params: Option<&Value>) -> Result<Self, FilterError> {
        let filter: Self = match params {
            None | Some(Value::Null) => Self::default(),
            Some(value) => serde_json::from_value(value.clone())?,
        };
        if filter.topics.len() > MAX_TOPIC_POSITIONS {
            return Err(FilterError::TooManyTopics(filter.topics.len()));
        }
        Ok(filter)
    }

    /// True when the filter has no address and no topic constraints.
    pub fn is_match_all(&self) -> bool {
        self.address.is_none() && self.topics.iter().all(Option::is_none)
    }

    /// Tests a log against the filter. Upstreams already pre-filter, but
    /// their strictness varies; this is the authoritative check.
    pub fn matches(&self, log: &Log) -> bool {
        self.matches_address(log.address()) && self.matches_topics(log.topics())
    }

    fn matches_address(&self, address: Address) -> bool {
        match &self.address {
            None => true,
            Some(ValueOrArray::Value(single)) => *single == address,
            Some(ValueOrArray::Array(set)) => set.contains(&address),
        }
    }

    fn matches_topics(&self, topics: &[B256]) -> bool {
        for (position, constraint) in self.topics.iter().enumerate() {
            let Some(constraint) = constraint else {
                continue; // null matches any topic, present or not
            };
            let Some(topic) = topics.get(position) else {
                return false; // constrained position the log does not have
            };
            let matched = match constraint {
                ValueOrArray::Value(single) => single == topic,
                ValueOrArray::Array(set) => set.contains(topic),
            };
            if !matched {
                return false;
            }
        }
        true
    }

    /// Inserts `address` and `topics` into an `eth_getLogs` params object,
    /// preserving the shapes the client supplied.
    pub(crate) fn extend_query(
        &self,
        query: &mut serde_json::Map<String, Value>,
    ) -> Result<(), serde_json::Error> {
        if let Some(address) = &self.address {
            query.insert("address".to_string(), serde_json::to_value(address)?);
        }
        if !self.topics.is_empty() {
            query.insert("topics".to_string(), serde_json::to_value(&self.topics)?);
        }
        Ok(())
    }
}
