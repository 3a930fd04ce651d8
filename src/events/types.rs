//! Chain events as delivered by the subscription stream.

use std::collections::HashMap;

/// Attribute key carrying the transaction hash.
pub const TX_HASH_KEY: &str = "tx.hash";

/// One aligned sub-event: short attribute name → value.
pub type Tuple = HashMap<&'static str, String>;

/// Flattened attributes of one transaction (`"<event>.<attribute>"` → values).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub tx_hash: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl RawEvent {
    pub fn new(attributes: HashMap<String, Vec<String>>) -> Self {
        let tx_hash = attributes
            .get(TX_HASH_KEY)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_default();
        Self { tx_hash, attributes }
    }

    /// Values of `<event>.<attribute>`, empty when absent.
    pub fn values(&self, event: &str, attribute: &str) -> &[String] {
        self.attributes
            .get(&format!("{}.{}", event, attribute))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Zip the required attributes of `event` positionally into tuples.
    ///
    /// Returns the complete tuples (as many as the shortest attribute list)
    /// and the total count (the longest list). The two differ when some
    /// sub-events lack an attribute.
    pub fn aligned_tuples(&self, event: &str, required: &[&'static str]) -> (Vec<Tuple>, usize) {
        let columns: Vec<&[String]> = required.iter().map(|attr| self.values(event, attr)).collect();
        let complete = columns.iter().map(|c| c.len()).min().unwrap_or(0);
        let total = columns.iter().map(|c| c.len()).max().unwrap_or(0);

        let tuples = (0..complete)
            .map(|i| {
                required
                    .iter()
                    .zip(&columns)
                    .map(|(attr, column)| (*attr, column[i].clone()))
                    .collect()
            })
            .collect();
        (tuples, total)
    }
}
