//! Outbound sensor telemetry payloads.
//!
//! A node publishes its gas readings to `<node>/sensor/data` as a small
//! JSON object. The curve fitting that turns ADC counts into a ppm figure
//! happens in the sensor driver; this module only defines the wire shape.

#![deny(unsafe_code)]

use heapless::String;
use serde::Serialize;

/// Maximum serialized payload size.
pub const MAX_PAYLOAD_LEN: usize = 128;

/// One gas-concentration reading.
#[derive(Debug, Serialize, PartialEq, Clone, Copy)]
pub struct Reading<'a> {
    /// Sensor label, e.g. `"mq135"`.
    pub label: &'a str,
    /// Estimated concentration in parts per million.
    pub ppm: u32,
    /// Raw averaged ADC count the estimate was derived from.
    pub raw: u16,
}

impl Reading<'_> {
    /// Serialize the reading as a JSON publish payload.
    pub fn to_json(&self) -> Result<String<MAX_PAYLOAD_LEN>, serde_json_core::ser::Error> {
        serde_json_core::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_reading() {
        let reading = Reading {
            label: "mq135",
            ppm: 412,
            raw: 1023,
        };
        let json = reading.to_json().unwrap();
        assert_eq!(json.as_str(), r#"{"label":"mq135","ppm":412,"raw":1023}"#);
    }
}
