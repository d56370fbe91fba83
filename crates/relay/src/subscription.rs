// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream subscription message: API key, geographic filter, message types.
//!
//! The upstream drops any session that has not received this message within
//! a few seconds of the socket opening, so it is built once at startup and
//! sent verbatim on every connect.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// A `(latitude, longitude)` pair in decimal degrees.
pub type Corner = (f64, f64);

/// Geographic rectangle given by two opposite corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BoundingBox {
    corners: [Corner; 2],
}

impl BoundingBox {
    /// The whole globe.
    pub const WORLD: Self = Self { corners: [(-90.0, -180.0), (90.0, 180.0)] };

    pub fn new(a: Corner, b: Corner) -> Result<Self, String> {
        check_corner(a)?;
        check_corner(b)?;
        Ok(Self { corners: [a, b] })
    }

    pub fn corners(&self) -> [Corner; 2] {
        self.corners
    }
}

fn check_corner((lat, lon): Corner) -> Result<(), String> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {lat} out of range [-90, 90]"));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude {lon} out of range [-180, 180]"));
    }
    Ok(())
}

/// Parses `lat1,lon1,lat2,lon2`.
impl FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| {
                let p = p.trim();
                p.parse::<f64>().map_err(|_| format!("invalid coordinate {p:?}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        match parts[..] {
            [lat1, lon1, lat2, lon2] => Self::new((lat1, lon1), (lat2, lon2)),
            _ => Err(format!("expected lat1,lon1,lat2,lon2, got {} values", parts.len())),
        }
    }
}

/// Immutable subscription sent to the upstream on every connect.
#[derive(Clone, PartialEq, Serialize)]
pub struct SubscriptionSpec {
    #[serde(rename = "APIKey")]
    api_key: String,
    #[serde(rename = "BoundingBoxes")]
    bounding_boxes: Vec<BoundingBox>,
    #[serde(rename = "FilterMessageTypes", skip_serializing_if = "Vec::is_empty")]
    filter_message_types: Vec<String>,
}

impl SubscriptionSpec {
    /// An empty box list subscribes to the whole globe.
    pub fn new(
        api_key: impl Into<String>,
        bounding_boxes: Vec<BoundingBox>,
        filter_message_types: Vec<String>,
    ) -> Self {
        let bounding_boxes =
            if bounding_boxes.is_empty() { vec![BoundingBox::WORLD] } else { bounding_boxes };
        Self { api_key: api_key.into(), bounding_boxes, filter_message_types }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn bounding_boxes(&self) -> &[BoundingBox] {
        &self.bounding_boxes
    }

    pub fn filter_message_types(&self) -> &[String] {
        &self.filter_message_types
    }

    /// First 8 characters of the key, for logs.
    pub fn redacted_key(&self) -> String {
        let prefix: String = self.api_key.chars().take(8).collect();
        format!("{prefix}...")
    }

    /// The JSON text frame sent to the upstream.
    pub fn to_message(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("api_key", &self.redacted_key())
            .field("bounding_boxes", &self.bounding_boxes)
            .field("filter_message_types", &self.filter_message_types)
            .finish()
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
