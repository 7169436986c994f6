//! IO element registry
//!
//! Maps the one-byte IO identifiers carried in Codec 8 records to semantic
//! property names. The mapping is a table: adding an identifier never
//! touches the decoder.

use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// Standard FMB-family IO identifiers reachable with a one-byte id
const STANDARD_IO_ELEMENTS: &[(u8, &str)] = &[
    (1, "Digital Input 1"),
    (2, "Digital Input 2"),
    (3, "Digital Input 3"),
    (6, "Analog Input 2"),
    (9, "Analog Input 1"),
    (10, "SD Status"),
    (11, "ICCID1"),
    (12, "Fuel Used GPS"),
    (13, "Fuel Rate GPS"),
    (14, "ICCID2"),
    (15, "Eco Score"),
    (16, "Total Odometer"),
    (17, "Axis X"),
    (18, "Axis Y"),
    (19, "Axis Z"),
    (21, "GSM Signal"),
    (24, "Speed"),
    (66, "External Voltage"),
    (67, "Battery Voltage"),
    (68, "Battery Current"),
    (69, "GNSS Status"),
    (72, "Dallas Temperature 1"),
    (73, "Dallas Temperature 2"),
    (74, "Dallas Temperature 3"),
    (78, "iButton"),
    (80, "Data Mode"),
    (113, "Battery Level"),
    (179, "Digital Output 1"),
    (180, "Digital Output 2"),
    (181, "GNSS PDOP"),
    (182, "GNSS HDOP"),
    (199, "Trip Odometer"),
    (200, "Sleep Mode"),
    (205, "GSM Cell ID"),
    (206, "GSM Area Code"),
    (239, "Ignition"),
    (240, "Movement"),
    (241, "Active GSM Operator"),
    (246, "Towing"),
    (247, "Crash Detection"),
    (249, "Jamming"),
    (250, "Trip"),
    (251, "Idling"),
    (252, "Unplug"),
    (253, "Green Driving Type"),
    (254, "Green Driving Value"),
    (255, "Over Speeding"),
];

static STANDARD_REGISTRY: Lazy<Arc<IoElementRegistry>> = Lazy::new(|| {
    Arc::new(IoElementRegistry::from_table(STANDARD_IO_ELEMENTS))
});

/// Lookup table from IO identifier to property name
///
/// Read-only once shared with a decoder. Identifiers missing from the table
/// resolve to a placeholder label instead of failing, so device-specific
/// codes never abort decoding.
#[derive(Debug, Clone, Default)]
pub struct IoElementRegistry {
    names: HashMap<u8, Cow<'static, str>>,
}

impl IoElementRegistry {
    /// Create an empty registry (every id resolves to its placeholder)
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a static table
    pub fn from_table(table: &[(u8, &'static str)]) -> Self {
        let names = table
            .iter()
            .map(|&(id, name)| (id, Cow::Borrowed(name)))
            .collect();
        Self { names }
    }

    /// The shared standard registry
    pub fn standard() -> Arc<IoElementRegistry> {
        Arc::clone(&STANDARD_REGISTRY)
    }

    /// Add or replace a mapping
    pub fn with_name(mut self, id: u8, name: impl Into<Cow<'static, str>>) -> Self {
        self.names.insert(id, name.into());
        self
    }

    /// Property name for an IO id, or `IO ID <id>` when unmapped
    pub fn name_for(&self, id: u8) -> Cow<'static, str> {
        match self.names.get(&id) {
            Some(name) => name.clone(),
            None => Cow::Owned(format!("IO ID {}", id)),
        }
    }

    /// Number of registered ids
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
