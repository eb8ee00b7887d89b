//! Monitor status decoding (Mode 01 PID 01)
//!
//! The 32-bit payload is split into bytes A..D, most significant first:
//!
//! - A: bit 7 is the MIL, bits 0-6 the number of stored DTCs
//! - B: bit 3 selects the ignition type; bits 0-2 flag the availability of
//!   the misfire, fuel-system and components tests, bits 4-6 flag the same
//!   three tests as incomplete
//! - C/D: availability and incompleteness of the ignition-specific tests
//!
//! The meaning of each C/D bit depends on the ignition type, so spark and
//! compression components are distinct types rather than one table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnitionType {
    Spark,
    Compression,
}

/// Tests reported in byte B for every engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommonTest {
    Misfire,
    FuelSystem,
    Components,
}

impl CommonTest {
    const ORDER: [CommonTest; 3] = [
        CommonTest::Misfire,
        CommonTest::FuelSystem,
        CommonTest::Components,
    ];
}

/// Spark ignition tests, bit offsets 10-17
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SparkTest {
    Catalyst,
    HeatedCatalyst,
    EvaporativeSystem,
    SecondaryAirSystem,
    AcRefrigerant,
    OxygenSensor,
    OxygenSensorHeater,
    EgrSystem,
}

impl SparkTest {
    fn from_bit(bit: u8) -> Option<Self> {
        Some(match bit {
            0 => SparkTest::Catalyst,
            1 => SparkTest::HeatedCatalyst,
            2 => SparkTest::EvaporativeSystem,
            3 => SparkTest::SecondaryAirSystem,
            4 => SparkTest::AcRefrigerant,
            5 => SparkTest::OxygenSensor,
            6 => SparkTest::OxygenSensorHeater,
            7 => SparkTest::EgrSystem,
            _ => return None,
        })
    }

    fn bit(&self) -> u8 {
        *self as u8
    }
}

/// Compression ignition tests, bit offsets 20-27 (22 and 24 are reserved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionTest {
    NmhcCatalyst,
    NoxScrMonitor,
    BoostPressure,
    ExhaustGasSensor,
    PmFilter,
    EgrVvtSystem,
}

impl CompressionTest {
    fn from_bit(bit: u8) -> Option<Self> {
        Some(match bit {
            0 => CompressionTest::NmhcCatalyst,
            1 => CompressionTest::NoxScrMonitor,
            3 => CompressionTest::BoostPressure,
            5 => CompressionTest::ExhaustGasSensor,
            6 => CompressionTest::PmFilter,
            7 => CompressionTest::EgrVvtSystem,
            _ => return None,
        })
    }

    fn bit(&self) -> u8 {
        match self {
            CompressionTest::NmhcCatalyst => 0,
            CompressionTest::NoxScrMonitor => 1,
            CompressionTest::BoostPressure => 3,
            CompressionTest::ExhaustGasSensor => 5,
            CompressionTest::PmFilter => 6,
            CompressionTest::EgrVvtSystem => 7,
        }
    }
}

/// The subsystem a readiness test covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestComponent {
    Common(CommonTest),
    Spark(SparkTest),
    Compression(CompressionTest),
}

impl TestComponent {
    /// Bit offset of the test in the monitor status numbering
    pub fn offset(&self) -> u8 {
        match self {
            TestComponent::Common(test) => *test as u8,
            TestComponent::Spark(test) => 10 + test.bit(),
            TestComponent::Compression(test) => 20 + test.bit(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestComponent::Common(CommonTest::Misfire) => "Misfire",
            TestComponent::Common(CommonTest::FuelSystem) => "Fuel system",
            TestComponent::Common(CommonTest::Components) => "Components",
            TestComponent::Spark(SparkTest::Catalyst) => "Catalyst",
            TestComponent::Spark(SparkTest::HeatedCatalyst) => "Heated catalyst",
            TestComponent::Spark(SparkTest::EvaporativeSystem) => "Evaporative system",
            TestComponent::Spark(SparkTest::SecondaryAirSystem) => "Secondary air system",
            TestComponent::Spark(SparkTest::AcRefrigerant) => "A/C refrigerant",
            TestComponent::Spark(SparkTest::OxygenSensor) => "Oxygen sensor",
            TestComponent::Spark(SparkTest::OxygenSensorHeater) => "Oxygen sensor heater",
            TestComponent::Spark(SparkTest::EgrSystem) => "EGR system",
            TestComponent::Compression(CompressionTest::NmhcCatalyst) => "NMHC catalyst",
            TestComponent::Compression(CompressionTest::NoxScrMonitor) => "NOx/SCR monitor",
            TestComponent::Compression(CompressionTest::BoostPressure) => "Boost pressure",
            TestComponent::Compression(CompressionTest::ExhaustGasSensor) => "Exhaust gas sensor",
            TestComponent::Compression(CompressionTest::PmFilter) => "PM filter monitoring",
            TestComponent::Compression(CompressionTest::EgrVvtSystem) => "EGR and/or VVT system",
        }
    }
}

/// One readiness test and its state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTest {
    pub component: TestComponent,
    /// The vehicle supports this test
    pub available: bool,
    /// The test has not completed since DTCs were last cleared
    pub incomplete: bool,
}

/// Decoded PID 01 payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// Malfunction indicator lamp is on
    pub mil: bool,
    /// Number of stored DTCs
    pub dtc_count: u8,
    pub ignition: IgnitionType,
    /// Byte B tests first, then C/D tests in ascending bit order
    pub tests: Vec<EngineTest>,
}

impl MonitorStatus {
    pub fn decode(raw: u32) -> Self {
        let [a, b, c, d] = raw.to_be_bytes();

        let ignition = if b & 0x08 == 0 {
            IgnitionType::Spark
        } else {
            IgnitionType::Compression
        };

        let mut tests = Vec::with_capacity(11);
        for (bit, test) in CommonTest::ORDER.iter().enumerate() {
            tests.push(EngineTest {
                component: TestComponent::Common(*test),
                available: b & (1 << bit) != 0,
                incomplete: b & (1 << (bit + 4)) != 0,
            });
        }

        for bit in 0..8u8 {
            let component = match ignition {
                IgnitionType::Spark => SparkTest::from_bit(bit).map(TestComponent::Spark),
                IgnitionType::Compression => {
                    CompressionTest::from_bit(bit).map(TestComponent::Compression)
                }
            };
            // Reserved compression bits carry no test.
            let Some(component) = component else { continue };

            tests.push(EngineTest {
                component,
                available: c & (1 << bit) != 0,
                incomplete: d & (1 << bit) != 0,
            });
        }

        Self {
            mil: a & 0x80 != 0,
            dtc_count: a & 0x7F,
            ignition,
            tests,
        }
    }

    /// Look up the state of one test
    pub fn test(&self, component: TestComponent) -> Option<&EngineTest> {
        self.tests.iter().find(|t| t.component == component)
    }

    /// Every available test has completed
    pub fn is_ready(&self) -> bool {
        self.tests.iter().all(|t| !t.available || !t.incomplete)
    }
}
