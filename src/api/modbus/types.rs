use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use strum::EnumIter;

use super::transport::TransportError;

/// Read functions the scanner is allowed to issue.
///
/// Write functions (5, 6, ...) are known to [`function_name`] for display but
/// can never be placed in a probe matrix.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum FunctionCode {
    #[serde(rename = "coils")]
    ReadCoils = 1,
    #[serde(rename = "discrete_inputs", alias = "discrete")]
    ReadDiscreteInputs = 2,
    #[serde(rename = "holding")]
    ReadHoldingRegisters = 3,
    #[serde(rename = "input")]
    ReadInputRegisters = 4,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self.into()
    }

    /// Human readable description used in console output.
    pub fn name(self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
        }
    }

    /// Whether a successful read returns single bits rather than 16-bit words.
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs
        )
    }

    /// Largest quantity a single request may ask for.
    pub fn max_count(self) -> u16 {
        if self.is_bit_access() {
            2000
        } else {
            125
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Describe any Modbus function code, including the ones the scanner never sends.
pub fn function_name(code: u8) -> String {
    match code {
        5 => "Write Single Coil".to_string(),
        6 => "Write Single Register".to_string(),
        other => match FunctionCode::try_from(other) {
            Ok(function) => function.name().to_string(),
            Err(_) => format!("Function {other}"),
        },
    }
}

/// Unit identifier of a device on the serial side of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;
    pub const FIRST: DeviceAddress = DeviceAddress(Self::MIN);
    pub const LAST: DeviceAddress = DeviceAddress(Self::MAX);

    pub fn new(value: u8) -> Result<Self, InvalidDeviceAddress> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidDeviceAddress(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = InvalidDeviceAddress;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceAddress> for u8 {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDeviceAddress(pub u8);

impl fmt::Display for InvalidDeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device address {} is outside {}..={}",
            self.0,
            DeviceAddress::MIN,
            DeviceAddress::MAX
        )
    }
}

impl std::error::Error for InvalidDeviceAddress {}

/// Addresses commonly assigned to field devices, visited before the rest.
pub const DEFAULT_PRIORITY_ADDRESSES: [u8; 13] = [16, 1, 2, 3, 8, 10, 20, 32, 64, 100, 127, 200, 240];

pub fn default_priority_addresses() -> Vec<DeviceAddress> {
    DEFAULT_PRIORITY_ADDRESSES
        .iter()
        .filter_map(|&value| DeviceAddress::new(value).ok())
        .collect()
}

/// One read attempt in the probe matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub function: FunctionCode,
    pub start: u16,
    #[serde(default = "default_probe_count")]
    pub count: u16,
}

fn default_probe_count() -> u16 {
    1
}

impl ProbeSpec {
    pub const fn new(function: FunctionCode, start: u16, count: u16) -> Self {
        Self {
            function,
            start,
            count,
        }
    }

    pub fn key(&self) -> ProbeKey {
        ProbeKey {
            function: self.function,
            start: self.start,
        }
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} x{}",
            self.function.name(),
            self.start,
            self.count
        )
    }
}

/// The matrix used when nothing else is configured: the registers field
/// devices most commonly answer on, holding registers first.
pub fn default_probe_matrix() -> Vec<ProbeSpec> {
    use FunctionCode::*;

    vec![
        ProbeSpec::new(ReadHoldingRegisters, 0, 1),
        ProbeSpec::new(ReadHoldingRegisters, 1, 1),
        ProbeSpec::new(ReadHoldingRegisters, 4, 1),
        ProbeSpec::new(ReadHoldingRegisters, 100, 1),
        ProbeSpec::new(ReadHoldingRegisters, 1000, 1),
        ProbeSpec::new(ReadInputRegisters, 0, 1),
        ProbeSpec::new(ReadInputRegisters, 1, 1),
        ProbeSpec::new(ReadInputRegisters, 30, 1),
        ProbeSpec::new(ReadCoils, 0, 1),
        ProbeSpec::new(ReadCoils, 10, 1),
        ProbeSpec::new(ReadDiscreteInputs, 0, 1),
        ProbeSpec::new(ReadDiscreteInputs, 10, 1),
    ]
}

/// Identifies a captured sample, rendered as `Func3_Reg0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeKey {
    pub function: FunctionCode,
    pub start: u16,
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func{}_Reg{}", self.function.code(), self.start)
    }
}

impl Serialize for ProbeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Decoded data of a successful read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Bits(bits) => bits.len(),
            Payload::Words(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bits(bits) => write!(f, "{bits:?}"),
            Payload::Words(words) => write!(f, "{words:?}"),
        }
    }
}

/// Outcome of one [`ProbeSpec`] against one address.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub spec: ProbeSpec,
    pub outcome: Result<Payload, TransportError>,
}

impl ProbeResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.outcome.as_ref().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub key: ProbeKey,
    pub payload: Payload,
}

/// Aggregated view of everything the probe matrix learned about one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReport {
    pub address: DeviceAddress,
    pub found: bool,
    /// Functions that answered at least once, in order of first success.
    pub supported_functions: Vec<FunctionCode>,
    /// Payloads of every successful probe, in matrix order.
    pub samples: Vec<Sample>,
}

impl DeviceReport {
    /// Fold a complete set of probe results into a report.
    pub fn from_results(address: DeviceAddress, results: &[ProbeResult]) -> Self {
        let mut supported_functions = Vec::new();
        let mut samples: Vec<Sample> = Vec::new();

        for result in results {
            let Some(payload) = result.payload() else {
                continue;
            };

            if !supported_functions.contains(&result.spec.function) {
                supported_functions.push(result.spec.function);
            }

            // A repeated key keeps its slot but shows the latest payload
            let key = result.spec.key();
            match samples.iter_mut().find(|sample| sample.key == key) {
                Some(sample) => sample.payload = payload.clone(),
                None => samples.push(Sample {
                    key,
                    payload: payload.clone(),
                }),
            }
        }

        Self {
            address,
            found: !supported_functions.is_empty(),
            supported_functions,
            samples,
        }
    }

    /// The first `limit` samples, as shown to the operator.
    pub fn display_samples(&self, limit: usize) -> &[Sample] {
        &self.samples[..self.samples.len().min(limit)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_function_codes_round_trip_through_u8() {
        for function in FunctionCode::iter() {
            assert_eq!(FunctionCode::try_from(function.code()).ok(), Some(function));
        }
        assert!(FunctionCode::try_from(5).is_err());
        assert!(FunctionCode::try_from(0).is_err());
    }

    #[test]
    fn test_function_name_lookup() {
        assert_eq!(function_name(1), "Read Coils");
        assert_eq!(function_name(4), "Read Input Registers");
        assert_eq!(function_name(5), "Write Single Coil");
        assert_eq!(function_name(6), "Write Single Register");
        assert_eq!(function_name(43), "Function 43");
    }

    #[test]
    fn test_device_address_bounds() {
        assert!(DeviceAddress::new(0).is_err());
        assert!(DeviceAddress::new(248).is_err());
        assert_eq!(DeviceAddress::new(1).map(u8::from), Ok(1));
        assert_eq!(DeviceAddress::new(247).map(u8::from), Ok(247));
    }

    #[test]
    fn test_default_matrix_is_read_only() {
        let matrix = default_probe_matrix();
        assert_eq!(matrix.len(), 12);
        for function in FunctionCode::iter() {
            assert!(matrix.iter().any(|spec| spec.function == function));
        }
        assert!(matrix.iter().all(|spec| (1..=4).contains(&spec.function.code())));
    }

    #[test]
    fn test_probe_key_format() {
        let spec = ProbeSpec::new(FunctionCode::ReadHoldingRegisters, 100, 1);
        assert_eq!(spec.key().to_string(), "Func3_Reg100");
    }

    #[test]
    fn test_payload_display() {
        assert_eq!(Payload::Words(vec![1, 513]).to_string(), "[1, 513]");
        assert_eq!(Payload::Bits(vec![true, false]).to_string(), "[true, false]");
        assert!(Payload::Words(Vec::new()).is_empty());
    }

    #[test]
    fn test_display_samples_caps_output() {
        let address = DeviceAddress::new(3).unwrap();
        let results = (0..5)
            .map(|start| ProbeResult {
                spec: ProbeSpec::new(FunctionCode::ReadInputRegisters, start, 1),
                outcome: Ok(Payload::Words(vec![start])),
            })
            .collect::<Vec<_>>();

        let report = DeviceReport::from_results(address, &results);
        assert_eq!(report.samples.len(), 5);
        assert_eq!(report.display_samples(3).len(), 3);
        assert_eq!(report.display_samples(3)[2].key.to_string(), "Func4_Reg2");
        assert_eq!(report.display_samples(10).len(), 5);
    }

    #[test]
    fn test_repeated_key_keeps_slot_with_latest_payload() {
        let ok = |function, start, count, payload| ProbeResult {
            spec: ProbeSpec::new(function, start, count),
            outcome: Ok(payload),
        };
        let results = vec![
            ok(FunctionCode::ReadHoldingRegisters, 0, 1, Payload::Words(vec![1])),
            ok(FunctionCode::ReadCoils, 0, 1, Payload::Bits(vec![true])),
            ok(FunctionCode::ReadHoldingRegisters, 0, 2, Payload::Words(vec![1, 2])),
        ];

        let report = DeviceReport::from_results(DeviceAddress::new(9).unwrap(), &results);

        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.samples[0].key.to_string(), "Func3_Reg0");
        assert_eq!(report.samples[0].payload, Payload::Words(vec![1, 2]));
        assert_eq!(report.samples[1].key.to_string(), "Func1_Reg0");
    }
}
