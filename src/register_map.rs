//! # Register Map
//!
//! Static description of what a poll cycle reads from a given equipment
//! variant: one address range per Modbus block plus a table of named
//! addresses inside each block.
//!
//! Named addresses are absolute protocol addresses. A [`crate::PollResult`]
//! block starts at its range's `start`, so [`RegisterMap::index_of`]
//! subtracts the start before indexing.
//!
//! ## Variants
//!
//! | Variant | Coils | Discrete inputs | Input registers | Holding registers |
//! |---------|-------|-----------------|-----------------|-------------------|
//! | Gen3 | 0 / 6 | 9 / 25 | 0 / 33 | 0 / 69 |
//! | IQC | 0 / 6 | 9 / 27 | 0 / 33 | 0 / 43 |
//!
//! ```rust
//! use heru_modbus::{Block, RegisterMap};
//!
//! let map = RegisterMap::gen3();
//! assert_eq!(map.address_of(Block::DiscreteInputs, "FIRE_ALARM"), Some(9));
//! assert_eq!(map.index_of(Block::DiscreteInputs, "FIRE_ALARM"), Some(0));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModbusError;

/// Modbus memory block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Coils,
    DiscreteInputs,
    InputRegisters,
    HoldingRegisters,
}

impl Block {
    /// All blocks in read order
    pub const ALL: [Block; 4] = [
        Block::Coils,
        Block::DiscreteInputs,
        Block::InputRegisters,
        Block::HoldingRegisters,
    ];

    /// Whether the block holds single bits
    pub fn is_bit_block(self) -> bool {
        matches!(self, Block::Coils | Block::DiscreteInputs)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Block::Coils => "coils",
            Block::DiscreteInputs => "discrete inputs",
            Block::InputRegisters => "input registers",
            Block::HoldingRegisters => "holding registers",
        };
        f.write_str(name)
    }
}

/// Contiguous address range `[start, start + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterRange {
    pub start: u16,
    pub count: u16,
}

impl RegisterRange {
    pub const fn new(start: u16, count: u16) -> Self {
        Self { start, count }
    }

    /// One past the last address
    #[inline]
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && (address as u32) < self.end()
    }
}

/// Equipment generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Heru with Gen3 remote
    Gen3,
    /// Heru with IQC touch controller
    Iqc,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Gen3 => f.write_str("gen3"),
            Variant::Iqc => f.write_str("iqc"),
        }
    }
}

impl FromStr for Variant {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gen3" => Ok(Variant::Gen3),
            "iqc" => Ok(Variant::Iqc),
            other => Err(ModbusError::configuration(format!(
                "Unknown variant '{}' (expected gen3 or iqc)",
                other
            ))),
        }
    }
}

// ============================================================================
// Named address tables
// ============================================================================

const BASE_COILS: &[(&str, u16)] = &[
    ("UNIT_ON", 0),
    ("OVERPRESSURE", 1),
    ("BOOST", 2),
    ("AWAY", 3),
    ("CLEAR_ALARMS", 4),
    ("RESET_FILTER_TIMER", 5),
];

const BASE_DISCRETE_INPUTS: &[(&str, u16)] = &[
    ("FIRE_ALARM_SWITCH", 0),
    ("BOOST_SWITCH", 1),
    ("OVERPRESSURE_SWITCH", 2),
    ("AUX_SWITCH", 3),
    ("FIRE_ALARM", 9),
    ("ROTOR_ALARM", 10),
    ("FREEZE_ALARM", 12),
    ("LOW_SUPPLY_ALARM", 13),
    ("LOW_ROTOR_TEMPERATURE_ALARM", 14),
    ("TEMP_SENSOR_OPEN_CIRCUIT_ALARM", 17),
    ("TEMP_SENSOR_SHORT_CIRCUIT_ALARM", 18),
    ("PULSER_ALARM", 19),
    ("SUPPLY_FAN_ALARM", 20),
    ("EXHAUST_FAN_ALARM", 21),
    ("SUPPLY_FILTER_ALARM", 22),
    ("EXHAUST_FILTER_ALARM", 23),
    ("FILTER_TIMER_ALARM", 24),
    ("FREEZE_PROTECTION_B_LEVEL", 25),
    ("FREEZE_PROTECTION_A_LEVEL", 26),
    ("STARTUP_1ST_PHASE", 27),
    ("STARTUP_2ND_PHASE", 28),
    ("HEATING", 29),
    ("RECOVERING_HEAT_COLD", 30),
    ("COOLING", 31),
    ("CO2_BOOST", 32),
    ("RH_BOOST", 33),
];

const BASE_INPUT_REGISTERS: &[(&str, u16)] = &[
    ("COMPONENT_ID", 0),
    ("OUTDOOR_TEMPERATURE", 1),
    ("SUPPLY_AIR_TEMPERATURE", 2),
    ("EXTRACT_AIR_TEMPERATURE", 3),
    ("EXHAUST_AIR_TEMPERATURE", 4),
    ("WATER_TEMPERATURE", 5),
    ("HEAT_RECOVERY_TEMPERATURE", 6),
    ("ROOM_TEMPERATURE", 7),
    ("SUPPLY_PRESSURE", 11),
    ("EXHAUST_PRESSURE", 12),
    ("SENSORS_OPEN", 17),
    ("SENSORS_SHORTED", 18),
    ("FILTER_DAYS_LEFT", 19),
    ("CURRENT_WEEKTIMER_PROGRAM", 20),
    ("CURRENT_SUPPLY_FAN_STEP", 22),
    ("CURRENT_EXHAUST_FAN_STEP", 23),
    ("SUPPLY_FAN_POWER", 24),
    ("EXHAUST_FAN_POWER", 25),
    ("SUPPLY_FAN_SPEED", 26),
    ("EXHAUST_FAN_SPEED", 27),
    ("HEATING_POWER", 28),
    ("HEAT_COLD_RECOVERY_POWER", 29),
    ("COOLING_POWER", 30),
    ("SUPPLY_FAN_CONTROL_VOLTAGE", 31),
    ("EXHAUST_FAN_CONTROL_VOLTAGE", 32),
];

const BASE_HOLDING_REGISTERS: &[(&str, u16)] = &[
    ("SETPOINT_TEMPERATURE", 1),
    ("SUPPLY_FAN_SPEED", 2),
    ("EXHAUST_FAN_SPEED", 3),
    ("MIN_SUPPLY_FAN_SPEED", 4),
    ("MAX_SUPPLY_FAN_SPEED", 5),
    ("REGULATION_MODE", 11),
];

const GEN3_INPUT_REGISTERS: &[(&str, u16)] = &[
    ("RELATIVE_HUMIDITY", 13),
    ("CARBON_DIOXIDE", 14),
    ("CURRENT_FAN_SPEED", 21),
];

const GEN3_HOLDING_REGISTERS: &[(&str, u16)] = &[
    ("USER_FAN_SPEED", 0),
    ("HEATER_ENABLED", 50),
    ("WEEK_TIMER_ENABLED", 68),
];

const IQC_DISCRETE_INPUTS: &[(&str, u16)] = &[
    ("PUMP_ALARM_HEATING", 34),
    ("PUMP_ALARM_COOLING", 35),
];

// Address 33 lies past the 0/33 input range, so it is named but never polled
const IQC_INPUT_REGISTERS: &[(&str, u16)] = &[("CHANGEOVER_ACTIVE", 33)];

// The heater flags sit past the 0/43 holding range; writable, never polled
const IQC_HOLDING_REGISTERS: &[(&str, u16)] = &[
    ("SETPOINT_TEMPERATURE_ECONOMY", 0),
    ("PREHEATER_ENABLED", 63),
    ("HEATER_ENABLED", 66),
];

/// Poll ranges plus named addresses for one equipment variant.
///
/// Fixed at construction and immutable for the lifetime of a poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    pub coils: RegisterRange,
    pub discrete_inputs: RegisterRange,
    pub input_registers: RegisterRange,
    pub holding_registers: RegisterRange,
    #[serde(default)]
    names: BTreeMap<Block, BTreeMap<String, u16>>,
}

impl RegisterMap {
    /// Create a map with the four ranges and no names
    pub fn new(
        coils: RegisterRange,
        discrete_inputs: RegisterRange,
        input_registers: RegisterRange,
        holding_registers: RegisterRange,
    ) -> Self {
        Self {
            coils,
            discrete_inputs,
            input_registers,
            holding_registers,
            names: BTreeMap::new(),
        }
    }

    /// Heru Gen3 remote
    pub fn gen3() -> Self {
        Self::new(
            RegisterRange::new(0, 6),
            RegisterRange::new(9, 25),
            RegisterRange::new(0, 33),
            RegisterRange::new(0, 69),
        )
        .with_names(Block::Coils, BASE_COILS)
        .with_names(Block::DiscreteInputs, BASE_DISCRETE_INPUTS)
        .with_names(Block::InputRegisters, BASE_INPUT_REGISTERS)
        .with_names(Block::InputRegisters, GEN3_INPUT_REGISTERS)
        .with_names(Block::HoldingRegisters, BASE_HOLDING_REGISTERS)
        .with_names(Block::HoldingRegisters, GEN3_HOLDING_REGISTERS)
    }

    /// Heru IQC touch controller
    pub fn iqc() -> Self {
        Self::new(
            RegisterRange::new(0, 6),
            RegisterRange::new(9, 27),
            RegisterRange::new(0, 33),
            RegisterRange::new(0, 43),
        )
        .with_names(Block::Coils, BASE_COILS)
        .with_names(Block::DiscreteInputs, BASE_DISCRETE_INPUTS)
        .with_names(Block::DiscreteInputs, IQC_DISCRETE_INPUTS)
        .with_names(Block::InputRegisters, BASE_INPUT_REGISTERS)
        .with_names(Block::InputRegisters, IQC_INPUT_REGISTERS)
        .with_names(Block::HoldingRegisters, BASE_HOLDING_REGISTERS)
        .with_names(Block::HoldingRegisters, IQC_HOLDING_REGISTERS)
    }

    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::Gen3 => Self::gen3(),
            Variant::Iqc => Self::iqc(),
        }
    }

    /// Add or replace one named address
    pub fn with_name(mut self, block: Block, name: impl Into<String>, address: u16) -> Self {
        self.names.entry(block).or_default().insert(name.into(), address);
        self
    }

    /// Add a table of named addresses
    pub fn with_names(self, block: Block, table: &[(&str, u16)]) -> Self {
        table
            .iter()
            .fold(self, |map, &(name, address)| map.with_name(block, name, address))
    }

    /// Poll range for a block
    pub fn range(&self, block: Block) -> RegisterRange {
        match block {
            Block::Coils => self.coils,
            Block::DiscreteInputs => self.discrete_inputs,
            Block::InputRegisters => self.input_registers,
            Block::HoldingRegisters => self.holding_registers,
        }
    }

    /// Absolute address of a named field
    pub fn address_of(&self, block: Block, name: &str) -> Option<u16> {
        self.names.get(&block)?.get(name).copied()
    }

    /// Index of a named field inside the polled block, if it is polled at all
    pub fn index_of(&self, block: Block, name: &str) -> Option<usize> {
        let address = self.address_of(block, name)?;
        let range = self.range(block);
        range
            .contains(address)
            .then(|| (address - range.start) as usize)
    }

    /// Named addresses of a block in name order
    pub fn names(&self, block: Block) -> impl Iterator<Item = (&str, u16)> {
        self.names
            .get(&block)
            .into_iter()
            .flat_map(|table| table.iter().map(|(name, &address)| (name.as_str(), address)))
    }
}

/// Optional hardware the consumer may interpret.
///
/// Resolved once when a device is set up; the poller reads every configured
/// range regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub has_humidity_sensor: bool,
    pub has_co2_sensor: bool,
    pub has_water_heater: bool,
    pub has_room_sensor: bool,
    pub has_pressure_sensors: bool,
    pub has_power_meters: bool,
}

impl Capabilities {
    /// Factory defaults for a variant
    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::Gen3 => Self {
                has_humidity_sensor: true,
                has_co2_sensor: true,
                has_room_sensor: true,
                has_power_meters: true,
                ..Self::default()
            },
            Variant::Iqc => Self {
                has_water_heater: true,
                has_room_sensor: true,
                has_pressure_sensors: true,
                has_power_meters: true,
                ..Self::default()
            },
        }
    }

    pub fn with_humidity_sensor(mut self, enabled: bool) -> Self {
        self.has_humidity_sensor = enabled;
        self
    }

    pub fn with_co2_sensor(mut self, enabled: bool) -> Self {
        self.has_co2_sensor = enabled;
        self
    }

    pub fn with_water_heater(mut self, enabled: bool) -> Self {
        self.has_water_heater = enabled;
        self
    }

    pub fn with_room_sensor(mut self, enabled: bool) -> Self {
        self.has_room_sensor = enabled;
        self
    }

    pub fn with_pressure_sensors(mut self, enabled: bool) -> Self {
        self.has_pressure_sensors = enabled;
        self
    }

    pub fn with_power_meters(mut self, enabled: bool) -> Self {
        self.has_power_meters = enabled;
        self
    }

    /// Named input registers backed by enabled hardware
    pub fn input_register_fields(&self) -> Vec<&'static str> {
        let mut fields = vec![
            "OUTDOOR_TEMPERATURE",
            "SUPPLY_AIR_TEMPERATURE",
            "EXTRACT_AIR_TEMPERATURE",
            "EXHAUST_AIR_TEMPERATURE",
            "FILTER_DAYS_LEFT",
        ];
        if self.has_water_heater {
            fields.push("WATER_TEMPERATURE");
        }
        if self.has_room_sensor {
            fields.push("ROOM_TEMPERATURE");
        }
        if self.has_pressure_sensors {
            fields.extend(["SUPPLY_PRESSURE", "EXHAUST_PRESSURE"]);
        }
        if self.has_power_meters {
            fields.extend(["SUPPLY_FAN_POWER", "EXHAUST_FAN_POWER", "HEATING_POWER"]);
        }
        if self.has_humidity_sensor {
            fields.push("RELATIVE_HUMIDITY");
        }
        if self.has_co2_sensor {
            fields.push("CARBON_DIOXIDE");
        }
        fields
    }
}
