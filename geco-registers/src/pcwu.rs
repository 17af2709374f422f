//! Hewalex PCWU heat-pump register tables.
//!
//! Status block: registers 100..150. Config block: registers 300..350, of
//! which 300..324 are modeled; the rest pass through writes untouched.

use crate::block::Block;
use crate::definition::{EnumOption, RegisterDefinition as Def, ValueKind};

const TENTHS: ValueKind = ValueKind::Scaled { divisor: 10 };
const S: Block = Block::Status;
const C: Block = Block::Config;

const fn opt(code: u16, label: &'static str) -> EnumOption {
    EnumOption { code, label }
}

pub const WAITING_STATUS: &[EnumOption] = &[opt(0, "Available"), opt(2, "Disabled")];
pub const HEATER_POWER: &[EnumOption] =
    &[opt(0, "Off"), opt(1, "Low"), opt(2, "Medium"), opt(3, "High")];
pub const CONTROLLING_SENSOR: &[EnumOption] = &[opt(0, "T2"), opt(1, "T3"), opt(2, "T7")];
pub const WATER_PUMP_MODE: &[EnumOption] = &[opt(0, "Continuous"), opt(1, "Synchronous")];
pub const FAN_MODE: &[EnumOption] = &[opt(0, "Max"), opt(1, "Min"), opt(2, "DayNight")];
pub const CIRC_PUMP_MODE: &[EnumOption] = &[opt(0, "Intermittent"), opt(1, "Continuous")];

pub static STATUS: &[Def] = &[
    // Controller clock, one byte per field.
    Def::byte(S, "Year", 0, ValueKind::Offset(2000)),
    Def::byte(S, "Month", 1, ValueKind::Unsigned),
    Def::byte(S, "Day", 2, ValueKind::Unsigned),
    Def::byte(S, "Weekday", 3, ValueKind::Unsigned),
    Def::byte(S, "Hour", 4, ValueKind::Unsigned),
    Def::byte(S, "Minute", 5, ValueKind::Unsigned),
    Def::byte(S, "Second", 6, ValueKind::Unsigned),
    Def::word(S, "T1", 4, TENTHS).unit("°C").describe("Ambient temperature"),
    Def::word(S, "T2", 5, TENTHS).unit("°C").describe("Tank bottom temperature"),
    Def::word(S, "T3", 6, TENTHS).unit("°C").describe("Tank top temperature"),
    Def::word(S, "T4", 7, TENTHS).unit("°C").describe("Solid fuel boiler temperature"),
    Def::word(S, "T5", 8, TENTHS).unit("°C").describe("Void sensor"),
    Def::word(S, "T6", 9, TENTHS).unit("°C").describe("Water inlet temperature"),
    Def::word(S, "T7", 10, TENTHS).unit("°C").describe("Water outlet temperature"),
    Def::word(S, "T8", 11, TENTHS).unit("°C").describe("Evaporator temperature"),
    Def::word(S, "T9", 12, TENTHS).unit("°C").describe("Before compressor temperature"),
    Def::word(S, "T10", 13, TENTHS).unit("°C").describe("After compressor temperature"),
    Def::word(S, "FanON", 14, ValueKind::Flag { mask: 0x0001 }),
    Def::word(S, "CirculationPumpON", 14, ValueKind::Flag { mask: 0x0002 }),
    Def::word(S, "HeatPumpON", 14, ValueKind::Flag { mask: 0x0004 }),
    Def::word(S, "CompressorON", 14, ValueKind::Flag { mask: 0x0008 }),
    Def::word(S, "HeaterEON", 14, ValueKind::Flag { mask: 0x0010 }),
    Def::word(S, "IsManual", 15, ValueKind::Bool).describe("Manual mode active"),
    Def::word(S, "EV1", 16, ValueKind::Unsigned)
        .unit("steps")
        .describe("Expansion valve position"),
    Def::word(S, "WaitingStatus", 17, ValueKind::Enum(WAITING_STATUS)),
];

pub static CONFIG: &[Def] = &[
    Def::word(C, "InstallationScheme", 0, ValueKind::Unsigned).range(1.0, 9.0),
    Def::word(C, "HeatPumpEnabled", 1, ValueKind::Bool).writable(),
    Def::word(C, "HeaterEEnabled", 2, ValueKind::Bool).writable(),
    Def::word(C, "HeaterEPowerLimit", 3, ValueKind::Enum(HEATER_POWER)).writable(),
    Def::word(C, "TapWaterSensor", 4, ValueKind::Enum(CONTROLLING_SENSOR))
        .writable()
        .describe("Sensor controlling the tap water setpoint"),
    Def::word(C, "TapWaterTemp", 5, TENTHS)
        .writable()
        .range(10.0, 60.0)
        .unit("°C")
        .describe("Target temperature"),
    Def::word(C, "TapWaterHysteresis", 6, TENTHS)
        .writable()
        .range(2.0, 10.0)
        .unit("°C")
        .describe("Start-up hysteresis"),
    Def::word(C, "AmbientMinTemp", 7, TENTHS)
        .writable()
        .range(-10.0, 10.0)
        .unit("°C"),
    Def::time_program(C, "TimeProgramHPM_F", 8).writable().describe("Monday to Friday"),
    Def::time_program(C, "TimeProgramHPSat", 10).writable().describe("Saturday"),
    Def::time_program(C, "TimeProgramHPSun", 12).writable().describe("Sunday"),
    Def::word(C, "AntiFreezingEnabled", 14, ValueKind::Bool).writable(),
    Def::word(C, "WaterPumpOperationMode", 15, ValueKind::Enum(WATER_PUMP_MODE)).writable(),
    Def::word(C, "FanOperationMode", 16, ValueKind::Enum(FAN_MODE)).writable(),
    Def::word(C, "DefrostingInterval", 17, ValueKind::Unsigned)
        .writable()
        .range(30.0, 90.0)
        .unit("min"),
    Def::word(C, "DefrostingStartTemp", 18, TENTHS)
        .writable()
        .range(-30.0, 0.0)
        .unit("°C"),
    Def::word(C, "DefrostingStopTemp", 19, TENTHS)
        .writable()
        .range(2.0, 30.0)
        .unit("°C"),
    Def::word(C, "DefrostingMaxTime", 20, ValueKind::Unsigned)
        .writable()
        .range(1.0, 12.0)
        .unit("min"),
    Def::word(C, "ExtControllerHPOFF", 21, ValueKind::Bool)
        .writable()
        .describe("External heat pump deactivation"),
    Def::word(C, "CircPumpMinTemp", 22, TENTHS)
        .writable()
        .range(20.0, 60.0)
        .unit("°C"),
    Def::word(C, "CircPumpMode", 23, ValueKind::Enum(CIRC_PUMP_MODE)).writable(),
];
