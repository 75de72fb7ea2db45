//! Protocol modules, one per Pokit service.

pub mod calibration;
pub mod data_logger;
pub mod device_info;
pub mod dso;
pub mod generic_access;
pub mod multimeter;
pub mod status;

pub use calibration::{CalibrationEvent, CalibrationService};
pub use data_logger::{
    DataLoggerEvent, DataLoggerService, DataLoggerSettings, LoggerCommand, LoggerMetadata,
    LoggerMode, LoggerStatus,
};
pub use device_info::{DeviceInfo, DeviceInfoEvent, DeviceInfoService};
pub use dso::{DsoCommand, DsoEvent, DsoMetadata, DsoMode, DsoService, DsoSettings, DsoStatus};
pub use generic_access::{GenericAccessEvent, GenericAccessService};
pub use multimeter::{MeterStatus, MultimeterEvent, MultimeterService, MultimeterSettings, Reading};
pub use status::{
    BatteryStatus, ButtonStatus, ChargingStatus, DeviceCharacteristics, DeviceStatus, Status,
    StatusEvent, StatusService, SwitchPosition, TorchStatus,
};
