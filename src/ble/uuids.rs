//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for Pokit device communication.

use uuid::Uuid;

// Generic Access Service (Standard BLE)
/// Standard BLE Generic Access Service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1800_0000_1000_8000_00805f9b34fb);
/// Device Name characteristic UUID.
pub const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x0000_2a00_0000_1000_8000_00805f9b34fb);
/// Appearance characteristic UUID.
pub const APPEARANCE_UUID: Uuid = Uuid::from_u128(0x0000_2a01_0000_1000_8000_00805f9b34fb);

// Device Information Service (Standard BLE)
/// Standard BLE Device Information Service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb);
/// Manufacturer Name characteristic UUID.
pub const MANUFACTURER_NAME_UUID: Uuid = Uuid::from_u128(0x0000_2a29_0000_1000_8000_00805f9b34fb);
/// Model Number characteristic UUID.
pub const MODEL_NUMBER_UUID: Uuid = Uuid::from_u128(0x0000_2a24_0000_1000_8000_00805f9b34fb);
/// Serial Number characteristic UUID.
pub const SERIAL_NUMBER_UUID: Uuid = Uuid::from_u128(0x0000_2a25_0000_1000_8000_00805f9b34fb);
/// Firmware Revision characteristic UUID.
pub const FIRMWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x0000_2a26_0000_1000_8000_00805f9b34fb);
/// Hardware Revision characteristic UUID.
pub const HARDWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x0000_2a27_0000_1000_8000_00805f9b34fb);
/// Software Revision characteristic UUID.
pub const SOFTWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x0000_2a28_0000_1000_8000_00805f9b34fb);

// Status Service (Pokit Custom). The service UUID differs per product.
/// Pokit Meter Status Service UUID.
pub const STATUS_SERVICE_UUID_METER: Uuid =
    Uuid::from_u128(0x57d3a771_267c_4394_8872_78223e92aec4);
/// Pokit Pro Status Service UUID.
pub const STATUS_SERVICE_UUID_PRO: Uuid = Uuid::from_u128(0x57d3a771_267c_4394_8872_78223e92aec5);
/// Device Characteristics characteristic UUID (Read).
pub const DEVICE_CHARACTERISTICS_UUID: Uuid =
    Uuid::from_u128(0x6974f5e5_0e54_45c3_97dd_29e4b5fb0849);
/// Status characteristic UUID (Read, Notify on Pokit Pro).
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x3dba36e1_6120_4706_8dfd_ed9c16e569b6);
/// Device name characteristic UUID (Read, Write).
pub const NAME_UUID: Uuid = Uuid::from_u128(0x7f0375de_077e_4555_8f78_800494509cc3);
/// Flash LED characteristic UUID (Write).
pub const FLASH_LED_UUID: Uuid = Uuid::from_u128(0xec9bb1f3_05a9_4277_8dd0_60a7896f0d6e);
/// Torch characteristic UUID (Read, Write, Notify; Pokit Pro only).
pub const TORCH_UUID: Uuid = Uuid::from_u128(0xaaf3f6d5_43d4_4a83_9510_dff3d858d4cc);
/// Button Press characteristic UUID (Read, Notify; Pokit Pro only).
pub const BUTTON_PRESS_UUID: Uuid = Uuid::from_u128(0x8fe5b5a9_b5b4_4a7b_8ff2_87224b970f89);

// Multimeter Service (Pokit Custom)
/// Multimeter Service UUID.
pub const MULTIMETER_SERVICE_UUID: Uuid = Uuid::from_u128(0xe7481d2f_5781_442e_bb9a_fd4e3441dadc);
/// Multimeter Settings characteristic UUID (Write).
pub const MULTIMETER_SETTINGS_UUID: Uuid = Uuid::from_u128(0x53dc9a7a_bc19_4280_b76b_002d0e23b078);
/// Multimeter Reading characteristic UUID (Read, Notify).
pub const MULTIMETER_READING_UUID: Uuid = Uuid::from_u128(0x047d3559_8bee_423a_b229_4417fa603b90);

// DSO Service (Pokit Custom)
/// Digital Storage Oscilloscope Service UUID.
pub const DSO_SERVICE_UUID: Uuid = Uuid::from_u128(0x1569801e_1425_4a7a_b617_a4f4ed719de6);
/// DSO Settings characteristic UUID (Write).
pub const DSO_SETTINGS_UUID: Uuid = Uuid::from_u128(0xa81af1b6_b8b3_4244_8859_3da368d2be39);
/// DSO Metadata characteristic UUID (Read, Notify).
pub const DSO_METADATA_UUID: Uuid = Uuid::from_u128(0x970f00ba_f46f_4825_96a8_153a5cd0cda9);
/// DSO Reading characteristic UUID (Read, Notify).
pub const DSO_READING_UUID: Uuid = Uuid::from_u128(0x98e14f8e_536e_4f24_b4f4_1debfed0a99e);

// Data Logger Service (Pokit Custom)
/// Data Logger Service UUID.
pub const DATA_LOGGER_SERVICE_UUID: Uuid = Uuid::from_u128(0xa5ff3566_1fd8_4e10_8362_590a578a4121);
/// Data Logger Settings characteristic UUID (Write).
pub const DATA_LOGGER_SETTINGS_UUID: Uuid =
    Uuid::from_u128(0x5f97c62b_a83b_46c6_b9cd_cac59e130a78);
/// Data Logger Metadata characteristic UUID (Read, Notify).
pub const DATA_LOGGER_METADATA_UUID: Uuid =
    Uuid::from_u128(0x9acada2e_3936_430b_a8f7_da407d97ca6e);
/// Data Logger Reading characteristic UUID (Read, Notify).
pub const DATA_LOGGER_READING_UUID: Uuid = Uuid::from_u128(0x3c669dab_fc86_411c_9498_4f9415049cc0);

// Calibration Service (Pokit Custom)
/// Calibration Service UUID.
pub const CALIBRATION_SERVICE_UUID: Uuid = Uuid::from_u128(0x6f53be2f_f16f_4c40_a8c4_1d8e1d9a6b4c);
/// Calibration Temperature characteristic UUID (Write).
pub const CALIBRATION_TEMPERATURE_UUID: Uuid =
    Uuid::from_u128(0x0cd0f713_f5aa_4572_9e23_f8049f6bcaaa);

/// Human-readable name of a known service, for logging.
pub fn service_to_string(uuid: &Uuid) -> Option<&'static str> {
    let name = match *uuid {
        u if u == GENERIC_ACCESS_SERVICE_UUID => "Generic Access",
        u if u == DEVICE_INFO_SERVICE_UUID => "Device Info",
        u if u == STATUS_SERVICE_UUID_METER || u == STATUS_SERVICE_UUID_PRO => "Status",
        u if u == MULTIMETER_SERVICE_UUID => "Multimeter",
        u if u == DSO_SERVICE_UUID => "DSO",
        u if u == DATA_LOGGER_SERVICE_UUID => "Data Logger",
        u if u == CALIBRATION_SERVICE_UUID => "Calibration",
        _ => return None,
    };
    Some(name)
}

/// Human-readable name of a known characteristic, for logging.
///
/// Characteristic UUIDs are only unique within a service, so the service is
/// part of the lookup.
pub fn characteristic_to_string(service: &Uuid, characteristic: &Uuid) -> Option<&'static str> {
    let table: &[(Uuid, &str)] = match service_to_string(service)? {
        "Generic Access" => &[(DEVICE_NAME_UUID, "Device Name"), (APPEARANCE_UUID, "Appearance")],
        "Device Info" => &[
            (MANUFACTURER_NAME_UUID, "Manufacturer Name"),
            (MODEL_NUMBER_UUID, "Model Number"),
            (SERIAL_NUMBER_UUID, "Serial Number"),
            (FIRMWARE_REVISION_UUID, "Firmware Revision"),
            (HARDWARE_REVISION_UUID, "Hardware Revision"),
            (SOFTWARE_REVISION_UUID, "Software Revision"),
        ],
        "Status" => &[
            (DEVICE_CHARACTERISTICS_UUID, "Device Characteristics"),
            (STATUS_UUID, "Status"),
            (NAME_UUID, "Name"),
            (FLASH_LED_UUID, "Flash LED"),
            (TORCH_UUID, "Torch"),
            (BUTTON_PRESS_UUID, "Button Press"),
        ],
        "Multimeter" => &[
            (MULTIMETER_SETTINGS_UUID, "Settings"),
            (MULTIMETER_READING_UUID, "Reading"),
        ],
        "DSO" => &[
            (DSO_SETTINGS_UUID, "Settings"),
            (DSO_METADATA_UUID, "Metadata"),
            (DSO_READING_UUID, "Reading"),
        ],
        "Data Logger" => &[
            (DATA_LOGGER_SETTINGS_UUID, "Settings"),
            (DATA_LOGGER_METADATA_UUID, "Metadata"),
            (DATA_LOGGER_READING_UUID, "Reading"),
        ],
        "Calibration" => &[(CALIBRATION_TEMPERATURE_UUID, "Temperature")],
        _ => return None,
    };
    table
        .iter()
        .find(|(uuid, _)| uuid == characteristic)
        .map(|(_, name)| *name)
}
