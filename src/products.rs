//! Pokit products known to this crate.

use uuid::Uuid;

use crate::ble::uuids::{STATUS_SERVICE_UUID_METER, STATUS_SERVICE_UUID_PRO};

/// Hardware model of the attached device.
///
/// Fixed for the lifetime of a connection; selects which range tables apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ProductVariant {
    /// Pokit Meter.
    PokitMeter = 0,
    /// Pokit Pro.
    PokitPro = 1,
}

impl ProductVariant {
    /// Identify the product from the service UUIDs a device exposes.
    ///
    /// Each product advertises its own Status service UUID; a device that
    /// exposes neither is not a supported product.
    pub fn from_service_uuids<'a>(uuids: impl IntoIterator<Item = &'a Uuid>) -> Option<Self> {
        uuids.into_iter().find_map(|uuid| {
            if *uuid == STATUS_SERVICE_UUID_METER {
                Some(Self::PokitMeter)
            } else if *uuid == STATUS_SERVICE_UUID_PRO {
                Some(Self::PokitPro)
            } else {
                None
            }
        })
    }

    /// UUID of this product's Status service.
    pub fn status_service_uuid(&self) -> Uuid {
        match self {
            Self::PokitMeter => STATUS_SERVICE_UUID_METER,
            Self::PokitPro => STATUS_SERVICE_UUID_PRO,
        }
    }

    /// Check if this is a Pokit Pro.
    pub fn is_pro(&self) -> bool {
        matches!(self, Self::PokitPro)
    }
}

impl std::fmt::Display for ProductVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PokitMeter => write!(f, "Pokit Meter"),
            Self::PokitPro => write!(f, "Pokit Pro"),
        }
    }
}
