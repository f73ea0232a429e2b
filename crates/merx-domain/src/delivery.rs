//! Delivery-related value objects and the delivery stage machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DomainError;

/// A postal address with coordinates.
///
/// Valid iff street, city, and country are non-empty, latitude is within
/// [-90, 90] and longitude within [-180, 180].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    street: String,
    city: String,
    country: String,
    latitude: f64,
    longitude: f64,
}

impl Address {
    /// Construct a validated address.
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, DomainError> {
        let street = street.into();
        let city = city.into();
        let country = country.into();
        if street.trim().is_empty() {
            return Err(DomainError::InvalidAddress("street must not be empty".into()));
        }
        if city.trim().is_empty() {
            return Err(DomainError::InvalidAddress("city must not be empty".into()));
        }
        if country.trim().is_empty() {
            return Err(DomainError::InvalidAddress("country must not be empty".into()));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(DomainError::InvalidAddress(format!(
                "latitude {latitude} out of range [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(DomainError::InvalidAddress(format!(
                "longitude {longitude} out of range [-180, 180]"
            )));
        }
        Ok(Self {
            street,
            city,
            country,
            latitude,
            longitude,
        })
    }

    /// Street line.
    pub fn street(&self) -> &str {
        &self.street
    }

    /// City.
    pub fn city(&self) -> &str {
        &self.city
    }

    /// Country.
    pub fn country(&self) -> &str {
        &self.country
    }

    /// Latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Time window the delivery must happen in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPeriod {
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end; strictly after `start`.
    pub end: DateTime<Utc>,
}

impl DeliveryPeriod {
    /// Construct a period, rejecting `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        if end <= start {
            return Err(DomainError::InvalidDeliveryPeriod);
        }
        Ok(Self { start, end })
    }
}

/// Physical parameters of the parcel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    weight_kg: Decimal,
}

impl PackageInfo {
    /// Construct package info with a strictly positive weight.
    pub fn new(weight_kg: Decimal) -> Result<Self, DomainError> {
        if weight_kg <= Decimal::ZERO {
            return Err(DomainError::InvalidPackageWeight(weight_kg));
        }
        Ok(Self { weight_kg })
    }

    /// Parcel weight in kilograms.
    pub fn weight_kg(&self) -> Decimal {
        self.weight_kg
    }
}

/// Delivery priority requested by the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPriority {
    /// No explicit priority.
    #[default]
    Unspecified,
    /// Standard handling.
    Normal,
    /// Expedited handling.
    Urgent,
}

impl DeliveryPriority {
    /// Stable textual tag, used by the persisted schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPriority::Unspecified => "unspecified",
            DeliveryPriority::Normal => "normal",
            DeliveryPriority::Urgent => "urgent",
        }
    }

    /// Parse a persisted tag back into a priority.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "unspecified" => Some(DeliveryPriority::Unspecified),
            "normal" => Some(DeliveryPriority::Normal),
            "urgent" => Some(DeliveryPriority::Urgent),
            _ => None,
        }
    }
}

/// Who receives the parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientContacts {
    /// Recipient display name.
    pub name: String,
    /// Phone number, if shared.
    pub phone: Option<String>,
    /// Email, if shared.
    pub email: Option<String>,
}

/// Progress of the delivery hand-off, tracked inside [`DeliveryInfo`].
///
/// None → Requested → Assigned → InTransit → Delivered (or NotDelivered).
/// Once the courier is assigned, the delivery info is frozen and
/// re-addressing is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStage {
    /// Delivery has not been requested from the delivery service.
    #[default]
    None,
    /// Accepted by the delivery service, no courier yet.
    Requested,
    /// A courier was assigned.
    Assigned,
    /// Parcel is on its way.
    InTransit,
    /// Parcel arrived.
    Delivered,
    /// Delivery failed terminally.
    NotDelivered,
}

impl DeliveryStage {
    /// Whether the stage forbids further `update_delivery_info` calls.
    pub fn freezes_updates(&self) -> bool {
        matches!(
            self,
            DeliveryStage::Assigned | DeliveryStage::InTransit | DeliveryStage::Delivered
        )
    }

    /// Stable textual tag, used by the persisted schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStage::None => "none",
            DeliveryStage::Requested => "requested",
            DeliveryStage::Assigned => "assigned",
            DeliveryStage::InTransit => "in_transit",
            DeliveryStage::Delivered => "delivered",
            DeliveryStage::NotDelivered => "not_delivered",
        }
    }

    /// Parse a persisted tag back into a stage.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "none" => Some(DeliveryStage::None),
            "requested" => Some(DeliveryStage::Requested),
            "assigned" => Some(DeliveryStage::Assigned),
            "in_transit" => Some(DeliveryStage::InTransit),
            "delivered" => Some(DeliveryStage::Delivered),
            "not_delivered" => Some(DeliveryStage::NotDelivered),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the delivery service needs to move the parcel, plus the
/// dispatch state it reported back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    /// Where the parcel is picked up.
    pub pickup: Address,
    /// Where the parcel goes.
    pub destination: Address,
    /// Acceptable delivery window.
    pub period: DeliveryPeriod,
    /// Parcel parameters.
    pub package: PackageInfo,
    /// Requested priority.
    pub priority: DeliveryPriority,
    /// Recipient contacts, if shared.
    pub contacts: Option<RecipientContacts>,
    /// Dispatch progress reported by the delivery service.
    pub stage: DeliveryStage,
    /// Package id assigned by the delivery service once dispatched.
    pub package_id: Option<String>,
}

impl Address {
    /// Re-run the constructor checks on an existing address.
    ///
    /// Useful for values that arrived through deserialization and so
    /// bypassed [`Address::new`].
    pub fn validate(&self) -> Result<(), DomainError> {
        Self::new(
            self.street.clone(),
            self.city.clone(),
            self.country.clone(),
            self.latitude,
            self.longitude,
        )
        .map(|_| ())
    }
}

impl DeliveryInfo {
    /// Assemble delivery info from already-validated components.
    pub fn new(
        pickup: Address,
        destination: Address,
        period: DeliveryPeriod,
        package: PackageInfo,
        priority: DeliveryPriority,
        contacts: Option<RecipientContacts>,
    ) -> Self {
        Self {
            pickup,
            destination,
            period,
            package,
            priority,
            contacts,
            stage: DeliveryStage::None,
            package_id: None,
        }
    }

    /// Re-run the component constructor checks.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.pickup.validate()?;
        self.destination.validate()?;
        DeliveryPeriod::new(self.period.start, self.period.end)?;
        PackageInfo::new(self.package.weight_kg)?;
        Ok(())
    }
}
