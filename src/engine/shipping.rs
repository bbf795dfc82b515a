//! # Shipping Cost Engine
//!
//! Pure quoting: destination + cart subtotal in, [`ShippingQuote`] out.
//! Quotes are computed fresh on every call and never cached by address.
//!
//! ## Rules (in order)
//!
//! 1. **Serviceability**: the destination province must be in the Java
//!    macro-region, otherwise the quote is not serviceable and costs nothing.
//! 2. **Distance**: haversine from the warehouse when coordinates are given;
//!    otherwise the city table (substring match), otherwise a regional average.
//! 3. **Tier**: near zone is free above the threshold and a flat fee below it;
//!    mid zone is a flat fee; beyond that each started band adds an increment.
//! 4. **Transit estimate**: fixed distance bands.

use serde::{Deserialize, Serialize};

use super::pricing::format_rupiah;
use crate::models::Rupiah;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Fee schedule and warehouse origin.
#[derive(Debug, Clone)]
pub struct ShippingRates {
    pub origin: Coordinates,
    pub free_shipping_threshold: Rupiah,
    pub near_zone_km: f64,
    pub mid_zone_km: f64,
    pub near_fee: Rupiah,
    pub mid_fee: Rupiah,
    pub band_km: f64,
    pub band_increment: Rupiah,
    /// Distance assumed for cities missing from the table.
    pub regional_average_km: f64,
}

impl Default for ShippingRates {
    fn default() -> Self {
        Self {
            // Jakarta warehouse
            origin: Coordinates {
                lat: -6.2088,
                lng: 106.8456,
            },
            free_shipping_threshold: 2_500_000,
            near_zone_km: 30.0,
            mid_zone_km: 80.0,
            near_fee: 15_000,
            mid_fee: 25_000,
            band_km: 50.0,
            band_increment: 10_000,
            regional_average_km: 200.0,
        }
    }
}

const SERVICEABLE_PROVINCES: &[&str] = &[
    "dki jakarta",
    "jakarta",
    "daerah khusus ibukota jakarta",
    "jawa barat",
    "west java",
    "jawa tengah",
    "central java",
    "di yogyakarta",
    "daerah istimewa yogyakarta",
    "yogyakarta",
    "jogja",
    "jawa timur",
    "east java",
    "banten",
];

/// Road distance in km from the Jakarta warehouse.
const CITY_DISTANCES_KM: &[(&str, f64)] = &[
    ("jakarta pusat", 5.0),
    ("jakarta", 12.0),
    ("tangerang selatan", 25.0),
    ("tangerang", 27.0),
    ("depok", 28.0),
    ("bekasi", 30.0),
    ("cikarang", 40.0),
    ("bogor", 55.0),
    ("karawang", 70.0),
    ("serang", 80.0),
    ("purwakarta", 95.0),
    ("cilegon", 100.0),
    ("sukabumi", 115.0),
    ("cianjur", 120.0),
    ("bandung", 150.0),
    ("cirebon", 220.0),
    ("tasikmalaya", 270.0),
    ("tegal", 320.0),
    ("pekalongan", 380.0),
    ("semarang", 450.0),
    ("magelang", 500.0),
    ("surakarta", 540.0),
    ("solo", 540.0),
    ("yogyakarta", 560.0),
    ("jogja", 560.0),
    ("madiun", 650.0),
    ("kediri", 720.0),
    ("surabaya", 780.0),
    ("malang", 840.0),
    ("jember", 960.0),
    ("banyuwangi", 1050.0),
];

// ============================================================================
// Quote Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceSource {
    Coordinates,
    CityTable,
    RegionalAverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ShippingTier {
    Free,
    Near,
    Mid,
    Extended { bands: u32 },
    NotServiceable,
}

impl ShippingTier {
    pub fn label(&self) -> String {
        match self {
            ShippingTier::Free => "FREE".to_string(),
            ShippingTier::Near => "NEAR".to_string(),
            ShippingTier::Mid => "MID".to_string(),
            ShippingTier::Extended { bands } => format!("EXTENDED+{bands}"),
            ShippingTier::NotServiceable => "NOT_SERVICEABLE".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitEstimate {
    pub min_days: i32,
    pub max_days: i32,
}

impl TransitEstimate {
    pub fn describe(&self) -> String {
        match (self.min_days, self.max_days) {
            (0, 0) => "same day".to_string(),
            (min, max) => format!("{min}-{max} days"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub distance_km: f64,
    pub distance_source: DistanceSource,
    pub tier: ShippingTier,
    pub cost: Rupiah,
    pub is_serviceable: bool,
    pub estimate: Option<TransitEstimate>,
    pub message: String,
}

/// Where the parcel is going.
#[derive(Debug, Clone, Copy)]
pub struct Destination<'a> {
    pub province: &'a str,
    pub city: &'a str,
    pub coordinates: Option<Coordinates>,
}

// ============================================================================
// Engine
// ============================================================================

/// Stateless quoting over a fixed fee schedule; safe to share across tasks.
#[derive(Debug, Clone, Default)]
pub struct ShippingEngine {
    rates: ShippingRates,
}

impl ShippingEngine {
    pub fn new(rates: ShippingRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &ShippingRates {
        &self.rates
    }

    pub fn is_serviceable(&self, province: &str) -> bool {
        let province = normalize(province);
        let province = province.strip_prefix("provinsi ").unwrap_or(&province);
        SERVICEABLE_PROVINCES.contains(&province)
    }

    pub fn quote(&self, destination: &Destination<'_>, subtotal: Rupiah) -> ShippingQuote {
        if !self.is_serviceable(destination.province) {
            return ShippingQuote {
                distance_km: 0.0,
                distance_source: DistanceSource::RegionalAverage,
                tier: ShippingTier::NotServiceable,
                cost: 0,
                is_serviceable: false,
                estimate: None,
                message: format!(
                    "Sorry, we do not deliver to {} yet",
                    destination.province.trim()
                ),
            };
        }

        let (raw_km, distance_source) = match destination.coordinates {
            Some(coords) => (haversine_km(self.rates.origin, coords), DistanceSource::Coordinates),
            None => city_distance_km(destination.city)
                .map(|km| (km, DistanceSource::CityTable))
                .unwrap_or((self.rates.regional_average_km, DistanceSource::RegionalAverage)),
        };
        let distance_km = round_km(raw_km);

        let (tier, cost) = self.price_distance(distance_km, subtotal);
        let estimate = transit_estimate(distance_km);
        let message = match tier {
            ShippingTier::Free => format!(
                "Free shipping, {} km away, arrives {}",
                distance_km,
                estimate.describe()
            ),
            _ => format!(
                "{} for {} km, arrives {}",
                format_rupiah(cost),
                distance_km,
                estimate.describe()
            ),
        };

        ShippingQuote {
            distance_km,
            distance_source,
            tier,
            cost,
            is_serviceable: true,
            estimate: Some(estimate),
            message,
        }
    }

    /// Tier and cost for an already-rounded distance.
    pub fn price_distance(&self, distance_km: f64, subtotal: Rupiah) -> (ShippingTier, Rupiah) {
        let rates = &self.rates;
        if distance_km <= rates.near_zone_km {
            if subtotal >= rates.free_shipping_threshold {
                (ShippingTier::Free, 0)
            } else {
                (ShippingTier::Near, rates.near_fee)
            }
        } else if distance_km <= rates.mid_zone_km {
            (ShippingTier::Mid, rates.mid_fee)
        } else {
            // Partial bands count as full bands.
            let bands = ((distance_km - rates.mid_zone_km) / rates.band_km).ceil() as u32;
            (
                ShippingTier::Extended { bands },
                rates.mid_fee + rates.band_increment * Rupiah::from(bands),
            )
        }
    }
}

// ============================================================================
// Distance Helpers
// ============================================================================

const EARTH_RADIUS_KM: f64 = 6371.0;

pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Table lookup. A table key contained in the input wins, longest first, so
/// "Jakarta Pusat" beats "Jakarta". Otherwise a truncated input counts only
/// when it is the prefix of exactly one key; ambiguous fragments like "ban"
/// fall through to the regional average.
pub fn city_distance_km(city: &str) -> Option<f64> {
    let city = normalize(city);
    if city.len() < 3 {
        return None;
    }
    let contained = CITY_DISTANCES_KM
        .iter()
        .filter(|(name, _)| city.contains(name))
        .max_by_key(|(name, _)| name.len());
    if let Some((_, km)) = contained {
        return Some(*km);
    }

    let mut completions = CITY_DISTANCES_KM
        .iter()
        .filter(|(name, _)| name.starts_with(city.as_str()));
    match (completions.next(), completions.next()) {
        (Some((_, km)), None) => Some(*km),
        _ => None,
    }
}

pub fn transit_estimate(distance_km: f64) -> TransitEstimate {
    let (min_days, max_days) = match distance_km {
        d if d <= 30.0 => (0, 0),
        d if d <= 80.0 => (1, 2),
        d if d <= 200.0 => (2, 3),
        d if d <= 400.0 => (3, 4),
        d if d <= 700.0 => (4, 5),
        _ => (5, 7),
    };
    TransitEstimate { min_days, max_days }
}

fn round_km(km: f64) -> f64 {
    (km * 10.0).round() / 10.0
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================
