use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::access::geo::{parse_degrees, GeoPoint, InvalidInput};
use crate::access::unlock::OwnerContact;

/// Identifier wrapper for listed estates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EstateId(pub String);

impl EstateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Listing as published by the estates feed.
///
/// The feed ships coordinates either as numbers or numeric strings and
/// spells the image field `imagerUrl`; both are accepted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estate {
    #[serde(deserialize_with = "string_or_number")]
    pub id: EstateId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "degrees")]
    pub latitude: f64,
    #[serde(deserialize_with = "degrees")]
    pub longitude: f64,
    #[serde(rename = "imagerUrl", alias = "imageUrl", default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_phone: Option<String>,
}

impl Estate {
    /// Validated coordinate of the property; the geofence target point.
    pub fn location(&self) -> Result<GeoPoint, InvalidInput> {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Case-insensitive substring match on the description. An empty query
    /// matches everything.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim();
        query.is_empty()
            || self
                .description
                .to_lowercase()
                .contains(&query.to_lowercase())
    }

    pub fn owner_contact(&self, fallback_phone: Option<&str>) -> Option<OwnerContact> {
        self.owner_phone
            .as_deref()
            .filter(|phone| !phone.trim().is_empty())
            .or(fallback_phone)
            .map(OwnerContact::new)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

fn degrees<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Scalar::deserialize(deserializer)? {
        Scalar::Number(value) => Ok(value),
        Scalar::Text(raw) => parse_degrees(&raw).map_err(serde::de::Error::custom),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<EstateId, D::Error>
where
    D: Deserializer<'de>,
{
    match Scalar::deserialize(deserializer)? {
        Scalar::Text(raw) => Ok(EstateId(raw)),
        Scalar::Number(value) if value.fract() == 0.0 => Ok(EstateId(format!("{value:.0}"))),
        Scalar::Number(value) => Err(serde::de::Error::custom(format!(
            "estate id {value} is not an integer"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Estate {
        serde_json::from_str(json).expect("estate parses")
    }

    #[test]
    fn accepts_string_coordinates_and_numeric_id() {
        let estate = parse(
            r#"{"id":12,"title":"t","description":"Sunny flat","latitude":"40.5","longitude":"-75.25","imagerUrl":"u","createdAt":"2025-01-21T09:14:00.000Z"}"#,
        );
        assert_eq!(estate.id, EstateId("12".to_string()));
        assert_eq!(estate.latitude, 40.5);
        assert_eq!(estate.longitude, -75.25);
        assert_eq!(estate.image_url.as_deref(), Some("u"));
        assert!(estate.created_at.is_some());
        assert!(estate.location().is_ok());
    }

    #[test]
    fn rejects_unparsable_coordinates() {
        let result = serde_json::from_str::<Estate>(
            r#"{"id":"1","latitude":"north","longitude":"-75"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_location_is_invalid_input() {
        let estate = parse(r#"{"id":"1","latitude":95,"longitude":10}"#);
        assert_eq!(estate.location(), Err(InvalidInput::Latitude(95.0)));
    }

    #[test]
    fn search_is_case_insensitive_on_description() {
        let estate = parse(r#"{"id":"1","description":"Quiet Garden Cottage","latitude":0,"longitude":0}"#);
        assert!(estate.matches("garden"));
        assert!(estate.matches("  COTTAGE "));
        assert!(estate.matches(""));
        assert!(!estate.matches("loft"));
    }

    #[test]
    fn owner_contact_prefers_listing_phone() {
        let with_phone =
            parse(r#"{"id":"1","latitude":0,"longitude":0,"ownerPhone":"555-0101"}"#);
        let without = parse(r#"{"id":"2","latitude":0,"longitude":0,"ownerPhone":" "}"#);

        assert_eq!(
            with_phone.owner_contact(Some("555-9999")).map(|c| c.dial_uri()),
            Some("tel:5550101".to_string())
        );
        assert_eq!(
            without.owner_contact(Some("555-9999")).map(|c| c.dial_uri()),
            Some("tel:5559999".to_string())
        );
        assert!(without.owner_contact(None).is_none());
    }
}
