//! Tracked property items, their identifiers and attachment points.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, Result};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// A user who can hold property.
    UserId,
    "user"
);
numeric_id!(
    /// A uniquely serialized physical item.
    PropertyId,
    "property"
);
numeric_id!(
    /// A custody-change intent.
    TransferId,
    "transfer"
);

/// Canonical category identifier.
///
/// Categories are compared by canonical form only: surrounding whitespace is
/// dropped and letters are upper-cased, so `" optic "` and `"OPTIC"` match.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Category {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named mounting position on an attachable parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPoint {
    pub name: String,
    /// Maximum number of mounted components; `None` is unlimited.
    pub capacity: Option<u32>,
    /// Component categories this slot accepts. Empty accepts nothing.
    pub accepts: BTreeSet<Category>,
}

impl AttachmentPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: None,
            accepts: BTreeSet::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn accepting<I, C>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Category>,
    {
        self.accepts.extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn accepts(&self, category: &Category) -> bool {
        self.accepts.contains(category)
    }

    pub fn is_full(&self, occupied: usize) -> bool {
        self.capacity
            .is_some_and(|capacity| occupied >= capacity as usize)
    }
}

/// Lifecycle of a property record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyStatus {
    Active,
    /// An unresolved transfer request names this property as its subject.
    InTransfer,
    Retired,
}

impl fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyStatus::Active => f.write_str("active"),
            PropertyStatus::InTransfer => f.write_str("in-transfer"),
            PropertyStatus::Retired => f.write_str("retired"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: PropertyId,
    pub serial_number: String,
    pub name: String,
    pub category: Category,
    pub holder: UserId,
    pub status: PropertyStatus,
    pub is_attachable: bool,
    pub attachment_points: Vec<AttachmentPoint>,
    /// Parent categories this item may be mounted on. Empty attaches to none.
    pub compatible_with: BTreeSet<Category>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Property {
    pub fn attachment_point(&self, name: &str) -> Option<&AttachmentPoint> {
        self.attachment_points.iter().find(|p| p.name == name)
    }

    /// Whether any attachment point accepts `category`.
    pub fn accepts(&self, category: &Category) -> bool {
        self.attachment_points.iter().any(|p| p.accepts(category))
    }

    pub fn ensure_held_by(&self, user: UserId) -> Result<()> {
        if self.holder != user {
            return Err(CustodyError::NotHolder {
                property: self.id,
                user,
            });
        }
        Ok(())
    }

    /// Fails unless the property is `Active`.
    ///
    /// An `InTransfer` property reports [`CustodyError::TransferPending`].
    pub fn ensure_active(&self) -> Result<()> {
        match self.status {
            PropertyStatus::Active => Ok(()),
            PropertyStatus::InTransfer => Err(CustodyError::TransferPending(self.id)),
            PropertyStatus::Retired => Err(CustodyError::PropertyInactive {
                property: self.id,
                status: self.status,
            }),
        }
    }
}

/// Intake data for a new property record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProperty {
    pub serial_number: String,
    pub name: String,
    pub category: Category,
    pub holder: UserId,
    #[serde(default)]
    pub is_attachable: bool,
    #[serde(default)]
    pub attachment_points: Vec<AttachmentPoint>,
    #[serde(default)]
    pub compatible_with: BTreeSet<Category>,
}

impl NewProperty {
    pub fn new(
        serial_number: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<Category>,
        holder: UserId,
    ) -> Self {
        Self {
            serial_number: serial_number.into(),
            name: name.into(),
            category: category.into(),
            holder,
            is_attachable: false,
            attachment_points: Vec::new(),
            compatible_with: BTreeSet::new(),
        }
    }

    /// Marks the item as a parent with the given attachment points.
    pub fn attachable(mut self, points: impl IntoIterator<Item = AttachmentPoint>) -> Self {
        self.is_attachable = true;
        self.attachment_points.extend(points);
        self
    }

    pub fn compatible_with<I, C>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Category>,
    {
        self.compatible_with
            .extend(categories.into_iter().map(Into::into));
        self
    }

    /// Normalizes and checks the intake record, then builds the property.
    ///
    /// The id is assigned by the store on insert.
    pub fn into_property(self, now: i64) -> Result<Property> {
        let serial_number = self.serial_number.trim().to_string();
        if serial_number.is_empty() {
            return Err(CustodyError::InvalidProperty(
                "serial number must not be empty".into(),
            ));
        }
        if self.category.is_empty() {
            return Err(CustodyError::InvalidProperty(
                "category must not be empty".into(),
            ));
        }
        if !self.is_attachable && !self.attachment_points.is_empty() {
            return Err(CustodyError::InvalidProperty(
                "only attachable items declare attachment points".into(),
            ));
        }
        let mut names = BTreeSet::new();
        for point in &self.attachment_points {
            if point.name.trim().is_empty() {
                return Err(CustodyError::InvalidProperty(
                    "attachment point names must not be empty".into(),
                ));
            }
            if !names.insert(point.name.as_str()) {
                return Err(CustodyError::InvalidProperty(format!(
                    "duplicate attachment point {:?}",
                    point.name
                )));
            }
        }

        Ok(Property {
            id: PropertyId(0),
            serial_number,
            name: self.name.trim().to_string(),
            category: self.category,
            holder: self.holder,
            status: PropertyStatus::Active,
            is_attachable: self.is_attachable,
            attachment_points: self.attachment_points,
            compatible_with: self.compatible_with,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_is_canonical() {
        assert_eq!(Category::new("  optic "), Category::new("OPTIC"));
        assert_eq!(Category::from("Rifle").as_str(), "RIFLE");
    }

    #[test]
    fn test_category_deserializes_canonical() {
        let category: Category = serde_json::from_str("\" laser \"").unwrap();
        assert_eq!(category.as_str(), "LASER");
    }

    #[test]
    fn test_attachment_point_capacity() {
        let unlimited = AttachmentPoint::new("rail");
        assert!(!unlimited.is_full(1_000));

        let single = AttachmentPoint::new("rail-top").with_capacity(1);
        assert!(!single.is_full(0));
        assert!(single.is_full(1));
    }

    #[test]
    fn test_into_property_trims_serial() {
        let property = NewProperty::new(" RIFLE-001 ", "M4", "rifle", UserId(1))
            .into_property(10)
            .unwrap();
        assert_eq!(property.serial_number, "RIFLE-001");
        assert_eq!(property.status, PropertyStatus::Active);
        assert_eq!(property.created_at, 10);
    }

    #[test]
    fn test_into_property_rejects_points_on_plain_item() {
        let mut new = NewProperty::new("OPTIC-7", "ACOG", "optic", UserId(1));
        new.attachment_points.push(AttachmentPoint::new("mount"));
        assert!(matches!(
            new.into_property(0),
            Err(CustodyError::InvalidProperty(_))
        ));
    }

    #[test]
    fn test_into_property_rejects_duplicate_points() {
        let new = NewProperty::new("RIFLE-001", "M4", "rifle", UserId(1)).attachable([
            AttachmentPoint::new("rail-top"),
            AttachmentPoint::new("rail-top"),
        ]);
        assert!(matches!(
            new.into_property(0),
            Err(CustodyError::InvalidProperty(_))
        ));
    }

    #[test]
    fn test_ensure_active() {
        let mut property = NewProperty::new("RIFLE-001", "M4", "rifle", UserId(1))
            .into_property(0)
            .unwrap();
        assert!(property.ensure_active().is_ok());

        property.status = PropertyStatus::InTransfer;
        assert!(matches!(
            property.ensure_active(),
            Err(CustodyError::TransferPending(_))
        ));

        property.status = PropertyStatus::Retired;
        assert!(matches!(
            property.ensure_active(),
            Err(CustodyError::PropertyInactive { .. })
        ));
    }
}
