use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

pub const COLL_ACCOUNTS: &str = "accounts";
pub const COLL_PROFILES: &str = "profiles";
pub const COLL_HOSPITALS: &str = "hospitals";
pub const COLL_DOCTORS: &str = "doctors";
pub const COLL_APPOINTMENTS: &str = "appointments";
pub const COLL_MEDICAL_RECORDS: &str = "medical_records";
pub const COLL_PRESCRIPTIONS: &str = "prescriptions";
pub const COLL_FIELDS: &str = "fields";
pub const COLL_MEDICATIONS: &str = "medications";
pub const COLL_RECORD_TYPES: &str = "record_types";
pub const COLL_SPECIALIZATIONS: &str = "specializations";
pub const COLL_PURPOSES: &str = "purposes";

/// Account document. `level` holds the stored integer form of
/// [`crate::roles::AccessLevel`]; `hospital` is populated iff the account
/// is hospital-tier, `profiles` is meaningful iff it is user-tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    /// Stable subject identifier issued by the external identity provider.
    pub subject: String,
    pub level: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital: Option<ObjectId>,
    #[serde(default)]
    pub profiles: Vec<ObjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// A patient under an account. The three id lists are maintained
/// bidirectionally by the service layer, not by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub gender: Gender,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub date_of_birth: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub account: ObjectId,
    #[serde(default)]
    pub appointments: Vec<ObjectId>,
    #[serde(default)]
    pub medical_records: Vec<ObjectId>,
    #[serde(default)]
    pub prescriptions: Vec<ObjectId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    #[serde(default)]
    pub doctors: Vec<ObjectId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub qualifications: String,
    pub practicing_since: i32,
    pub hospital: ObjectId,
    pub specialization: ObjectId,
}

/// Denormalized copy of a hospital embedded at booking time. Immutable
/// history: later renames of the live Hospital must not alter it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalSnapshot {
    pub id: ObjectId,
    pub name: String,
}

/// One bookable time slot. Open (no profile) -> Booked (profile +
/// hospital snapshot) -> Cancelled (flag set, profile retained).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub time_slot: DateTime<Utc>,
    /// The doctor/hospital account that opened the slot.
    pub created_by: ObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital: Option<HospitalSnapshot>,
    #[serde(default)]
    pub cancelled: bool,
}

/// Denormalized copy of a catalog entry (field, record type,
/// specialization) captured when a record is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub id: ObjectId,
    pub name: String,
}

/// Metadata of a stored file; the bytes live in external object storage
/// under the owning record's folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub profile: ObjectId,
    pub created_by: ObjectId,
    pub description: String,
    #[serde(default)]
    pub files: Vec<FileMeta>,
    pub field: CatalogSnapshot,
    pub record_type: CatalogSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<CatalogSnapshot>,
    /// Storage-location key, unique across records.
    pub folder: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub date_on_document: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationEntry {
    pub medication: ObjectId,
    pub dosage: String,
    pub interval: String,
    pub duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub profile: ObjectId,
    pub created_by: ObjectId,
    pub description: String,
    #[serde(default)]
    pub files: Vec<FileMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<CatalogSnapshot>,
    pub medications: Vec<MedicationEntry>,
    pub folder: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub date_on_document: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Unique-named lookup document, one collection per catalog
/// (fields, medications, record types, specializations, purposes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
}

impl CatalogEntry {
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            id: self.id.expect("catalog entry loaded from store has an id"),
            name: self.name.clone(),
        }
    }
}
