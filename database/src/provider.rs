use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use thiserror::Error;

use crate::entities::{
    Account, Appointment, CatalogEntry, Doctor, Hospital, MedicalRecord, Prescription, Profile,
    COLL_ACCOUNTS, COLL_APPOINTMENTS, COLL_DOCTORS, COLL_HOSPITALS, COLL_MEDICAL_RECORDS,
    COLL_PRESCRIPTIONS, COLL_PROFILES,
};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("Record already exists")]
    AlreadyExists,

    #[error("Entity extraction failed: {0}")]
    ExtractionFailed(String),
}

/// The read surface the ownership guards need: load one document of a
/// named collection by id. Kept as a trait so guard logic can be driven
/// by an in-memory store in tests.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn find_document(
        &self,
        collection: &str,
        id: ObjectId,
    ) -> Result<Option<Document>, DbError>;
}

#[derive(Clone)]
pub struct MongoProvider {
    db: mongodb::Database,
}

impl MongoProvider {
    pub async fn connect(url: &str, db_name: &str) -> Result<Self, DbError> {
        let options = ClientOptions::parse(url).await?;
        let client = Client::with_options(options)?;
        Ok(MongoProvider {
            db: client.database(db_name),
        })
    }

    pub fn accounts(&self) -> Collection<Account> {
        self.db.collection(COLL_ACCOUNTS)
    }

    pub fn profiles(&self) -> Collection<Profile> {
        self.db.collection(COLL_PROFILES)
    }

    pub fn hospitals(&self) -> Collection<Hospital> {
        self.db.collection(COLL_HOSPITALS)
    }

    pub fn doctors(&self) -> Collection<Doctor> {
        self.db.collection(COLL_DOCTORS)
    }

    pub fn appointments(&self) -> Collection<Appointment> {
        self.db.collection(COLL_APPOINTMENTS)
    }

    pub fn medical_records(&self) -> Collection<MedicalRecord> {
        self.db.collection(COLL_MEDICAL_RECORDS)
    }

    pub fn prescriptions(&self) -> Collection<Prescription> {
        self.db.collection(COLL_PRESCRIPTIONS)
    }

    /// The five unique-named lookup collections share one document shape.
    pub fn catalog(&self, collection: &str) -> Collection<CatalogEntry> {
        self.db.collection(collection)
    }

    pub async fn exists(&self, collection: &str, id: ObjectId) -> Result<bool, DbError> {
        Ok(self.find_document(collection, id).await?.is_some())
    }

    /// Designated-field uniqueness check used before catalog and hospital
    /// inserts; surfaced to callers as a conflict, not a store error.
    pub async fn name_taken(&self, collection: &str, name: &str) -> Result<bool, DbError> {
        let found = self
            .db
            .collection::<Document>(collection)
            .find_one(doc! { "name": name }, None)
            .await?;
        Ok(found.is_some())
    }

    /// Append `value` to an id list on a related document.
    pub async fn push_ref(
        &self,
        collection: &str,
        id: ObjectId,
        field: &str,
        value: ObjectId,
    ) -> Result<(), DbError> {
        let mut push = Document::new();
        push.insert(field, value);
        self.db
            .collection::<Document>(collection)
            .update_one(doc! { "_id": id }, doc! { "$push": push }, None)
            .await?;
        Ok(())
    }

    /// Remove `value` from an id list on a related document.
    pub async fn pull_ref(
        &self,
        collection: &str,
        id: ObjectId,
        field: &str,
        value: ObjectId,
    ) -> Result<(), DbError> {
        let mut pull = Document::new();
        pull.insert(field, value);
        self.db
            .collection::<Document>(collection)
            .update_one(doc! { "_id": id }, doc! { "$pull": pull }, None)
            .await?;
        Ok(())
    }

    /// Replace `old` with `new` in an id list, in place. The positional
    /// operator keeps the other entries in their original order.
    pub async fn replace_ref(
        &self,
        collection: &str,
        id: ObjectId,
        field: &str,
        old: ObjectId,
        new: ObjectId,
    ) -> Result<(), DbError> {
        let mut filter = Document::new();
        filter.insert("_id", id);
        filter.insert(field, old);
        let mut set = Document::new();
        set.insert(format!("{}.$", field), new);
        self.db
            .collection::<Document>(collection)
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReferenceStore for MongoProvider {
    async fn find_document(
        &self,
        collection: &str,
        id: ObjectId,
    ) -> Result<Option<Document>, DbError> {
        let found = self
            .db
            .collection::<Document>(collection)
            .find_one(doc! { "_id": id }, None)
            .await?;
        Ok(found)
    }
}
