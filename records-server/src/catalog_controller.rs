//! The five unique-named lookup catalogs share one controller: list is
//! open to any authenticated caller, create and delete are admin-only.

use actix_web::{web, HttpResponse, Scope};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use slog::info;

use common::api_error::ApiError;
use common::validation::{validate_str, Rule};
use database::entities::{
    CatalogEntry, COLL_FIELDS, COLL_MEDICATIONS, COLL_PURPOSES, COLL_RECORD_TYPES,
    COLL_SPECIALIZATIONS,
};

use crate::common_utils::parse_id;
use crate::guards::RequireLevel;
use crate::AppState;

#[derive(Clone, Copy)]
pub(crate) struct CatalogSpec {
    pub(crate) path: &'static str,
    pub(crate) collection: &'static str,
    pub(crate) entity: &'static str,
}

pub(crate) const CATALOGS: [CatalogSpec; 5] = [
    CatalogSpec {
        path: "/fields",
        collection: COLL_FIELDS,
        entity: "field",
    },
    CatalogSpec {
        path: "/medications",
        collection: COLL_MEDICATIONS,
        entity: "medication",
    },
    CatalogSpec {
        path: "/record-types",
        collection: COLL_RECORD_TYPES,
        entity: "record type",
    },
    CatalogSpec {
        path: "/specializations",
        collection: COLL_SPECIALIZATIONS,
        entity: "specialization",
    },
    CatalogSpec {
        path: "/purposes",
        collection: COLL_PURPOSES,
        entity: "purpose",
    },
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CatalogParams {
    pub(crate) name: String,
}

async fn list_catalog(
    app_state: web::Data<AppState>,
    spec: CatalogSpec,
) -> Result<HttpResponse, ApiError> {
    let cursor = app_state.db.catalog(spec.collection).find(None, None).await?;
    let entries: Vec<CatalogEntry> = cursor.try_collect().await?;
    Ok(HttpResponse::Ok().json(entries))
}

async fn create_catalog(
    app_state: web::Data<AppState>,
    params: web::Json<CatalogParams>,
    spec: CatalogSpec,
) -> Result<HttpResponse, ApiError> {
    let params = params.into_inner();
    validate_str("name", &params.name, &[Rule::MinLen(1), Rule::MaxLen(120)])
        .map_err(ApiError::Validation)?;

    if app_state.db.name_taken(spec.collection, &params.name).await? {
        return Err(ApiError::Conflict(format!(
            "{} name already exists",
            spec.entity
        )));
    }

    let mut entry = CatalogEntry {
        id: None,
        name: params.name,
    };
    let inserted = app_state
        .db
        .catalog(spec.collection)
        .insert_one(&entry, None)
        .await?;
    entry.id = inserted.inserted_id.as_object_id();

    info!(app_state.log, "{} created: {}", spec.entity, entry.name);
    Ok(HttpResponse::Created().json(entry))
}

async fn delete_catalog(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    spec: CatalogSpec,
) -> Result<HttpResponse, ApiError> {
    let id = parse_id(&path.into_inner())?;
    let result = app_state
        .db
        .catalog(spec.collection)
        .delete_one(doc! { "_id": id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::NoContent().finish())
}

pub(crate) fn scope(spec: CatalogSpec) -> Scope {
    web::scope(spec.path)
        .service(
            web::resource("")
                .wrap(RequireLevel::admin().writes_only())
                .route(web::get().to(move |state: web::Data<AppState>| list_catalog(state, spec)))
                .route(web::post().to(
                    move |state: web::Data<AppState>, params: web::Json<CatalogParams>| {
                        create_catalog(state, params, spec)
                    },
                )),
        )
        .service(
            web::resource("/{id}")
                .wrap(RequireLevel::admin())
                .route(web::delete().to(
                    move |state: web::Data<AppState>, path: web::Path<String>| {
                        delete_catalog(state, path, spec)
                    },
                )),
        )
}
