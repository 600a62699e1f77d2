use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "clients")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub client_id: String,
    pub secret_hash: String, // argon2; empty for public clients
    pub name: String,
    pub homepage_uri: Option<String>,
    pub redirect_uris: String, // JSON-encoded Vec<String>
    pub grant_types: String,   // JSON-encoded Vec<String>
    pub scopes: String,        // JSON-encoded Vec<String>
    pub token_endpoint_auth_method: String,
    pub dev_id: Option<i32>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
