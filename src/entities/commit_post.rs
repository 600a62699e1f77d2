use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commit_posts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub hex: String,
    pub message: String,
    pub created: i64,
    pub repo_id: i32,
    pub blogger_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
