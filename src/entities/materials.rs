use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Material kind that accepts student submissions
pub const KIND_ASSIGNMENT: &str = "assignment";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "materials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub subject_id: i32,
    pub title: String,
    /// "lecture", "assignment", ...
    pub kind: String,
    /// Relative to the upload root
    pub file: Option<String>,
    pub solution_file: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: Option<DateTimeUtc>,
}

impl Model {
    pub fn is_assignment(&self) -> bool {
        self.kind == KIND_ASSIGNMENT
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::submissions::Entity")]
    Submissions,
}

impl Related<super::submissions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Submissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
