use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Optional access limits for a short link. At most one per link.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "short_link_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub short_link_id: i32,
    pub expires_at: Option<DateTimeUtc>,
    pub max_clicks: Option<i32>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::short_links::Entity",
        from = "Column::ShortLinkId",
        to = "super::short_links::Column::Id",
        on_delete = "Cascade"
    )]
    ShortLink,
}

impl Related<super::short_links::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShortLink.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
