#![allow(dead_code)]

use chrono::NaiveDateTime;
use synctrack_core::schema::{Entity, Mapping};
use synctrack_core::{CreateFlags, SqlEnum};
use synctrack_derive::{Entity, SqlEnum};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SqlEnum)]
#[sql_enum(store_as_text)]
pub enum Status {
    #[default]
    Draft,
    Published,
    Archived = 10,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SqlEnum)]
pub enum Priority {
    #[default]
    Low = 1,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Product {
    #[column(primary_key, autoincrement)]
    pub id: i64,
    #[column(max_length = 64, collation = "NOCASE")]
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Audit {
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub slug: String,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[table(name = "Articles")]
pub struct Article {
    #[column(primary_key)]
    pub key: Uuid,
    #[column(name = "Headline", not_null, unique)]
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub author_id: Option<i32>,
    #[column(indexed(name = "IX_Slug", order = 2, unique))]
    pub slug: String,
    #[column(indexed(name = "IX_Slug", order = 1, unique))]
    pub section: String,
    #[column(ignore)]
    pub cached_html: String,
    pub sync_guid: Uuid,
    #[column(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Ticket {
    pub id: i32,
    pub customer_id: i32,
    pub subject: String,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Nothing {
    #[column(ignore)]
    pub hidden: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct BadSync {
    pub sync_guid: String,
}

pub fn mapping<T: Entity>() -> Mapping<T> {
    Mapping::build(CreateFlags::NONE).unwrap()
}

pub fn status_label(status: Status) -> Option<&'static str> {
    Status::INFO.label(status.ordinal())
}
