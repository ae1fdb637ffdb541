//! PostgreSQL-backed `TemplateRepository` implementation.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{StoreError, TemplateRepository};
use crate::domain::template::{EmailTemplate, TemplateVariable};

use super::map_diesel_error;
use super::models::{TemplateRow, TemplateVariableRow};
use super::pool::DbPool;
use super::schema::{email_template_variables, email_templates};

/// Diesel-backed implementation of the `TemplateRepository` port.
#[derive(Clone)]
pub struct DieselTemplateRepository {
    pool: DbPool,
}

impl DieselTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for DieselTemplateRepository {
    async fn find_active(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<EmailTemplate>, StoreError> {
        let mut conn = self.pool.get().await?;

        // Id beats slug when both would match.
        let by_id: Option<TemplateRow> = email_templates::table
            .filter(
                email_templates::id
                    .eq(key)
                    .and(email_templates::user_id.eq(user_id))
                    .and(email_templates::is_active.eq(true)),
            )
            .select(TemplateRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        let row = match by_id {
            Some(row) => row,
            None => {
                let by_slug: Option<TemplateRow> = email_templates::table
                    .filter(
                        email_templates::slug
                            .eq(key)
                            .and(email_templates::user_id.eq(user_id))
                            .and(email_templates::is_active.eq(true)),
                    )
                    .select(TemplateRow::as_select())
                    .first(&mut conn)
                    .await
                    .optional()
                    .map_err(map_diesel_error)?;
                match by_slug {
                    Some(row) => row,
                    None => return Ok(None),
                }
            }
        };

        let variables: Vec<TemplateVariableRow> = email_template_variables::table
            .filter(email_template_variables::template_id.eq(&row.id))
            .select(TemplateVariableRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(Some(EmailTemplate {
            id: row.id,
            user_id: row.user_id,
            slug: row.slug,
            subject: row.subject,
            html_content: row.html_content,
            is_active: row.is_active,
            variables: variables
                .into_iter()
                .map(|v| TemplateVariable {
                    name: v.name,
                    default_value: v.default_value,
                })
                .collect(),
        }))
    }
}
