use crate::entities::{prelude::*, *};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter};

use super::{FileService, UploadError};

// Deletes remove files first and records second. The caller owns the
// connection and rolls back on error; a file that is already gone does not
// stop the record from being removed.
impl FileService {
    async fn remove_stored(&self, relative_path: Option<&str>) -> bool {
        match relative_path {
            Some(path) if !path.is_empty() => {
                let removed = self.storage.delete_file(path).await;
                if !removed {
                    tracing::warn!("File {} was already missing", path);
                }
                removed
            }
            _ => false,
        }
    }

    /// Returns whether a file was removed from disk.
    pub async fn delete_submission<C: ConnectionTrait>(
        &self,
        db: &C,
        submission_id: i32,
    ) -> Result<bool, UploadError> {
        let submission = Submissions::find_by_id(submission_id)
            .one(db)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("Submission {}", submission_id)))?;

        let removed = self.remove_stored(submission.file.as_deref()).await;
        submission.delete(db).await?;

        tracing::info!("🗑️ Submission {} deleted", submission_id);
        Ok(removed)
    }

    /// Removes every submission file, the material file and the solution
    /// file, then the submission rows and the material row.
    pub async fn delete_material<C: ConnectionTrait>(
        &self,
        db: &C,
        material_id: i32,
    ) -> Result<(), UploadError> {
        let material = Materials::find_by_id(material_id)
            .one(db)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("Material {}", material_id)))?;

        let submissions = material.find_related(Submissions).all(db).await?;
        for submission in &submissions {
            self.remove_stored(submission.file.as_deref()).await;
        }
        self.remove_stored(material.file.as_deref()).await;
        self.remove_stored(material.solution_file.as_deref()).await;

        Submissions::delete_many()
            .filter(submissions::Column::MaterialId.eq(material_id))
            .exec(db)
            .await?;
        material.delete(db).await?;

        tracing::info!(
            "🗑️ Material {} deleted with {} submissions",
            material_id,
            submissions.len()
        );
        Ok(())
    }

    /// Returns the number of attachment rows removed.
    pub async fn delete_ticket_attachments<C: ConnectionTrait>(
        &self,
        db: &C,
        ticket_id: i32,
    ) -> Result<u64, UploadError> {
        self.storage.delete_ticket_files(ticket_id).await;

        let res = TicketFiles::delete_many()
            .filter(ticket_files::Column::TicketId.eq(ticket_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }

    /// Removes a user's chat attachments, their submission folders and
    /// their submission rows. Returns the number of rows removed.
    pub async fn delete_user_files<C: ConnectionTrait>(
        &self,
        db: &C,
        user_id: i32,
    ) -> Result<u64, UploadError> {
        if !self.storage.delete_user_files(user_id).await {
            tracing::warn!("Some files of user {} could not be removed", user_id);
        }

        let res = Submissions::delete_many()
            .filter(submissions::Column::UserId.eq(user_id))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}
