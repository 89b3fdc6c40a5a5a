use crate::config::UserKey;
use crate::entities::{prelude::*, *};
use crate::services::storage::{
    FileKind, FileStorageManager, SavedFileInfo, StoredFileLocation, Upload,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tokio::io::{AsyncRead, AsyncSeek};

use super::{FileService, UploadError};

/// Which column of a material an upload replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaterialSlot {
    File,
    Solution,
}

impl FileService {
    /// Rejects empty names, oversized bodies and (when asked) extensions
    /// outside the attachment set. Returns the measured size.
    async fn validate<R>(
        &self,
        upload: &mut Upload<R>,
        user: Option<&UserKey>,
        check_extension: bool,
    ) -> Result<u64, UploadError>
    where
        R: AsyncSeek + Unpin,
    {
        if upload.filename.trim().is_empty() {
            return Err(UploadError::EmptyFilename);
        }

        let size = FileStorageManager::stream_size(&mut upload.body).await;
        if !self
            .storage
            .validate_file_size(&mut upload.body, None, user)
            .await
        {
            let limit = self.storage.max_file_size_for(user);
            return Err(UploadError::SizeLimitExceeded { size, limit });
        }

        if check_extension && !self.storage.is_allowed_file(&upload.filename, None) {
            return Err(UploadError::UnsupportedExtension(upload.filename.clone()));
        }

        Ok(size)
    }

    /// Writes the body to `location` and runs the optimizer. Optimizer
    /// failures are logged and otherwise ignored.
    async fn store<R>(
        &self,
        upload: Upload<R>,
        size: u64,
        location: &StoredFileLocation,
    ) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let reported = upload.content_length.or(Some(size));
        if !self
            .storage
            .save_file(upload.body, reported, &location.full_path)
            .await
        {
            return Err(UploadError::SaveFailed(location.relative_path.clone()));
        }

        if self.optimizer.should_optimize(&upload.filename) {
            let result = self.optimizer.optimize(&location.full_path).await;
            if !result.success {
                tracing::warn!(
                    "Optimization failed for {}, keeping the original",
                    location.relative_path
                );
            }
        }

        Ok(())
    }

    async fn discard(&self, location: &StoredFileLocation) {
        if !self
            .storage
            .delete_file_in(location.kind, &location.relative_path)
            .await
        {
            tracing::warn!("Could not remove orphaned file {}", location.relative_path);
        }
    }

    async fn find_material(&self, material_id: i32) -> Result<materials::Model, UploadError> {
        Materials::find_by_id(material_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("Material {}", material_id)))
    }

    async fn replace_material_file<R>(
        &self,
        material_id: i32,
        user: Option<&UserKey>,
        mut upload: Upload<R>,
        slot: MaterialSlot,
    ) -> Result<materials::Model, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let material = self.find_material(material_id).await?;
        let size = self.validate(&mut upload, user, false).await?;

        let location = self
            .storage
            .material_upload_path(material.subject_id, &upload.filename)
            .await?;
        self.store(upload, size, &location).await?;

        let previous = match slot {
            MaterialSlot::File => material.file.clone(),
            MaterialSlot::Solution => material.solution_file.clone(),
        };

        let mut active: materials::ActiveModel = material.into();
        match slot {
            MaterialSlot::File => active.file = Set(Some(location.relative_path.clone())),
            MaterialSlot::Solution => {
                active.solution_file = Set(Some(location.relative_path.clone()))
            }
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = match active.update(&self.db).await {
            Ok(m) => m,
            Err(e) => {
                if previous.as_deref() != Some(location.relative_path.as_str()) {
                    self.discard(&location).await;
                }
                return Err(e.into());
            }
        };

        if let Some(old) = previous {
            if old != location.relative_path {
                self.storage.delete_file(&old).await;
            }
        }

        tracing::info!(
            "📎 Material {} {:?} stored at {}",
            material_id,
            slot,
            location.relative_path
        );
        Ok(updated)
    }

    /// Stores the main file of a material, replacing any previous one.
    pub async fn upload_material_file<R>(
        &self,
        material_id: i32,
        user: Option<&UserKey>,
        upload: Upload<R>,
    ) -> Result<materials::Model, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        self.replace_material_file(material_id, user, upload, MaterialSlot::File)
            .await
    }

    pub async fn upload_solution_file<R>(
        &self,
        material_id: i32,
        user: Option<&UserKey>,
        upload: Upload<R>,
    ) -> Result<materials::Model, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        self.replace_material_file(material_id, user, upload, MaterialSlot::Solution)
            .await
    }

    /// Stores a student's answer to an assignment. A second submission by
    /// the same user replaces the first.
    pub async fn submit_solution<R>(
        &self,
        material_id: i32,
        user: &UserKey,
        mut upload: Upload<R>,
    ) -> Result<submissions::Model, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let material = self.find_material(material_id).await?;
        if !material.is_assignment() {
            return Err(UploadError::NotAnAssignment(material_id));
        }

        let size = self.validate(&mut upload, Some(user), false).await?;
        let location = self
            .storage
            .submission_upload_path(material.subject_id, user.id, &upload.filename)
            .await?;
        self.store(upload, size, &location).await?;

        let existing = Submissions::find()
            .filter(submissions::Column::UserId.eq(user.id))
            .filter(submissions::Column::MaterialId.eq(material_id))
            .one(&self.db)
            .await?;

        let previous = existing.as_ref().and_then(|s| s.file.clone());
        let saved = match existing {
            Some(submission) => {
                let mut active: submissions::ActiveModel = submission.into();
                active.file = Set(Some(location.relative_path.clone()));
                active.submitted_at = Set(Utc::now());
                active.update(&self.db).await
            }
            None => {
                submissions::ActiveModel {
                    user_id: Set(user.id),
                    material_id: Set(material_id),
                    file: Set(Some(location.relative_path.clone())),
                    text: Set(None),
                    submitted_at: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(&self.db)
                .await
            }
        };

        let saved = match saved {
            Ok(s) => s,
            Err(e) => {
                if previous.as_deref() != Some(location.relative_path.as_str()) {
                    self.discard(&location).await;
                }
                return Err(e.into());
            }
        };

        if let Some(old) = previous {
            if old != location.relative_path {
                self.storage.delete_file(&old).await;
            }
        }

        tracing::info!(
            "📝 Submission {} by user {} stored at {}",
            saved.id,
            user.id,
            location.relative_path
        );
        Ok(saved)
    }

    /// Saves the valid files of a batch and records them against the ticket.
    /// Files that fail validation are skipped.
    pub async fn attach_ticket_files<R>(
        &self,
        ticket_id: i32,
        user: Option<&UserKey>,
        uploads: Vec<Upload<R>>,
    ) -> Result<Vec<ticket_files::Model>, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let saved = self
            .storage
            .process_ticket_files(ticket_id, uploads, user)
            .await?;

        let mut records = Vec::with_capacity(saved.len());
        for (i, info) in saved.iter().enumerate() {
            let row = ticket_files::ActiveModel {
                ticket_id: Set(ticket_id),
                file_path: Set(info.file_path.clone()),
                file_name: Set(info.file_name.clone()),
                file_size: Set(Some(info.file_size as i64)),
                file_type: Set(Some(info.file_type.as_str().to_string())),
                uploaded_at: Set(Utc::now()),
                ..Default::default()
            };

            match row.insert(&self.db).await {
                Ok(model) => records.push(model),
                Err(e) => {
                    for orphan in &saved[i..] {
                        self.storage
                            .delete_file_in(FileKind::TicketAttachment, &orphan.file_path)
                            .await;
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(records)
    }

    /// Stores a chat attachment. Only attachment extensions are accepted.
    pub async fn upload_chat_file<R>(
        &self,
        user: &UserKey,
        mut upload: Upload<R>,
    ) -> Result<SavedFileInfo, UploadError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let size = self.validate(&mut upload, Some(user), true).await?;
        let location = self
            .storage
            .chat_file_path(user.id, &upload.filename)
            .await?;

        let file_name = upload.filename.clone();
        self.store(upload, size, &location).await?;

        Ok(SavedFileInfo {
            file_path: location.relative_path,
            file_type: FileStorageManager::file_type(&file_name),
            file_name,
            file_size: size,
        })
    }
}
