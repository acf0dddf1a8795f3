use tracing::debug;

use crate::{AttachmentStore, Folder, FolderStore, NewAttachment, Result};

/// Maps remote folder paths onto stable local folder rows.
pub struct FolderCatalog<'a> {
    store: &'a dyn FolderStore,
}

impl<'a> FolderCatalog<'a> {
    pub fn new(store: &'a dyn FolderStore) -> Self {
        Self { store }
    }

    /// Returns the folder row for `(path, tenant)`, creating it on first sight.
    /// A changed display name is written back; the id and path never change.
    pub async fn get_or_create(
        &self,
        path: &str,
        display_name: &str,
        delimiter: Option<&str>,
        tenant: i64,
    ) -> Result<Folder> {
        if let Some(mut folder) = self.store.folder_by_path(path, tenant).await? {
            if folder.display_name != display_name {
                debug!(folder_id = folder.id, path, display_name, "folder renamed");
                self.store.rename_folder(folder.id, display_name).await?;
                folder.display_name = display_name.to_string();
            }
            return Ok(folder);
        }
        match self
            .store
            .create_folder(path, display_name, delimiter, tenant)
            .await
        {
            Ok(folder) => Ok(folder),
            Err(err) => match self.store.folder_by_path(path, tenant).await? {
                Some(folder) => Ok(folder),
                None => Err(err),
            },
        }
    }
}

/// Records attachment metadata at most once per `(message, part number)`.
pub struct AttachmentIndex<'a> {
    store: &'a dyn AttachmentStore,
}

impl<'a> AttachmentIndex<'a> {
    pub fn new(store: &'a dyn AttachmentStore) -> Self {
        Self { store }
    }

    /// Returns true when a new row was written.
    pub async fn record_if_absent(&self, attachment: &NewAttachment) -> Result<bool> {
        if self
            .store
            .attachment_exists(attachment.message_id, &attachment.part_number)
            .await?
        {
            return Ok(false);
        }
        self.store.insert_attachment(attachment).await?;
        Ok(true)
    }
}
