//! Post editing and revision history.
//!
//! Every change to a post goes through [`save_manual_edit`] and appends an
//! immutable `"manual-edit"` revision; generated drafts start at version 1.

use draft_harness_core::models::{BlogPost, PostStatus, PostUpdate, Revision, RevisionSource};
use draft_harness_core::store::Store;

use crate::error::{ServiceError, ServiceResult};

/// Fields a manual edit may change. Unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ManualEdit {
    pub title: Option<String>,
    pub body: Option<String>,
    pub status: Option<PostStatus>,
}

/// Apply a manual edit and record it as a new revision.
pub async fn save_manual_edit(
    store: &dyn Store,
    post_id: &str,
    edit: &ManualEdit,
) -> ServiceResult<BlogPost> {
    let current = store
        .get_post(post_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("post", post_id))?;

    let body = edit.body.clone().unwrap_or(current.body);
    if body.trim().is_empty() {
        return Err(ServiceError::invalid("post body must not be empty"));
    }
    let title = match edit.title.as_deref().map(str::trim) {
        Some("") => return Err(ServiceError::invalid("post title must not be empty")),
        Some(title) => title.to_string(),
        None => current.title,
    };

    let update = PostUpdate {
        title,
        body,
        status: edit.status.unwrap_or(current.status),
    };
    store
        .update_post(post_id, &update, RevisionSource::ManualEdit)
        .await?
        .ok_or_else(|| ServiceError::not_found("post", post_id))
}

/// Revision history of a post, oldest first.
pub async fn list_revisions(store: &dyn Store, post_id: &str) -> ServiceResult<Vec<Revision>> {
    if store.get_post(post_id).await?.is_none() {
        return Err(ServiceError::not_found("post", post_id));
    }
    Ok(store.list_revisions(post_id).await?)
}
