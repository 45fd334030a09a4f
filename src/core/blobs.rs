use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use uuid::Uuid;

use super::cache::EntityCache;
use super::entity::Entity;
use super::error::{BlobCleanupError, CacheError, GatewayError};
use super::note::{Note, NoteDraft, NotePatch};
use crate::sync::BlobStore;

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

/// `src` of every `<img>` in an HTML fragment, in document order, without duplicates.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for caps in IMG_SRC.captures_iter(html) {
        let Some(src) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let src = src.as_str().trim().replace("&amp;", "&");
        if !src.is_empty() && !urls.contains(&src) {
            urls.push(src);
        }
    }
    urls
}

/// Image URLs under `bucket` that `old_content` references and `new_content` no longer does.
pub fn diff_referenced_blobs(old_content: &str, new_content: &str, bucket: &str) -> Vec<String> {
    let marker = format!("{}/", bucket);
    let kept = extract_image_urls(new_content);
    extract_image_urls(old_content)
        .into_iter()
        .filter(|url| url.contains(&marker) && !kept.contains(url))
        .collect()
}

/// Storage path of a blob URL: everything after `<bucket>/`, minus any query string.
pub fn storage_path(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("{}/", bucket);
    let (_, rest) = url.split_once(&marker)?;
    let path = rest.split(['?', '#']).next().unwrap_or(rest);
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Keeps uploaded images in step with the notes that embed them.
///
/// Saves and deletes hold the note's claim for their whole run, so a note
/// that is busy or unknown never loses images. A delete only removes images
/// once the backend has dropped the row. Images another cached note still
/// embeds are never removed. Blob removal is best-effort: a
/// storage failure is logged and never fails the save or delete.
pub struct BlobLifecycle {
    notes: Arc<EntityCache<Note>>,
    blobs: Arc<dyn BlobStore>,
}

impl BlobLifecycle {
    pub fn new(notes: Arc<EntityCache<Note>>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { notes, blobs }
    }

    pub fn notes(&self) -> &EntityCache<Note> {
        &self.notes
    }

    /// New note with the placeholder title and empty content.
    pub async fn create_note(&self) -> Result<Note, CacheError> {
        self.notes.create(NoteDraft::default()).await
    }

    /// Store an image under `<owner>/<uuid>.<ext>` and return its public URL.
    pub async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, GatewayError> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
            .unwrap_or("bin");
        let path = format!("{}/{}.{}", self.notes.owner_id(), Uuid::new_v4(), extension);
        let url = self
            .blobs
            .upload(&path, bytes, content_type_for(extension))
            .await?;
        log::info!("Uploaded image {}", path);
        Ok(url)
    }

    /// Persist a note's title and content. Images the last saved revision
    /// referenced and the new content drops are removed from storage first,
    /// while the note is claimed.
    pub async fn save(&self, id: Uuid, title: String, content: String) -> Result<Note, CacheError> {
        let patch = NotePatch {
            title: Some(title),
            content: Some(content),
            ..NotePatch::default()
        };
        Note::validate_patch(&patch)?;
        let claim = self.notes.claim(id)?;
        let previous = claim.current().ok_or(CacheError::UnknownEntity { id })?;

        let bucket = self.blobs.bucket();
        let new_content = patch.content.as_deref().unwrap_or_default();
        let orphans = self.unshared_paths(id, diff_referenced_blobs(&previous.content, new_content, bucket));

        if let Err(e) = self.remove_blobs(orphans).await {
            log::warn!("Note {}: {}", id, e);
        }
        claim.patch(patch).await
    }

    /// Delete a note, then the images only it referenced.
    pub async fn delete(&self, id: Uuid) -> Result<(), CacheError> {
        let claim = self.notes.claim(id)?;
        let note = claim.current().ok_or(CacheError::UnknownEntity { id })?;
        let paths = self.unshared_paths(id, extract_image_urls(&note.content));

        claim.remove().await?;
        if let Err(e) = self.remove_blobs(paths).await {
            log::warn!("Note {}: {}", id, e);
        }
        Ok(())
    }

    /// Storage paths of `urls` that no other cached note embeds.
    fn unshared_paths(&self, id: Uuid, urls: Vec<String>) -> Vec<String> {
        let bucket = self.blobs.bucket();
        let shared: HashSet<String> = self
            .notes
            .snapshot()
            .iter()
            .filter(|note| note.id != id)
            .flat_map(|note| extract_image_urls(&note.content))
            .filter_map(|url| storage_path(&url, bucket))
            .collect();
        urls.iter()
            .filter_map(|url| storage_path(url, bucket))
            .filter(|path| !shared.contains(path))
            .collect()
    }

    async fn remove_blobs(&self, paths: Vec<String>) -> Result<(), BlobCleanupError> {
        if paths.is_empty() {
            return Ok(());
        }
        log::debug!("Removing {} image(s) from storage: {:?}", paths.len(), paths);
        match self.blobs.remove(&paths).await {
            Ok(()) => Ok(()),
            Err(source) => Err(BlobCleanupError { paths, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::EntityGateway;
    use crate::sync::memory::{MemoryBlobs, MemoryStore};
    use chrono::Utc;

    const BASE: &str = "https://demo.example.co";

    fn url(path: &str) -> String {
        format!("{}/storage/v1/object/public/note-images/{}", BASE, path)
    }

    fn img(path: &str) -> String {
        format!(r#"<p><img src="{}" alt=""></p>"#, url(path))
    }

    #[test]
    fn extracts_both_quote_styles() {
        let html = r#"<p>a</p><IMG class="x" src='https://a/1.png'><img alt="b" src="https://a/2.png"/><img src="https://a/1.png">"#;
        assert_eq!(
            extract_image_urls(html),
            vec!["https://a/1.png".to_string(), "https://a/2.png".to_string()]
        );
    }

    #[test]
    fn diff_returns_images_only_in_old_content() {
        let old = format!("{}{}{}", img("u/a.png"), img("u/b.png"), img("u/c.png"));
        let new = format!("{}{}", img("u/b.png"), img("u/d.png"));
        assert_eq!(
            diff_referenced_blobs(&old, &new, "note-images"),
            vec![url("u/a.png"), url("u/c.png")]
        );
    }

    #[test]
    fn diff_ignores_foreign_images() {
        let old = r#"<img src="https://elsewhere.example/cat.gif">"#;
        assert!(diff_referenced_blobs(old, "", "note-images").is_empty());
    }

    #[test]
    fn storage_path_strips_prefix_and_query() {
        assert_eq!(
            storage_path(&format!("{}?t=1", url("u/a.png")), "note-images"),
            Some("u/a.png".to_string())
        );
        assert_eq!(storage_path("https://x/other/a.png", "note-images"), None);
    }

    struct Fixture {
        store: Arc<MemoryStore<Note>>,
        blobs: Arc<MemoryBlobs>,
        lifecycle: BlobLifecycle,
        ids: Vec<Uuid>,
    }

    /// One note per entry in `contents`, and blobs `u/a.png`, `u/b.png`, `u/c.png`.
    async fn fixture(contents: Vec<String>) -> Fixture {
        let owner = Uuid::new_v4();
        let notes: Vec<Note> = contents
            .into_iter()
            .map(|content| {
                let draft = NoteDraft {
                    title: "Trip".to_string(),
                    content,
                };
                Note::from_draft(Uuid::new_v4(), owner, &draft, Utc::now())
            })
            .collect();
        let ids = notes.iter().map(|n| n.id).collect();
        let store = Arc::new(MemoryStore::with_rows(owner, notes));
        let cache = Arc::new(EntityCache::new(owner, store.clone() as Arc<dyn EntityGateway<Note>>));
        cache.init().await.unwrap();

        let blobs = Arc::new(MemoryBlobs::new("note-images", BASE));
        for path in ["u/a.png", "u/b.png", "u/c.png"] {
            blobs.insert(path, vec![1, 2, 3]);
        }
        let lifecycle = BlobLifecycle::new(cache, blobs.clone() as Arc<dyn BlobStore>);
        Fixture {
            store,
            blobs,
            lifecycle,
            ids,
        }
    }

    async fn setup(content: String) -> (Arc<MemoryBlobs>, BlobLifecycle, Uuid) {
        let f = fixture(vec![content]).await;
        (f.blobs, f.lifecycle, f.ids[0])
    }

    #[tokio::test]
    async fn save_removes_dropped_images() {
        let old = format!("{}{}", img("u/a.png"), img("u/b.png"));
        let (blobs, lifecycle, id) = setup(old).await;

        let saved = lifecycle
            .save(id, "Trip".to_string(), img("u/b.png"))
            .await
            .unwrap();
        assert_eq!(saved.content, img("u/b.png"));
        assert_eq!(blobs.paths(), vec!["u/b.png".to_string(), "u/c.png".to_string()]);
    }

    #[tokio::test]
    async fn save_proceeds_when_storage_fails() {
        let (blobs, lifecycle, id) = setup(img("u/a.png")).await;
        blobs.set_fail_removals(true);

        let saved = lifecycle
            .save(id, "Renamed".to_string(), String::new())
            .await
            .unwrap();
        assert_eq!(saved.title, "Renamed");
        assert_eq!(lifecycle.notes().get(id).unwrap().content, "");
        assert!(blobs.paths().contains(&"u/a.png".to_string()));
    }

    #[tokio::test]
    async fn save_with_empty_title_touches_nothing() {
        let (blobs, lifecycle, id) = setup(img("u/a.png")).await;
        let err = lifecycle
            .save(id, " ".to_string(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
        assert_eq!(blobs.paths().len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_note_and_its_images() {
        let (blobs, lifecycle, id) = setup(format!("{}{}", img("u/a.png"), img("u/c.png"))).await;
        lifecycle.delete(id).await.unwrap();
        assert!(lifecycle.notes().is_empty());
        assert_eq!(blobs.paths(), vec!["u/b.png".to_string()]);
    }

    #[tokio::test]
    async fn delete_proceeds_when_storage_fails() {
        let (blobs, lifecycle, id) = setup(img("u/a.png")).await;
        blobs.set_fail_removals(true);
        lifecycle.delete(id).await.unwrap();
        assert!(lifecycle.notes().get(id).is_none());
    }

    #[tokio::test]
    async fn upload_uses_owner_prefix() {
        let (blobs, lifecycle, _) = setup(String::new()).await;
        let owner = lifecycle.notes().owner_id();
        let public = lifecycle.upload_image("photo.JPG", vec![9]).await.unwrap();
        assert!(public.starts_with(&format!(
            "{}/storage/v1/object/public/note-images/{}/",
            BASE, owner
        )));
        assert!(public.ends_with(".JPG"));
        assert_eq!(blobs.paths().len(), 4);
    }

    #[tokio::test]
    async fn new_note_gets_placeholder_title() {
        let (_, lifecycle, _) = setup(String::new()).await;
        let note = lifecycle.create_note().await.unwrap();
        assert_eq!(note.title, "Untitled Note");
        assert_eq!(lifecycle.notes().snapshot()[0].id, note.id);
    }

    #[tokio::test]
    async fn busy_save_keeps_images() {
        let (blobs, lifecycle, id) = setup(img("u/a.png")).await;
        let claim = lifecycle.notes().claim(id).unwrap();

        let err = lifecycle
            .save(id, "Trip".to_string(), String::new())
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::Busy { id });
        assert_eq!(lifecycle.notes().get(id).unwrap().content, img("u/a.png"));
        assert_eq!(blobs.paths().len(), 3);

        drop(claim);
        lifecycle
            .save(id, "Trip".to_string(), String::new())
            .await
            .unwrap();
        assert_eq!(blobs.paths(), vec!["u/b.png".to_string(), "u/c.png".to_string()]);
    }

    #[tokio::test]
    async fn busy_delete_keeps_note_and_images() {
        let (blobs, lifecycle, id) = setup(img("u/a.png")).await;
        let _claim = lifecycle.notes().claim(id).unwrap();

        assert_eq!(lifecycle.delete(id).await, Err(CacheError::Busy { id }));
        assert!(lifecycle.notes().get(id).is_some());
        assert_eq!(blobs.paths().len(), 3);
    }

    #[tokio::test]
    async fn denied_delete_keeps_images() {
        let f = fixture(vec![img("u/a.png")]).await;
        let id = f.ids[0];
        f.store.revoke(id, Uuid::new_v4(), |n, o| n.owner_id = o);

        assert_eq!(f.lifecycle.delete(id).await, Err(CacheError::Denied { id }));
        assert!(f.lifecycle.notes().get(id).is_some());
        assert_eq!(f.blobs.paths().len(), 3);
    }

    #[tokio::test]
    async fn images_shared_with_another_note_survive() {
        let f = fixture(vec![
            format!("{}{}", img("u/a.png"), img("u/b.png")),
            img("u/a.png"),
        ])
        .await;
        let (first, second) = (f.ids[0], f.ids[1]);

        f.lifecycle
            .save(first, "Trip".to_string(), String::new())
            .await
            .unwrap();
        assert_eq!(f.blobs.paths(), vec!["u/a.png".to_string(), "u/c.png".to_string()]);

        f.lifecycle.delete(second).await.unwrap();
        assert_eq!(f.blobs.paths(), vec!["u/c.png".to_string()]);
    }
}
