//! In-process fakes shared by the unit tests.

use crate::drive::{StorageBackend, StorageError, StoredFile};
use crate::pdf::fetch::{DocumentSource, SourceError, SourceResponse};
use crate::tasks::{MemoryTaskStore, StoreError, Task, TaskId, TaskStore, Transition};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type Scripted = Result<SourceResponse, SourceError>;

/// Serves canned responses per URL. The last scripted response repeats.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, responses: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn status(code: u16) -> SourceResponse {
        SourceResponse {
            status: code,
            content_type: Some("text/html".into()),
            body: Bytes::from_static(b"<html>error</html>"),
        }
    }
}

#[async_trait]
impl DocumentSource for ScriptedSource {
    async fn get(&self, url: &str) -> Result<SourceResponse, SourceError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(url) else {
            return Err(SourceError::Other(format!("no script for {url}")));
        };
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.unwrap_or_else(|| Err(SourceError::Other(format!("script for {url} is empty"))))
    }
}

pub fn pdf_response(body: Vec<u8>) -> SourceResponse {
    SourceResponse {
        status: 200,
        content_type: Some("application/pdf".into()),
        body: Bytes::from(body),
    }
}

fn media_box() -> Object {
    Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(288),
        Object::Integer(432),
    ])
}

fn build_pdf(tags: &[&str], media_box_on_tree: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for tag in tags {
        let content_id = doc.add_object(Stream::new(Dictionary::new(), b"0 0 m".to_vec()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "LabelTag" => Object::string_literal(*tag),
        };
        if !media_box_on_tree {
            page.set("MediaBox", media_box());
        }
        kids.push(Object::Reference(doc.add_object(page)));
    }
    let mut pages = dictionary! {
        "Type" => "Pages",
        "Count" => tags.len() as i64,
        "Kids" => kids,
    };
    if media_box_on_tree {
        pages.set("MediaBox", media_box());
    }
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// A PDF with one page per tag; each page carries its tag so merged output
/// can be checked for order.
pub fn pdf_with_pages(tags: &[&str]) -> Vec<u8> {
    build_pdf(tags, false)
}

pub fn pdf_with_inherited_media_box() -> Vec<u8> {
    build_pdf(&["INHERITED"], true)
}

pub fn empty_pdf() -> Vec<u8> {
    build_pdf(&[], false)
}

pub fn page_tags(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let page = doc.get_object(*id).unwrap().as_dict().unwrap();
            let tag = page.get(b"LabelTag").unwrap().as_str().unwrap();
            String::from_utf8_lossy(tag).into_owned()
        })
        .collect()
}

#[derive(Default)]
struct FakeStorageState {
    events: Vec<String>,
    create_errors: VecDeque<StorageError>,
    link_errors: VecDeque<StorageError>,
    public: Vec<String>,
    fail_forced_refresh: bool,
    panic_on_create: bool,
    uploads: Vec<(String, Bytes)>,
}

/// Records every backend call; failures are scripted per call kind.
#[derive(Default)]
pub struct FakeStorage {
    state: Mutex<FakeStorageState>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, errors: Vec<StorageError>) {
        self.state.lock().unwrap().create_errors = errors.into();
    }

    pub fn fail_link(&self, errors: Vec<StorageError>) {
        self.state.lock().unwrap().link_errors = errors.into();
    }

    /// Ids of files that are currently shared and not deleted.
    pub fn public_files(&self) -> Vec<String> {
        self.state.lock().unwrap().public.clone()
    }

    pub fn fail_forced_refresh(&self) {
        self.state.lock().unwrap().fail_forced_refresh = true;
    }

    pub fn panic_on_create(&self) {
        self.state.lock().unwrap().panic_on_create = true;
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn last_upload(&self) -> Option<(String, Bytes)> {
        self.state.lock().unwrap().uploads.last().cloned()
    }
}

#[async_trait]
impl StorageBackend for FakeStorage {
    async fn refresh_credentials(&self, force: bool) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if force {
            state.events.push("refresh:force".into());
            if state.fail_forced_refresh {
                return Err(StorageError::Credentials("refresh token revoked".into()));
            }
        } else {
            state.events.push("refresh".into());
        }
        Ok(())
    }

    async fn create_file(
        &self,
        name: &str,
        folder_id: Option<&str>,
        _mime_type: &str,
        content: Bytes,
    ) -> Result<StoredFile, StorageError> {
        let mut state = self.state.lock().unwrap();
        state
            .events
            .push(format!("create:{name}@{}", folder_id.unwrap_or("-")));
        if state.panic_on_create {
            drop(state);
            panic!("storage exploded");
        }
        if let Some(err) = state.create_errors.pop_front() {
            return Err(err);
        }
        state.uploads.push((name.to_string(), content));
        let id = format!("file-{}", state.uploads.len());
        Ok(StoredFile {
            id,
            web_view_link: None,
        })
    }

    async fn share_publicly(&self, file_id: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("share:{file_id}"));
        state.public.push(file_id.to_string());
        Ok(())
    }

    async fn shareable_link(&self, file: &StoredFile) -> Result<String, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("link:{}", file.id));
        if let Some(err) = state.link_errors.pop_front() {
            return Err(err);
        }
        Ok(format!("https://drive.example/{}/view", file.id))
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("delete:{file_id}"));
        state.public.retain(|id| id != file_id);
        Ok(())
    }
}

/// Memory store whose writes and scans can be made to fail a set number of
/// times with a backend error.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryTaskStore,
    failing_completes: AtomicUsize,
    failing_fails: AtomicUsize,
    failing_scans: AtomicUsize,
    scans: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryTaskStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_completes(&self, times: usize) {
        self.failing_completes.store(times, Ordering::SeqCst);
    }

    pub fn fail_fails(&self, times: usize) {
        self.failing_fails.store(times, Ordering::SeqCst);
    }

    pub fn fail_scans(&self, times: usize) {
        self.failing_scans.store(times, Ordering::SeqCst);
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create(&self, owner_id: &str, urls: Vec<String>) -> Result<Task, StoreError> {
        self.inner.create(owner_id, urls).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.inner.get(id).await
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Task>, StoreError> {
        self.inner.list_for_owner(owner_id).await
    }

    async fn list_pending(&self, exclude: &[TaskId], limit: usize) -> Result<Vec<Task>, StoreError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_scans) {
            return Err(StoreError::Backend("HTTP 503".into()));
        }
        self.inner.list_pending(exclude, limit).await
    }

    async fn list_stalled(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        self.inner.list_stalled(started_before, limit).await
    }

    async fn transition(&self, id: TaskId, transition: Transition) -> Result<Task, StoreError> {
        let failing = match transition {
            Transition::Complete { .. } => take_failure(&self.failing_completes),
            Transition::Fail { .. } => take_failure(&self.failing_fails),
            _ => false,
        };
        if failing {
            return Err(StoreError::Backend("HTTP 503".into()));
        }
        self.inner.transition(id, transition).await
    }
}
