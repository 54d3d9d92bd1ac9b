use super::fetch::FetchResult;
use crate::tasks::FailedUrl;
use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, warn};

/// Attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Outcome of combining one task's downloads.
#[derive(Debug)]
pub enum MergeResult {
    Merged {
        document: Vec<u8>,
        successful_urls: Vec<String>,
        failed_urls: Vec<FailedUrl>,
    },
    Failed {
        error: String,
        failed_urls: Vec<FailedUrl>,
    },
}

#[derive(Debug, Error)]
enum AppendError {
    #[error("{0}")]
    Pdf(#[from] lopdf::Error),
    #[error("document has no pages")]
    NoPages,
}

/// Collects pages from several documents, in append order, into one output.
#[derive(Default)]
struct PdfAssembler {
    next_id: u32,
    pages: Vec<(ObjectId, Dictionary)>,
    objects: BTreeMap<ObjectId, Object>,
}

impl PdfAssembler {
    fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Appends every page of `bytes`. Nothing is kept if this fails.
    fn append(&mut self, bytes: &[u8]) -> Result<usize, AppendError> {
        let mut doc = Document::load_mem(bytes)?;
        doc.renumber_objects_with(self.next_id);

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(AppendError::NoPages);
        }
        let mut pages = Vec::with_capacity(page_ids.len());
        for id in page_ids {
            let mut page = doc.get_object(id)?.as_dict()?.clone();
            inherit_attributes(&doc, &mut page);
            pages.push((id, page));
        }

        let appended = pages.len();
        self.next_id = doc.max_id + 1;
        self.pages.extend(pages);
        for (id, object) in doc.objects {
            let keep = match object.type_name() {
                Ok(name) => !matches!(
                    name,
                    "Catalog" | "Pages" | "Page" | "Outlines" | "Outline" | "ObjStm" | "XRef"
                ),
                Err(_) => true,
            };
            if keep {
                self.objects.insert(id, object);
            }
        }
        Ok(appended)
    }

    fn finish(self) -> Result<Vec<u8>, lopdf::Error> {
        let mut output = Document::with_version("1.5");
        output.objects = self.objects;
        output.max_id = self.next_id;
        let pages_id = output.new_object_id();

        let mut kids = Vec::with_capacity(self.pages.len());
        for (id, mut page) in self.pages {
            page.set("Parent", pages_id);
            output.objects.insert(id, Object::Dictionary(page));
            kids.push(Object::Reference(id));
        }
        let count = kids.len() as i64;
        output.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = output.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        output.trailer.set("Root", catalog_id);
        output.renumber_objects();
        output.compress();

        let mut buffer = Vec::new();
        output.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

fn inherit_attributes(doc: &Document, page: &mut Dictionary) {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // bounded walk so a cyclic page tree cannot spin forever
    for _ in 0..32 {
        let Some(parent_id) = parent else {
            break;
        };
        let Ok(node) = doc.get_object(parent_id).and_then(Object::as_dict) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key)
                && let Ok(value) = node.get(key)
            {
                page.set(key.to_vec(), value.clone());
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
}

/// Combines fetched documents in input order. A document that cannot be
/// appended moves to the failed list instead of aborting the merge.
pub fn merge_documents(results: Vec<FetchResult>) -> MergeResult {
    let mut assembler = PdfAssembler::new();
    let mut successful_urls = Vec::new();
    let mut failed_urls = Vec::new();
    let mut fetched_any = false;

    for result in results {
        match result {
            FetchResult::Failed { url, error } => failed_urls.push(FailedUrl::new(url, error)),
            FetchResult::Fetched { url, document } => {
                fetched_any = true;
                match assembler.append(&document) {
                    Ok(pages) => {
                        info!(target = "labelhub.merge", url = %url, pages, "pdf_appended");
                        successful_urls.push(url);
                    }
                    Err(err) => {
                        warn!(target = "labelhub.merge", url = %url, error = %err, "pdf_append_failed");
                        failed_urls.push(FailedUrl::new(url, format!("Error during merge: {err}")));
                    }
                }
            }
        }
    }

    if successful_urls.is_empty() {
        let error = if fetched_any {
            "All PDFs failed during merge process"
        } else {
            "No PDFs were successfully downloaded"
        };
        error!(target = "labelhub.merge", failed = failed_urls.len(), "{error}");
        return MergeResult::Failed {
            error: error.to_string(),
            failed_urls,
        };
    }

    match assembler.finish() {
        Ok(document) => {
            info!(target = "labelhub.merge", merged = successful_urls.len(), bytes = document.len(), "pdf_merge_complete");
            MergeResult::Merged {
                document,
                successful_urls,
                failed_urls,
            }
        }
        Err(err) => {
            error!(target = "labelhub.merge", error = %err, "pdf_write_failed");
            failed_urls.extend(
                successful_urls
                    .into_iter()
                    .map(|url| FailedUrl::new(url, "Failed during merge process")),
            );
            MergeResult::Failed {
                error: format!("Error during PDF merge: {err}"),
                failed_urls,
            }
        }
    }
}
