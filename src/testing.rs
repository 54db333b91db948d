//! Test fixtures: generated PDFs, a one-shot HTTP responder and stub
//! collaborators for the worker and pool.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::fetcher::{destination, encode_spaces, is_pdf_url, Download, Fetch, Naming};
use crate::model::{DownloadStatus, ExtractStatus, Fillable, SamplingSpec};
use crate::nlp::{Annotate, EnrichError};
use crate::pdf::{Extraction, Inspect, Inspection};

// ── PDFs ──

/// A form widget placed on one page of a generated document.
pub struct FormField {
    page: usize,
    field_type: &'static [u8],
    after_link: bool,
    inherited: bool,
}

impl FormField {
    pub fn on_page(page: usize, field_type: &'static [u8]) -> Self {
        FormField {
            page,
            field_type,
            after_link: false,
            inherited: false,
        }
    }

    /// Put a link annotation ahead of the widget in `/Annots`.
    pub fn after_link(mut self) -> Self {
        self.after_link = true;
        self
    }

    /// Declare `/FT` on a parent field instead of the widget.
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }
}

fn rect() -> Object {
    vec![100.into(), 600.into(), 300.into(), 620.into()].into()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

fn add_widget(doc: &mut Document, field: &FormField) -> Vec<Object> {
    let mut annots = Vec::new();
    if field.after_link {
        let link = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => rect(),
        });
        annots.push(link.into());
    }
    let widget = if field.inherited {
        let parent = doc.add_object(dictionary! {
            "FT" => Object::Name(field.field_type.to_vec()),
            "T" => Object::string_literal("field"),
        });
        doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "Rect" => rect(),
            "Parent" => parent,
        })
    } else {
        doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => Object::Name(field.field_type.to_vec()),
            "Rect" => rect(),
            "T" => Object::string_literal("field"),
        })
    };
    annots.push(widget.into());
    annots
}

/// Build a PDF with one text line per page and an optional form widget.
pub fn build_pdf(page_texts: &[&str], field: Option<FormField>) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::with_capacity(page_texts.len());
    for (i, text) in page_texts.iter().enumerate() {
        let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", escape(text));
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        };
        if let Some(field) = field.as_ref().filter(|f| f.page == i + 1) {
            page.set("Annots", add_widget(&mut doc, field));
        }
        kids.push(doc.add_object(page).into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

pub fn write_pdf(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

// ── HTTP ──

/// Answer exactly one request with `status` and `body`. The receiver yields
/// the request line that was served.
pub async fn serve_once(status: &'static str, body: Vec<u8>) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = vec![0u8; 16 * 1024];
        let n = socket.read(&mut buf).await.unwrap_or(0);
        let request = String::from_utf8_lossy(&buf[..n]).to_string();
        let _ = tx.send(request.lines().next().unwrap_or_default().to_string());

        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
    });

    (addr, rx)
}

// ── Stub collaborators ──

/// Writes `body` to the destination the naming policy picks.
pub struct StubFetcher {
    body: Vec<u8>,
    status: DownloadStatus,
}

impl StubFetcher {
    pub fn serving(body: Vec<u8>) -> Self {
        StubFetcher {
            body,
            status: DownloadStatus::Success,
        }
    }

    /// Leaves a partial file behind and reports failure.
    pub fn failing() -> Self {
        StubFetcher {
            body: b"%PDF-1.4 truncated".to_vec(),
            status: DownloadStatus::Failed,
        }
    }
}

#[async_trait]
impl Fetch for StubFetcher {
    async fn fetch(&self, url: &str, directory: &Path, naming: &Naming) -> Download {
        if !is_pdf_url(url) {
            return Download::not_a_pdf();
        }
        let dest = destination(directory, &encode_spaces(url), naming).unwrap();
        tokio::fs::create_dir_all(directory).await.unwrap();
        tokio::fs::write(&dest, &self.body).await.unwrap();
        tokio::task::yield_now().await;
        Download {
            path: Some(dest),
            status: self.status,
        }
    }
}

/// Fixed answers, degraded to failures when the file is not on disk.
pub struct StubInspector {
    pub pages: Option<u32>,
    pub fillable: Fillable,
    pub text: &'static str,
    pub panic_on_extract: bool,
}

impl Default for StubInspector {
    fn default() -> Self {
        StubInspector {
            pages: Some(3),
            fillable: Fillable::NotFillable,
            text: "stub text",
            panic_on_extract: false,
        }
    }
}

#[async_trait]
impl Inspect for StubInspector {
    async fn inspect(&self, path: &Path, _sampling: SamplingSpec) -> Inspection {
        tokio::task::yield_now().await;
        if self.panic_on_extract {
            panic!("extractor blew up on {}", path.display());
        }
        if !path.exists() {
            return Inspection::failed();
        }
        Inspection {
            total_pages: self.pages,
            is_fillable: self.fillable,
            extraction: Extraction {
                text: Some(self.text.to_string()),
                status: ExtractStatus::Success,
            },
        }
    }
}

/// Returns `Some(value)` as the annotation, or a shape error for `None`.
pub struct StubAnnotator(pub Option<Value>);

#[async_trait]
impl Annotate for StubAnnotator {
    async fn annotate(&self, _text: &str) -> Result<Value, EnrichError> {
        self.0.clone().ok_or(EnrichError::Shape("sentences[0]"))
    }
}
