use lopdf::{Dictionary, Document, Object, ObjectId};

use super::PdfError;

/// Interactive field types: text, choice, button.
const FIELD_TYPES: [&[u8]; 3] = [b"Tx", b"Ch", b"Btn"];

/// Whether any of the first `max_pages` pages (0 = all) carries a form widget.
pub fn has_fillable_page(doc: &Document, max_pages: u32) -> Result<bool, PdfError> {
    let pages = doc.get_pages();
    let limit = match max_pages {
        0 => pages.len(),
        n => n as usize,
    };
    for page_id in pages.values().take(limit) {
        if page_is_fillable(doc, *page_id)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn page_is_fillable(doc: &Document, page_id: ObjectId) -> Result<bool, PdfError> {
    let page = doc.get_dictionary(page_id)?;
    let Ok(annots) = page.get(b"Annots") else {
        return Ok(false);
    };
    let (_, annots) = doc.dereference(annots)?;

    // Every annotation is checked, not only the first one on the page.
    for entry in annots.as_array()? {
        let annot = match entry {
            Object::Reference(id) => doc.get_dictionary(*id)?,
            Object::Dictionary(dict) => dict,
            other => return Err(PdfError::Annotation(format!("{other:?}"))),
        };
        if is_form_widget(doc, annot) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_form_widget(doc: &Document, annot: &Dictionary) -> bool {
    let is_widget = annot
        .get(b"Subtype")
        .and_then(Object::as_name)
        .is_ok_and(|name| name == b"Widget");
    is_widget && field_type(doc, annot).is_some_and(|ft| FIELD_TYPES.iter().any(|t| *t == ft))
}

/// `/FT` of a widget, inherited from its parent field when absent.
fn field_type<'a>(doc: &'a Document, annot: &'a Dictionary) -> Option<&'a [u8]> {
    if let Ok(ft) = annot.get(b"FT").and_then(Object::as_name) {
        return Some(ft);
    }
    let parent = annot.get(b"Parent").and_then(Object::as_reference).ok()?;
    doc.get_dictionary(parent)
        .ok()?
        .get(b"FT")
        .and_then(Object::as_name)
        .ok()
}
